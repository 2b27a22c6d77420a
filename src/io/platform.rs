//! Host platform capabilities: installation id and location permissions

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{info, warn};
use uuid::Uuid;

/// Supplies the platform's per-install identifier
pub trait PlatformIdSource: Send + Sync {
    fn installation_id(&self) -> Option<String>;
}

/// Fixed id, typically from configuration
pub struct StaticPlatformId(pub Option<String>);

impl PlatformIdSource for StaticPlatformId {
    fn installation_id(&self) -> Option<String> {
        self.0.clone().filter(|id| !id.trim().is_empty())
    }
}

/// Id persisted to a file, generated on first use
///
/// Stable for as long as the file survives, like an install-scoped id.
pub struct FilePlatformId {
    path: PathBuf,
}

impl FilePlatformId {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PlatformIdSource for FilePlatformId {
    fn installation_id(&self) -> Option<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let id = content.trim().to_string();
                if !id.is_empty() {
                    return Some(id);
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "platform_id_read_failed");
                return None;
            }
        }

        let id = Uuid::now_v7().simple().to_string();
        match fs::write(&self.path, &id) {
            Ok(()) => {
                info!(path = %self.path.display(), "platform_id_created");
                Some(id)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "platform_id_write_failed");
                None
            }
        }
    }
}

/// Location permission state as granted by the user
pub trait PermissionGate: Send + Sync {
    /// Precise location access
    fn fine_location(&self) -> bool;

    /// Location access while not foregrounded, needed for geofence delivery
    fn background_location(&self) -> bool;
}

/// Grants fixed at startup
pub struct StaticPermissions {
    pub fine_location: bool,
    pub background_location: bool,
}

impl StaticPermissions {
    pub fn granted() -> Self {
        Self { fine_location: true, background_location: true }
    }

    pub fn denied() -> Self {
        Self { fine_location: false, background_location: false }
    }
}

impl PermissionGate for StaticPermissions {
    fn fine_location(&self) -> bool {
        self.fine_location
    }

    fn background_location(&self) -> bool {
        self.background_location
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_blank_is_missing() {
        assert_eq!(StaticPlatformId(Some("  ".to_string())).installation_id(), None);
        assert_eq!(StaticPlatformId(None).installation_id(), None);
        assert_eq!(StaticPlatformId(Some("abc".to_string())).installation_id(), Some("abc".to_string()));
    }

    #[test]
    fn test_file_id_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let source = FilePlatformId::new(dir.path().join("install_id"));

        let first = source.installation_id().unwrap();
        let second = source.installation_id().unwrap();
        assert_eq!(first, second);

        let reopened = FilePlatformId::new(dir.path().join("install_id"));
        assert_eq!(reopened.installation_id().unwrap(), first);
    }

    #[test]
    fn test_file_id_unwritable() {
        let dir = tempfile::tempdir().unwrap();
        let source = FilePlatformId::new(dir.path().join("missing_dir").join("install_id"));
        assert_eq!(source.installation_id(), None);
    }
}
