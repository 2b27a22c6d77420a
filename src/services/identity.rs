//! Device identity derivation
//!
//! The derived id is a name-based (v3) UUID over the platform installation
//! id: MD5 of the raw id bytes with no namespace, then the version and variant
//! bits. Ids match those written by other clients deriving the same way. The
//! raw id never leaves the process; only the derived id is published.

use crate::domain::error::CoreError;
use crate::domain::types::DeviceIdentity;
use crate::io::platform::PlatformIdSource;
use std::sync::Arc;
use md5::{Digest, Md5};
use tracing::{error, info};
use uuid::Builder;

/// Hash a raw platform id into the published device id
pub fn derive_id(raw_platform_id: &str) -> String {
    let digest = Md5::digest(raw_platform_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest);
    Builder::from_md5_bytes(bytes).into_uuid().to_string()
}

pub struct DeviceIdentityProvider {
    source: Arc<dyn PlatformIdSource>,
}

impl DeviceIdentityProvider {
    pub fn new(source: Arc<dyn PlatformIdSource>) -> Self {
        Self { source }
    }

    /// Resolve the platform id and derive this install's identity
    pub fn derive(&self) -> Result<DeviceIdentity, CoreError> {
        let Some(raw) = self.source.installation_id() else {
            error!("platform_id_missing");
            return Err(CoreError::PlatformIdMissing);
        };
        let derived = derive_id(&raw);
        info!(device_id = %derived, "device_identity_derived");
        Ok(DeviceIdentity::new(raw, derived))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::platform::StaticPlatformId;

    #[test]
    fn test_derive_id_is_deterministic() {
        assert_eq!(derive_id("9774d56d682e549c"), derive_id("9774d56d682e549c"));
        assert_ne!(derive_id("9774d56d682e549c"), derive_id("9774d56d682e549d"));
    }

    #[test]
    fn test_derive_id_known_value() {
        assert_eq!(derive_id("a"), "0cc175b9-c0f1-36a8-b1c3-99e269772661");
        assert_eq!(derive_id("9774d56d682e549c"), "cf95dc53-f383-39a8-b6fd-749f3ef439cd");
    }

    #[test]
    fn test_derived_id_is_v3() {
        let id = uuid::Uuid::parse_str(&derive_id("device")).unwrap();
        assert_eq!(id.get_version_num(), 3);
        assert_eq!(id.get_variant(), uuid::Variant::RFC4122);
    }

    #[test]
    fn test_provider() {
        let provider =
            DeviceIdentityProvider::new(Arc::new(StaticPlatformId(Some("abc".to_string()))));
        let identity = provider.derive().unwrap();
        assert_eq!(identity.raw_platform_id(), "abc");
        assert_eq!(identity.derived_id(), derive_id("abc"));
    }

    #[test]
    fn test_missing_platform_id() {
        let provider = DeviceIdentityProvider::new(Arc::new(StaticPlatformId(None)));
        assert!(matches!(provider.derive(), Err(CoreError::PlatformIdMissing)));
    }
}
