//! Wire layouts shared with clients: the reject-rules frame and the version
//! sentinel.

use thiserror::Error;

/// Version reported for keys with no live object. Real objects start at 1.
pub const VERSION_NONEXISTENT: u64 = 0;

/// Conditions under which a client asks for its operation to be rejected.
/// Evaluated by the master against the key's current version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RejectRules {
    pub given_version: u64,
    /// Reject when no object currently exists.
    pub doesnt_exist: bool,
    /// Reject when an object exists.
    pub exists: bool,
    /// Reject when the current version is <= `given_version`.
    pub version_le_given: bool,
    /// Reject when the current version is != `given_version`.
    pub version_ne_given: bool,
}

impl RejectRules {
    pub const WIRE_LEN: usize = 8 + 4;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut bytes = [0u8; Self::WIRE_LEN];
        bytes[0..8].copy_from_slice(&self.given_version.to_le_bytes());
        bytes[8] = self.doesnt_exist as u8;
        bytes[9] = self.exists as u8;
        bytes[10] = self.version_le_given as u8;
        bytes[11] = self.version_ne_given as u8;
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < Self::WIRE_LEN {
            return Err(WireError::TooShort);
        }
        let mut version = [0u8; 8];
        version.copy_from_slice(&bytes[0..8]);
        Ok(Self {
            given_version: u64::from_le_bytes(version),
            doesnt_exist: bytes[8] != 0,
            exists: bytes[9] != 0,
            version_le_given: bytes[10] != 0,
            version_ne_given: bytes[11] != 0,
        })
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    #[error("reject rules frame too short")]
    TooShort,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_rules_round_trip() {
        let rules = RejectRules {
            given_version: 0x0004_0000_0001,
            doesnt_exist: true,
            exists: false,
            version_le_given: true,
            version_ne_given: false,
        };
        let bytes = rules.encode();
        assert_eq!(RejectRules::decode(&bytes).unwrap(), rules);
    }

    #[test]
    fn decode_treats_nonzero_flags_as_set() {
        let mut bytes = RejectRules::default().encode();
        bytes[9] = 0x80;
        let rules = RejectRules::decode(&bytes).unwrap();
        assert!(rules.exists);
        assert!(!rules.doesnt_exist);
    }

    #[test]
    fn decode_rejects_short_frame() {
        assert_eq!(RejectRules::decode(&[0u8; 11]), Err(WireError::TooShort));
    }
}
