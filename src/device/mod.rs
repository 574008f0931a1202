use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label shown for a device whose name is unknown or empty.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown device";

/// Stable key of a remote peer (its hardware address).
///
/// Opaque: the only normalization is trimming surrounding whitespace. The
/// human-readable name is never part of the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdentity(CompactString);

impl DeviceIdentity {
    /// Returns `None` for empty or whitespace-only input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(CompactString::from(trimmed)))
        }
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy classification of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    #[default]
    Unclassified,
    Trusted,
    Blocked,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unclassified => write!(f, "unclassified"),
            Self::Trusted => write!(f, "trusted"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// A device the OS reports as already bonded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondedDevice {
    pub identity: DeviceIdentity,
    pub name: Option<String>,
}

/// Treat empty or whitespace-only names as absent.
pub fn clean_name(name: Option<&str>) -> Option<String> {
    name.map(str::trim)
        .filter(|n| !n.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_trims_whitespace() {
        let id = DeviceIdentity::parse("  AA:BB:CC  ").unwrap();
        assert_eq!(id.as_str(), "AA:BB:CC");
    }

    #[test]
    fn parse_rejects_blank() {
        assert!(DeviceIdentity::parse("").is_none());
        assert!(DeviceIdentity::parse("   \t").is_none());
    }

    #[test]
    fn parse_keeps_case() {
        let upper = DeviceIdentity::parse("aa:bb").unwrap();
        assert_eq!(upper.to_string(), "aa:bb");
    }

    #[test]
    fn classification_default_is_unclassified() {
        assert_eq!(Classification::default(), Classification::Unclassified);
    }

    #[test]
    fn identity_serializes_as_plain_string() {
        let id = DeviceIdentity::parse("11:22").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"11:22\"");
    }

    #[test]
    fn clean_name_drops_empty() {
        assert_eq!(clean_name(Some("  ")), None);
        assert_eq!(clean_name(None), None);
        assert_eq!(clean_name(Some(" Headset ")), Some("Headset".into()));
    }
}
