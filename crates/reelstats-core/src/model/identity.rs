//! Identity keys: the tag that selects a user bucket.
//!
//! Persisted form is a short string (`id:123`, `h:alice`, `c:bob`, `unknown`,
//! `__top_today__`). In memory the tag is parsed once into [`IdentityKey`]
//! so resolution code matches on variants instead of string prefixes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Persisted tag of the virtual top-today bucket.
pub const TOP_TODAY_TAG: &str = "__top_today__";
/// Persisted tag of the catch-all bucket for posts with no known owner.
pub const UNKNOWN_TAG: &str = "unknown";

/// Key of one user bucket in the metrics table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IdentityKey {
    /// Numeric account id (`id:<n>`).
    Id(String),
    /// Account handle as captured (`h:<handle>`).
    Handle(String),
    /// Cameo name, case-folded (`c:<name>`).
    Cameo(String),
    /// Posts whose owner was not known at capture time.
    Unknown,
    /// Derived aggregate of recent high-engagement posts. Never persisted.
    TopToday,
}

/// Error returned when a string is not a valid identity key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid identity key: {0:?}")]
pub struct ParseIdentityKeyError(pub String);

impl IdentityKey {
    /// Build an id key, trimming whitespace. Returns `None` for empty ids.
    #[must_use]
    pub fn for_id(id: &str) -> Option<Self> {
        let id = id.trim();
        (!id.is_empty()).then(|| Self::Id(id.to_string()))
    }

    /// Build a handle key, stripping a leading `@`.
    #[must_use]
    pub fn for_handle(handle: &str) -> Option<Self> {
        let handle = handle.trim().trim_start_matches('@');
        (!handle.is_empty()).then(|| Self::Handle(handle.to_string()))
    }

    /// Build a cameo key. Cameo names are case-folded.
    #[must_use]
    pub fn for_cameo(name: &str) -> Option<Self> {
        let name = name.trim().trim_start_matches('@');
        (!name.is_empty()).then(|| Self::Cameo(name.to_lowercase()))
    }

    /// `true` for keys that are computed rather than stored.
    #[must_use]
    pub const fn is_virtual(&self) -> bool {
        matches!(self, Self::TopToday)
    }

    /// `true` for keys that can take part in alias search.
    #[must_use]
    pub const fn is_aliasable(&self) -> bool {
        matches!(self, Self::Id(_) | Self::Handle(_))
    }

    /// The numeric id carried by the key itself, if any.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Id(id) => Some(id),
            _ => None,
        }
    }

    /// The handle carried by the key itself, if any.
    #[must_use]
    pub fn handle(&self) -> Option<&str> {
        match self {
            Self::Handle(handle) => Some(handle),
            _ => None,
        }
    }

    /// Storage key of the cold shard holding this bucket's full history.
    #[must_use]
    pub fn shard_key(&self) -> String {
        format!("{}{self}", crate::kv::keys::SHARD_PREFIX)
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id:{id}"),
            Self::Handle(handle) => write!(f, "h:{handle}"),
            Self::Cameo(name) => write!(f, "c:{name}"),
            Self::Unknown => f.write_str(UNKNOWN_TAG),
            Self::TopToday => f.write_str(TOP_TODAY_TAG),
        }
    }
}

impl FromStr for IdentityKey {
    type Err = ParseIdentityKeyError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let parsed = if trimmed == UNKNOWN_TAG {
            Some(Self::Unknown)
        } else if trimmed == TOP_TODAY_TAG {
            Some(Self::TopToday)
        } else if let Some(id) = trimmed.strip_prefix("id:") {
            Self::for_id(id)
        } else if let Some(handle) = trimmed.strip_prefix("h:") {
            Self::for_handle(handle)
        } else if let Some(name) = trimmed.strip_prefix("c:") {
            Self::for_cameo(name)
        } else {
            None
        };
        parsed.ok_or_else(|| ParseIdentityKeyError(raw.to_string()))
    }
}

impl TryFrom<String> for IdentityKey {
    type Error = ParseIdentityKeyError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<IdentityKey> for String {
    fn from(key: IdentityKey) -> Self {
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_tag_kind() {
        assert_eq!("id:42".parse(), Ok(IdentityKey::Id("42".into())));
        assert_eq!("h:Alice".parse(), Ok(IdentityKey::Handle("Alice".into())));
        assert_eq!("c:BoB".parse(), Ok(IdentityKey::Cameo("bob".into())));
        assert_eq!("unknown".parse(), Ok(IdentityKey::Unknown));
        assert_eq!("__top_today__".parse(), Ok(IdentityKey::TopToday));
    }

    #[test]
    fn rejects_empty_and_untagged_keys() {
        assert!("id:".parse::<IdentityKey>().is_err());
        assert!("h:  ".parse::<IdentityKey>().is_err());
        assert!("alice".parse::<IdentityKey>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for raw in ["id:7", "h:alice", "c:bob", "unknown", "__top_today__"] {
            let key: IdentityKey = raw.parse().expect("valid key");
            assert_eq!(key.to_string(), raw);
        }
    }

    #[test]
    fn handle_strips_at_sign() {
        assert_eq!(
            IdentityKey::for_handle("@alice"),
            Some(IdentityKey::Handle("alice".into()))
        );
    }

    #[test]
    fn serializes_as_string_tag() {
        let json = serde_json::to_string(&IdentityKey::Id("9".into())).expect("serialize");
        assert_eq!(json, "\"id:9\"");
        let back: IdentityKey = serde_json::from_str("\"c:zed\"").expect("deserialize");
        assert_eq!(back, IdentityKey::Cameo("zed".into()));
    }

    #[test]
    fn only_id_and_handle_are_aliasable() {
        assert!(IdentityKey::Id("1".into()).is_aliasable());
        assert!(IdentityKey::Handle("a".into()).is_aliasable());
        assert!(!IdentityKey::Cameo("a".into()).is_aliasable());
        assert!(!IdentityKey::Unknown.is_aliasable());
        assert!(!IdentityKey::TopToday.is_aliasable());
        assert!(IdentityKey::TopToday.is_virtual());
    }
}
