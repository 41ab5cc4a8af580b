//! Observation records produced by the collector.
//!
//! Everything here is parsed leniently. A wrong-typed field becomes `None`
//! instead of rejecting the observation, because one bad capture should not
//! cost the rest of a batch. Snapshot payloads stay raw JSON until the store
//! parses them with [`Snapshot::from_value`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::snapshot::{normalize_timestamp, parse_count, parse_i64};
use crate::model::{IdentityKey, ParseIdentityKeyError, Post, Snapshot};

/// Render a scalar JSON value as a trimmed, non-empty string.
fn scalar_string(value: &Value) -> Option<String> {
    let raw = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!raw.is_empty()).then_some(raw)
}

/// Who the collector thinks created a post.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnerHints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl OwnerHints {
    #[must_use]
    pub fn key(&self) -> Option<IdentityKey> {
        self.key
            .as_ref()
            .and_then(scalar_string)
            .and_then(|raw| raw.parse().ok())
    }

    #[must_use]
    pub fn handle(&self) -> Option<String> {
        self.handle
            .as_ref()
            .and_then(scalar_string)
            .map(|h| h.trim_start_matches('@').to_string())
            .filter(|h| !h.is_empty())
    }

    #[must_use]
    pub fn id(&self) -> Option<String> {
        self.id.as_ref().and_then(scalar_string)
    }
}

/// One sighting of a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostObservation {
    #[serde(rename = "identityKeyGuess")]
    pub identity_key_guess: String,
    #[serde(rename = "postId")]
    pub post_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Value>,
    #[serde(rename = "ownerHints", default)]
    pub owner: OwnerHints,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(rename = "postTime", default, skip_serializing_if = "Option::is_none")]
    pub post_time: Option<Value>,
}

impl PostObservation {
    /// Parsed bucket guess.
    ///
    /// # Errors
    ///
    /// Returns an error if the guess is not a valid identity key.
    pub fn key(&self) -> Result<IdentityKey, ParseIdentityKeyError> {
        self.identity_key_guess.parse()
    }

    /// Parsed snapshot, if the payload carries a usable timestamp.
    #[must_use]
    pub fn parsed_snapshot(&self) -> Option<Snapshot> {
        self.snapshot.as_ref().and_then(Snapshot::from_value)
    }

    /// The post record this observation contributes, stamped as seen at
    /// `now_ms`.
    #[must_use]
    pub fn to_post(&self, now_ms: i64) -> Post {
        Post {
            url: self.url.clone().filter(|s| !s.is_empty()),
            thumb: self.thumb.clone().filter(|s| !s.is_empty()),
            caption: self.caption.clone(),
            owner_key: self.owner.key(),
            owner_handle: self.owner.handle(),
            owner_id: self.owner.id(),
            post_time: self
                .post_time
                .as_ref()
                .and_then(parse_i64)
                .and_then(normalize_timestamp),
            last_seen: Some(now_ms),
            snapshots: self.parsed_snapshot().into_iter().collect(),
        }
    }
}

/// One reading of a creator's profile counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileObservation {
    #[serde(rename = "identityKeyGuess")]
    pub identity_key_guess: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followers: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cameos: Option<Value>,
}

impl ProfileObservation {
    /// # Errors
    ///
    /// Returns an error if the guess is not a valid identity key.
    pub fn key(&self) -> Result<IdentityKey, ParseIdentityKeyError> {
        self.identity_key_guess.parse()
    }

    #[must_use]
    pub fn handle(&self) -> Option<String> {
        self.handle
            .as_ref()
            .and_then(scalar_string)
            .map(|h| h.trim_start_matches('@').to_string())
            .filter(|h| !h.is_empty())
    }

    #[must_use]
    pub fn id(&self) -> Option<String> {
        self.id.as_ref().and_then(scalar_string)
    }

    /// Observation time, falling back to `now_ms` when missing or invalid.
    #[must_use]
    pub fn timestamp_or(&self, now_ms: i64) -> i64 {
        self.t
            .as_ref()
            .and_then(parse_i64)
            .and_then(normalize_timestamp)
            .unwrap_or(now_ms)
    }

    #[must_use]
    pub fn followers(&self) -> Option<u64> {
        self.followers.as_ref().and_then(parse_count)
    }

    #[must_use]
    pub fn cameos(&self) -> Option<u64> {
        self.cameos.as_ref().and_then(parse_count)
    }
}

/// One line of an ingest stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestEvent {
    Post(PostObservation),
    Profile(ProfileObservation),
}

/// What an ingest call recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Metadata and a snapshot were merged.
    Recorded,
    /// Metadata was merged; the snapshot was missing or malformed.
    MetadataOnly,
    /// Nothing usable (e.g. an empty post id).
    Ignored,
}
