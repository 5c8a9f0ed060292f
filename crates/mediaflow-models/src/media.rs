//! Media item models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::task::ParseStatusError;

/// Unique, externally visible identifier for an uploaded media item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaId(pub String);

impl MediaId {
    /// Generate a new random media ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MediaId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MediaId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MediaId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Media processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaStatus {
    /// Upload intent issued, object not yet confirmed
    #[default]
    Init,
    /// Upload confirmed, pipeline running
    Processing,
    /// Every pipeline step succeeded
    Done,
    /// A pipeline step failed terminally
    Failed,
}

impl MediaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaStatus::Init => "INIT",
            MediaStatus::Processing => "PROCESSING",
            MediaStatus::Done => "DONE",
            MediaStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for MediaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MediaStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INIT" => Ok(MediaStatus::Init),
            "PROCESSING" => Ok(MediaStatus::Processing),
            "DONE" => Ok(MediaStatus::Done),
            "FAILED" => Ok(MediaStatus::Failed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Media record as stored in the relational store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    /// Unique media ID
    pub id: MediaId,
    /// Processing status
    pub status: MediaStatus,
    /// Object key of the uploaded original
    pub original_key: String,
    /// Object key of the final pipeline artifact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_key: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Media {
    /// Create a media record in the INIT state.
    pub fn new(id: MediaId, original_key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: MediaStatus::Init,
            original_key: original_key.into(),
            final_key: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_status_round_trips_through_str() {
        for status in [
            MediaStatus::Init,
            MediaStatus::Processing,
            MediaStatus::Done,
            MediaStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<MediaStatus>().unwrap(), status);
        }
        assert!("done".parse::<MediaStatus>().is_err());
    }

    #[test]
    fn test_new_media_starts_in_init() {
        let media = Media::new(MediaId::from("m1"), "media/m1/original.jpg");
        assert_eq!(media.status, MediaStatus::Init);
        assert!(media.final_key.is_none());
    }
}
