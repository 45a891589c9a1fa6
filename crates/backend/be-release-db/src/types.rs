use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// Client platforms an update can be served to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "device_platform", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Ios, Platform::Android];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            _ => Err(format!("Unknown platform: {}", s)),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One uploaded bundle version for a runtime version. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub id: Uuid,
    pub runtime_version: String,
    /// Storage key of the bundle archive.
    pub path: String,
    pub timestamp: DateTime<Utc>,
    pub commit_hash: String,
    pub commit_message: String,
    pub release_notes: Option<String>,
    /// UUID derived from the archive's `metadata.json` digest.
    pub update_id: String,
}

impl Release {
    /// Notes shown to the client: explicit release notes, else the commit
    /// message. Empty strings count as absent.
    pub fn display_notes(&self) -> Option<&str> {
        self.release_notes
            .as_deref()
            .filter(|notes| !notes.is_empty())
            .or_else(|| Some(self.commit_message.as_str()).filter(|msg| !msg.is_empty()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRelease {
    pub runtime_version: String,
    pub path: String,
    pub timestamp: DateTime<Utc>,
    pub commit_hash: String,
    pub commit_message: String,
    pub release_notes: Option<String>,
    pub update_id: String,
}

impl NewRelease {
    pub fn into_release(self, id: Uuid) -> Release {
        Release {
            id,
            runtime_version: self.runtime_version,
            path: self.path,
            timestamp: self.timestamp,
            commit_hash: self.commit_hash,
            commit_message: self.commit_message,
            release_notes: self.release_notes,
            update_id: self.update_id,
        }
    }
}

/// One download event, recorded when a manifest is served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Tracking {
    pub id: Uuid,
    pub release_id: Uuid,
    pub platform: Platform,
    pub download_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingMetrics {
    pub platform: Platform,
    pub count: i64,
}
