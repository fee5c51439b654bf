use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{SyncError, SyncResult};

/// Stable user identifier, one remote partition per value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(String);

impl Uid {
    pub fn parse(value: impl Into<String>) -> SyncResult<Self> {
        let value = value.into();
        validate_key("uid", &value)?;
        Ok(Uid(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rejects values that cannot serve as a document key or blob path segment.
pub fn validate_key(field: &str, value: &str) -> SyncResult<()> {
    if value.trim().is_empty() {
        return Err(SyncError::Validation(format!("{} must not be empty", field)));
    }
    if value.contains('/') || value == "." || value == ".." {
        return Err(SyncError::Validation(format!(
            "{} '{}' is not a valid key",
            field, value
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// A named category photos are tagged with. `id` is `None` until the label
/// has a row in the local cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Label {
    pub id: Option<i64>,
    pub name: String,
    pub background_color: String,
    pub thumbnail: String,
}

impl Label {
    /// Label that has not been persisted yet, colored deterministically from its name.
    pub fn unsaved(name: impl Into<String>) -> Self {
        let name = name.into();
        let background_color = color_for_name(&name);
        Label {
            id: None,
            name,
            background_color,
            thumbnail: String::new(),
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }
}

fn color_for_name(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    format!("{:02X}{:02X}{:02X}", digest[0], digest[1], digest[2])
}

/// Metadata of one captured photo. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PhotoDetail {
    pub id: Option<i64>,
    pub label_id: i64,
    pub photo_uri: String,
    pub file_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub description: String,
    pub datetime: DateTime<Utc>,
}

/// Representative-photo pointer, at most one per label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Album {
    pub label_id: i64,
    pub photo_detail_id: i64,
}

/// Capture instant normalized to UTC at millisecond precision, so the local
/// and remote copies compare equal after a round trip.
pub fn capture_instant() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Sent,
    Received,
}

impl RequestStatus {
    pub fn mirrored(self) -> Self {
        match self {
            RequestStatus::Sent => RequestStatus::Received,
            RequestStatus::Received => RequestStatus::Sent,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FriendRequest {
    pub owner: Uid,
    pub target: Uid,
    pub requested_at: DateTime<Utc>,
    pub status: RequestStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Friend {
    pub owner: Uid,
    pub target: Uid,
    pub added_at: DateTime<Utc>,
}

/// How a pair looks from the owner's partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipState {
    None,
    RequestSent,
    RequestReceived,
    Friends,
}

// === Remote document bodies ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelDocument {
    pub background_color: String,
    pub thumbnail: String,
}

impl From<&Label> for LabelDocument {
    fn from(label: &Label) -> Self {
        LabelDocument {
            background_color: label.background_color.clone(),
            thumbnail: label.thumbnail.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoDocument {
    pub uri: String,
    pub label: String,
    pub latitude: f64,
    pub longitude: f64,
    pub description: String,
    pub datetime: DateTime<Utc>,
}

impl PhotoDocument {
    pub fn from_photo(photo: &PhotoDetail, label_name: &str) -> Self {
        PhotoDocument {
            uri: photo.photo_uri.clone(),
            label: label_name.to_string(),
            latitude: photo.latitude,
            longitude: photo.longitude,
            description: photo.description.clone(),
            datetime: photo.datetime,
        }
    }

    pub fn into_photo(self, file_name: String, label_id: i64) -> PhotoDetail {
        PhotoDetail {
            id: None,
            label_id,
            photo_uri: self.uri,
            file_name,
            latitude: self.latitude,
            longitude: self.longitude,
            description: self.description,
            datetime: self.datetime,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestDocument {
    pub requested_at: DateTime<Utc>,
    pub status: RequestStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendDocument {
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDocument {
    pub display_name: String,
    pub email: String,
    pub photo_url: String,
}
