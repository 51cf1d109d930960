use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle of a media item.
///
/// `Draft` is written at plan time, `Pending` once the raw bytes are in the
/// object store, then the transcoding pipeline moves it to `Processing` and
/// finally `Ready` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum MediaStatus {
    Draft,
    Pending,
    Processing,
    Ready,
    Failed,
}

impl MediaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaStatus::Draft => "Draft",
            MediaStatus::Pending => "Pending",
            MediaStatus::Processing => "Processing",
            MediaStatus::Ready => "Ready",
            MediaStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MediaStatus::Ready | MediaStatus::Failed)
    }

    /// Whether `next` is a legal forward step from `self`.
    ///
    /// `Pending` may jump straight to a terminal state because the
    /// `Processing` write is best-effort.
    pub fn can_transition_to(&self, next: MediaStatus) -> bool {
        use MediaStatus::*;
        matches!(
            (self, next),
            (Draft, Pending)
                | (Pending, Processing)
                | (Pending, Ready)
                | (Pending, Failed)
                | (Processing, Ready)
                | (Processing, Failed)
        )
    }

    /// States from which `next` may be entered.
    pub fn predecessors(next: MediaStatus) -> &'static [MediaStatus] {
        use MediaStatus::*;
        match next {
            Draft => &[],
            Pending => &[Draft],
            Processing => &[Pending],
            Ready | Failed => &[Pending, Processing],
        }
    }
}

impl Display for MediaStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Draft" => Ok(MediaStatus::Draft),
            "Pending" => Ok(MediaStatus::Pending),
            "Processing" => Ok(MediaStatus::Processing),
            "Ready" => Ok(MediaStatus::Ready),
            "Failed" => Ok(MediaStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid media status: {}", s)),
        }
    }
}

/// Location of the uploaded source object. Set once at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RawLocation {
    pub bucket: String,
    pub object: String,
}

impl RawLocation {
    /// Extension of the raw object key including the leading dot, if any.
    pub fn extension(&self) -> Option<&str> {
        let name = self.object.rsplit('/').next().unwrap_or(&self.object);
        name.rfind('.')
            .filter(|&idx| idx > 0 && idx + 1 < name.len())
            .map(|idx| &name[idx..])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub id: Uuid,
    pub status: MediaStatus,
    pub raw: RawLocation,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Media {
    /// New `Draft` record for a raw object that has not been uploaded yet.
    pub fn draft(id: Uuid, raw: RawLocation) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: MediaStatus::Draft,
            raw,
            created_at: now,
            updated_at: now,
        }
    }

    /// Prefix under which the processed HLS bundle is stored.
    pub fn processed_prefix(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MediaResponse {
    pub id: Uuid,
    pub status: MediaStatus,
    pub raw: RawLocation,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Media> for MediaResponse {
    fn from(media: Media) -> Self {
        Self {
            id: media.id,
            status: media.status,
            raw: media.raw,
            created_at: media.created_at,
            updated_at: media.updated_at,
        }
    }
}
