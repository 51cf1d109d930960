use async_trait::async_trait;
use mediaflow_core::{AppError, Media, MediaStatus};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum RecordStoreError {
    #[error("Media not found: {0}")]
    NotFound(Uuid),

    #[error("Media already exists: {0}")]
    Duplicate(Uuid),

    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: MediaStatus,
        to: MediaStatus,
    },

    #[error("Corrupt media record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type RecordStoreResult<T> = Result<T, RecordStoreError>;

impl From<RecordStoreError> for AppError {
    fn from(err: RecordStoreError) -> Self {
        match err {
            RecordStoreError::NotFound(id) => AppError::NotFound(format!("Media {} not found", id)),
            other => AppError::PersistenceError(other.to_string()),
        }
    }
}

/// Persistence for `Media` records.
///
/// Status writes only ever move forward; implementations reject any step
/// `MediaStatus::can_transition_to` does not allow.
#[async_trait]
pub trait MediaRecordStore: Send + Sync {
    async fn insert(&self, media: &Media) -> RecordStoreResult<()>;

    async fn find_by_id(&self, id: Uuid) -> RecordStoreResult<Media>;

    /// Move `id` to `status` from whatever legal predecessor it is in.
    async fn update_status(&self, id: Uuid, status: MediaStatus) -> RecordStoreResult<()>;

    /// Compare-and-set: move `id` from `from` to `to`. Returns `false` when
    /// the record was no longer in `from`.
    async fn transition_status(
        &self,
        id: Uuid,
        from: MediaStatus,
        to: MediaStatus,
    ) -> RecordStoreResult<bool>;
}
