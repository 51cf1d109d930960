use crate::store::{MediaRecordStore, RecordStoreError, RecordStoreResult};
use async_trait::async_trait;
use chrono::Utc;
use mediaflow_core::{Media, MediaStatus};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local record store
#[derive(Default)]
pub struct InMemoryMediaRepository {
    records: RwLock<HashMap<Uuid, Media>>,
}

impl InMemoryMediaRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl MediaRecordStore for InMemoryMediaRepository {
    async fn insert(&self, media: &Media) -> RecordStoreResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&media.id) {
            return Err(RecordStoreError::Duplicate(media.id));
        }
        records.insert(media.id, media.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> RecordStoreResult<Media> {
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(RecordStoreError::NotFound(id))
    }

    async fn update_status(&self, id: Uuid, status: MediaStatus) -> RecordStoreResult<()> {
        let mut records = self.records.write().await;
        let media = records.get_mut(&id).ok_or(RecordStoreError::NotFound(id))?;
        if !media.status.can_transition_to(status) {
            return Err(RecordStoreError::InvalidTransition {
                id,
                from: media.status,
                to: status,
            });
        }
        media.status = status;
        media.updated_at = Utc::now();
        Ok(())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: MediaStatus,
        to: MediaStatus,
    ) -> RecordStoreResult<bool> {
        if !from.can_transition_to(to) {
            return Err(RecordStoreError::InvalidTransition { id, from, to });
        }
        let mut records = self.records.write().await;
        let media = records.get_mut(&id).ok_or(RecordStoreError::NotFound(id))?;
        if media.status != from {
            return Ok(false);
        }
        media.status = to;
        media.updated_at = Utc::now();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaflow_core::RawLocation;
    use std::sync::Arc;

    fn draft() -> Media {
        let id = Uuid::new_v4();
        Media::draft(
            id,
            RawLocation {
                bucket: "raw".to_string(),
                object: format!("media/{}", id),
            },
        )
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let repo = InMemoryMediaRepository::new();
        let media = draft();
        repo.insert(&media).await.unwrap();

        let found = repo.find_by_id(media.id).await.unwrap();
        assert_eq!(found.id, media.id);
        assert_eq!(found.status, MediaStatus::Draft);
        assert!(matches!(
            repo.insert(&media).await,
            Err(RecordStoreError::Duplicate(_))
        ));
        assert!(matches!(
            repo.find_by_id(Uuid::new_v4()).await,
            Err(RecordStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_status_rejects_backward_moves() {
        let repo = InMemoryMediaRepository::new();
        let media = draft();
        repo.insert(&media).await.unwrap();

        repo.update_status(media.id, MediaStatus::Pending).await.unwrap();
        repo.update_status(media.id, MediaStatus::Processing).await.unwrap();
        repo.update_status(media.id, MediaStatus::Ready).await.unwrap();

        assert!(matches!(
            repo.update_status(media.id, MediaStatus::Pending).await,
            Err(RecordStoreError::InvalidTransition { .. })
        ));
        assert_eq!(
            repo.find_by_id(media.id).await.unwrap().status,
            MediaStatus::Ready
        );
    }

    #[tokio::test]
    async fn test_transition_status_has_single_winner() {
        let repo = Arc::new(InMemoryMediaRepository::new());
        let media = draft();
        repo.insert(&media).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    repo.transition_status(media.id, MediaStatus::Draft, MediaStatus::Pending)
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
