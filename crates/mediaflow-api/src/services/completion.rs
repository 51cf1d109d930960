//! Upload completion: merge multipart parts, flip `Draft -> Pending` and hand
//! the media to the transcode dispatcher exactly once.

use mediaflow_core::models::{CompleteUploadRequest, CompleteUploadResponse, UploadedPart};
use mediaflow_core::{AppError, Media, MediaStatus};
use mediaflow_db::MediaRecordStore;
use mediaflow_storage::{Storage, StorageError};
use mediaflow_worker::{Reservation, TranscodeDispatcher};
use std::sync::Arc;
use uuid::Uuid;

/// Multipart metadata sent with a completion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartCompletion {
    pub upload_id: String,
    pub parts: Vec<UploadedPart>,
}

impl MultipartCompletion {
    /// `Ok(None)` for a single-PUT completion.
    ///
    /// `upload_id` and `parts` must come together, parts must be non-empty and
    /// their numbers strictly ascending from 1.
    pub fn from_request(request: CompleteUploadRequest) -> Result<Option<Self>, AppError> {
        match (request.upload_id, request.parts) {
            (None, None) => Ok(None),
            (Some(upload_id), Some(parts)) => {
                if upload_id.trim().is_empty() {
                    return Err(AppError::InvalidArgument("upload_id must not be empty".to_string()));
                }
                if parts.is_empty() {
                    return Err(AppError::InvalidArgument(
                        "parts must list at least one uploaded part".to_string(),
                    ));
                }
                let mut previous = 0;
                for part in &parts {
                    if part.part_number <= previous {
                        return Err(AppError::InvalidArgument(format!(
                            "Part numbers must start at 1 and be strictly ascending, got {} after {}",
                            part.part_number, previous
                        )));
                    }
                    previous = part.part_number;
                }
                Ok(Some(Self { upload_id, parts }))
            }
            _ => Err(AppError::InvalidArgument(
                "upload_id and parts must be provided together".to_string(),
            )),
        }
    }
}

fn merge_error(err: StorageError) -> AppError {
    match err {
        StorageError::MultipartRejected(msg) | StorageError::NotFound(msg) => {
            AppError::UploadMergeError(msg)
        }
        other => AppError::StorageUnavailable(other.to_string()),
    }
}

#[derive(Clone)]
pub struct CompletionHandler {
    storage: Arc<dyn Storage>,
    records: Arc<dyn MediaRecordStore>,
    dispatcher: Arc<TranscodeDispatcher>,
}

impl CompletionHandler {
    pub fn new(
        storage: Arc<dyn Storage>,
        records: Arc<dyn MediaRecordStore>,
        dispatcher: Arc<TranscodeDispatcher>,
    ) -> Self {
        Self {
            storage,
            records,
            dispatcher,
        }
    }

    fn unchanged(media: &Media) -> CompleteUploadResponse {
        CompleteUploadResponse {
            id: media.id,
            status: media.status,
        }
    }

    /// Finish an upload and queue its transcode.
    ///
    /// Idempotent: a record that already left `Draft`, or whose id is already
    /// being completed or transcoded, is returned unchanged and nothing new
    /// is dispatched. A `Busy` rejection leaves the record in `Draft` and any
    /// multipart session untouched so the call can be retried. A single-PUT
    /// completion whose object is not in the store yet is rejected and also
    /// leaves `Draft`.
    #[tracing::instrument(skip(self, multipart), fields(media_id = %id, multipart = multipart.is_some()))]
    pub async fn complete_upload(
        &self,
        id: Uuid,
        multipart: Option<MultipartCompletion>,
    ) -> Result<CompleteUploadResponse, AppError> {
        let media = self.records.find_by_id(id).await?;
        if media.status != MediaStatus::Draft {
            tracing::debug!(media_id = %id, status = %media.status, "Upload already completed");
            return Ok(Self::unchanged(&media));
        }

        let ticket = match self.dispatcher.reserve(id)? {
            Reservation::Acquired(ticket) => ticket,
            Reservation::AlreadyInFlight => {
                tracing::info!(media_id = %id, "Completion already in progress, not dispatching again");
                return Ok(Self::unchanged(&media));
            }
        };

        // another completion may have finished between the first read and the reservation
        let mut media = self.records.find_by_id(id).await?;
        if media.status != MediaStatus::Draft {
            return Ok(Self::unchanged(&media));
        }

        match &multipart {
            Some(multipart) => self.merge_parts(&media, multipart).await?,
            None => self.confirm_raw_uploaded(&media).await?,
        }

        let moved = self
            .records
            .transition_status(id, MediaStatus::Draft, MediaStatus::Pending)
            .await
            .map_err(|e| {
                tracing::error!(media_id = %id, error = %e, "Failed to mark media as pending");
                AppError::PersistenceError(e.to_string())
            })?;
        if !moved {
            let current = self.records.find_by_id(id).await?;
            return Ok(Self::unchanged(&current));
        }

        media.status = MediaStatus::Pending;
        ticket.dispatch(media)?;

        tracing::info!(media_id = %id, "Upload completed, transcode queued");
        Ok(CompleteUploadResponse {
            id,
            status: MediaStatus::Pending,
        })
    }

    async fn raw_object_exists(&self, media: &Media) -> Result<bool, AppError> {
        match self
            .storage
            .get_object(&media.raw.bucket, &media.raw.object)
            .await
        {
            Ok(_object) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(AppError::StorageUnavailable(e.to_string())),
        }
    }

    /// A single-PUT upload only counts as complete once its object is stored.
    async fn confirm_raw_uploaded(&self, media: &Media) -> Result<(), AppError> {
        if self.raw_object_exists(media).await? {
            return Ok(());
        }
        tracing::warn!(
            media_id = %media.id,
            bucket = %media.raw.bucket,
            key = %media.raw.object,
            "Completion before the raw object was uploaded, media stays in Draft"
        );
        Err(AppError::UploadMergeError(format!(
            "No uploaded object found for media {}; finish the upload and complete again",
            media.id
        )))
    }

    /// Merge the parts into the raw object.
    ///
    /// A rejected merge whose raw object already exists was merged by an
    /// earlier attempt that failed afterwards, and counts as done.
    async fn merge_parts(
        &self,
        media: &Media,
        multipart: &MultipartCompletion,
    ) -> Result<(), AppError> {
        let err = match self
            .storage
            .complete_multipart_upload(
                &media.raw.bucket,
                &media.raw.object,
                &multipart.upload_id,
                &multipart.parts,
            )
            .await
        {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if matches!(
            err,
            StorageError::MultipartRejected(_) | StorageError::NotFound(_)
        ) && self.raw_object_exists(media).await?
        {
            tracing::info!(
                media_id = %media.id,
                upload_id = %multipart.upload_id,
                "Multipart upload already merged, continuing"
            );
            return Ok(());
        }

        tracing::warn!(
            media_id = %media.id,
            upload_id = %multipart.upload_id,
            error = %err,
            "Multipart merge failed, media stays in Draft"
        );
        Err(merge_error(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mediaflow_core::RawLocation;
    use mediaflow_db::InMemoryMediaRepository;
    use mediaflow_storage::LocalStorage;
    use mediaflow_worker::{DispatcherConfig, JobHandler};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio_util::sync::CancellationToken;

    /// Records every dispatched id and blocks until released.
    #[derive(Default)]
    struct RecordingHandler {
        runs: Mutex<Vec<Uuid>>,
        release: Notify,
    }

    #[async_trait]
    impl JobHandler for RecordingHandler {
        async fn handle(&self, media: Media, cancel: CancellationToken) {
            self.runs.lock().unwrap().push(media.id);
            tokio::select! {
                _ = self.release.notified() => {}
                _ = cancel.cancelled() => {}
            }
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        storage: Arc<LocalStorage>,
        records: Arc<InMemoryMediaRepository>,
        handler: Arc<RecordingHandler>,
        dispatcher: Arc<TranscodeDispatcher>,
        completion: CompletionHandler,
    }

    impl Fixture {
        async fn new(queue_size: usize) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let storage = Arc::new(
                LocalStorage::new(
                    dir.path(),
                    "http://localhost/api/v0/local-storage".to_string(),
                    b"secret".to_vec(),
                )
                .await
                .unwrap(),
            );
            let records = Arc::new(InMemoryMediaRepository::new());
            let handler = Arc::new(RecordingHandler::default());
            let dispatcher = Arc::new(TranscodeDispatcher::new(
                handler.clone(),
                DispatcherConfig {
                    queue_size,
                    workers: 2,
                    shutdown_grace: Duration::from_secs(1),
                },
            ));
            let completion =
                CompletionHandler::new(storage.clone(), records.clone(), dispatcher.clone());
            Self {
                dir,
                storage,
                records,
                handler,
                dispatcher,
                completion,
            }
        }

        /// A `Draft` record whose raw object has been uploaded.
        async fn draft(&self) -> Media {
            let media = self.draft_without_raw().await;
            let path = self.dir.path().join(&media.raw.bucket).join(&media.raw.object);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"raw video bytes").unwrap();
            media
        }

        async fn draft_without_raw(&self) -> Media {
            let id = Uuid::new_v4();
            let media = Media::draft(
                id,
                RawLocation {
                    bucket: "raw".to_string(),
                    object: format!("media/{}.mp4", id),
                },
            );
            self.records.insert(&media).await.unwrap();
            media
        }

        async fn status(&self, id: Uuid) -> MediaStatus {
            self.records.find_by_id(id).await.unwrap().status
        }

        fn runs(&self) -> Vec<Uuid> {
            self.handler.runs.lock().unwrap().clone()
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[test]
    fn test_multipart_request_validation() {
        let part = |n| UploadedPart {
            part_number: n,
            etag: "\"tag\"".to_string(),
        };
        let request = |upload_id: Option<&str>, parts: Option<Vec<UploadedPart>>| {
            CompleteUploadRequest {
                upload_id: upload_id.map(String::from),
                parts,
            }
        };

        assert_eq!(MultipartCompletion::from_request(request(None, None)).unwrap(), None);
        assert!(MultipartCompletion::from_request(request(Some("u"), Some(vec![part(1), part(2)])))
            .unwrap()
            .is_some());
        assert!(MultipartCompletion::from_request(request(Some("u"), None)).is_err());
        assert!(MultipartCompletion::from_request(request(None, Some(vec![part(1)]))).is_err());
        assert!(MultipartCompletion::from_request(request(Some("u"), Some(vec![]))).is_err());
        assert!(MultipartCompletion::from_request(request(Some("u"), Some(vec![part(0)]))).is_err());
        assert!(
            MultipartCompletion::from_request(request(Some("u"), Some(vec![part(2), part(1)])))
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_completion_moves_to_pending_and_dispatches_once() {
        let fixture = Fixture::new(10).await;
        let media = fixture.draft().await;

        let response = fixture.completion.complete_upload(media.id, None).await.unwrap();
        assert_eq!(response.status, MediaStatus::Pending);
        assert_eq!(fixture.status(media.id).await, MediaStatus::Pending);

        // a retry after the status moved is a no-op
        let again = fixture.completion.complete_upload(media.id, None).await.unwrap();
        assert_eq!(again.status, MediaStatus::Pending);

        settle().await;
        assert_eq!(fixture.runs(), vec![media.id]);
    }

    #[tokio::test]
    async fn test_racing_completions_dispatch_once() {
        let fixture = Fixture::new(10).await;
        let media = fixture.draft().await;

        let calls: Vec<_> = (0..8)
            .map(|_| {
                let completion = fixture.completion.clone();
                tokio::spawn(async move { completion.complete_upload(media.id, None).await })
            })
            .collect();
        for call in calls {
            call.await.unwrap().unwrap();
        }

        settle().await;
        assert_eq!(fixture.runs(), vec![media.id]);
        assert_eq!(fixture.status(media.id).await, MediaStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_media_is_not_found() {
        let fixture = Fixture::new(10).await;
        let err = fixture
            .completion
            .complete_upload(Uuid::new_v4(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_terminal_records_are_left_alone() {
        let fixture = Fixture::new(10).await;
        for terminal in [MediaStatus::Ready, MediaStatus::Failed] {
            let media = fixture.draft().await;
            fixture
                .records
                .update_status(media.id, MediaStatus::Pending)
                .await
                .unwrap();
            fixture.records.update_status(media.id, terminal).await.unwrap();

            let response = fixture.completion.complete_upload(media.id, None).await.unwrap();
            assert_eq!(response.status, terminal);
        }
        settle().await;
        assert!(fixture.runs().is_empty());
    }

    #[tokio::test]
    async fn test_merge_rejection_keeps_draft() {
        let fixture = Fixture::new(10).await;
        let media = fixture.draft_without_raw().await;
        let upload_id = fixture
            .storage
            .create_multipart_upload(&media.raw.bucket, &media.raw.object)
            .await
            .unwrap();

        // part 1 was never uploaded
        let multipart = MultipartCompletion {
            upload_id,
            parts: vec![UploadedPart {
                part_number: 1,
                etag: "\"deadbeef\"".to_string(),
            }],
        };
        let err = fixture
            .completion
            .complete_upload(media.id, Some(multipart))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::UploadMergeError(_)));
        assert_eq!(fixture.status(media.id).await, MediaStatus::Draft);
        assert!(!fixture.dispatcher.is_in_flight(media.id));
        settle().await;
        assert!(fixture.runs().is_empty());
    }

    #[tokio::test]
    async fn test_full_dispatcher_answers_busy_and_keeps_draft() {
        let fixture = Fixture::new(1).await;
        let first = fixture.draft().await;
        let second = fixture.draft().await;

        fixture.completion.complete_upload(first.id, None).await.unwrap();
        let err = fixture
            .completion
            .complete_upload(second.id, None)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Busy(_)));
        assert_eq!(fixture.status(second.id).await, MediaStatus::Draft);

        // once the first run ends the retry goes through
        settle().await;
        fixture.handler.release.notify_one();
        tokio::time::timeout(Duration::from_secs(5), async {
            while fixture.dispatcher.in_flight_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let retried = fixture.completion.complete_upload(second.id, None).await.unwrap();
        assert_eq!(retried.status, MediaStatus::Pending);
    }

    #[tokio::test]
    async fn test_completion_before_upload_keeps_draft() {
        let fixture = Fixture::new(10).await;
        let media = fixture.draft_without_raw().await;

        let err = fixture
            .completion
            .complete_upload(media.id, None)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::UploadMergeError(_)));
        assert_eq!(fixture.status(media.id).await, MediaStatus::Draft);
        assert!(!fixture.dispatcher.is_in_flight(media.id));

        // once the bytes land the same call goes through
        let path = fixture.dir.path().join(&media.raw.bucket).join(&media.raw.object);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"late bytes").unwrap();
        let response = fixture.completion.complete_upload(media.id, None).await.unwrap();
        assert_eq!(response.status, MediaStatus::Pending);
        settle().await;
        assert_eq!(fixture.runs(), vec![media.id]);
    }

    /// Fails the first `transition_status` call, then delegates.
    struct FailingTransitionOnce {
        inner: Arc<InMemoryMediaRepository>,
        failed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl MediaRecordStore for FailingTransitionOnce {
        async fn insert(&self, media: &Media) -> mediaflow_db::RecordStoreResult<()> {
            self.inner.insert(media).await
        }

        async fn find_by_id(&self, id: Uuid) -> mediaflow_db::RecordStoreResult<Media> {
            self.inner.find_by_id(id).await
        }

        async fn update_status(
            &self,
            id: Uuid,
            status: MediaStatus,
        ) -> mediaflow_db::RecordStoreResult<()> {
            self.inner.update_status(id, status).await
        }

        async fn transition_status(
            &self,
            id: Uuid,
            from: MediaStatus,
            to: MediaStatus,
        ) -> mediaflow_db::RecordStoreResult<bool> {
            if !self.failed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Err(mediaflow_db::RecordStoreError::Corrupt(
                    "connection reset".to_string(),
                ));
            }
            self.inner.transition_status(id, from, to).await
        }
    }

    #[tokio::test]
    async fn test_retry_after_failed_status_write_finishes_merged_upload() {
        let fixture = Fixture::new(10).await;
        let records = Arc::new(FailingTransitionOnce {
            inner: fixture.records.clone(),
            failed: std::sync::atomic::AtomicBool::new(false),
        });
        let completion = CompletionHandler::new(
            fixture.storage.clone(),
            records,
            fixture.dispatcher.clone(),
        );

        let media = fixture.draft_without_raw().await;
        let upload_id = fixture
            .storage
            .create_multipart_upload(&media.raw.bucket, &media.raw.object)
            .await
            .unwrap();
        let target = mediaflow_storage::PresignedTarget {
            bucket: media.raw.bucket.clone(),
            key: media.raw.object.clone(),
            upload_id: Some(upload_id.clone()),
            part_number: Some(1),
        };
        let body = futures::stream::iter(vec![Ok::<_, std::io::Error>(
            axum::body::Bytes::from_static(b"part one"),
        )]);
        let etag = fixture.storage.put_presigned(&target, body).await.unwrap();
        let multipart = MultipartCompletion {
            upload_id,
            parts: vec![UploadedPart {
                part_number: 1,
                etag,
            }],
        };

        let err = completion
            .complete_upload(media.id, Some(multipart.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PersistenceError(_)));
        assert_eq!(fixture.status(media.id).await, MediaStatus::Draft);
        assert!(!fixture.dispatcher.is_in_flight(media.id));

        // the session is gone but the merged object is there
        let response = completion
            .complete_upload(media.id, Some(multipart))
            .await
            .unwrap();
        assert_eq!(response.status, MediaStatus::Pending);
        assert_eq!(fixture.status(media.id).await, MediaStatus::Pending);
        settle().await;
        assert_eq!(fixture.runs(), vec![media.id]);
    }
}
