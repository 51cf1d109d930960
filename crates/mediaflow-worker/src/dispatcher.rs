//! Transcode dispatcher: bounded queue, fixed worker pool, one run per media id.
//!
//! Callers first [`reserve`](TranscodeDispatcher::reserve) a media id, do
//! whatever must happen before the job may run (merging parts, flipping the
//! status), then [`dispatch`](DispatchTicket::dispatch) the ticket. The id
//! stays in the in-flight set from reservation until its run finishes, so a
//! second reservation for the same id is refused for that whole window.
//!
//! Shutdown: [`TranscodeDispatcher::shutdown`] cancels running jobs and waits
//! for the workers to exit. Jobs still queued at that point never run; their
//! records stay `Pending` and their ids are logged and returned so an operator
//! can resubmit them.

use mediaflow_core::{AppError, Media};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::handler::JobHandler;

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Maximum number of media ids reserved, queued or running at once
    pub queue_size: usize,
    /// Number of worker tasks pulling from the queue
    pub workers: usize,
    /// How long `shutdown` waits for workers before giving up on them
    pub shutdown_grace: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_size: 100,
            workers: 2,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("transcode queue is full ({0} jobs in flight), retry later")]
    Busy(usize),

    #[error("transcode dispatcher is shut down")]
    Closed,
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Busy(_) => AppError::Busy(err.to_string()),
            DispatchError::Closed => AppError::Internal(err.to_string()),
        }
    }
}

#[derive(Debug)]
struct TranscodeJob {
    media: Media,
}

/// Media ids that are reserved, queued or running.
#[derive(Debug)]
struct InFlight {
    ids: Mutex<HashSet<Uuid>>,
    capacity: usize,
}

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, HashSet<Uuid>> {
        // the set stays consistent even if a holder panicked
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `Ok(true)` when newly inserted, `Ok(false)` when already present.
    fn try_insert(&self, id: Uuid) -> Result<bool, DispatchError> {
        let mut ids = self.lock();
        if ids.contains(&id) {
            return Ok(false);
        }
        if ids.len() >= self.capacity {
            return Err(DispatchError::Busy(ids.len()));
        }
        ids.insert(id);
        Ok(true)
    }

    fn remove(&self, id: Uuid) {
        self.lock().remove(&id);
    }
}

/// Removes an id from the in-flight set when dropped.
struct InFlightGuard {
    id: Uuid,
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(self.id);
    }
}

/// Outcome of [`TranscodeDispatcher::reserve`].
#[derive(Debug)]
pub enum Reservation {
    /// The caller owns the id's single dispatch slot.
    Acquired(DispatchTicket),
    /// Another completion or run already holds the id.
    AlreadyInFlight,
}

/// Exclusive right to dispatch one job for a media id.
///
/// Dropping the ticket without dispatching releases the id.
#[derive(Debug)]
pub struct DispatchTicket {
    id: Uuid,
    in_flight: Arc<InFlight>,
    tx: mpsc::Sender<TranscodeJob>,
    armed: bool,
}

impl DispatchTicket {
    pub fn media_id(&self) -> Uuid {
        self.id
    }

    /// Enqueue the job. From here on the worker that runs it releases the id.
    pub fn dispatch(mut self, media: Media) -> Result<(), DispatchError> {
        debug_assert_eq!(self.id, media.id);
        match self.tx.try_send(TranscodeJob { media }) {
            Ok(()) => {
                self.armed = false;
                Ok(())
            }
            Err(TrySendError::Full(job)) => {
                tracing::warn!(media_id = %job.media.id, "Transcode queue is full, rejecting job");
                Err(DispatchError::Busy(self.tx.max_capacity()))
            }
            Err(TrySendError::Closed(_)) => Err(DispatchError::Closed),
        }
    }
}

impl Drop for DispatchTicket {
    fn drop(&mut self) {
        if self.armed {
            self.in_flight.remove(self.id);
        }
    }
}

type JobQueue = Arc<tokio::sync::Mutex<mpsc::Receiver<TranscodeJob>>>;

pub struct TranscodeDispatcher {
    tx: mpsc::Sender<TranscodeJob>,
    rx: JobQueue,
    in_flight: Arc<InFlight>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    config: DispatcherConfig,
}

impl TranscodeDispatcher {
    /// Create the dispatcher and spawn its worker pool.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(handler: Arc<dyn JobHandler>, config: DispatcherConfig) -> Self {
        let queue_size = config.queue_size.max(1);
        let worker_count = config.workers.max(1);

        let (tx, rx) = mpsc::channel(queue_size);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let in_flight = Arc::new(InFlight {
            ids: Mutex::new(HashSet::new()),
            capacity: queue_size,
        });
        let shutdown = CancellationToken::new();

        let workers = (0..worker_count)
            .map(|index| {
                tokio::spawn(Self::worker(
                    index,
                    rx.clone(),
                    handler.clone(),
                    in_flight.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        tracing::info!(
            queue_size = queue_size,
            workers = worker_count,
            "Transcode dispatcher initialized with bounded queue"
        );

        Self {
            tx,
            rx,
            in_flight,
            shutdown,
            workers: Mutex::new(workers),
            config,
        }
    }

    /// Claim the dispatch slot for `id`.
    ///
    /// Returns `AlreadyInFlight` when the id is reserved, queued or running,
    /// and `Busy` when the in-flight set is at capacity.
    pub fn reserve(&self, id: Uuid) -> Result<Reservation, DispatchError> {
        if self.shutdown.is_cancelled() {
            return Err(DispatchError::Closed);
        }
        if !self.in_flight.try_insert(id)? {
            tracing::debug!(media_id = %id, "Media already in flight");
            return Ok(Reservation::AlreadyInFlight);
        }
        Ok(Reservation::Acquired(DispatchTicket {
            id,
            in_flight: self.in_flight.clone(),
            tx: self.tx.clone(),
            armed: true,
        }))
    }

    pub fn is_in_flight(&self, id: Uuid) -> bool {
        self.in_flight.lock().contains(&id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Cancel running jobs and wait for the workers to stop.
    ///
    /// Returns the ids of queued jobs that never started.
    pub async fn shutdown(&self) -> Vec<Uuid> {
        self.shutdown.cancel();
        let workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );

        let grace = self.config.shutdown_grace;
        let joined = tokio::time::timeout(grace, async {
            for worker in workers {
                if let Err(e) = worker.await {
                    tracing::error!(error = %e, "Transcode worker terminated abnormally");
                }
            }
        })
        .await;

        if joined.is_err() {
            tracing::warn!(
                grace_secs = grace.as_secs(),
                "Transcode workers did not stop within the grace period"
            );
        }

        let abandoned = self.drain_queue();
        if !abandoned.is_empty() {
            let media_ids: Vec<String> = abandoned.iter().map(Uuid::to_string).collect();
            tracing::warn!(
                count = abandoned.len(),
                media_ids = %media_ids.join(","),
                "Queued transcode jobs abandoned at shutdown, records left pending"
            );
        }
        tracing::info!(
            abandoned = abandoned.len(),
            still_running = self.in_flight_count(),
            "Transcode dispatcher shut down"
        );
        abandoned
    }

    /// Take every job still sitting in the queue and release its id.
    fn drain_queue(&self) -> Vec<Uuid> {
        let Ok(mut rx) = self.rx.try_lock() else {
            tracing::warn!("Transcode queue still held by a worker, skipping drain");
            return Vec::new();
        };
        rx.close();
        let mut abandoned = Vec::new();
        while let Ok(job) = rx.try_recv() {
            self.in_flight.remove(job.media.id);
            abandoned.push(job.media.id);
        }
        abandoned
    }

    async fn worker(
        index: usize,
        rx: JobQueue,
        handler: Arc<dyn JobHandler>,
        in_flight: Arc<InFlight>,
        shutdown: CancellationToken,
    ) {
        loop {
            let job = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => None,
                    job = rx.recv() => job,
                }
            };
            let Some(job) = job else { break };

            let media_id = job.media.id;
            let _guard = InFlightGuard {
                id: media_id,
                in_flight: in_flight.clone(),
            };
            tracing::info!(worker = index, media_id = %media_id, "Starting transcode job");

            // a panicking job must not take the worker down with it
            let handler = handler.clone();
            let cancel = shutdown.child_token();
            let run = tokio::spawn(async move { handler.handle(job.media, cancel).await });
            if let Err(e) = run.await {
                tracing::error!(worker = index, media_id = %media_id, error = %e, "Transcode job panicked");
            }
        }
        tracing::debug!(worker = index, "Transcode worker stopped");
    }
}

impl Drop for TranscodeDispatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mediaflow_core::{MediaStatus, RawLocation};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Counts runs and holds each one until the test releases the gate.
    struct GatedHandler {
        runs: Mutex<Vec<Uuid>>,
        gate: Semaphore,
        cancelled: AtomicUsize,
    }

    impl GatedHandler {
        fn new(open: bool) -> Arc<Self> {
            Arc::new(Self {
                runs: Mutex::new(Vec::new()),
                gate: Semaphore::new(if open { Semaphore::MAX_PERMITS } else { 0 }),
                cancelled: AtomicUsize::new(0),
            })
        }

        fn runs(&self) -> Vec<Uuid> {
            self.runs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobHandler for GatedHandler {
        async fn handle(&self, media: Media, cancel: CancellationToken) {
            self.runs.lock().unwrap().push(media.id);
            tokio::select! {
                permit = self.gate.acquire() => drop(permit),
                _ = cancel.cancelled() => {
                    self.cancelled.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }

    fn media() -> Media {
        let id = Uuid::new_v4();
        let mut media = Media::draft(
            id,
            RawLocation {
                bucket: "raw".to_string(),
                object: format!("media/{}", id),
            },
        );
        media.status = MediaStatus::Pending;
        media
    }

    #[tokio::test]
    async fn test_shutdown_reports_queued_jobs() {
        let handler = GatedHandler::new(false);
        let dispatcher = TranscodeDispatcher::new(
            handler.clone(),
            DispatcherConfig {
                workers: 1,
                ..config(10)
            },
        );
        let running = media();
        let queued = [media(), media()];

        acquire(&dispatcher, running.id).dispatch(running.clone()).unwrap();
        wait_until(|| handler.runs().len() == 1).await;
        for media in &queued {
            acquire(&dispatcher, media.id).dispatch(media.clone()).unwrap();
        }

        let mut abandoned = dispatcher.shutdown().await;
        abandoned.sort();
        let mut expected: Vec<Uuid> = queued.iter().map(|m| m.id).collect();
        expected.sort();
        assert_eq!(abandoned, expected);
        assert_eq!(handler.runs(), vec![running.id]);
        assert_eq!(dispatcher.in_flight_count(), 0);
    }

    fn config(queue_size: usize) -> DispatcherConfig {
        DispatcherConfig {
            queue_size,
            workers: 2,
            shutdown_grace: Duration::from_secs(5),
        }
    }

    fn acquire(dispatcher: &TranscodeDispatcher, id: Uuid) -> DispatchTicket {
        match dispatcher.reserve(id).unwrap() {
            Reservation::Acquired(ticket) => ticket,
            Reservation::AlreadyInFlight => panic!("expected to acquire {id}"),
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_second_reservation_for_same_id_is_refused() {
        let dispatcher = TranscodeDispatcher::new(GatedHandler::new(true), config(10));
        let media = media();

        let ticket = acquire(&dispatcher, media.id);
        assert!(matches!(
            dispatcher.reserve(media.id).unwrap(),
            Reservation::AlreadyInFlight
        ));

        drop(ticket);
        assert!(!dispatcher.is_in_flight(media.id));
        let _again = acquire(&dispatcher, media.id);
    }

    #[tokio::test]
    async fn test_concurrent_reservations_have_one_winner() {
        let dispatcher = Arc::new(TranscodeDispatcher::new(GatedHandler::new(false), config(10)));
        let id = Uuid::new_v4();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    match dispatcher.reserve(id).unwrap() {
                        // keep the winning ticket alive past the race
                        Reservation::Acquired(ticket) => Some(ticket),
                        Reservation::AlreadyInFlight => None,
                    }
                })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        let winners = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Some(_))))
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_dispatched_job_runs_once_and_releases_id() {
        let handler = GatedHandler::new(true);
        let dispatcher = TranscodeDispatcher::new(handler.clone(), config(10));
        let media = media();

        acquire(&dispatcher, media.id).dispatch(media.clone()).unwrap();

        wait_until(|| !dispatcher.is_in_flight(media.id)).await;
        assert_eq!(handler.runs(), vec![media.id]);
    }

    #[tokio::test]
    async fn test_id_stays_in_flight_while_running() {
        let handler = GatedHandler::new(false);
        let dispatcher = TranscodeDispatcher::new(handler.clone(), config(10));
        let media = media();

        acquire(&dispatcher, media.id).dispatch(media.clone()).unwrap();
        wait_until(|| handler.runs().len() == 1).await;

        assert!(matches!(
            dispatcher.reserve(media.id).unwrap(),
            Reservation::AlreadyInFlight
        ));

        handler.gate.add_permits(1);
        wait_until(|| !dispatcher.is_in_flight(media.id)).await;
        assert_eq!(handler.runs().len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_with_busy() {
        let handler = GatedHandler::new(false);
        let dispatcher = TranscodeDispatcher::new(handler.clone(), config(2));

        let first = media();
        let second = media();
        acquire(&dispatcher, first.id).dispatch(first).unwrap();
        acquire(&dispatcher, second.id).dispatch(second).unwrap();

        let err = dispatcher.reserve(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, DispatchError::Busy(2)));
        assert!(matches!(AppError::from(err), AppError::Busy(_)));

        handler.gate.add_permits(2);
        wait_until(|| dispatcher.in_flight_count() == 0).await;
        let _ticket = acquire(&dispatcher, Uuid::new_v4());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_jobs() {
        let handler = GatedHandler::new(false);
        let dispatcher = TranscodeDispatcher::new(handler.clone(), config(10));
        let media = media();

        acquire(&dispatcher, media.id).dispatch(media).unwrap();
        wait_until(|| handler.runs().len() == 1).await;

        dispatcher.shutdown().await;
        assert_eq!(handler.cancelled.load(Ordering::SeqCst), 1);
        assert!(matches!(
            dispatcher.reserve(Uuid::new_v4()),
            Err(DispatchError::Closed)
        ));
    }
}
