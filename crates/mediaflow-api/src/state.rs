//! Shared application state handed to every handler.

use crate::services::{CompletionHandler, UploadCoordinator};
use mediaflow_core::Config;
use mediaflow_db::MediaRecordStore;
use mediaflow_storage::{LocalStorage, Storage};
use mediaflow_worker::{ConcurrencyLimiter, TranscodeDispatcher};
use std::sync::Arc;

pub struct AppState {
    pub config: Config,
    pub storage: Arc<dyn Storage>,
    /// Set when the local backend is active; backs the signed upload route
    pub local_storage: Option<Arc<LocalStorage>>,
    pub records: Arc<dyn MediaRecordStore>,
    pub dispatcher: Arc<TranscodeDispatcher>,
    /// The pipeline's transcode slots
    pub transcode_slots: ConcurrencyLimiter,
    pub uploads: UploadCoordinator,
    pub completion: CompletionHandler,
}
