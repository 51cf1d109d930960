//! Mediaflow API Library
//!
//! HTTP surface over the upload coordinator, the completion handler and the
//! transcode dispatcher, plus application setup.

mod api_doc;
pub mod constants;
pub mod error;
mod handlers;
pub mod services;
pub mod setup;
pub mod state;
pub mod telemetry;

pub use error::{ErrorResponse, HttpAppError};
pub use services::{CompletionHandler, UploadCoordinator};
pub use state::AppState;
