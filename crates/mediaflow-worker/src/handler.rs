//! Job handler trait
//!
//! The processing crate implements this for its transcoding pipeline. The
//! dispatcher's workers call `handle` once per dispatched media item.

use async_trait::async_trait;
use mediaflow_core::Media;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Run the job to completion. Failures are recorded by the handler itself;
    /// there is no caller left to report them to.
    ///
    /// `cancel` fires when the dispatcher shuts down.
    async fn handle(&self, media: Media, cancel: CancellationToken);
}
