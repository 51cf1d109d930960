//! Background job plumbing for the transcoding pipeline.
//!
//! [`TranscodeDispatcher`] owns a bounded queue and a fixed pool of workers
//! and guarantees at most one run per media id. [`ConcurrencyLimiter`] bounds
//! how many transcodes execute at once.

pub mod dispatcher;
pub mod handler;
pub mod limiter;

pub use dispatcher::{
    DispatchError, DispatchTicket, DispatcherConfig, Reservation, TranscodeDispatcher,
};
pub use handler::JobHandler;
pub use limiter::{ConcurrencyLimiter, LimiterClosed, LimiterSlot};
