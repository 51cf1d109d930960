//! Record store for media items
//!
//! `MediaRecordStore` is the seam the upload and transcoding code talk to.
//! `MediaRepository` persists to Postgres; `InMemoryMediaRepository` keeps
//! everything in a map for tests and single-process development.

pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::InMemoryMediaRepository;
pub use postgres::{setup_database, MediaRepository};
pub use store::{MediaRecordStore, RecordStoreError, RecordStoreResult};
