//! API constants

/// Versioned prefix of every API route
pub const API_PREFIX: &str = "/api/v0";

/// Route the local storage backend signs its upload URLs for, relative to `API_PREFIX`
pub const LOCAL_STORAGE_ROUTE: &str = "/local-storage";

/// `Retry-After` sent with `503 Busy`
pub const BUSY_RETRY_AFTER_SECS: u64 = 5;
