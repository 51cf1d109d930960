pub mod complete;
pub mod local_storage;
pub mod media;
pub mod uploads;
