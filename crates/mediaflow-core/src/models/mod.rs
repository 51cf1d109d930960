pub mod media;
pub mod upload;

pub use media::{Media, MediaResponse, MediaStatus, RawLocation};
pub use upload::{
    CompleteUploadRequest, CompleteUploadResponse, InitLargeUploadRequest, InitUploadRequest,
    MultipartUploadPlan, UploadPlan, UploadedPart,
};
