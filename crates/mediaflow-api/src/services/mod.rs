pub mod completion;
pub mod upload;

pub use completion::{CompletionHandler, MultipartCompletion};
pub use upload::UploadCoordinator;
