pub mod drive;
pub mod errors;
pub mod oauth;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use drive::{Credentials, DriveClient, DriveFile, DriveSettings, FOLDER_MIME_TYPE};
pub use errors::DriveError;
