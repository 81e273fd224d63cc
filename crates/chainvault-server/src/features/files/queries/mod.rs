pub mod convert_status;
pub mod download;
pub mod list;

pub use convert_status::{ConvertStatusError, ConvertStatusQuery, ConvertStatusResponse};
pub use download::{DownloadFileError, DownloadFileQuery, DownloadFileResponse};
pub use list::{ListFilesError, ListFilesQuery, ListFilesResponse};
