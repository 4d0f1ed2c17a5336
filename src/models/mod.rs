pub mod metadata;
pub mod record;
pub mod upload;

pub use metadata::{Effects, EnrichmentRecord, FileMetadata, Location};
pub use record::{RecordSummary, ResultItem, ResultRecord};
pub use upload::UploadedFile;
