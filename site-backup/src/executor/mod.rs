pub mod archiver;
pub mod dumper;
pub mod manifest;
pub mod restore;
pub mod staging;

pub use archiver::{ChunkedArchiver, SealedArchive};
pub use dumper::DatabaseDumper;
pub use manifest::Manifest;
pub use restore::{restore_archive, RestoreOptions, RestoreReport, RestoreStatus};
pub use staging::StagingArea;
