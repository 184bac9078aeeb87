pub mod conflict;
pub mod engine;
pub mod resolver;
pub mod scanner;
pub mod transfer;
pub mod tree;
pub mod uploader;

pub use conflict::{tagged_name, CollisionGuard, SiblingTitles};
pub use engine::{AlbumListing, SyncEngine};
pub use resolver::{AlbumTarget, PathResolver, ResourcePath};
pub use scanner::{FileScanner, LocalFile, LocalListing, ScanConfig};
pub use transfer::{
    TaskFailure, TaskHandle, TaskOutcome, TaskOutput, TransferContext, TransferManager,
    TransferReport, TransferSummary, TransferTask,
};
pub use tree::{FullTree, TreeSnapshot};
pub use uploader::{chunk_count, ChunkUploadState, ChunkedUploader};
