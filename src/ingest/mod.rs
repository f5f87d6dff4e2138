pub mod identity;
pub mod locks;
pub mod pipeline;

pub use locks::UrlLocks;
pub use pipeline::{IngestOutcome, Ingestor, PageChunker, PageDocument, ReconcileReport};
