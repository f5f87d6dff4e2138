pub mod classifier;
pub mod policy;
pub mod variants;

pub use classifier::{extract_keywords, ClassifiedQuery, QueryClassifier, QueryType};
pub use policy::{AdjacencyWindow, AdjacencyWindows, RetrievalPolicy};
pub use variants::{alternate_candidates, alternate_query, build_variants, should_decompose, RetryReason};
