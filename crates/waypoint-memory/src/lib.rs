pub mod db;
pub mod embeddings;
pub mod retriever;
pub mod types;

pub use db::KnowledgeDatabase;
pub use embeddings::{Embedder, ProviderEmbedder};
pub use retriever::*;
pub use types::*;
