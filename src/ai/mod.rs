mod batch_client;
mod chat;
mod embedder;
mod labeler;
pub mod prompts;

pub use batch_client::{BatchBackend, OpenAiBatchClient};
pub use chat::{ChatClient, ChatModel};
pub use embedder::{ensure_embeddings, Embedder, EmbeddingCache, EmbeddingSet, VoyageEmbedder};
pub use labeler::{load_keywords, KeywordMap, TopicLabeler};
