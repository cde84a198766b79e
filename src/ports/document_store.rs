use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DocumentStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid document key: {0}")]
    InvalidKey(String),
}

pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

/// Key-value document store addressed by corpus, collection and id.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn get(&self, corpus: &str, collection: &str, id: &str)
    -> DocumentStoreResult<Option<Bytes>>;

    async fn put(&self, corpus: &str, collection: &str, id: &str, doc: Bytes)
    -> DocumentStoreResult<()>;

    /// Returns `true` when a document was removed.
    async fn delete(&self, corpus: &str, collection: &str, id: &str) -> DocumentStoreResult<bool>;
}
