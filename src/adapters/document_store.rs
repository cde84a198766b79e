use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use scc::HashMap;

use crate::{
    ports::document_store::{DocumentStore, DocumentStoreError, DocumentStoreResult},
    utils::write_atomic,
};

/// Document store held entirely in memory.
#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: HashMap<(String, String, String), Bytes>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(corpus: &str, collection: &str, id: &str) -> (String, String, String) {
        (corpus.to_string(), collection.to_string(), id.to_string())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, corpus: &str, collection: &str, id: &str) -> DocumentStoreResult<Option<Bytes>> {
        Ok(self
            .docs
            .get_async(&Self::key(corpus, collection, id))
            .await
            .map(|entry| entry.get().clone()))
    }

    async fn put(&self, corpus: &str, collection: &str, id: &str, doc: Bytes) -> DocumentStoreResult<()> {
        *self
            .docs
            .entry_async(Self::key(corpus, collection, id))
            .await
            .or_insert_with(Bytes::new)
            .get_mut() = doc;
        Ok(())
    }

    async fn delete(&self, corpus: &str, collection: &str, id: &str) -> DocumentStoreResult<bool> {
        Ok(self
            .docs
            .remove_async(&Self::key(corpus, collection, id))
            .await
            .is_some())
    }
}

/// Documents stored as files under `{root}/{corpus}/{collection}/{id}`.
#[derive(Debug, Clone)]
pub struct DiskDocumentStore {
    root: PathBuf,
}

impl DiskDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Each key component must be a single, non-special path segment.
    fn segment(value: &str) -> DocumentStoreResult<&str> {
        if value.is_empty()
            || value == "."
            || value == ".."
            || value.contains('/')
            || value.contains('\\')
            || value.contains('\0')
        {
            return Err(DocumentStoreError::InvalidKey(value.to_string()));
        }
        Ok(value)
    }

    fn doc_path(&self, corpus: &str, collection: &str, id: &str) -> DocumentStoreResult<PathBuf> {
        Ok(self
            .root
            .join(Self::segment(corpus)?)
            .join(Self::segment(collection)?)
            .join(Self::segment(id)?))
    }
}

#[async_trait]
impl DocumentStore for DiskDocumentStore {
    async fn get(&self, corpus: &str, collection: &str, id: &str) -> DocumentStoreResult<Option<Bytes>> {
        let path = self.doc_path(corpus, collection, id)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, corpus: &str, collection: &str, id: &str, doc: Bytes) -> DocumentStoreResult<()> {
        let path = self.doc_path(corpus, collection, id)?;
        write_atomic(&path, &doc).await?;
        Ok(())
    }

    async fn delete(&self, corpus: &str, collection: &str, id: &str) -> DocumentStoreResult<bool> {
        let path = self.doc_path(corpus, collection, id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
