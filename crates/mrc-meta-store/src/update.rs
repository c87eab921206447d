//! Atomic metadata updates
//!
//! An update collects the mutations of one operation plus values to hand
//! back once they are durable. [`AtomicMetadataUpdate::commit`] writes all
//! mutations in a single transaction and only then returns the post-commit
//! values; if the write fails, the values are dropped with it.

use crate::error::MetaStoreResult;
use crate::store::MetaStore;
use crate::types::{FileMetadata, VolumeInfo};
use std::sync::Arc;

/// A single metadata change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    PutFile { volume_id: String, file: FileMetadata },
    PutPath { volume_id: String, path: String, file_id: u64 },
    PutVolume(VolumeInfo),
}

/// Ordered mutations plus post-commit values of type `P`
pub struct AtomicMetadataUpdate<P = ()> {
    store: Arc<MetaStore>,
    mutations: Vec<Mutation>,
    post_commit: Vec<P>,
}

impl<P> AtomicMetadataUpdate<P> {
    #[must_use]
    pub fn new(store: Arc<MetaStore>) -> Self {
        Self {
            store,
            mutations: Vec::new(),
            post_commit: Vec::new(),
        }
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    /// Write a file snapshot; a later write of the same file wins.
    pub fn put_file(&mut self, volume_id: &str, file: FileMetadata) {
        self.push(Mutation::PutFile {
            volume_id: volume_id.to_string(),
            file,
        });
    }

    pub fn put_path(&mut self, volume_id: &str, path: &str, file_id: u64) {
        self.push(Mutation::PutPath {
            volume_id: volume_id.to_string(),
            path: path.to_string(),
            file_id,
        });
    }

    pub fn put_volume(&mut self, volume: VolumeInfo) {
        self.push(Mutation::PutVolume(volume));
    }

    /// Hand `value` back from [`commit`](Self::commit) once the mutations are durable.
    pub fn on_commit(&mut self, value: P) {
        self.post_commit.push(value);
    }

    #[must_use]
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty() && self.post_commit.is_empty()
    }

    /// Durably apply every mutation, then return the post-commit values in
    /// registration order.
    pub fn commit(self) -> MetaStoreResult<Vec<P>> {
        self.store.apply(&self.mutations)?;
        Ok(self.post_commit)
    }
}
