//! Persistent metadata store backed by redb.
//!
//! Point reads open their own read txn. Every metadata change of an
//! operation goes through [`MetaStore::apply`], which writes all mutations
//! in one write txn.

use crate::error::{MetaStoreError, MetaStoreResult};
use crate::tables::{self, file_key, path_key};
use crate::types::{FileMetadata, VolumeInfo};
use crate::update::Mutation;
use mrc_placement::OsdInfo;
use redb::{Database, ReadableTable};
use std::path::Path;
use tracing::{debug, error, info};

/// Persistent metadata store backed by redb.
pub struct MetaStore {
    db: Database,
}

impl MetaStore {
    /// Open (or create) the redb database at the given path.
    pub fn open(path: impl AsRef<Path>) -> MetaStoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Create all tables eagerly so later read txns don't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(tables::VOLUMES)?;
            let _t = write_txn.open_table(tables::VOLUME_NAMES)?;
            let _t = write_txn.open_table(tables::FILES)?;
            let _t = write_txn.open_table(tables::PATHS)?;
            let _t = write_txn.open_table(tables::OSD_NODES)?;
            let _t = write_txn.open_table(tables::SERVER_STATE)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    // ---- Server state ----

    /// Increment and persist the server generation. Called once per start-up.
    pub fn bump_generation(&self) -> MetaStoreResult<u64> {
        let write_txn = self.db.begin_write()?;
        let generation = {
            let mut table = write_txn.open_table(tables::SERVER_STATE)?;
            let current = table
                .get(tables::GENERATION_KEY)?
                .map_or(0, |v| v.value());
            table.insert(tables::GENERATION_KEY, current + 1)?;
            current + 1
        };
        write_txn.commit()?;
        info!("Server generation is now {}", generation);
        Ok(generation)
    }

    /// Current server generation, 0 before the first start-up
    pub fn generation(&self) -> MetaStoreResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::SERVER_STATE)?;
        Ok(table
            .get(tables::GENERATION_KEY)?
            .map_or(0, |v| v.value()))
    }

    // ---- Volumes (bincode) ----

    /// Create a volume together with its root directory.
    pub fn create_volume(&self, volume: &VolumeInfo) -> MetaStoreResult<()> {
        let volume_bytes = bincode::serialize(volume)?;
        let root = FileMetadata::new_directory(
            VolumeInfo::ROOT_DIR_ID,
            "/",
            volume.owner.clone(),
            volume.created_at_ms,
        );
        let root_bytes = bincode::serialize(&root)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut names = write_txn.open_table(tables::VOLUME_NAMES)?;
            if names.get(volume.name.as_str())?.is_some() {
                return Err(MetaStoreError::VolumeExists(volume.name.clone()));
            }
            names.insert(volume.name.as_str(), volume.id.as_str())?;

            let mut volumes = write_txn.open_table(tables::VOLUMES)?;
            volumes.insert(volume.id.as_str(), volume_bytes.as_slice())?;

            let mut files = write_txn.open_table(tables::FILES)?;
            files.insert(
                file_key(&volume.id, VolumeInfo::ROOT_DIR_ID).as_str(),
                root_bytes.as_slice(),
            )?;

            let mut paths = write_txn.open_table(tables::PATHS)?;
            paths.insert(path_key(&volume.id, "/").as_str(), VolumeInfo::ROOT_DIR_ID)?;
        }
        write_txn.commit()?;
        info!("Created volume '{}' ({})", volume.name, volume.id);
        Ok(())
    }

    pub fn get_volume(&self, volume_id: &str) -> MetaStoreResult<Option<VolumeInfo>> {
        self.get_bincode(tables::VOLUMES, volume_id)
    }

    pub fn volume_by_name(&self, name: &str) -> MetaStoreResult<Option<VolumeInfo>> {
        let id = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(tables::VOLUME_NAMES)?;
            let id = table.get(name)?.map(|v| v.value().to_string());
            id
        };
        match id {
            Some(id) => self.get_volume(&id),
            None => Ok(None),
        }
    }

    pub fn load_volumes(&self) -> MetaStoreResult<Vec<VolumeInfo>> {
        Ok(self
            .load_bincode_table(tables::VOLUMES)?
            .into_iter()
            .map(|(_, v)| v)
            .collect())
    }

    // ---- Files (bincode) ----

    pub fn get_file(&self, volume_id: &str, file_id: u64) -> MetaStoreResult<Option<FileMetadata>> {
        self.get_bincode(tables::FILES, &file_key(volume_id, file_id))
    }

    pub fn lookup_path(&self, volume_id: &str, path: &str) -> MetaStoreResult<Option<u64>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::PATHS)?;
        let id = table.get(path_key(volume_id, path).as_str())?.map(|v| v.value());
        Ok(id)
    }

    // ---- OSDs (bincode) ----

    pub fn put_osd(&self, osd: &OsdInfo) -> MetaStoreResult<()> {
        self.put_bincode(tables::OSD_NODES, osd.uuid.as_str(), osd)
    }

    pub fn delete_osd(&self, uuid: &str) -> MetaStoreResult<()> {
        self.delete_key(tables::OSD_NODES, uuid)
    }

    pub fn load_osds(&self) -> MetaStoreResult<Vec<OsdInfo>> {
        Ok(self
            .load_bincode_table(tables::OSD_NODES)?
            .into_iter()
            .map(|(_, v)| v)
            .collect())
    }

    // ---- Atomic updates ----

    /// Apply all mutations in order within one write txn.
    ///
    /// On error nothing is written.
    pub(crate) fn apply(&self, mutations: &[Mutation]) -> MetaStoreResult<()> {
        if mutations.is_empty() {
            return Ok(());
        }
        let write_txn = self.db.begin_write()?;
        {
            let mut files = write_txn.open_table(tables::FILES)?;
            let mut paths = write_txn.open_table(tables::PATHS)?;
            let mut volumes = write_txn.open_table(tables::VOLUMES)?;
            for mutation in mutations {
                match mutation {
                    Mutation::PutFile { volume_id, file } => {
                        let bytes = bincode::serialize(file)?;
                        files.insert(file_key(volume_id, file.id).as_str(), bytes.as_slice())?;
                    }
                    Mutation::PutPath {
                        volume_id,
                        path,
                        file_id,
                    } => {
                        paths.insert(path_key(volume_id, path).as_str(), *file_id)?;
                    }
                    Mutation::PutVolume(volume) => {
                        let bytes = bincode::serialize(volume)?;
                        volumes.insert(volume.id.as_str(), bytes.as_slice())?;
                    }
                }
            }
        }
        write_txn.commit()?;
        debug!("Committed {} metadata mutations", mutations.len());
        Ok(())
    }

    // ---- Generic helpers ----

    fn get_bincode<T: serde::de::DeserializeOwned>(
        &self,
        table_def: redb::TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> MetaStoreResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table_def)?;
        let value = match table.get(key)? {
            Some(bytes) => Some(bincode::deserialize(bytes.value())?),
            None => None,
        };
        Ok(value)
    }

    fn put_bincode<T: serde::Serialize>(
        &self,
        table_def: redb::TableDefinition<&str, &[u8]>,
        key: &str,
        value: &T,
    ) -> MetaStoreResult<()> {
        let bytes = bincode::serialize(value)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(table_def)?;
            table.insert(key, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete_key(
        &self,
        table_def: redb::TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> MetaStoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(table_def)?;
            table.remove(key)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn load_bincode_table<T: serde::de::DeserializeOwned>(
        &self,
        table_def: redb::TableDefinition<&str, &[u8]>,
    ) -> MetaStoreResult<Vec<(String, T)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table_def)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let key = entry.0.value().to_string();
            let bytes = entry.1.value();
            match bincode::deserialize::<T>(bytes) {
                Ok(val) => result.push((key, val)),
                Err(e) => error!("Failed to decode entry '{}': {}", key, e),
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mrc_common::OsdUuid;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, MetaStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MetaStore::open(dir.path().join("mrc.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_generation_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mrc.redb");
        {
            let store = MetaStore::open(&path).unwrap();
            assert_eq!(store.generation().unwrap(), 0);
            assert_eq!(store.bump_generation().unwrap(), 1);
        }
        let store = MetaStore::open(&path).unwrap();
        assert_eq!(store.generation().unwrap(), 1);
        assert_eq!(store.bump_generation().unwrap(), 2);
    }

    #[test]
    fn test_create_volume_with_root() {
        let (_dir, store) = open_store();
        let volume = VolumeInfo::new("v-1", "scratch", "alice", 0);
        store.create_volume(&volume).unwrap();

        assert_eq!(store.volume_by_name("scratch").unwrap(), Some(volume.clone()));
        assert_eq!(store.get_volume("v-1").unwrap(), Some(volume));
        assert_eq!(
            store.lookup_path("v-1", "/").unwrap(),
            Some(VolumeInfo::ROOT_DIR_ID)
        );
        let root = store.get_file("v-1", VolumeInfo::ROOT_DIR_ID).unwrap().unwrap();
        assert!(root.is_directory);
        assert_eq!(root.owner, "alice");
    }

    #[test]
    fn test_duplicate_volume_name() {
        let (_dir, store) = open_store();
        store
            .create_volume(&VolumeInfo::new("v-1", "scratch", "alice", 0))
            .unwrap();
        let err = store
            .create_volume(&VolumeInfo::new("v-2", "scratch", "bob", 0))
            .unwrap_err();
        assert!(matches!(err, MetaStoreError::VolumeExists(_)));
        assert!(store.get_volume("v-2").unwrap().is_none());
    }

    #[test]
    fn test_apply_writes_all_mutations() {
        let (_dir, store) = open_store();
        store
            .create_volume(&VolumeInfo::new("v-1", "scratch", "alice", 0))
            .unwrap();
        let file = FileMetadata::new_file(2, "/data", "alice", 0);
        store
            .apply(&[
                Mutation::PutFile {
                    volume_id: "v-1".into(),
                    file: file.clone(),
                },
                Mutation::PutPath {
                    volume_id: "v-1".into(),
                    path: "/data".into(),
                    file_id: 2,
                },
            ])
            .unwrap();
        assert_eq!(store.get_file("v-1", 2).unwrap(), Some(file));
        assert_eq!(store.lookup_path("v-1", "/data").unwrap(), Some(2));
    }

    #[test]
    fn test_osd_persistence() {
        let (_dir, store) = open_store();
        store.put_osd(&OsdInfo::new("osd-1", "http://a:1", "rack-1")).unwrap();
        store.put_osd(&OsdInfo::new("osd-2", "http://b:1", "rack-2")).unwrap();
        store.delete_osd("osd-1").unwrap();
        let osds = store.load_osds().unwrap();
        assert_eq!(osds.len(), 1);
        assert_eq!(osds[0].uuid, OsdUuid::from("osd-2"));
    }
}
