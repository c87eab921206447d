//! Redb table definitions for persistent metadata storage.

use redb::TableDefinition;

// Volumes
// Key: volume ID, Value: bincode-encoded VolumeInfo
pub const VOLUMES: TableDefinition<&str, &[u8]> = TableDefinition::new("volumes");
// Key: volume name, Value: volume ID
pub const VOLUME_NAMES: TableDefinition<&str, &str> = TableDefinition::new("volume_names");

// Files
// Key: "volume_id:file_id" (file ID zero padded), Value: bincode-encoded FileMetadata
pub const FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("files");
// Key: "volume_id:path", Value: file ID
pub const PATHS: TableDefinition<&str, u64> = TableDefinition::new("paths");

// Cluster
pub const OSD_NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("osd_nodes");

// Server bookkeeping, e.g. the start-up generation
pub const SERVER_STATE: TableDefinition<&str, u64> = TableDefinition::new("server_state");

pub const GENERATION_KEY: &str = "generation";

#[must_use]
pub fn file_key(volume_id: &str, file_id: u64) -> String {
    format!("{volume_id}:{file_id:020}")
}

#[must_use]
pub fn path_key(volume_id: &str, path: &str) -> String {
    format!("{volume_id}:{path}")
}
