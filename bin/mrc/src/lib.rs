//! MRC - metadata and replica catalog server
//!
//! Keeps the replica lists (XLocSets) of files and reconfigures them safely
//! while OSDs keep serving the file:
//!
//! - `operations`: replica add/remove, OSD reselection, update policy, open
//! - `coordinator`: invalidation of old replicas and install of new lists
//! - `recovery`: repair of changes interrupted by a crash or restart
//! - `stage`: the single processing stage all operations run on
//! - `api`: JSON management API

pub mod api;
pub mod collab;
pub mod context;
pub mod coordinator;
pub mod lock;
pub mod operations;
pub mod osd_client;
pub mod recovery;
pub mod server;
pub mod stage;

#[cfg(test)]
pub(crate) mod testing;

pub use context::MrcContext;
pub use server::MrcServer;
