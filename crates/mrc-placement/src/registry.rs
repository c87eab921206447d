//! Registry of the OSDs known to the MRC

use crate::error::PlacementError;
use mrc_common::OsdUuid;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Operational status of an OSD
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OsdStatus {
    /// Accepts new replicas
    #[default]
    Active,
    /// Keeps serving existing replicas but receives no new ones
    Draining,
    /// Unreachable
    Offline,
}

/// An OSD as seen by the MRC
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OsdInfo {
    pub uuid: OsdUuid,
    /// Base URL of the OSD's management endpoint
    pub address: String,
    /// Failure domain label; replicas spread across distinct labels first
    pub failure_domain: String,
    /// Relative selection weight
    pub weight: f64,
    pub status: OsdStatus,
}

impl OsdInfo {
    /// Create an active OSD with weight 1.0
    #[must_use]
    pub fn new(
        uuid: impl Into<OsdUuid>,
        address: impl Into<String>,
        failure_domain: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            address: address.into(),
            failure_domain: failure_domain.into(),
            weight: 1.0,
            status: OsdStatus::Active,
        }
    }

    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.status == OsdStatus::Active && self.weight > 0.0
    }
}

/// Registry of OSDs
#[derive(Debug, Default)]
pub struct OsdRegistry {
    nodes: RwLock<HashMap<OsdUuid, OsdInfo>>,
}

impl OsdRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update an OSD
    pub fn upsert(&self, info: OsdInfo) {
        self.nodes.write().insert(info.uuid.clone(), info);
    }

    /// Remove an OSD
    pub fn remove(&self, uuid: &OsdUuid) -> Option<OsdInfo> {
        self.nodes.write().remove(uuid)
    }

    /// Change the status of a registered OSD
    pub fn set_status(&self, uuid: &OsdUuid, status: OsdStatus) -> Result<(), PlacementError> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(uuid)
            .ok_or_else(|| PlacementError::UnknownOsd(uuid.to_string()))?;
        node.status = status;
        Ok(())
    }

    #[must_use]
    pub fn get(&self, uuid: &OsdUuid) -> Option<OsdInfo> {
        self.nodes.read().get(uuid).cloned()
    }

    /// Management address of an OSD
    #[must_use]
    pub fn address_of(&self, uuid: &OsdUuid) -> Option<String> {
        self.nodes.read().get(uuid).map(|n| n.address.clone())
    }

    /// Snapshot of every registered OSD
    #[must_use]
    pub fn all(&self) -> Vec<OsdInfo> {
        self.nodes.read().values().cloned().collect()
    }

    /// Snapshot of all OSDs accepting new replicas
    #[must_use]
    pub fn usable(&self) -> Vec<OsdInfo> {
        self.nodes
            .read()
            .values()
            .filter(|n| n.is_usable())
            .cloned()
            .collect()
    }

    /// Check that every given OSD is registered and usable
    pub fn check_usable<'a>(
        &self,
        uuids: impl IntoIterator<Item = &'a OsdUuid>,
    ) -> Result<(), PlacementError> {
        let nodes = self.nodes.read();
        for uuid in uuids {
            match nodes.get(uuid) {
                None => return Err(PlacementError::UnknownOsd(uuid.to_string())),
                Some(n) if !n.is_usable() => {
                    return Err(PlacementError::UnusableOsd(uuid.to_string()));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}
