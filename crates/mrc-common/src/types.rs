//! Core types for the MRC
//!
//! This module defines file and OSD identifiers together with the
//! replica-location value types: a file's replicas are described by an
//! [`XLocList`], one [`XLoc`] per replica.

use crate::error::{Error, Result};
use derive_more::{From, Into};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// UUID of an object storage device
///
/// OSD UUIDs are opaque strings assigned by the directory service.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into)]
#[serde(transparent)]
pub struct OsdUuid(String);

impl OsdUuid {
    /// Create from any string-like value
    #[must_use]
    pub fn new(uuid: impl Into<String>) -> Self {
        Self(uuid.into())
    }

    /// Get as string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OsdUuid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Debug for OsdUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OsdUuid({})", self.0)
    }
}

impl fmt::Display for OsdUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cluster-wide file identifier: `volume_id:file_id`
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalFileId {
    pub volume_id: String,
    pub file_id: u64,
}

impl GlobalFileId {
    #[must_use]
    pub fn new(volume_id: impl Into<String>, file_id: u64) -> Self {
        Self {
            volume_id: volume_id.into(),
            file_id,
        }
    }
}

impl fmt::Debug for GlobalFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GlobalFileId({}:{})", self.volume_id, self.file_id)
    }
}

impl fmt::Display for GlobalFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.volume_id, self.file_id)
    }
}

impl FromStr for GlobalFileId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (volume_id, file_id) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::invalid_argument(format!("malformed file ID: {s}")))?;
        if volume_id.is_empty() {
            return Err(Error::invalid_argument(format!("malformed file ID: {s}")));
        }
        let file_id = file_id
            .parse::<u64>()
            .map_err(|_| Error::invalid_argument(format!("malformed file ID: {s}")))?;
        Ok(Self::new(volume_id, file_id))
    }
}

/// Striping pattern of a replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StripingPattern {
    #[default]
    Raid0,
}

/// How a replica's objects are distributed across its OSDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StripingPolicy {
    pub pattern: StripingPattern,
    /// Stripe size in KiB
    pub stripe_size_kb: u32,
    /// Number of OSDs the replica is striped over
    pub width: u32,
}

impl StripingPolicy {
    #[must_use]
    pub const fn raid0(stripe_size_kb: u32, width: u32) -> Self {
        Self {
            pattern: StripingPattern::Raid0,
            stripe_size_kb,
            width,
        }
    }

    /// Same policy with the width clamped to `max_width` (never below 1)
    #[must_use]
    pub fn with_max_width(self, max_width: u32) -> Self {
        Self {
            width: self.width.min(max_width).max(1),
            ..self
        }
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 {
            return Err(Error::invalid_argument("striping width must be at least 1"));
        }
        if self.stripe_size_kb == 0 {
            return Err(Error::invalid_argument("stripe size must be positive"));
        }
        Ok(())
    }
}

impl Default for StripingPolicy {
    fn default() -> Self {
        Self::raid0(128, 1)
    }
}

/// Per-replica replication flags
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, From, Into)]
#[serde(transparent)]
pub struct ReplicationFlags(u32);

impl ReplicationFlags {
    pub const FULL_REPLICA: Self = Self(1);
    pub const IS_COMPLETE: Self = Self(2);
    pub const STRATEGY_RANDOM: Self = Self(4);
    pub const STRATEGY_RAREST_FIRST: Self = Self(8);
    pub const STRATEGY_SEQUENTIAL: Self = Self(16);
    pub const STRATEGY_SEQUENTIAL_PREFETCHING: Self = Self(32);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// A full replica eventually holds every object of the file
    #[must_use]
    pub const fn is_full(self) -> bool {
        self.contains(Self::FULL_REPLICA)
    }

    /// A complete replica already holds every object of the file
    #[must_use]
    pub const fn is_complete(self) -> bool {
        self.contains(Self::IS_COMPLETE)
    }
}

impl std::ops::BitOr for ReplicationFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for ReplicationFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReplicationFlags({:#x})", self.0)
    }
}

/// Replica update policy of a file
///
/// Selects the consistency protocol the OSDs run among the replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum UpdatePolicy {
    /// Not replicated
    #[default]
    None,
    /// Read-only replication of an immutable file
    ReadOnly,
    /// Write quorum / read quorum
    WqRq,
    /// Write all / read one
    WaR1,
}

impl UpdatePolicy {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::ReadOnly => "ronly",
            Self::WqRq => "WqRq",
            Self::WaR1 => "WaR1",
        }
    }

    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        matches!(self, Self::ReadOnly)
    }

    /// Policies under which replicas accept writes and coordinate among themselves
    #[must_use]
    pub const fn is_read_write(&self) -> bool {
        matches!(self, Self::WqRq | Self::WaR1)
    }
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

impl FromStr for UpdatePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "none" => Ok(Self::None),
            "ronly" => Ok(Self::ReadOnly),
            "WqRq" => Ok(Self::WqRq),
            "WaR1" => Ok(Self::WaR1),
            other => Err(Error::invalid_argument(format!(
                "invalid replica update policy: {other}"
            ))),
        }
    }
}

impl TryFrom<String> for UpdatePolicy {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<UpdatePolicy> for String {
    fn from(p: UpdatePolicy) -> Self {
        p.as_str().to_string()
    }
}

/// Location of a single replica: a striping policy plus its OSDs
///
/// The first OSD is the head OSD, which identifies the replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XLoc {
    pub striping_policy: StripingPolicy,
    pub osd_uuids: Vec<OsdUuid>,
    pub replication_flags: ReplicationFlags,
}

impl XLoc {
    #[must_use]
    pub const fn new(
        striping_policy: StripingPolicy,
        osd_uuids: Vec<OsdUuid>,
        replication_flags: ReplicationFlags,
    ) -> Self {
        Self {
            striping_policy,
            osd_uuids,
            replication_flags,
        }
    }

    /// The OSD holding the first stripe
    #[must_use]
    pub fn head_osd(&self) -> Option<&OsdUuid> {
        self.osd_uuids.first()
    }

    fn validate(&self) -> Result<()> {
        self.striping_policy.validate()?;
        if self.osd_uuids.is_empty() {
            return Err(Error::invalid_argument("replica has no OSDs"));
        }
        if self.osd_uuids.len() != self.striping_policy.width as usize {
            return Err(Error::invalid_argument(format!(
                "replica lists {} OSDs but its striping width is {}",
                self.osd_uuids.len(),
                self.striping_policy.width
            )));
        }
        Ok(())
    }
}

/// Versioned list of a file's replicas
///
/// Every installed change carries a strictly greater version; the OSDs use
/// the version to reject requests that were issued against an older view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XLocList {
    pub version: u64,
    pub replicas: Vec<XLoc>,
    pub update_policy: UpdatePolicy,
}

impl XLocList {
    /// Build a validated list. No OSD may appear twice.
    pub fn new(replicas: Vec<XLoc>, update_policy: UpdatePolicy, version: u64) -> Result<Self> {
        let mut seen = HashSet::new();
        for replica in &replicas {
            replica.validate()?;
            for osd in &replica.osd_uuids {
                if !seen.insert(osd) {
                    return Err(Error::invalid_argument(format!(
                        "OSD {osd} is used by more than one replica"
                    )));
                }
            }
        }
        Ok(Self {
            version,
            replicas,
            update_policy,
        })
    }

    /// List of a file that has no replicas yet
    #[must_use]
    pub const fn empty(update_policy: UpdatePolicy) -> Self {
        Self {
            version: 0,
            replicas: Vec::new(),
            update_policy,
        }
    }

    /// Same membership and policy under another version
    #[must_use]
    pub fn with_version(&self, version: u64) -> Self {
        Self {
            version,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    /// Head OSDs of all replicas, in list order
    #[must_use]
    pub fn head_osds(&self) -> Vec<&OsdUuid> {
        self.replicas.iter().filter_map(XLoc::head_osd).collect()
    }

    /// Check whether any replica uses the given OSD
    #[must_use]
    pub fn contains_osd(&self, osd: &OsdUuid) -> bool {
        self.replicas.iter().any(|r| r.osd_uuids.contains(osd))
    }

    /// Every OSD used by any replica
    pub fn osds(&self) -> impl Iterator<Item = &OsdUuid> {
        self.replicas.iter().flat_map(|r| r.osd_uuids.iter())
    }

    /// Index of the replica whose head OSD is `osd`
    #[must_use]
    pub fn replica_index_by_head(&self, osd: &OsdUuid) -> Option<usize> {
        self.replicas.iter().position(|r| r.head_osd() == Some(osd))
    }

    /// Check whether both lists name the same replicas, ignoring order and version
    #[must_use]
    pub fn same_membership(&self, other: &Self) -> bool {
        let mine: HashSet<&OsdUuid> = self.osds().collect();
        let theirs: HashSet<&OsdUuid> = other.osds().collect();
        mine == theirs && self.len() == other.len()
    }
}

/// Client-facing projection of a file's replica list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XLocSet {
    pub version: u64,
    pub update_policy: UpdatePolicy,
    pub replicas: Vec<XLoc>,
    /// File size for read-only replicated files, 0 otherwise
    pub read_only_file_size: u64,
}

impl XLocSet {
    #[must_use]
    pub fn from_list(list: &XLocList, read_only_file_size: u64) -> Self {
        Self {
            version: list.version,
            update_policy: list.update_policy,
            replicas: list.replicas.clone(),
            read_only_file_size,
        }
    }
}

/// Default replication settings of a volume, applied to new files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReplicationPolicy {
    pub update_policy: UpdatePolicy,
    /// Number of replicas created for a new file
    pub factor: u32,
    pub flags: ReplicationFlags,
}

/// Snapshot access mode carried by a capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SnapConfig {
    #[default]
    SnapsDisabled,
    AccessCurrent,
    AccessSnap,
}

impl SnapConfig {
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::SnapsDisabled => 0,
            Self::AccessCurrent => 1,
            Self::AccessSnap => 2,
        }
    }
}

/// Open flags and non-POSIX access modes granted by a capability
pub mod access_mode {
    pub const O_RDONLY: u32 = 0x0000;
    pub const O_WRONLY: u32 = 0x0001;
    pub const O_RDWR: u32 = 0x0002;
    pub const O_APPEND: u32 = 0x0008;
    pub const O_CREAT: u32 = 0x0100;
    pub const O_TRUNC: u32 = 0x0200;
    pub const O_EXCL: u32 = 0x0400;
    pub const NON_POSIX_DELETE: u32 = 0x0100_0000;

    /// Flags that allow modifying file content
    pub const WRITE_MASK: u32 = O_WRONLY | O_RDWR | O_TRUNC | O_APPEND;

    #[must_use]
    pub const fn is_write(mode: u32) -> bool {
        mode & WRITE_MASK != 0
    }
}
