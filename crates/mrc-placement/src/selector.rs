//! Replica OSD selection
//!
//! Rendezvous (HRW) hashing: every candidate gets a score derived from
//! `hash(seed, osd)` and its weight, and the highest scores win. The result
//! is deterministic for a given seed and moves minimally when OSDs come and
//! go.

use crate::error::PlacementError;
use crate::registry::{OsdInfo, OsdRegistry};
use mrc_common::{OsdUuid, ReplicationFlags, StripingPolicy, XLoc};
use std::collections::HashSet;
use xxhash_rust::xxh64::xxh64;

impl OsdRegistry {
    /// Pick `count` distinct usable OSDs for `seed`, never one in `exclude`.
    ///
    /// The first pick of every failure domain is preferred over a second OSD
    /// from an already used domain.
    pub fn select(
        &self,
        seed: &str,
        count: usize,
        exclude: &HashSet<OsdUuid>,
    ) -> Result<Vec<OsdUuid>, PlacementError> {
        let candidates: Vec<OsdInfo> = self
            .usable()
            .into_iter()
            .filter(|n| !exclude.contains(&n.uuid))
            .collect();
        if candidates.len() < count {
            return Err(PlacementError::InsufficientOsds {
                available: candidates.len(),
                required: count,
            });
        }
        Ok(rank(seed, &candidates, count))
    }

    /// Build a new replica for `seed` from the usable OSDs outside `exclude`.
    ///
    /// The striping width is reduced to the number of available OSDs.
    pub fn create_replica(
        &self,
        striping_policy: StripingPolicy,
        flags: ReplicationFlags,
        seed: &str,
        exclude: &HashSet<OsdUuid>,
    ) -> Result<XLoc, PlacementError> {
        let available = self
            .usable()
            .iter()
            .filter(|n| !exclude.contains(&n.uuid))
            .count();
        if available == 0 {
            return Err(PlacementError::InsufficientOsds {
                available: 0,
                required: 1,
            });
        }
        let policy = striping_policy.with_max_width(u32::try_from(available).unwrap_or(u32::MAX));
        let osds = self.select(seed, policy.width as usize, exclude)?;
        Ok(XLoc::new(policy, osds, flags))
    }
}

fn rank(seed: &str, candidates: &[OsdInfo], count: usize) -> Vec<OsdUuid> {
    let seed_hash = xxh64(seed.as_bytes(), 0);
    let mut scored: Vec<(&OsdInfo, f64)> = candidates
        .iter()
        .map(|node| (node, hrw_score(seed_hash, node)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut picked: Vec<OsdUuid> = Vec::with_capacity(count);
    let mut domains: HashSet<&str> = HashSet::new();
    for (node, _) in &scored {
        if picked.len() == count {
            break;
        }
        if domains.insert(node.failure_domain.as_str()) {
            picked.push(node.uuid.clone());
        }
    }
    for (node, _) in &scored {
        if picked.len() == count {
            break;
        }
        if !picked.contains(&node.uuid) {
            picked.push(node.uuid.clone());
        }
    }
    picked
}

/// Weighted rendezvous score: `-weight / ln(u)` with `u` uniform in (0, 1)
#[allow(clippy::cast_precision_loss)]
fn hrw_score(seed_hash: u64, node: &OsdInfo) -> f64 {
    let node_hash = xxh64(node.uuid.as_str().as_bytes(), seed_hash);
    // 53 random bits, shifted off zero so ln() stays finite
    let u = ((node_hash >> 11) as f64 + 0.5) / (1u64 << 53) as f64;
    -node.weight / u.ln()
}
