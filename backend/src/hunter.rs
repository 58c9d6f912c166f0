//! # hunter
//!
//! Fallback shot finder for quiet stretches of a race: bucket every
//! subject by its nearest track node, take the densest bucket, and
//! nominate the car in the middle of that pack.

use std::collections::BTreeMap;

use tracing::debug;

use crate::director::{Shot, ShotReason};
use crate::queue::NamedShotQueue;
use crate::spatial::KdTree;
use crate::state::RaceState;

const HUNT_BASE_SCORE: f64 = 5.0;
const HUNT_BASE_TTL_SECS: f64 = 20.0;
const HUNT_TTL_PER_MEMBER: f64 = 0.5;

/// What a hunt produced, for the director's log line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HuntReport {
    pub node_id: u32,
    pub members: usize,
    pub plid: u32,
    pub score: f64,
    pub ttl_secs: f64,
}

/// One hunt pass. Returns `None` when there was nothing worth showing.
pub fn run(state: &RaceState, index: &KdTree, queue: &mut NamedShotQueue<Shot>) -> Option<HuntReport> {
    if index.is_empty() {
        return None;
    }

    // Slot each ranked subject into its nearest node's bucket at the index
    // given by its race position. Slot 0 and any rank gaps stay empty until
    // the compaction pass below.
    let mut buckets: BTreeMap<u32, Vec<Option<u32>>> = BTreeMap::new();
    for subject in state.subjects.values() {
        if subject.position == 0 {
            continue; // no ranking yet
        }
        let Some(nearest) = index.nearest(subject.pos, 1).first().copied() else {
            continue;
        };
        let slot = subject.position as usize;
        let bucket = buckets.entry(nearest.node_id).or_default();
        if bucket.len() <= slot {
            bucket.resize(slot + 1, None);
        }
        bucket[slot] = Some(subject.plid);
    }

    // Compact each bucket with a filter pass, then keep the densest one.
    // Ties go to the lowest node id (BTreeMap iterates ascending, only a
    // strictly denser bucket replaces the champion).
    let mut densest: Option<(u32, Vec<u32>)> = None;
    for (node_id, slots) in buckets {
        let members: Vec<u32> = slots.into_iter().flatten().collect();
        if members.is_empty() {
            continue;
        }
        let denser = match &densest {
            Some((_, best)) => members.len() > best.len(),
            None => true,
        };
        if denser {
            densest = Some((node_id, members));
        }
    }
    let (node_id, members) = densest?;

    // Middle of the pack by race position
    let representative = members[(members.len() - 1) / 2];
    let avg_speed = members
        .iter()
        .filter_map(|plid| state.subject(*plid))
        .map(|s| s.speed)
        .sum::<f64>()
        / members.len() as f64;

    let score = HUNT_BASE_SCORE + members.len() as f64 + avg_speed;
    let ttl_secs = HUNT_BASE_TTL_SECS + members.len() as f64 * HUNT_TTL_PER_MEMBER;
    queue.push(Shot { plid: representative, reason: ShotReason::Hunted }, score, ttl_secs);

    debug!("hunt: node {node_id} holds {} subjects", members.len());
    Some(HuntReport { node_id, members: members.len(), plid: representative, score, ttl_secs })
}
