use std::collections::HashMap;

use race_types::{SubjectSnapshot, Vec3, VehicleClass};

// ─── Subjects ─────────────────────────────────────────────────────────────────

/// One race participant as the director sees them.
#[derive(Debug, Clone)]
pub struct Subject {
    pub plid: u32,
    pub pname: String,
    pub vehicle: VehicleClass,
    /// Running race position, 1-based; 0 until the first snapshot lands
    pub position: u32,
    /// Ground speed, m/s
    pub speed: f64,
    pub pos: Vec3,
    pub laps_done: u32,
    pub finished: bool,
}

// ─── Session State ────────────────────────────────────────────────────────────

/// Everything known about the current session. Owned by the director task;
/// all mutation happens there.
#[derive(Debug, Default)]
pub struct RaceState {
    pub subjects: HashMap<u32, Subject>,
    pub track: Option<String>,
}

impl RaceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject(&self, plid: u32) -> Option<&Subject> {
        self.subjects.get(&plid)
    }

    pub fn join(&mut self, plid: u32, pname: String, vehicle: VehicleClass) {
        if plid == 0 {
            return; // the feed uses 0 as "no player"
        }
        self.subjects.insert(
            plid,
            Subject {
                plid,
                pname,
                vehicle,
                position: 0,
                speed: 0.0,
                pos: Vec3::default(),
                laps_done: 0,
                finished: false,
            },
        );
    }

    pub fn leave(&mut self, plid: u32) {
        self.subjects.remove(&plid);
    }

    /// Fold a position-tick batch into the known subjects. Snapshots for
    /// unknown plids are stale telemetry and are dropped quietly.
    pub fn apply_snapshots(&mut self, snapshots: &[SubjectSnapshot]) {
        for snap in snapshots {
            if let Some(subject) = self.subjects.get_mut(&snap.plid) {
                subject.position = snap.position;
                subject.speed = snap.speed;
                subject.pos = snap.pos;
                subject.laps_done = snap.laps_done;
            }
        }
    }

    pub fn record_lap(&mut self, plid: u32, laps_done: u32) {
        if let Some(subject) = self.subjects.get_mut(&plid) {
            subject.laps_done = laps_done;
        }
    }

    pub fn mark_finished(&mut self, plid: u32) {
        if let Some(subject) = self.subjects.get_mut(&plid) {
            subject.finished = true;
        }
    }

    /// Reset per-race fields, keeping the grid itself.
    pub fn reset_race(&mut self) {
        for subject in self.subjects.values_mut() {
            subject.finished = false;
            subject.laps_done = 0;
        }
    }

    /// The subject currently holding position 1, if ranks are known.
    pub fn leader(&self) -> Option<&Subject> {
        self.subjects.values().find(|s| s.position == 1)
    }
}
