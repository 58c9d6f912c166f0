//! # race-types
//!
//! Shared wire and domain types for the Pitwall broadcast director.
//!
//! These types are used by:
//! - `backend`: parsing telemetry envelopes off the wire and driving the director
//! - `packages/race-simulator`: producing the same envelopes as test traffic
//!
//! ## Wire conventions
//!
//! - Telemetry travels as one JSON envelope per UDP datagram:
//!   `{ "seq": <u32>, "type": "<event>", ...event fields }`
//! - Events are internally tagged (`type`, snake_case). An unknown tag or a
//!   malformed variant fails the whole envelope parse; the hub drops the
//!   datagram rather than forwarding a half-typed event.
//! - World coordinates are meters in a local Cartesian frame, speeds in m/s.

use serde::{Deserialize, Serialize};

// ── 3D Vector ─────────────────────────────────────────────────────────────────

/// 3D world position (meters)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another point
    pub fn dist(&self, other: &Vec3) -> f64 {
        self.dist_sq(other).sqrt()
    }

    /// Squared distance — nearest-neighbour comparisons don't need the sqrt
    pub fn dist_sq(&self, other: &Vec3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }
}

// ── Vehicle Classes ───────────────────────────────────────────────────────────

/// The closed set of vehicle classes a subject can race in.
///
/// Wire names are the uppercase class codes (`"XFG"`, `"BF1"`, ...). A class
/// outside this set fails the envelope parse at the hub boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VehicleClass {
    Uf1,
    Xfg,
    Xrg,
    Xrt,
    Rb4,
    Fxo,
    Lx4,
    Lx6,
    Mrt,
    Fz5,
    Ufr,
    Xfr,
    Fox,
    Fo8,
    Bf1,
    Fxr,
    Xrr,
    Fzr,
}

impl VehicleClass {
    /// Relative performance weight used by the director's scoring formulas.
    /// Faster machinery carries more weight; the slowest class is the zero
    /// point of the scale.
    pub fn performance_weight(&self) -> f64 {
        match self {
            Self::Uf1 => 0.0,
            Self::Xfg => 5.0,
            Self::Xrg => 5.0,
            Self::Xrt => 10.0,
            Self::Rb4 => 10.0,
            Self::Fxo => 10.0,
            Self::Lx4 => 10.0,
            Self::Lx6 => 15.0,
            Self::Mrt => 15.0,
            Self::Fz5 => 15.0,
            Self::Ufr => 18.0,
            Self::Xfr => 20.0,
            Self::Fox => 20.0,
            Self::Fo8 => 25.0,
            Self::Bf1 => 45.0,
            Self::Fxr => 30.0,
            Self::Xrr => 30.0,
            Self::Fzr => 30.0,
        }
    }
}

// ── Race Events ───────────────────────────────────────────────────────────────

/// Pit lane fact codes. Only the penalty servings matter to the director;
/// enter/exit/no-purpose are carried for completeness of the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PitLaneFact {
    Enter,
    Exit,
    NoPurpose,
    DriveThrough,
    StopGo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    Blue,
    Yellow,
}

/// Lap invalidation causes. Ground contact is reported by the feed but
/// deliberately ignored downstream (kerb-hopping is not television).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Speeding,
    Wall,
    Ground,
}

/// Per-subject compound state, sent as a batch every position tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubjectSnapshot {
    pub plid: u32,
    /// Running race position, 1-based (1 = leader)
    pub position: u32,
    /// Ground speed, m/s
    pub speed: f64,
    pub pos: Vec3,
    pub laps_done: u32,
}

/// Everything the race feed can tell us, as one tagged enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RaceEvent {
    /// Feed source is up; also re-seats the hub's sequence guard
    SessionUp,
    SessionDown,
    TrackLoaded {
        track: String,
    },
    RaceStart,
    PlayerJoin {
        plid: u32,
        pname: String,
        vehicle: VehicleClass,
    },
    PlayerLeave {
        plid: u32,
    },
    Positions {
        subjects: Vec<SubjectSnapshot>,
    },
    FastestLap {
        plid: u32,
        /// Lap count at which the time was set
        lap: u32,
        lap_time_ms: u64,
    },
    LapCompleted {
        plid: u32,
        laps_done: u32,
    },
    PitLane {
        plid: u32,
        fact: PitLaneFact,
    },
    Contact {
        plid_a: u32,
        speed_a: f64,
        plid_b: u32,
        speed_b: f64,
        /// Relative speed of the two cars at impact, m/s
        closing_speed: f64,
    },
    Flag {
        plid: u32,
        flag: FlagKind,
        on: bool,
        /// For blue flags: the car being shown the flag is `plid`, the car
        /// catching them is `car_behind`
        #[serde(default)]
        car_behind: Option<u32>,
    },
    InvalidLap {
        plid: u32,
        violation: ViolationKind,
    },
    Finished {
        plid: u32,
    },
    FinalStanding {
        plid: u32,
        /// Classification slot, 0 = winner
        result_num: u32,
    },
}

/// One UDP datagram: sequence number plus the flattened event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub seq: u32,
    #[serde(flatten)]
    pub event: RaceEvent,
}

// ── Camera Output ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraMode {
    /// External follow camera (the default broadcast shot)
    Chase,
    /// In-car camera, used sparingly for variety
    Driver,
}

/// Command sent to the spectator viewer over UDP.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraCommand {
    pub target: u32,
    pub mode: CameraMode,
}
