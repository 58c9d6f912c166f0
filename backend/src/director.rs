//! # director
//!
//! The automated TV director. Consumes typed race events, keeps a scored
//! queue of shot requests, and on a fixed cadence cuts the spectator
//! camera to the most urgent subject. Quiet races fall back to the
//! spatial hunter.
//!
//! Runs as a single task multiplexing the event channel and the two tick
//! cadences; every mutation of director state happens on that task, so
//! there are no locks here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use race_types::{CameraCommand, CameraMode, FlagKind, PitLaneFact, RaceEvent, ViolationKind};

use crate::clock::Clock;
use crate::config::DirectorConfig;
use crate::hunter;
use crate::queue::NamedShotQueue;
use crate::spatial::KdTree;
use crate::state::RaceState;
use crate::track;

// ── Scoring table ─────────────────────────────────────────────────────────────

// Lower value = more urgent. Floats here; the queue truncates on push.
const PRIO_PINNED: f64 = -9999.0;
const PRIO_FASTEST_BASE: f64 = 1.0;
const PRIO_PIT_DRIVE_THROUGH: f64 = 100.0;
const PRIO_PIT_STOP_GO: f64 = 90.0;
const PRIO_CONTACT_BASE: f64 = 10.0;
const PRIO_BLUE_BASE: f64 = 5.0;
const PRIO_YELLOW: f64 = 25.0;
const PRIO_INFRACTION_BASE: f64 = 5.0;
const PRIO_FINAL_STANDING: f64 = 250.0;

const TTL_FASTEST_SECS: f64 = 10.0;
const TTL_PIT_SECS: f64 = 5.0;
const TTL_CONTACT_SECS: f64 = 10.0;
const TTL_BLUE_SECS: f64 = 15.0;
const TTL_YELLOW_SECS: f64 = 10.0;
const TTL_INFRACTION_SECS: f64 = 10.0;
const TTL_WINNER_SECS: f64 = 15.0;
const TTL_FINAL_STANDING_SECS: f64 = 5.0;

/// Queue alias for the race-start pole pin.
const START_PIN: &str = "startmode";

// ── Shots ─────────────────────────────────────────────────────────────────────

/// Why a subject was queued; shows up in logs and on the status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShotReason {
    FastestLap,
    DriveThrough,
    StopGo,
    Contact,
    BlueFlag,
    YellowFlag,
    Speeding,
    WallHit,
    StartPin,
    Winner,
    FinalStanding,
    Hunted,
}

impl ShotReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::FastestLap => "fastest lap",
            Self::DriveThrough => "drive-through penalty",
            Self::StopGo => "stop-and-go penalty",
            Self::Contact => "contact",
            Self::BlueFlag => "blue flag",
            Self::YellowFlag => "yellow flag",
            Self::Speeding => "pit speeding",
            Self::WallHit => "wall hit",
            Self::StartPin => "race start",
            Self::Winner => "race winner",
            Self::FinalStanding => "final standings",
            Self::Hunted => "pack hunt",
        }
    }
}

/// Queue payload: which subject to show and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Shot {
    pub plid: u32,
    pub reason: ShotReason,
}

// ── Session phase ─────────────────────────────────────────────────────────────

/// Where the session stands. Hunting additionally needs a built track index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    #[default]
    Disconnected,
    Connected,
    TrackLoaded,
}

// ── Status surface ────────────────────────────────────────────────────────────

/// Snapshot published after every camera tick; served by `GET /status`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectorStatus {
    pub phase: SessionPhase,
    pub track: Option<String>,
    pub current: Option<u32>,
    pub previous: Option<u32>,
    pub queue: Vec<QueuedShot>,
    pub updated_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedShot {
    pub id: u64,
    pub plid: u32,
    pub reason: ShotReason,
    pub priority: i64,
    /// `None` = pinned
    pub expires_in_ms: Option<u64>,
}

/// Camera history: who is on air and who was before.
#[derive(Debug, Clone, Copy, Default)]
pub struct CameraHistory {
    pub current: Option<u32>,
    pub previous: Option<u32>,
}

// ── Director ──────────────────────────────────────────────────────────────────

pub struct Director {
    cfg: DirectorConfig,
    clock: Arc<dyn Clock>,
    queue: NamedShotQueue<Shot>,
    state: RaceState,
    phase: SessionPhase,
    /// Hunt readiness flag: present once a track path has been indexed
    track_index: Option<KdTree>,
    history: CameraHistory,
    /// ms timestamp of the last actual cut; 0 = never cut
    last_switch_ms: u64,
    /// One-shot deadline for the start pin evaluation
    start_pin_due_ms: Option<u64>,
    pinned_plid: Option<u32>,
    infractions: HashMap<u32, u32>,
    rng: StdRng,
    cam_tx: mpsc::Sender<CameraCommand>,
    status_tx: watch::Sender<DirectorStatus>,
}

impl Director {
    pub fn new(
        cfg: DirectorConfig,
        clock: Arc<dyn Clock>,
        cam_tx: mpsc::Sender<CameraCommand>,
        status_tx: watch::Sender<DirectorStatus>,
    ) -> Self {
        let queue = NamedShotQueue::new(clock.clone());
        Self {
            cfg,
            clock,
            queue,
            state: RaceState::new(),
            phase: SessionPhase::default(),
            track_index: None,
            history: CameraHistory::default(),
            last_switch_ms: 0,
            start_pin_due_ms: None,
            pinned_plid: None,
            infractions: HashMap::new(),
            rng: StdRng::from_entropy(),
            cam_tx,
            status_tx,
        }
    }

    /// Single-task control loop: the event channel plus the two cadences.
    pub async fn run(mut self, mut events: mpsc::Receiver<RaceEvent>) {
        let mut switch_tick = interval(Duration::from_millis(self.cfg.switch_interval_ms));
        let mut hunt_tick = interval(Duration::from_secs(self.cfg.hunt_interval_secs));
        info!(
            "🎬 director up: cut every {}ms, hunt every {}s",
            self.cfg.switch_interval_ms, self.cfg.hunt_interval_secs
        );

        loop {
            tokio::select! {
                maybe = events.recv() => match maybe {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        info!("event channel closed — director stopping");
                        break;
                    }
                },
                _ = switch_tick.tick() => self.camera_tick(),
                _ = hunt_tick.tick() => self.hunt_tick(),
            }
        }
    }

    // ── Event dispatch ────────────────────────────────────────────────────────

    async fn handle_event(&mut self, event: RaceEvent) {
        match event {
            RaceEvent::SessionUp => {
                info!("session up — director armed");
                self.phase = if self.track_index.is_some() {
                    SessionPhase::TrackLoaded
                } else {
                    SessionPhase::Connected
                };
            }
            RaceEvent::SessionDown => {
                info!("session down — ticks gated until reconnect");
                self.phase = SessionPhase::Disconnected;
                self.start_pin_due_ms = None;
            }
            RaceEvent::TrackLoaded { track } => self.on_track_loaded(track).await,
            RaceEvent::RaceStart => self.on_race_start(),
            RaceEvent::PlayerJoin { plid, pname, vehicle } => {
                debug!("join: plid {plid} {pname} ({vehicle:?})");
                self.state.join(plid, pname, vehicle);
            }
            RaceEvent::PlayerLeave { plid } => self.on_player_leave(plid),
            RaceEvent::Positions { subjects } => self.state.apply_snapshots(&subjects),
            RaceEvent::FastestLap { plid, lap, .. } => self.on_fastest_lap(plid, lap),
            RaceEvent::LapCompleted { plid, laps_done } => self.on_lap_completed(plid, laps_done),
            RaceEvent::PitLane { plid, fact } => self.on_pit_lane(plid, fact),
            RaceEvent::Contact { plid_a, speed_a, plid_b, speed_b, closing_speed } => {
                self.on_contact(plid_a, speed_a, plid_b, speed_b, closing_speed)
            }
            RaceEvent::Flag { plid, flag, on, car_behind } => self.on_flag(plid, flag, on, car_behind),
            RaceEvent::InvalidLap { plid, violation } => self.on_invalid_lap(plid, violation),
            RaceEvent::Finished { plid } => self.on_finished(plid),
            RaceEvent::FinalStanding { plid, result_num } => self.on_final_standing(plid, result_num),
        }
    }

    async fn on_track_loaded(&mut self, track: String) {
        let code = track::canonical_code(&track).to_string();
        if code != track {
            debug!("track {track} uses base path {code}");
        }
        self.state.track = Some(code.clone());
        match track::load_track(&self.cfg.track_dir, &code).await {
            Ok(nodes) => {
                let index = KdTree::build(nodes);
                let count = index.len();
                self.track_index = Some(index);
                if self.phase != SessionPhase::Disconnected {
                    self.phase = SessionPhase::TrackLoaded;
                }
                info!("🗺 track {code}: indexed {count} path nodes");
                // Seed the queue so the broadcast has a subject before the
                // first incident comes in
                self.hunt_tick();
            }
            Err(e) => {
                error!("track {code}: path load failed: {e} — hunting disabled");
                self.track_index = None;
                if self.phase == SessionPhase::TrackLoaded {
                    self.phase = SessionPhase::Connected;
                }
            }
        }
    }

    fn on_race_start(&mut self) {
        let now = self.clock.now_ms();
        self.queue.reset();
        self.infractions.clear();
        self.pinned_plid = None;
        self.state.reset_race();
        self.start_pin_due_ms = Some(now + self.cfg.start_settle_secs * 1000);
        info!("🏁 race start — queue reset, start pin due in {}s", self.cfg.start_settle_secs);
    }

    fn on_player_leave(&mut self, plid: u32) {
        if self.pinned_plid == Some(plid) {
            self.queue.pop_named(START_PIN);
            self.pinned_plid = None;
            info!("pinned subject {plid} left — start pin released");
        }
        self.state.leave(plid);
    }

    fn on_fastest_lap(&mut self, plid: u32, lap: u32) {
        if lap <= 1 {
            return; // lap-1 "records" are just the first flying lap
        }
        let Some(subject) = self.state.subject(plid) else { return };
        info!("fastest lap by {} (lap {lap})", subject.pname);
        let priority = PRIO_FASTEST_BASE + lap as f64 * 0.75;
        self.queue.push(Shot { plid, reason: ShotReason::FastestLap }, priority, TTL_FASTEST_SECS);
    }

    fn on_lap_completed(&mut self, plid: u32, laps_done: u32) {
        self.state.record_lap(plid, laps_done);
        if self.pinned_plid == Some(plid) && laps_done >= 1 && self.queue.has_named(START_PIN) {
            self.queue.pop_named(START_PIN);
            self.pinned_plid = None;
            info!("opening lap complete — start pin released");
        }
    }

    fn on_pit_lane(&mut self, plid: u32, fact: PitLaneFact) {
        let (reason, priority) = match fact {
            PitLaneFact::DriveThrough => (ShotReason::DriveThrough, PRIO_PIT_DRIVE_THROUGH),
            PitLaneFact::StopGo => (ShotReason::StopGo, PRIO_PIT_STOP_GO),
            _ => return,
        };
        if self.state.subject(plid).is_none() || self.is_current(plid) {
            return;
        }
        debug!("pit penalty ({fact:?}) being served by plid {plid}");
        self.queue.push(Shot { plid, reason }, priority, TTL_PIT_SECS);
    }

    fn on_contact(&mut self, plid_a: u32, speed_a: f64, plid_b: u32, speed_b: f64, closing_speed: f64) {
        let (Some(a), Some(b)) = (self.state.subject(plid_a), self.state.subject(plid_b)) else {
            return;
        };
        if a.finished || b.finished {
            return; // cool-down lap shoving is not a story
        }
        // Camera follows the faster car of the pair
        let culprit = if speed_a >= speed_b { plid_a } else { plid_b };
        let priority = PRIO_CONTACT_BASE + closing_speed * 0.15
            - (a.vehicle.performance_weight() - b.vehicle.performance_weight());
        info!("contact between {} and {} (closing {closing_speed:.1} m/s)", a.pname, b.pname);
        self.queue.push(Shot { plid: culprit, reason: ShotReason::Contact }, priority, TTL_CONTACT_SECS);
    }

    fn on_flag(&mut self, plid: u32, flag: FlagKind, on: bool, car_behind: Option<u32>) {
        if !on {
            return; // only care when a flag comes out
        }
        match flag {
            FlagKind::Blue => {
                let Some(behind_plid) = car_behind else { return };
                let (Some(front), Some(behind)) =
                    (self.state.subject(plid), self.state.subject(behind_plid))
                else {
                    return;
                };
                if behind.speed <= front.speed {
                    return; // not actually catching yet
                }
                info!("blue flag: {} catching {}", behind.pname, front.pname);
                let priority = PRIO_BLUE_BASE + behind.vehicle.performance_weight() * 0.75
                    - front.vehicle.performance_weight();
                self.queue.push(
                    Shot { plid: behind_plid, reason: ShotReason::BlueFlag },
                    priority,
                    TTL_BLUE_SECS,
                );
            }
            FlagKind::Yellow => {
                let Some(subject) = self.state.subject(plid) else { return };
                info!("yellow flag at {}", subject.pname);
                self.queue.push(Shot { plid, reason: ShotReason::YellowFlag }, PRIO_YELLOW, TTL_YELLOW_SECS);
            }
        }
    }

    fn on_invalid_lap(&mut self, plid: u32, violation: ViolationKind) {
        let reason = match violation {
            ViolationKind::Speeding => ShotReason::Speeding,
            ViolationKind::Wall => ShotReason::WallHit,
            ViolationKind::Ground => return, // kerbs don't count
        };
        match self.state.subject(plid) {
            Some(subject) if !subject.finished => {}
            _ => return,
        }
        let count = {
            let c = self.infractions.entry(plid).or_insert(0);
            *c += 1;
            *c
        };
        debug!("invalid lap ({reason:?}) #{count} for plid {plid}");
        let priority = PRIO_INFRACTION_BASE + count as f64 * 0.75;
        self.queue.push(Shot { plid, reason }, priority, TTL_INFRACTION_SECS);
    }

    fn on_finished(&mut self, plid: u32) {
        self.state.mark_finished(plid);
        let Some(subject) = self.state.subject(plid) else { return };
        if subject.position == 1 {
            info!("🏆 {} takes the win", subject.pname);
            self.queue.push(Shot { plid, reason: ShotReason::Winner }, PRIO_PINNED, TTL_WINNER_SECS);
        }
    }

    fn on_final_standing(&mut self, plid: u32, result_num: u32) {
        if result_num != 0 {
            return; // only the classified winner gets the closing shot
        }
        if self.state.subject(plid).is_none() {
            return;
        }
        self.queue.push(
            Shot { plid, reason: ShotReason::FinalStanding },
            PRIO_FINAL_STANDING,
            TTL_FINAL_STANDING_SECS,
        );
    }

    // ── Ticks ─────────────────────────────────────────────────────────────────

    /// Camera cut pass, every `switch_interval_ms`. Factored out of the
    /// select loop so tests can drive it directly.
    fn camera_tick(&mut self) {
        if self.phase == SessionPhase::Disconnected {
            return;
        }
        let now = self.clock.now_ms();

        // One-shot start pin evaluation once the field has settled
        if let Some(due) = self.start_pin_due_ms {
            if now >= due {
                self.start_pin_due_ms = None;
                self.pin_pole_sitter();
            }
        }

        let Some(front) = self.queue.front() else {
            self.publish_status(now);
            return;
        };
        let (entry_id, shot, pinned) = (front.id, front.data, front.is_pinned());

        let Some(subject) = self.state.subject(shot.plid) else {
            // Subject left between push and tick; the entry ages out on its own
            debug!("skip {:?} shot: subject {} unknown", shot.reason, shot.plid);
            self.publish_status(now);
            return;
        };

        if self.history.current == Some(shot.plid) {
            self.publish_status(now);
            return; // already on this car
        }

        let since_last = now.saturating_sub(self.last_switch_ms);
        if since_last < self.cfg.cooldown_ms {
            debug!("cooldown holds the cut ({since_last}ms since last)");
            self.publish_status(now);
            return;
        }

        let pname = subject.pname.clone();
        let mode = self.pick_camera_mode();
        info!("🎥 cut to {pname} — {} ({mode:?})", shot.reason.label());

        self.history.previous = self.history.current;
        self.history.current = Some(shot.plid);
        if let Err(e) = self.cam_tx.try_send(CameraCommand { target: shot.plid, mode }) {
            warn!("camera link backpressure — dropping command: {e}");
        }
        if !pinned {
            self.queue.pop_id(entry_id);
        }
        self.last_switch_ms = now;
        self.publish_status(now);
    }

    /// Hunt pass, every `hunt_interval_secs`; also runs once right after a
    /// track loads so the queue is never empty at lights out.
    fn hunt_tick(&mut self) {
        if self.phase == SessionPhase::Disconnected {
            return;
        }
        let Some(index) = &self.track_index else {
            debug!("hunt skipped: no track index yet");
            return;
        };
        if let Some(report) = hunter::run(&self.state, index, &mut self.queue) {
            info!(
                "🔭 hunt: node {} packs {} cars — queueing plid {} (score {:.1}, ttl {:.1}s)",
                report.node_id, report.members, report.plid, report.score, report.ttl_secs
            );
        }
    }

    /// Pin the pole sitter under the start alias so the broadcast holds the
    /// leader until the opening lap is done.
    fn pin_pole_sitter(&mut self) {
        let Some(leader) = self.state.leader() else {
            warn!("start pin: no subject holds position 1 yet");
            return;
        };
        let (plid, pname) = (leader.plid, leader.pname.clone());
        self.queue.push_named(START_PIN, Shot { plid, reason: ShotReason::StartPin }, PRIO_PINNED, 0.0);
        self.pinned_plid = Some(plid);
        info!("start pin on {pname} (plid {plid})");
    }

    fn is_current(&self, plid: u32) -> bool {
        self.history.current == Some(plid)
    }

    /// Mostly chase cam; occasionally the driver's seat for variety.
    fn pick_camera_mode(&mut self) -> CameraMode {
        if self.rng.gen::<f64>() < self.cfg.driver_cam_probability {
            CameraMode::Driver
        } else {
            CameraMode::Chase
        }
    }

    fn publish_status(&mut self, now: u64) {
        let queue: Vec<QueuedShot> = self
            .queue
            .entries()
            .iter()
            .map(|e| QueuedShot {
                id: e.id,
                plid: e.data.plid,
                reason: e.data.reason,
                priority: e.priority,
                expires_in_ms: if e.is_pinned() {
                    None
                } else {
                    Some(e.expires_at.saturating_sub(now))
                },
            })
            .collect();
        let status = DirectorStatus {
            phase: self.phase,
            track: self.state.track.clone(),
            current: self.history.current,
            previous: self.history.previous,
            queue,
            updated_ms: now,
        };
        self.status_tx.send_replace(status);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use race_types::{SubjectSnapshot, Vec3, VehicleClass};

    use super::*;
    use crate::clock::testing::ManualClock;

    struct Harness {
        director: Director,
        clock: Arc<ManualClock>,
        cam_rx: mpsc::Receiver<CameraCommand>,
        status_rx: watch::Receiver<DirectorStatus>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(100_000));
        let (cam_tx, cam_rx) = mpsc::channel(16);
        let (status_tx, status_rx) = watch::channel(DirectorStatus::default());
        let cfg = DirectorConfig {
            track_dir: PathBuf::from("unused"),
            switch_interval_ms: 500,
            hunt_interval_secs: 5,
            cooldown_ms: 5000,
            start_settle_secs: 5,
            driver_cam_probability: 0.0,
        };
        let director = Director::new(cfg, clock.clone(), cam_tx, status_tx);
        Harness { director, clock, cam_rx, status_rx }
    }

    fn rank(plid: u32, position: u32, speed: f64) -> SubjectSnapshot {
        SubjectSnapshot { plid, position, speed, pos: Vec3::default(), laps_done: 0 }
    }

    async fn boot_three_cars(h: &mut Harness) {
        h.director.handle_event(RaceEvent::SessionUp).await;
        for (plid, pname, vehicle) in [
            (1, "AJ", VehicleClass::Xfg),
            (2, "BK", VehicleClass::Fzr),
            (3, "CL", VehicleClass::Uf1),
        ] {
            h.director
                .handle_event(RaceEvent::PlayerJoin { plid, pname: pname.into(), vehicle })
                .await;
        }
        h.director
            .handle_event(RaceEvent::Positions {
                subjects: vec![rank(1, 1, 50.0), rank(2, 2, 48.0), rank(3, 3, 45.0)],
            })
            .await;
    }

    #[tokio::test]
    async fn test_no_cut_while_disconnected() {
        let mut h = harness();
        // Queue something without ever connecting
        h.director.state.join(1, "AJ".into(), VehicleClass::Xfg);
        h.director.on_fastest_lap(1, 3);
        h.director.camera_tick();
        assert!(h.cam_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cut_consumes_finite_entry() {
        let mut h = harness();
        boot_three_cars(&mut h).await;
        h.director
            .handle_event(RaceEvent::FastestLap { plid: 2, lap: 3, lap_time_ms: 83_000 })
            .await;

        h.director.camera_tick();
        let cmd = h.cam_rx.try_recv().unwrap();
        assert_eq!(cmd.target, 2);
        assert_eq!(cmd.mode, CameraMode::Chase);
        assert!(h.director.queue.is_empty());

        // Nothing left, so the next tick cuts nowhere
        h.clock.advance(6_000);
        h.director.camera_tick();
        assert!(h.cam_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_same_subject_skip_leaves_entry_queued() {
        let mut h = harness();
        boot_three_cars(&mut h).await;
        h.director
            .handle_event(RaceEvent::FastestLap { plid: 2, lap: 3, lap_time_ms: 83_000 })
            .await;
        h.director.camera_tick();
        assert_eq!(h.cam_rx.try_recv().unwrap().target, 2);

        // Another shot for the car already on air: skipped, not consumed
        h.clock.advance(6_000);
        h.director
            .handle_event(RaceEvent::FastestLap { plid: 2, lap: 4, lap_time_ms: 82_500 })
            .await;
        h.director.camera_tick();
        assert!(h.cam_rx.try_recv().is_err());
        assert_eq!(h.director.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_cooldown_blocks_and_skips_do_not_arm_it() {
        let mut h = harness();
        boot_three_cars(&mut h).await;
        h.director
            .handle_event(RaceEvent::FastestLap { plid: 2, lap: 3, lap_time_ms: 83_000 })
            .await;
        h.director.camera_tick();
        assert_eq!(h.cam_rx.try_recv().unwrap().target, 2);

        // 1s later a new shot arrives: held by the cooldown
        h.clock.advance(1_000);
        h.director
            .handle_event(RaceEvent::FastestLap { plid: 3, lap: 3, lap_time_ms: 84_000 })
            .await;
        h.director.camera_tick();
        assert!(h.cam_rx.try_recv().is_err());
        assert_eq!(h.director.queue.len(), 1);

        // The blocked tick must not have re-armed the window
        h.clock.advance(4_000); // now exactly 5s after the actual cut
        h.director.camera_tick();
        assert_eq!(h.cam_rx.try_recv().unwrap().target, 3);
    }

    #[tokio::test]
    async fn test_start_pin_lands_after_settle_and_survives_cuts() {
        let mut h = harness();
        boot_three_cars(&mut h).await;
        h.director.handle_event(RaceEvent::RaceStart).await;

        // Before the settle delay: no pin yet
        h.director.camera_tick();
        assert!(!h.director.queue.has_named("startmode"));

        h.clock.advance(5_100);
        h.director.camera_tick();
        assert!(h.director.queue.has_named("startmode"));
        let cmd = h.cam_rx.try_recv().unwrap();
        assert_eq!(cmd.target, 1); // pole sitter

        // Pinned entry survives the cut it produced
        assert_eq!(h.director.queue.len(), 1);

        // Leader completes the opening lap: pin released
        h.director.handle_event(RaceEvent::LapCompleted { plid: 1, laps_done: 1 }).await;
        assert!(!h.director.queue.has_named("startmode"));
        assert!(h.director.queue.is_empty());
    }

    #[tokio::test]
    async fn test_start_pin_not_released_by_other_cars() {
        let mut h = harness();
        boot_three_cars(&mut h).await;
        h.director.handle_event(RaceEvent::RaceStart).await;
        h.clock.advance(5_100);
        h.director.camera_tick();
        assert!(h.director.queue.has_named("startmode"));

        h.director.handle_event(RaceEvent::LapCompleted { plid: 2, laps_done: 1 }).await;
        assert!(h.director.queue.has_named("startmode"));
    }

    #[tokio::test]
    async fn test_session_down_cancels_pending_start_pin() {
        let mut h = harness();
        boot_three_cars(&mut h).await;
        h.director.handle_event(RaceEvent::RaceStart).await;
        h.director.handle_event(RaceEvent::SessionDown).await;
        h.clock.advance(10_000);
        h.director.handle_event(RaceEvent::SessionUp).await;
        h.director.camera_tick();
        assert!(!h.director.queue.has_named("startmode"));
    }

    #[tokio::test]
    async fn test_pinned_subject_leaving_releases_pin() {
        let mut h = harness();
        boot_three_cars(&mut h).await;
        h.director.handle_event(RaceEvent::RaceStart).await;
        h.clock.advance(5_100);
        h.director.camera_tick();
        assert!(h.director.queue.has_named("startmode"));

        h.director.handle_event(RaceEvent::PlayerLeave { plid: 1 }).await;
        assert!(!h.director.queue.has_named("startmode"));
        assert!(h.director.queue.is_empty());
    }

    #[tokio::test]
    async fn test_contact_queues_the_faster_car() {
        let mut h = harness();
        boot_three_cars(&mut h).await;
        h.director
            .handle_event(RaceEvent::Contact {
                plid_a: 3,
                speed_a: 52.0,
                plid_b: 2,
                speed_b: 38.0,
                closing_speed: 14.0,
            })
            .await;
        let front = h.director.queue.front().unwrap();
        assert_eq!(front.data.plid, 3);
        assert_eq!(front.data.reason, ShotReason::Contact);
        // 10 + 14*0.15 - (w(UF1)=0 - w(FZR)=30) = 42.1 -> 42
        assert_eq!(front.priority, 42);
    }

    #[tokio::test]
    async fn test_blue_flag_needs_the_chaser_to_be_faster() {
        let mut h = harness();
        boot_three_cars(&mut h).await;
        // Behind car slower: no story
        h.director
            .handle_event(RaceEvent::Flag { plid: 1, flag: FlagKind::Blue, on: true, car_behind: Some(3) })
            .await;
        assert!(h.director.queue.is_empty());

        // Make the chaser faster
        h.director
            .handle_event(RaceEvent::Positions {
                subjects: vec![rank(1, 1, 40.0), rank(2, 2, 48.0), rank(3, 3, 45.0)],
            })
            .await;
        h.director
            .handle_event(RaceEvent::Flag { plid: 1, flag: FlagKind::Blue, on: true, car_behind: Some(3) })
            .await;
        let front = h.director.queue.front().unwrap();
        assert_eq!(front.data.plid, 3);
        assert_eq!(front.data.reason, ShotReason::BlueFlag);
    }

    #[tokio::test]
    async fn test_flag_going_off_is_ignored() {
        let mut h = harness();
        boot_three_cars(&mut h).await;
        h.director
            .handle_event(RaceEvent::Flag { plid: 2, flag: FlagKind::Yellow, on: false, car_behind: None })
            .await;
        assert!(h.director.queue.is_empty());
    }

    #[tokio::test]
    async fn test_pit_penalty_not_queued_for_current_subject() {
        let mut h = harness();
        boot_three_cars(&mut h).await;
        h.director
            .handle_event(RaceEvent::FastestLap { plid: 2, lap: 3, lap_time_ms: 83_000 })
            .await;
        h.director.camera_tick();
        assert_eq!(h.cam_rx.try_recv().unwrap().target, 2);

        h.director
            .handle_event(RaceEvent::PitLane { plid: 2, fact: PitLaneFact::DriveThrough })
            .await;
        assert!(h.director.queue.is_empty());

        // A different car serving a penalty is a story
        h.director
            .handle_event(RaceEvent::PitLane { plid: 3, fact: PitLaneFact::StopGo })
            .await;
        assert_eq!(h.director.queue.front().unwrap().data.reason, ShotReason::StopGo);
        assert_eq!(h.director.queue.front().unwrap().priority, 90);
    }

    #[tokio::test]
    async fn test_infraction_priority_ramps_per_offense() {
        let mut h = harness();
        boot_three_cars(&mut h).await;
        h.director
            .handle_event(RaceEvent::InvalidLap { plid: 3, violation: ViolationKind::Speeding })
            .await;
        h.director
            .handle_event(RaceEvent::InvalidLap { plid: 3, violation: ViolationKind::Wall })
            .await;
        let entries = h.director.queue.entries();
        assert_eq!(entries.len(), 2);
        // 5 + 1*0.75 -> 5, then 5 + 2*0.75 -> 6
        assert_eq!(entries[0].priority, 5);
        assert_eq!(entries[1].priority, 6);
    }

    #[tokio::test]
    async fn test_ground_contact_never_queues() {
        let mut h = harness();
        boot_three_cars(&mut h).await;
        h.director
            .handle_event(RaceEvent::InvalidLap { plid: 3, violation: ViolationKind::Ground })
            .await;
        assert!(h.director.queue.is_empty());
    }

    #[tokio::test]
    async fn test_winner_shot_outranks_everything() {
        let mut h = harness();
        boot_three_cars(&mut h).await;
        h.director
            .handle_event(RaceEvent::FastestLap { plid: 2, lap: 3, lap_time_ms: 83_000 })
            .await;
        h.director.handle_event(RaceEvent::Finished { plid: 1 }).await;
        let front = h.director.queue.front().unwrap();
        assert_eq!(front.data.reason, ShotReason::Winner);
        assert_eq!(front.data.plid, 1);
        assert_eq!(front.priority, -9999);

        // Non-leaders finishing do not add a winner shot
        h.director.handle_event(RaceEvent::Finished { plid: 2 }).await;
        let winners = h
            .director
            .queue
            .entries()
            .iter()
            .filter(|e| e.data.reason == ShotReason::Winner)
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_final_standing_only_for_slot_zero() {
        let mut h = harness();
        boot_three_cars(&mut h).await;
        h.director.handle_event(RaceEvent::FinalStanding { plid: 2, result_num: 1 }).await;
        assert!(h.director.queue.is_empty());
        h.director.handle_event(RaceEvent::FinalStanding { plid: 1, result_num: 0 }).await;
        assert_eq!(h.director.queue.front().unwrap().priority, 250);
    }

    #[tokio::test]
    async fn test_unknown_subject_shot_is_skipped_not_consumed() {
        let mut h = harness();
        boot_three_cars(&mut h).await;
        h.director
            .handle_event(RaceEvent::FastestLap { plid: 3, lap: 3, lap_time_ms: 85_000 })
            .await;
        h.director.handle_event(RaceEvent::PlayerLeave { plid: 3 }).await;

        h.director.camera_tick();
        assert!(h.cam_rx.try_recv().is_err());
        assert_eq!(h.director.queue.len(), 1); // ages out on its own
    }

    #[tokio::test]
    async fn test_lap_one_fastest_lap_is_noise() {
        let mut h = harness();
        boot_three_cars(&mut h).await;
        h.director
            .handle_event(RaceEvent::FastestLap { plid: 2, lap: 1, lap_time_ms: 90_000 })
            .await;
        assert!(h.director.queue.is_empty());
    }

    #[tokio::test]
    async fn test_race_start_resets_queue_and_infractions() {
        let mut h = harness();
        boot_three_cars(&mut h).await;
        h.director
            .handle_event(RaceEvent::InvalidLap { plid: 3, violation: ViolationKind::Speeding })
            .await;
        h.director
            .handle_event(RaceEvent::FastestLap { plid: 2, lap: 3, lap_time_ms: 83_000 })
            .await;
        h.director.handle_event(RaceEvent::RaceStart).await;
        assert!(h.director.queue.is_empty());

        // Infraction count starts over after the restart
        h.director
            .handle_event(RaceEvent::InvalidLap { plid: 3, violation: ViolationKind::Speeding })
            .await;
        assert_eq!(h.director.queue.front().unwrap().priority, 5);
    }

    #[tokio::test]
    async fn test_status_snapshot_reflects_the_cut() {
        let mut h = harness();
        boot_three_cars(&mut h).await;
        h.director
            .handle_event(RaceEvent::FastestLap { plid: 2, lap: 3, lap_time_ms: 83_000 })
            .await;
        h.director
            .handle_event(RaceEvent::FastestLap { plid: 3, lap: 3, lap_time_ms: 86_000 })
            .await;
        h.director.camera_tick();

        let status = h.status_rx.borrow().clone();
        assert_eq!(status.phase, SessionPhase::Connected);
        assert_eq!(status.current, Some(2));
        assert_eq!(status.queue.len(), 1);
        assert_eq!(status.queue[0].plid, 3);
        assert!(status.queue[0].expires_in_ms.is_some());
        assert_eq!(status.updated_ms, 100_000);
    }

    #[tokio::test]
    async fn test_track_load_failure_keeps_director_up_without_hunting() {
        let mut h = harness();
        boot_three_cars(&mut h).await;
        let dir = tempfile::TempDir::new().unwrap();
        h.director.cfg.track_dir = dir.path().to_path_buf();

        h.director.handle_event(RaceEvent::TrackLoaded { track: "KY3".to_string() }).await;
        assert_eq!(h.director.phase, SessionPhase::Connected);
        assert!(h.director.track_index.is_none());
        h.director.hunt_tick();
        assert!(h.director.queue.is_empty());

        // Drop a valid path in place and reload: hunting comes alive and
        // immediately seeds the queue
        let raw = r#"{"nodes":[{"x":0.0,"y":0.0,"z":0.0},{"x":50.0,"y":0.0,"z":0.0}]}"#;
        tokio::fs::write(dir.path().join("KY3.json"), raw).await.unwrap();
        h.director.handle_event(RaceEvent::TrackLoaded { track: "KY3".to_string() }).await;
        assert_eq!(h.director.phase, SessionPhase::TrackLoaded);
        assert_eq!(h.director.queue.len(), 1);
        assert_eq!(h.director.queue.front().unwrap().data.reason, ShotReason::Hunted);
    }
}
