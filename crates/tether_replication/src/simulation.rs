//! # Lossy Link Simulation
//!
//! Drives a sender moving along a known path through a simulated network
//! into a [`Session`], and measures how smooth the replicated pose is.
//!
//! ## Pipeline
//!
//! ```text
//! truth(t) ─► PoseSample ─► codec::encode ─► SimulatedLink ─► codec::decode
//!                                           (loss, jitter,        │
//!                                            dup, reorder)        ▼
//!   SmoothnessReport ◄── compare with truth ◄── render ◄── SampleInbox
//! ```
//!
//! Everything is seeded: the same [`ScenarioConfig`] always produces the
//! same [`SmoothnessReport`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tether_shared::{Pose, Quaternion, Vec3, DEFAULT_TICK_RATE};

use crate::codec::{self, WIRE_SAMPLE_SIZE};
use crate::config::ReplicationConfig;
use crate::error::ReplicationResult;
use crate::inbox::{SampleInbox, SampleSender};
use crate::sample::PoseSample;
use crate::session::{Session, SessionStats};
use crate::EntityId;

/// Extra hold applied to a packet picked for reordering, so packets sent
/// after it overtake it.
const REORDER_HOLD_SECS: f64 = 0.05;

/// What a [`SimulatedLink`] does to each packet.
///
/// Latency is drawn uniformly from `one_way_ms ± jitter_ms` (never below
/// zero). The three fault rates are whole percentages rolled per packet.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NetworkConditions {
    /// Mean one-way delay.
    pub one_way_ms: u32,
    /// Half-width of the delay spread.
    pub jitter_ms: u32,
    /// Chance a packet never arrives.
    pub loss_percent: u8,
    /// Chance a second copy is sent with its own delay.
    pub duplicate_percent: u8,
    /// Chance a packet is held long enough for later ones to overtake it.
    pub reorder_percent: u8,
}

impl NetworkConditions {
    /// Clean link: only the delay spread, no faults.
    #[must_use]
    pub const fn clean(one_way_ms: u32, jitter_ms: u32) -> Self {
        Self {
            one_way_ms,
            jitter_ms,
            loss_percent: 0,
            duplicate_percent: 0,
            reorder_percent: 0,
        }
    }

    /// Same delay, with the given loss, duplication and reorder rates.
    #[must_use]
    pub const fn with_faults(self, loss_percent: u8, duplicate_percent: u8, reorder_percent: u8) -> Self {
        Self {
            loss_percent,
            duplicate_percent,
            reorder_percent,
            ..self
        }
    }

    /// Same-host loopback.
    pub const PERFECT: Self = Self::clean(1, 0);
    /// Wired broadband.
    pub const GOOD: Self = Self::clean(20, 5);
    /// Typical home connection with occasional faults.
    pub const AVERAGE: Self = Self::clean(50, 20).with_faults(1, 1, 2);
    /// Congested wireless or cellular.
    pub const POOR: Self = Self::clean(100, 50).with_faults(5, 2, 5);

    const NAMED: [(&'static str, Self); 4] = [
        ("perfect", Self::PERFECT),
        ("good", Self::GOOD),
        ("average", Self::AVERAGE),
        ("poor", Self::POOR),
    ];

    /// Named presets, mildest first.
    #[must_use]
    pub const fn presets() -> [(&'static str, Self); 4] {
        Self::NAMED
    }

    /// Preset by case-insensitive name.
    #[must_use]
    pub fn preset(name: &str) -> Option<Self> {
        Self::NAMED
            .iter()
            .find(|(preset, _)| preset.eq_ignore_ascii_case(name))
            .map(|&(_, conditions)| conditions)
    }

    fn one_way_delay_secs(&self, rng: &mut StdRng) -> f64 {
        let spread = f64::from(self.jitter_ms);
        let offset = if self.jitter_ms == 0 { 0.0 } else { rng.gen_range(-spread..=spread) };
        (f64::from(self.one_way_ms) + offset).max(0.0) * 1.0e-3
    }
}

fn chance(rng: &mut StdRng, percent: u8) -> bool {
    percent != 0 && rng.gen_range(0..100u8) < percent
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self::AVERAGE
    }
}

/// Counters kept by a [`SimulatedLink`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Packets handed to the link.
    pub sent: u64,
    /// Packets lost.
    pub dropped: u64,
    /// Extra copies injected.
    pub duplicated: u64,
    /// Packets held back so later ones overtake them.
    pub reordered: u64,
    /// Packets that came out the other end.
    pub delivered: u64,
}

#[derive(Clone, Debug)]
struct InFlight {
    arrive_at: f64,
    seq: u64,
    bytes: [u8; WIRE_SAMPLE_SIZE],
}

/// A one-way link with seeded loss, jitter, duplication and reordering.
#[derive(Debug)]
pub struct SimulatedLink {
    conditions: NetworkConditions,
    rng: StdRng,
    in_flight: Vec<InFlight>,
    next_seq: u64,
    stats: LinkStats,
}

impl SimulatedLink {
    /// Creates a link. The same seed gives the same packet fates.
    #[must_use]
    pub fn new(conditions: NetworkConditions, seed: u64) -> Self {
        Self {
            conditions,
            rng: StdRng::seed_from_u64(seed),
            in_flight: Vec::new(),
            next_seq: 0,
            stats: LinkStats::default(),
        }
    }

    /// Puts one encoded sample on the wire at `send_time`.
    pub fn send(&mut self, entity: EntityId, sample: &PoseSample, send_time: f64) {
        self.stats.sent += 1;
        if chance(&mut self.rng, self.conditions.loss_percent) {
            self.stats.dropped += 1;
            return;
        }

        let bytes = codec::encode(entity, sample);
        let mut arrive_at = send_time + self.conditions.one_way_delay_secs(&mut self.rng);
        if chance(&mut self.rng, self.conditions.reorder_percent) {
            arrive_at += REORDER_HOLD_SECS;
            self.stats.reordered += 1;
        }
        self.enqueue(arrive_at, bytes);

        if chance(&mut self.rng, self.conditions.duplicate_percent) {
            let copy_at = send_time + self.conditions.one_way_delay_secs(&mut self.rng);
            self.enqueue(copy_at, bytes);
            self.stats.duplicated += 1;
        }
    }

    fn enqueue(&mut self, arrive_at: f64, bytes: [u8; WIRE_SAMPLE_SIZE]) {
        self.in_flight.push(InFlight {
            arrive_at,
            seq: self.next_seq,
            bytes,
        });
        self.next_seq += 1;
    }

    /// Hands every packet that has arrived by `now` to `receive`, in
    /// arrival order, with its arrival time.
    pub fn poll(&mut self, now: f64, mut receive: impl FnMut(&[u8], f64)) {
        self.in_flight
            .sort_by(|a, b| a.arrive_at.total_cmp(&b.arrive_at).then(a.seq.cmp(&b.seq)));
        let ready = self.in_flight.iter().take_while(|p| p.arrive_at <= now).count();
        for packet in self.in_flight.drain(..ready) {
            self.stats.delivered += 1;
            receive(&packet.bytes, packet.arrive_at);
        }
    }

    /// Packets still in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Link counters.
    #[must_use]
    pub const fn stats(&self) -> LinkStats {
        self.stats
    }
}

/// One end-to-end replication run.
#[derive(Clone, Debug)]
pub struct ScenarioConfig {
    /// Link conditions.
    pub conditions: NetworkConditions,
    /// RNG seed for the link.
    pub seed: u64,
    /// Simulated seconds.
    pub duration_secs: f64,
    /// Samples per second the sender emits.
    pub send_rate_hz: u32,
    /// Receiver render frames per second.
    pub frame_rate_hz: u32,
    /// Radius of the circular path in meters.
    pub path_radius: f32,
    /// Angular speed along the path in radians per second.
    pub angular_speed: f32,
    /// Receiver replication config.
    pub replication: ReplicationConfig,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            conditions: NetworkConditions::default(),
            seed: 0x7E7E_7E7E,
            duration_secs: 10.0,
            send_rate_hz: DEFAULT_TICK_RATE,
            frame_rate_hz: 60,
            path_radius: 5.0,
            angular_speed: 1.0,
            replication: ReplicationConfig::default(),
        }
    }
}

impl ScenarioConfig {
    /// Linear speed of the sender along its path.
    #[must_use]
    pub fn path_speed(&self) -> f32 {
        self.path_radius * self.angular_speed.abs()
    }

    /// Ground-truth pose and velocity at `time`: a circle in the XZ plane,
    /// facing along the direction of travel.
    #[must_use]
    pub fn truth(&self, time: f64) -> (Pose, Vec3) {
        #[allow(clippy::cast_possible_truncation)]
        let angle = self.angular_speed * time as f32;
        let (sin, cos) = angle.sin_cos();
        let r = self.path_radius;
        let w = self.angular_speed;

        let position = Vec3::new(r * cos, 0.0, r * sin);
        let velocity = Vec3::new(-r * w * sin, 0.0, r * w * cos);
        let orientation = Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), -angle)
            .unwrap_or(Quaternion::IDENTITY);
        (Pose::new(position, orientation), velocity)
    }
}

/// Smoothness of one replication run.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SmoothnessReport {
    /// Render frames produced.
    pub frames: u64,
    /// Largest distance between two consecutive rendered positions.
    pub max_frame_jump: f32,
    /// Largest distance from the ground-truth position.
    pub max_position_error: f32,
    /// Mean distance from the ground-truth position.
    pub mean_position_error: f32,
    /// Frames whose pose contained NaN or infinity.
    pub non_finite_frames: u64,
    /// Receiver-side sample counters.
    pub session: SessionStats,
    /// Link counters.
    pub link: LinkStats,
    /// Deliveries the session refused.
    pub delivery_errors: u64,
}

/// Runs one scenario end to end.
///
/// # Errors
///
/// Whatever the receiving [`Session`] reports while being set up, e.g. an
/// invalid replication config.
pub fn run_scenario(config: &ScenarioConfig) -> ReplicationResult<SmoothnessReport> {
    const ENTITY: EntityId = EntityId(1);

    let mut session = Session::new(config.replication.clone())?;
    session.connect()?;
    session.on_connected()?;
    session.spawn_remote(ENTITY, config.truth(0.0).0)?;

    let (sender, inbox) = SampleInbox::bounded(config.replication.inbox_capacity);
    let unit_tolerance = config.replication.unit_tolerance;
    let mut link = SimulatedLink::new(config.conditions, config.seed);

    let send_interval = 1.0 / f64::from(config.send_rate_hz.max(1));
    let frame_interval = 1.0 / f64::from(config.frame_rate_hz.max(1));
    let mut next_send: u64 = 0;

    let mut report = SmoothnessReport::default();
    let mut previous: Option<Vec3> = None;
    let mut error_sum = 0.0f64;

    for frame in 0u64.. {
        #[allow(clippy::cast_precision_loss)]
        let now = frame as f64 * frame_interval;
        if now > config.duration_secs {
            break;
        }

        loop {
            #[allow(clippy::cast_precision_loss)]
            let send_time = next_send as f64 * send_interval;
            if send_time > now {
                break;
            }
            let (pose, velocity) = config.truth(send_time);
            let sample = PoseSample::from_pose(pose, send_time).with_velocity(Some(velocity));
            link.send(ENTITY, &sample, send_time);
            next_send += 1;
        }

        link.poll(now, |bytes, arrived| receive(&sender, bytes, arrived, unit_tolerance));
        session.drain_inbox(&inbox, |id, e| {
            report.delivery_errors += 1;
            tracing::debug!(entity = %id, error = %e, "simulated delivery refused");
        });

        let mut rendered = None;
        session.render(now, |_, pose| rendered = Some(pose));
        let Some(pose) = rendered else { continue };

        report.frames += 1;
        if !pose.is_finite() {
            report.non_finite_frames += 1;
            continue;
        }

        let error = pose.position.distance(config.truth(now).0.position);
        report.max_position_error = report.max_position_error.max(error);
        error_sum += f64::from(error);

        if let Some(prev) = previous {
            report.max_frame_jump = report.max_frame_jump.max(pose.position.distance(prev));
        }
        previous = Some(pose.position);
    }

    if report.frames > 0 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        let mean = (error_sum / report.frames as f64) as f32;
        report.mean_position_error = mean;
    }
    report.session = session.stats();
    report.link = link.stats();

    tracing::info!(
        frames = report.frames,
        max_jump = report.max_frame_jump,
        max_error = report.max_position_error,
        "scenario complete"
    );
    Ok(report)
}

fn receive(sender: &SampleSender, bytes: &[u8], arrived: f64, unit_tolerance: f32) {
    match codec::decode(bytes, unit_tolerance) {
        Ok((entity, sample)) => {
            sender.deliver(entity, sample, arrived);
        }
        Err(e) => tracing::warn!(error = %e, "undecodable packet"),
    }
}
