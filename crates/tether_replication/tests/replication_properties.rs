//! Integration tests for the replication core, session and handoff.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tether_replication::{
    EntityId, InterpolationSettings, Pose, PoseSample, Quaternion, ReplicationConfig, ReplicationError,
    ReplicationState, SampleInbox, SampleOutcome, Session, StallPolicy, Vec3,
};

fn at(x: f32, time: f64) -> PoseSample {
    PoseSample::new(Vec3::new(x, 0.0, 0.0), Quaternion::IDENTITY, time)
}

fn core() -> ReplicationState {
    ReplicationState::new(Pose::IDENTITY, InterpolationSettings::default())
}

fn connected_session() -> Session {
    let mut session = Session::new(ReplicationConfig::default()).unwrap();
    session.connect().unwrap();
    session.on_connected().unwrap();
    session
}

#[test]
fn test_reaches_target_exactly_at_interval_end() {
    let mut s = core();
    s.on_pose_sample(at(0.0, 2.0), 0.0).unwrap();
    s.sample(10.0);
    s.on_pose_sample(at(6.0, 2.25), 0.0).unwrap();

    assert_eq!(s.interval(), Some(0.25));
    s.sample(10.0);
    assert_eq!(s.sample(10.25), s.target_pose());
}

#[test]
fn test_first_frame_after_acceptance_is_continuous() {
    let mut s = core();
    s.on_pose_sample(at(0.0, 0.0), 0.0).unwrap();
    s.sample(0.0);
    s.on_pose_sample(at(4.0, 0.5), 0.0).unwrap();
    s.sample(1.0);
    let on_screen = s.sample(1.125);

    s.on_pose_sample(at(8.0, 1.0), 0.0).unwrap();
    assert_eq!(s.sample(1.13), on_screen);
}

#[test]
fn test_duplicate_time_never_corrupts_interval() {
    let mut s = core();
    s.on_pose_sample(at(1.0, 4.0), 0.0).unwrap();
    // A lone sample repeated: no interval exists, and none may be invented.
    assert_eq!(s.on_pose_sample(at(1.0, 4.0), 0.0).unwrap(), SampleOutcome::Duplicate);
    assert_eq!(s.interval(), None);
    for frame in 0..30 {
        assert!(s.sample(f64::from(frame) / 60.0).is_finite());
    }

    s.on_pose_sample(at(2.0, 4.5), 0.0).unwrap();
    let target = s.target_pose();
    assert_eq!(s.on_pose_sample(at(7.0, 4.5), 0.0).unwrap(), SampleOutcome::Duplicate);
    assert_eq!(s.target_pose(), target);
    assert_eq!(s.interval(), Some(0.5));
}

#[test]
fn test_out_of_order_sample_is_discarded() {
    let mut s = core();
    s.on_pose_sample(at(10.0, 10.0), 0.0).unwrap();
    assert_eq!(s.on_pose_sample(at(5.0, 5.0), 0.0).unwrap(), SampleOutcome::Stale);
    assert_eq!(s.target_pose().position, Vec3::new(10.0, 0.0, 0.0));
    assert_eq!(s.last_packet_time(), Some(10.0));
}

#[test]
fn test_dead_reckoning_projects_by_lag() {
    let mut s = core();
    let sample = PoseSample::new(Vec3::ZERO, Quaternion::IDENTITY, 1.0).with_velocity(Some(Vec3::new(10.0, 0.0, 0.0)));
    s.on_pose_sample(sample, 0.1).unwrap();

    let target = s.target_pose();
    assert!((target.position.x - 1.0).abs() < 1.0e-5);
    assert_eq!(target.position.y, 0.0);
    assert_eq!(target.position.z, 0.0);
    assert_eq!(target.orientation, Quaternion::IDENTITY);
}

#[test]
fn test_single_sample_holds_for_seconds() {
    let mut s = core();
    let orientation = Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), 1.0).unwrap();
    s.on_pose_sample(PoseSample::new(Vec3::new(3.0, 4.0, 5.0), orientation, 1.0), 0.0)
        .unwrap();
    let target = s.target_pose();

    for frame in 0..=300 {
        let pose = s.sample(f64::from(frame) / 60.0);
        assert!(pose.is_finite());
        assert_eq!(pose, target);
    }
}

#[test]
fn test_extrapolate_policy_is_opt_in() {
    let config = ReplicationConfig {
        stall_policy: StallPolicy::Extrapolate,
        ..ReplicationConfig::default()
    };
    let mut s = ReplicationState::new(Pose::IDENTITY, InterpolationSettings::from(&config));
    let v = Some(Vec3::new(4.0, 0.0, 0.0));
    s.on_pose_sample(at(0.0, 0.0).with_velocity(v), 0.0).unwrap();
    s.sample(0.0);

    // No interval yet: overrun counts from acceptance, capped at 0.25s.
    assert!((s.sample(0.125).position.x - 0.5).abs() < 1.0e-5);
    assert!((s.sample(5.0).position.x - 1.0).abs() < 1.0e-5);
}

#[test]
fn test_ownership_round_trip_through_session() {
    let mut session = connected_session();
    let id = EntityId(3);
    session.spawn_remote(id, Pose::IDENTITY).unwrap();
    session.on_pose_sample(id, at(0.0, 0.0), 0.0).unwrap();
    session.render(0.0, |_, _| {});
    session.on_pose_sample(id, at(10.0, 0.5), 0.5).unwrap();
    session.render(0.5, |_, _| {});
    session.render(0.75, |_, _| {});

    let handed = session.acquire_authority(id).unwrap();
    assert!((handed.position.x - 5.0).abs() < 1.0e-4);
    assert!(matches!(
        session.on_pose_sample(id, at(11.0, 0.75), 0.75),
        Err(ReplicationError::LocallyOwned(_))
    ));

    let simulated = Pose::new(Vec3::new(-2.0, 1.0, 8.0), Quaternion::IDENTITY);
    session.update_local_pose(id, simulated).unwrap();
    session.release_authority(id, simulated).unwrap();

    let mut rendered = Vec::new();
    session.render(3.0, |entity, pose| rendered.push((entity, pose)));
    assert_eq!(rendered, vec![(id, simulated)]);
}

#[test]
fn test_sample_after_release_interpolates_from_handoff() {
    let mut session = connected_session();
    let id = EntityId(4);
    session.spawn_remote(id, Pose::IDENTITY).unwrap();
    session.on_pose_sample(id, at(0.0, 1.0), 1.0).unwrap();
    session.acquire_authority(id).unwrap();

    let handoff = Pose::new(Vec3::new(2.0, 0.0, 0.0), Quaternion::IDENTITY);
    session.release_authority(id, handoff).unwrap();
    session.on_pose_sample(id, at(4.0, 1.5), 1.5).unwrap();

    assert_eq!(session.sample(id, 1.5), Some(handoff));
    let halfway = session.sample(id, 1.75).unwrap();
    assert!((halfway.position.x - 3.0).abs() < 1.0e-4);
}

#[test]
fn test_one_hertz_sender_paced_over_full_interval() {
    let mut session = connected_session();
    let id = EntityId(6);
    session.spawn_remote(id, Pose::IDENTITY).unwrap();
    session.on_pose_sample(id, at(0.0, 0.0), 0.0).unwrap();
    session.render(0.0, |_, _| {});
    session.on_pose_sample(id, at(10.0, 1.0), 1.0).unwrap();

    session.render(1.0, |_, _| {});
    let quarter = session.sample(id, 1.25).unwrap();
    assert!((quarter.position.x - 2.5).abs() < 1.0e-4);
    let end = session.sample(id, 2.0).unwrap();
    assert!((end.position.x - 10.0).abs() < 1.0e-4);
}

#[test]
fn test_rejected_sample_does_not_skew_next_projection() {
    let mut session = connected_session();
    let id = EntityId(8);
    session.spawn_remote(id, Pose::IDENTITY).unwrap();

    let late_and_broken = PoseSample::new(Vec3::new(f32::NAN, 0.0, 0.0), Quaternion::IDENTITY, 1.0);
    assert!(session.on_pose_sample(id, late_and_broken, 1.9).is_err());

    let good = at(0.0, 2.0).with_velocity(Some(Vec3::new(10.0, 0.0, 0.0)));
    session.on_pose_sample(id, good, 2.0).unwrap();

    let entity = session.entity(id).unwrap();
    assert_eq!(entity.lag().unwrap().estimate(), 0.0);
    assert_eq!(entity.replication().unwrap().target_pose().position.x, 0.0);
}

#[test]
fn test_respawn_after_reconnect() {
    let mut session = connected_session();
    session.spawn_remote(EntityId(1), Pose::IDENTITY).unwrap();
    assert!(matches!(
        session.spawn_remote(EntityId(1), Pose::IDENTITY),
        Err(ReplicationError::AlreadySpawned(_))
    ));

    session.disconnect().unwrap();
    assert!(matches!(
        session.on_pose_sample(EntityId(1), at(0.0, 0.0), 0.0),
        Err(ReplicationError::NotConnected(_))
    ));

    session.connect().unwrap();
    session.on_connected().unwrap();
    session.spawn_remote(EntityId(1), Pose::IDENTITY).unwrap();
    assert_eq!(session.len(), 1);
}

#[test]
fn test_transport_thread_feeds_session() {
    let mut session = connected_session();
    for id in 0..4 {
        session.spawn_remote(EntityId(id), Pose::IDENTITY).unwrap();
    }

    let (tx, inbox) = SampleInbox::bounded(1024);
    let producer = std::thread::spawn(move || {
        for tick in 0..50u32 {
            let time = f64::from(tick) / 32.0;
            for id in 0..4 {
                #[allow(clippy::cast_precision_loss)]
                let x = tick as f32;
                tx.deliver(EntityId(id), at(x, time), time);
            }
        }
    });
    producer.join().unwrap();

    let processed = session.drain_inbox(&inbox, |id, e| panic!("{id}: {e}"));
    assert_eq!(processed, 200);
    for id in 0..4 {
        let state = session.entity(EntityId(id)).unwrap().replication().unwrap();
        assert_eq!(state.last_packet_time(), Some(49.0 / 32.0));
    }
}

#[test]
fn test_shuffled_stream_never_rewinds() {
    let mut rng = StdRng::seed_from_u64(0x5EED);

    for _ in 0..20 {
        let mut s = core();
        let mut times: Vec<f64> = (0..60).map(|i| f64::from(i) / 30.0).collect();
        // Swap neighbours at random, as a reordering link would.
        for i in 1..times.len() {
            if rng.gen_bool(0.3) {
                times.swap(i - 1, i);
            }
        }

        let mut newest = f64::NEG_INFINITY;
        let mut now = 0.0;
        for time in times {
            #[allow(clippy::cast_possible_truncation)]
            let x = time as f32;
            let outcome = s.on_pose_sample(at(x, time), rng.gen_range(0.0..0.2)).unwrap();
            assert_eq!(outcome == SampleOutcome::Accepted, time > newest);
            newest = newest.max(time);
            assert_eq!(s.last_packet_time(), Some(newest));

            now += rng.gen_range(0.0..0.05);
            assert!(s.sample(now).is_finite());
        }
    }
}
