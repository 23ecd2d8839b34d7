mod common;

use std::time::Duration;

use common::{capture_config, delivered_ticks, Events};
use tempfile::tempdir;
use tickdeck::{Error, JsonCodec, PlayState, Recorder, RecorderConfig, Replayer};
use tokio::time::advance;

#[tokio::test(start_paused = true)]
async fn record_then_replay_preserves_payloads_and_cadence() {
    let dir = tempdir().expect("tempdir");

    let mut recorder =
        Recorder::new(dir.path(), JsonCodec, RecorderConfig::default()).expect("recorder");
    recorder.start().expect("start");
    // ~1.5 s of payloads at 30 tps, payload = tick * 2.
    for i in 1..=45u64 {
        advance(Duration::from_millis(34)).await;
        recorder.record(i * 2).expect("record");
    }
    let meta = recorder.stop().expect("stop");
    assert_eq!(meta.total_ticks, 45);
    assert!(meta.total_duration >= 1500.0);

    let events: Events = Events::default();
    let (config, mut done) = capture_config(&events);
    let mut replayer = Replayer::new(dir.path(), JsonCodec, config);
    replayer.init().expect("init");
    assert_eq!(replayer.meta().expect("meta").total_ticks, 45);

    replayer.play().await.expect("play");
    done.recv().await.expect("on_end");
    assert_eq!(replayer.state(), PlayState::Idle);

    let ticks = delivered_ticks(&events);
    assert_eq!(ticks, (1..=45).collect::<Vec<_>>());

    let events = events.lock().expect("lock");
    for (tick, payload, _) in events.iter() {
        assert_eq!(*payload, tick * 2);
    }
    // One tick period between deliveries at speed 1.0.
    for pair in events.windows(2) {
        let gap = pair[1].2.duration_since(pair[0].2);
        assert!(
            gap >= Duration::from_millis(30) && gap <= Duration::from_millis(37),
            "gap = {gap:?}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn replaying_twice_from_one_directory_is_consistent() {
    let dir = tempdir().expect("tempdir");
    common::write_recording(dir.path(), 30, 1000, 0..30);

    for _ in 0..2 {
        let events: Events = Events::default();
        let (config, mut done) = capture_config(&events);
        let mut replayer = Replayer::new(dir.path(), JsonCodec, config);
        replayer.init().expect("init");
        replayer.play().await.expect("play");
        done.recv().await.expect("on_end");
        assert_eq!(delivered_ticks(&events), (0..30).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn init_without_a_header_is_not_found() {
    let dir = tempdir().expect("tempdir");
    let config = tickdeck::ReplayerConfig::new(|_: &u64, _| {});
    let mut replayer = Replayer::new(dir.path(), JsonCodec, config);
    let err = replayer.init().expect_err("no header");
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn observers_track_the_cursor() {
    let dir = tempdir().expect("tempdir");
    common::write_recording(dir.path(), 30, 1000, 0..60);

    let events: Events = Events::default();
    let (config, _done) = capture_config(&events);
    let mut replayer = Replayer::new(dir.path(), JsonCodec, config);
    replayer.init().expect("init");
    assert_eq!(replayer.current_tick(), 0);
    assert_eq!(replayer.state(), PlayState::Idle);
    assert!((replayer.speed() - 1.0).abs() < f64::EPSILON);

    replayer.seek(30).await.expect("seek");
    assert_eq!(replayer.current_tick(), 30);
    // tick 30 at 30 tps sits at the 1 s mark.
    assert!((replayer.current_time() - 1000.0).abs() < 1e-9);
}
