mod common;

use std::time::Duration;

use common::{capture_config, delivered_ticks, write_recording, Events};
use tempfile::tempdir;
use tickdeck::{Error, JsonCodec, PlayState, Replayer};

#[tokio::test(start_paused = true)]
async fn seek_across_segments_then_play_to_end() {
    let dir = tempdir().expect("tempdir");
    // Two segments: ticks 0..1499.
    write_recording(dir.path(), 30, 1000, 0..1500);

    let events: Events = Events::default();
    let (config, mut done) = capture_config(&events);
    let mut replayer = Replayer::new(dir.path(), JsonCodec, config);
    replayer.init().expect("init");

    // The seek delivers a single echo without entering Playing.
    replayer.seek(1200).await.expect("seek");
    assert_eq!(replayer.state(), PlayState::Idle);
    assert_eq!(replayer.current_tick(), 1200);
    assert_eq!(delivered_ticks(&events), vec![1200]);

    replayer.play().await.expect("play");
    done.recv().await.expect("on_end");
    assert_eq!(delivered_ticks(&events), (1200..1500).collect::<Vec<_>>());
    assert_eq!(replayer.state(), PlayState::Idle);
}

#[tokio::test(start_paused = true)]
async fn seek_clamps_to_the_recording_bounds() {
    let dir = tempdir().expect("tempdir");
    write_recording(dir.path(), 30, 1000, 0..1500);

    let events: Events = Events::default();
    let (config, _done) = capture_config(&events);
    let mut replayer = Replayer::new(dir.path(), JsonCodec, config);
    replayer.init().expect("init");

    replayer.seek(5000).await.expect("seek");
    assert_eq!(replayer.current_tick(), 1499);

    replayer.step_backward(2).await.expect("step back");
    assert_eq!(replayer.current_tick(), 1497);

    replayer.step_forward(1).await.expect("step forward");
    assert_eq!(replayer.current_tick(), 1498);

    // Stepping back past zero stops at zero.
    replayer.seek(1).await.expect("seek");
    replayer.step_backward(10).await.expect("step back");
    assert_eq!(replayer.current_tick(), 0);
}

#[tokio::test(start_paused = true)]
async fn seek_while_paused_redirects_the_resume() {
    let dir = tempdir().expect("tempdir");
    write_recording(dir.path(), 30, 1000, 0..100);

    let events: Events = Events::default();
    let (config, mut done) = capture_config(&events);
    let mut replayer = Replayer::new(dir.path(), JsonCodec, config);
    replayer.init().expect("init");

    replayer.play().await.expect("play");
    tokio::time::sleep(Duration::from_millis(200)).await;
    replayer.pause().await.expect("pause");
    let delivered_before = delivered_ticks(&events);
    assert!(delivered_before.len() < 20, "paused early");

    replayer.seek(50).await.expect("seek");
    replayer.resume().await.expect("resume");
    done.recv().await.expect("on_end");

    let ticks = delivered_ticks(&events);
    let tail = &ticks[delivered_before.len()..];
    assert_eq!(tail[0], 50, "echo lands first after the pause");
    assert_eq!(tail[1..], (51..100).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn seek_into_a_missing_segment_surfaces_not_found() {
    let dir = tempdir().expect("tempdir");
    // Only the second segment exists on disk.
    write_recording(dir.path(), 30, 1000, 1000..1200);
    std::fs::remove_file(dir.path().join("segment_0.dat")).ok();

    let events: Events = Events::default();
    let (config, _done) = capture_config(&events);
    let mut replayer = Replayer::new(dir.path(), JsonCodec, config);
    replayer.init().expect("init");

    let err = replayer.seek(10).await.expect_err("segment 0 missing");
    assert!(matches!(err, Error::NotFound(_)));
    // The cursor still moves to the clamped target.
    assert_eq!(replayer.current_tick(), 10);

    replayer.seek(1100).await.expect("seek into segment 1");
    assert_eq!(delivered_ticks(&events), vec![1100]);
}
