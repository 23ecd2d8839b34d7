mod common;

use std::time::Duration;

use common::{capture_config, delivered_ticks, Events};
use tempfile::tempdir;
use tickdeck::{JsonCodec, Recorder, RecorderConfig, RecordingLibrary, Replayer};
use tokio::time::advance;

#[tokio::test(start_paused = true)]
async fn recordings_made_through_a_library_replay_back() {
    let base = tempdir().expect("tempdir");
    let library = RecordingLibrary::new(base.path());

    for (name, payload_base) in [("lap-1", 100u64), ("lap-2", 200)] {
        let mut recorder = Recorder::new(
            library.recording_dir(name),
            JsonCodec,
            RecorderConfig::default(),
        )
        .expect("recorder");
        recorder.start().expect("start");
        for i in 1..=10u64 {
            advance(Duration::from_millis(34)).await;
            recorder.record(payload_base + i).expect("record");
        }
        recorder.stop().expect("stop");
    }

    let entries = library.recordings().expect("recordings");
    let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
    assert_eq!(names, vec!["lap-1", "lap-2"]);
    assert!(entries.iter().all(|entry| entry.meta.total_ticks == 10));
    assert!(library.total_size().expect("size") > 0);

    let events: Events = Events::default();
    let (config, mut done) = capture_config(&events);
    let mut replayer = Replayer::new(library.recording_dir("lap-2"), JsonCodec, config);
    replayer.init().expect("init");
    replayer.play().await.expect("play");
    done.recv().await.expect("on_end");

    assert_eq!(delivered_ticks(&events), (1..=10).collect::<Vec<_>>());
    let events = events.lock().expect("lock");
    assert!(events.iter().all(|(tick, payload, _)| *payload == 200 + tick));

    library.delete("lap-1").expect("delete");
    assert!(!library.contains("lap-1"));
    assert!(library.contains("lap-2"));
}
