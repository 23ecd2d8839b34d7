use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::clock::{segment_index, tick_to_time_ms, time_ms_to_tick, TickMeta};
use crate::codec::PayloadCodec;
use crate::meta::{read_meta, ReplayMeta};
use crate::range::{collect_range, RangeQuery, TickEntry};
use crate::store::SegmentStore;
use crate::{Error, Result};

pub const DEFAULT_SPEED: f64 = 1.0;
pub const MIN_SPEED: f64 = 0.1;
pub const MAX_SPEED: f64 = 10.0;
pub const DEFAULT_CACHE_WINDOW: u64 = 3;

/// Delays shorter than this are busy-processed synchronously: host timers
/// bottom out around a few milliseconds, and arming one for less costs
/// more than the wait it buys.
const MIN_TIMER_DELAY: Duration = Duration::from_millis(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Idle,
    Playing,
    Paused,
}

impl PlayState {
    fn name(self) -> &'static str {
        match self {
            PlayState::Idle => "Idle",
            PlayState::Playing => "Playing",
            PlayState::Paused => "Paused",
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PlayState::Idle => 0,
            PlayState::Playing => 1,
            PlayState::Paused => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => PlayState::Playing,
            2 => PlayState::Paused,
            _ => PlayState::Idle,
        }
    }
}

type TickFn<T> = Box<dyn FnMut(&T, TickMeta) + Send>;
type EventFn = Box<dyn FnMut() + Send>;

/// Playback options and callbacks. `on_tick` runs for every delivered
/// tick; `on_start` on the Idle -> Playing transition; `on_end` when the
/// recording runs out.
pub struct ReplayerConfig<T> {
    speed: f64,
    cache_window: u64,
    on_start: Option<EventFn>,
    on_tick: TickFn<T>,
    on_end: Option<EventFn>,
}

impl<T> ReplayerConfig<T> {
    pub fn new(on_tick: impl FnMut(&T, TickMeta) + Send + 'static) -> Self {
        Self {
            speed: DEFAULT_SPEED,
            cache_window: DEFAULT_CACHE_WINDOW,
            on_start: None,
            on_tick: Box::new(on_tick),
            on_end: None,
        }
    }

    /// Playback speed multiplier, clamped to `[0.1, 10.0]`.
    pub fn speed(mut self, speed: f64) -> Self {
        self.speed = speed.clamp(MIN_SPEED, MAX_SPEED);
        self
    }

    /// Segments on either side of the current one retained in cache.
    pub fn cache_window(mut self, window: u64) -> Self {
        self.cache_window = window;
        self
    }

    pub fn on_start(mut self, on_start: impl FnMut() + Send + 'static) -> Self {
        self.on_start = Some(Box::new(on_start));
        self
    }

    pub fn on_end(mut self, on_end: impl FnMut() + Send + 'static) -> Self {
        self.on_end = Some(Box::new(on_end));
        self
    }
}

struct Shared {
    state: AtomicU8,
    current_tick: AtomicU64,
    speed_bits: AtomicU64,
}

type Ack = oneshot::Sender<Result<()>>;

enum Command<T> {
    Play(Ack),
    Pause(Ack),
    Resume(Ack),
    Stop(Ack),
    Seek { tick: u64, ack: Ack },
    SetSpeed { speed: f64, ack: Ack },
    Range {
        query: RangeQuery,
        ack: oneshot::Sender<Result<Vec<TickEntry<T>>>>,
    },
}

/// Drives tick callbacks at the recorded cadence with VCR-style controls.
///
/// `init` reads `header.json` and spawns the engine task; control methods
/// rendezvous with it over a command channel, so every state change is
/// acknowledged before the call returns. Observers read shared atomics
/// and never block.
pub struct Replayer<T, C> {
    dir: PathBuf,
    codec: Option<C>,
    config: Option<ReplayerConfig<T>>,
    meta: Option<ReplayMeta>,
    shared: Arc<Shared>,
    commands: Option<mpsc::UnboundedSender<Command<T>>>,
}

impl<T, C> Replayer<T, C>
where
    T: Clone + Send + 'static,
    C: PayloadCodec<T> + Send + 'static,
{
    pub fn new(dir: impl Into<PathBuf>, codec: C, config: ReplayerConfig<T>) -> Self {
        let shared = Arc::new(Shared {
            state: AtomicU8::new(PlayState::Idle.as_u8()),
            current_tick: AtomicU64::new(0),
            speed_bits: AtomicU64::new(config.speed.to_bits()),
        });
        Self {
            dir: dir.into(),
            codec: Some(codec),
            config: Some(config),
            meta: None,
            shared,
            commands: None,
        }
    }

    /// Reads the recording header and starts the engine task. Must run
    /// inside a tokio runtime. A missing header surfaces as `NotFound`.
    pub fn init(&mut self) -> Result<()> {
        if self.commands.is_some() {
            return Err(Error::invalid_state("init", "uninitialized", "initialized"));
        }
        let meta = read_meta(&self.dir)?;
        if meta.tick_rate == 0 || meta.segment_size == 0 {
            return Err(Error::Corrupt(
                "header has a zero tickRate or segmentSize".into(),
            ));
        }
        let codec = self.codec.take().ok_or(Error::Closed)?;
        let config = self.config.take().ok_or(Error::Closed)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Engine::new(
            SegmentStore::new(&self.dir, codec),
            meta.clone(),
            config,
            Arc::clone(&self.shared),
            rx,
        );
        tokio::spawn(engine.run());
        self.meta = Some(meta);
        self.commands = Some(tx);
        debug!("replayer initialized for {}", self.dir.display());
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.dir
    }

    pub fn meta(&self) -> Option<&ReplayMeta> {
        self.meta.as_ref()
    }

    pub fn state(&self) -> PlayState {
        PlayState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// The tick most recently delivered or seek-positioned.
    pub fn current_tick(&self) -> u64 {
        self.shared.current_tick.load(Ordering::Acquire)
    }

    /// Position on the recording timeline, in milliseconds.
    pub fn current_time(&self) -> f64 {
        match self.meta.as_ref() {
            Some(meta) => tick_to_time_ms(self.current_tick(), meta.tick_rate),
            None => 0.0,
        }
    }

    pub fn speed(&self) -> f64 {
        f64::from_bits(self.shared.speed_bits.load(Ordering::Acquire))
    }

    pub async fn play(&self) -> Result<()> {
        self.control("play", Command::Play).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.control("pause", Command::Pause).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.control("resume", Command::Resume).await
    }

    /// Stops playback and cancels the pending timer. The cursor is
    /// retained; `on_end` does not fire for an explicit stop.
    pub async fn stop(&self) -> Result<()> {
        self.control("stop", Command::Stop).await
    }

    /// Clamps to `[0, totalTicks - 1]`, moves the cursor and delivers a
    /// single `on_tick` echo for the target without entering Playing.
    /// Segment read failures surface here.
    pub async fn seek(&self, tick: u64) -> Result<()> {
        self.control("seek", |ack| Command::Seek { tick, ack }).await
    }

    pub async fn seek_to_time(&self, ms: u64) -> Result<()> {
        let meta = self
            .meta
            .as_ref()
            .ok_or_else(|| Error::invalid_state("seek_to_time", "initialized", "uninitialized"))?;
        self.seek(time_ms_to_tick(ms, meta.tick_rate)).await
    }

    pub async fn step_forward(&self, steps: u64) -> Result<()> {
        self.seek(self.current_tick().saturating_add(steps)).await
    }

    pub async fn step_backward(&self, steps: u64) -> Result<()> {
        self.seek(self.current_tick().saturating_sub(steps)).await
    }

    /// Changes the playback speed, clamped to `[0.1, 10.0]`. Requires
    /// Playing; the pending timer is rescheduled under the new speed.
    pub async fn set_speed(&self, speed: f64) -> Result<()> {
        self.control("set_speed", |ack| Command::SetSpeed { speed, ack })
            .await
    }

    /// Returns the ordered tick entries of a time or tick interval. See
    /// [`RangeQuery`].
    pub async fn get_range(&self, query: RangeQuery) -> Result<Vec<TickEntry<T>>> {
        let commands = self.command_sender("get_range")?;
        let (ack, response) = oneshot::channel();
        commands
            .send(Command::Range { query, ack })
            .map_err(|_| Error::Closed)?;
        response.await.map_err(|_| Error::Closed)?
    }

    async fn control(
        &self,
        op: &'static str,
        make: impl FnOnce(Ack) -> Command<T>,
    ) -> Result<()> {
        let commands = self.command_sender(op)?;
        let (ack, response) = oneshot::channel();
        commands.send(make(ack)).map_err(|_| Error::Closed)?;
        response.await.map_err(|_| Error::Closed)?
    }

    fn command_sender(&self, op: &'static str) -> Result<&mpsc::UnboundedSender<Command<T>>> {
        self.commands
            .as_ref()
            .ok_or_else(|| Error::invalid_state(op, "initialized", "uninitialized"))
    }
}

enum Event<T> {
    Command(Option<Command<T>>),
    TimerFired,
}

/// The engine task: owns the segment cache, the cursor and the single
/// pending timer. Scheduling uses an anchored affine mapping from wall
/// time to tick; play, seek and speed changes re-anchor it, resume shifts
/// the anchor by the pause length.
struct Engine<T, C>
where
    C: PayloadCodec<T>,
{
    store: SegmentStore<T, C>,
    meta: ReplayMeta,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command<T>>,
    on_start: Option<EventFn>,
    on_tick: TickFn<T>,
    on_end: Option<EventFn>,
    cache_window: u64,
    state: PlayState,
    speed: f64,
    current_tick: u64,
    last_delivered: Option<u64>,
    current_segment: Option<u64>,
    anchor_tick: u64,
    anchor_time: Instant,
    paused_at: Option<Instant>,
    deadline: Option<Instant>,
}

impl<T, C> Engine<T, C>
where
    T: Clone,
    C: PayloadCodec<T>,
{
    fn new(
        store: SegmentStore<T, C>,
        meta: ReplayMeta,
        config: ReplayerConfig<T>,
        shared: Arc<Shared>,
        commands: mpsc::UnboundedReceiver<Command<T>>,
    ) -> Self {
        Self {
            store,
            meta,
            shared,
            commands,
            on_start: config.on_start,
            on_tick: config.on_tick,
            on_end: config.on_end,
            cache_window: config.cache_window,
            state: PlayState::Idle,
            speed: config.speed,
            current_tick: 0,
            last_delivered: None,
            current_segment: None,
            anchor_tick: 0,
            anchor_time: Instant::now(),
            paused_at: None,
            deadline: None,
        }
    }

    async fn run(mut self) {
        loop {
            let event = match (self.state, self.deadline) {
                (PlayState::Playing, Some(deadline)) => {
                    tokio::select! {
                        command = self.commands.recv() => Event::Command(command),
                        _ = tokio::time::sleep_until(deadline) => Event::TimerFired,
                    }
                }
                _ => Event::Command(self.commands.recv().await),
            };
            match event {
                Event::Command(Some(command)) => self.handle(command),
                Event::Command(None) => break,
                Event::TimerFired => {
                    self.deadline = None;
                    self.drive_playback();
                }
            }
        }
        trace!("replayer engine exited");
    }

    fn handle(&mut self, command: Command<T>) {
        match command {
            Command::Play(ack) => {
                let result = self.handle_play();
                let _ = ack.send(result);
            }
            Command::Pause(ack) => {
                let result = self.handle_pause();
                let _ = ack.send(result);
            }
            Command::Resume(ack) => {
                let result = self.handle_resume();
                let _ = ack.send(result);
            }
            Command::Stop(ack) => {
                let result = self.handle_stop();
                let _ = ack.send(result);
            }
            Command::Seek { tick, ack } => {
                let result = self.handle_seek(tick);
                let _ = ack.send(result);
            }
            Command::SetSpeed { speed, ack } => {
                let result = self.handle_set_speed(speed);
                let _ = ack.send(result);
            }
            Command::Range { query, ack } => {
                let result = collect_range(&mut self.store, &self.meta, &query);
                let _ = ack.send(result);
            }
        }
    }

    fn handle_play(&mut self) -> Result<()> {
        match self.state {
            PlayState::Playing => Err(Error::invalid_state("play", "Idle or Paused", "Playing")),
            PlayState::Paused => {
                self.do_resume();
                Ok(())
            }
            PlayState::Idle => {
                self.set_state(PlayState::Playing);
                self.anchor_tick = self.current_tick;
                self.anchor_time = Instant::now();
                if let Some(on_start) = self.on_start.as_mut() {
                    on_start();
                }
                debug!("playback started at tick {}", self.current_tick);
                self.resume_scheduling();
                Ok(())
            }
        }
    }

    fn handle_pause(&mut self) -> Result<()> {
        if self.state != PlayState::Playing {
            return Err(Error::invalid_state("pause", "Playing", self.state.name()));
        }
        self.deadline = None;
        self.paused_at = Some(Instant::now());
        self.set_state(PlayState::Paused);
        debug!("playback paused at tick {}", self.current_tick);
        Ok(())
    }

    fn handle_resume(&mut self) -> Result<()> {
        if self.state != PlayState::Paused {
            return Err(Error::invalid_state("resume", "Paused", self.state.name()));
        }
        self.do_resume();
        Ok(())
    }

    fn do_resume(&mut self) {
        if let Some(paused_at) = self.paused_at.take() {
            self.anchor_time += paused_at.elapsed();
        }
        self.set_state(PlayState::Playing);
        debug!("playback resumed at tick {}", self.current_tick);
        self.resume_scheduling();
    }

    fn handle_stop(&mut self) -> Result<()> {
        if self.state == PlayState::Idle {
            return Err(Error::invalid_state("stop", "Playing or Paused", "Idle"));
        }
        self.deadline = None;
        self.paused_at = None;
        self.set_state(PlayState::Idle);
        debug!("playback stopped at tick {}", self.current_tick);
        Ok(())
    }

    fn handle_seek(&mut self, tick: u64) -> Result<()> {
        let result = self.apply_seek(tick);
        if self.state == PlayState::Playing {
            self.resume_scheduling();
        }
        result
    }

    fn apply_seek(&mut self, tick: u64) -> Result<()> {
        let max_tick = self.meta.total_ticks.saturating_sub(1);
        let target = tick.min(max_tick);
        self.deadline = None;
        self.set_tick(target);
        self.anchor_tick = target;
        self.anchor_time = Instant::now();
        if self.paused_at.is_some() {
            // Only pause time after the seek may shift the anchor later.
            self.paused_at = Some(self.anchor_time);
        }
        trace!("seek to tick {target}");

        let segment = segment_index(target, self.meta.segment_size);
        match self.store.load_segment(segment) {
            Ok(block) => {
                if let Some(payload) = block.get(target) {
                    let meta = TickMeta::compute(target, self.meta.tick_rate, self.meta.segment_size);
                    (self.on_tick)(payload, meta);
                    self.last_delivered = Some(target);
                } else {
                    self.last_delivered = None;
                }
                self.note_segment(segment);
                Ok(())
            }
            Err(err) => {
                self.last_delivered = None;
                Err(err)
            }
        }
    }

    fn handle_set_speed(&mut self, speed: f64) -> Result<()> {
        if self.state != PlayState::Playing {
            return Err(Error::invalid_state("set_speed", "Playing", self.state.name()));
        }
        let clamped = speed.clamp(MIN_SPEED, MAX_SPEED);
        // Re-anchor on the previous tick's scheduled instant so the next
        // tick lands one new-speed period after it.
        let prev = self
            .last_delivered
            .unwrap_or_else(|| self.current_tick.saturating_sub(1));
        let prev_deadline = self.deadline_for(prev);
        self.speed = clamped;
        self.shared
            .speed_bits
            .store(clamped.to_bits(), Ordering::Release);
        self.anchor_tick = prev;
        self.anchor_time = prev_deadline;
        debug!("playback speed set to {clamped}");

        if self.deadline.is_some() {
            let deadline = self.deadline_for(self.current_tick);
            if deadline.saturating_duration_since(Instant::now()) >= MIN_TIMER_DELAY {
                self.deadline = Some(deadline);
            } else {
                self.deadline = None;
                self.drive_playback();
            }
        }
        Ok(())
    }

    /// Decides the next tick to process and either runs it now or arms
    /// the single pending timer for it.
    fn resume_scheduling(&mut self) {
        if self.last_delivered == Some(self.current_tick) {
            self.set_tick(self.current_tick + 1);
        }
        let deadline = self.deadline_for(self.current_tick);
        if deadline.saturating_duration_since(Instant::now()) >= MIN_TIMER_DELAY {
            self.deadline = Some(deadline);
        } else {
            self.drive_playback();
        }
    }

    /// The playing loop: fetch, deliver, drift-correct, schedule. Exits
    /// by arming the timer for a tick that is not yet due, or by ending
    /// playback on a missing payload.
    fn drive_playback(&mut self) {
        while self.state == PlayState::Playing {
            let tick = self.current_tick;
            let segment = segment_index(tick, self.meta.segment_size);
            let delivered = match self.store.load_segment(segment) {
                Ok(block) => match block.get(tick) {
                    Some(payload) => {
                        let meta =
                            TickMeta::compute(tick, self.meta.tick_rate, self.meta.segment_size);
                        (self.on_tick)(payload, meta);
                        true
                    }
                    None => false,
                },
                Err(err) if err.is_not_found() => false,
                Err(err) => {
                    // An unreadable segment ends the playing loop; the
                    // error surfaces from explicit seek and range calls.
                    warn!("segment {segment} unreadable during playback: {err}");
                    false
                }
            };

            if !delivered {
                // A fresh recording has no tick 0; before giving up on
                // the very first fetch, snap to the first recorded tick.
                if self.last_delivered.is_none() && tick == 0 {
                    if let Some(first) = self.first_tick_in(segment) {
                        if first > 0 {
                            self.set_tick(first);
                            self.anchor_tick = first;
                            self.anchor_time = Instant::now();
                            continue;
                        }
                    }
                }
                self.finish_playback();
                return;
            }
            self.last_delivered = Some(tick);
            self.note_segment(segment);

            // Drift correction: when delivery has fallen behind the wall
            // clock, jump the cursor forward to the expected tick.
            let expected = self
                .expected_tick()
                .min(self.meta.total_ticks.saturating_sub(1));
            if expected > tick {
                debug!("catch-up: tick {tick} -> {expected}");
                self.set_tick(expected);
                self.anchor_tick = expected;
                self.anchor_time = Instant::now();
                continue;
            }

            let next = tick + 1;
            let deadline = self.deadline_for(next);
            self.set_tick(next);
            if deadline.saturating_duration_since(Instant::now()) >= MIN_TIMER_DELAY {
                self.deadline = Some(deadline);
                return;
            }
            // Sub-quantum delay: busy-process the next tick.
        }
    }

    fn finish_playback(&mut self) {
        self.deadline = None;
        self.set_state(PlayState::Idle);
        debug!("playback finished at tick {}", self.current_tick);
        if let Some(on_end) = self.on_end.as_mut() {
            on_end();
        }
    }

    fn first_tick_in(&mut self, segment: u64) -> Option<u64> {
        match self.store.load_segment(segment) {
            Ok(block) => Some(block.first_tick),
            Err(_) => None,
        }
    }

    fn note_segment(&mut self, segment: u64) {
        if self.current_segment != Some(segment) {
            self.current_segment = Some(segment);
            self.store.evict_far_from(segment, self.cache_window);
        }
    }

    fn deadline_for(&self, tick: u64) -> Instant {
        let ticks_ahead = tick.saturating_sub(self.anchor_tick);
        let secs = ticks_ahead as f64 / (self.meta.tick_rate as f64 * self.speed);
        self.anchor_time + Duration::from_secs_f64(secs)
    }

    fn expected_tick(&self) -> u64 {
        let elapsed = Instant::now().saturating_duration_since(self.anchor_time);
        self.anchor_tick + ticks_elapsed(elapsed, self.meta.tick_rate, self.speed)
    }

    fn set_tick(&mut self, tick: u64) {
        self.current_tick = tick;
        self.shared.current_tick.store(tick, Ordering::Release);
    }

    fn set_state(&mut self, state: PlayState) {
        self.state = state;
        self.shared.state.store(state.as_u8(), Ordering::Release);
    }
}

fn ticks_elapsed(elapsed: Duration, tick_rate: u32, speed: f64) -> u64 {
    (elapsed.as_secs_f64() * tick_rate as f64 * speed) as u64
}
