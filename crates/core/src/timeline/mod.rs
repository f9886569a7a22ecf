//! The timeline owns the events and plays them back on a background thread.
//!
//! All state shared with the scheduling thread lives behind [`Shared`]: the
//! event library, the transport (playback state + clock) and the pause gate.
//! Callers only ever go through the public operations on [`Timeline`].

mod clock;

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Receiver, Sender},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

pub use clock::{format_hms, PlaybackClock};

use crate::{
    config::{AppConfig, PlaybackConfig, SinkConfig, DEFAULT_IP, DEFAULT_NAME, DEFAULT_PORT},
    control::EmitOptions,
    Event, EventId, MessageSink, OscUdpSink, Result, ShowlineError,
};

/// Playback lifecycle. `Idle` and `Stopped` both mean "not running": `Idle`
/// before the first run and after a reset, `Stopped` once a run has ended or
/// was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackState {
    Idle,
    Running,
    Paused,
    Stopped,
}

impl PlaybackState {
    pub fn is_at_rest(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Published to every subscriber as playback progresses.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    StateChanged(PlaybackState),
    /// Percentage of the nominal run length, 0 to 100.
    Progress(u8),
    Log(String),
}

struct Library {
    name: String,
    ip: String,
    port: u16,
    events: BTreeMap<EventId, Event>,
    last_id: u64,
    sink: Arc<dyn MessageSink>,
}

impl Library {
    fn attach_all(&mut self) {
        for event in self.events.values_mut() {
            event.attach_sink(self.sink.clone());
        }
    }
}

struct Transport {
    state: PlaybackState,
    clock: PlaybackClock,
    progress: u8,
    /// A scheduling thread is alive. Stays set across loop passes.
    active: bool,
    playback: PlaybackConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassOutcome {
    Completed,
    Stopped,
}

struct Shared {
    library: Mutex<Library>,
    transport: Mutex<Transport>,
    /// Pause gate: the scheduler waits here while the state is `Paused`.
    resumed: Condvar,
    stop_requested: AtomicBool,
    looping: AtomicBool,
    subscribers: Mutex<Vec<Sender<Notification>>>,
}

/// Ordered collection of cues plus their playback machinery.
///
/// ```no_run
/// use showline_core::{ControlValue, Event, Timeline};
///
/// let timeline = Timeline::new();
/// timeline.add(Event::new(0.0, "/composition/layers/1/clips/1/connect", ControlValue::constant(1)?)?)?;
/// timeline.add(Event::new(1.0, "/composition/layers/1/video/opacity", ControlValue::interpolated(0.0, 1.0, 3.0)?)?)?;
/// timeline.run()?;
/// timeline.join()?;
/// # Ok::<(), showline_core::ShowlineError>(())
/// ```
pub struct Timeline {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Timeline {
    /// Empty timeline sending OSC over UDP to the default target.
    pub fn new() -> Self {
        Self::with_config(&AppConfig::default())
    }

    /// Empty timeline targeting `config.sink` with `config.playback` timings.
    pub fn with_config(config: &AppConfig) -> Self {
        let SinkConfig { ip, port } = config.sink.clone();
        Self::assemble(
            DEFAULT_NAME.to_string(),
            ip.clone(),
            port,
            Arc::new(OscUdpSink::new(ip, port)),
            config.playback,
        )
    }

    /// Empty timeline delivering every message to `sink`.
    pub fn with_sink(sink: Arc<dyn MessageSink>, playback: PlaybackConfig) -> Self {
        Self::assemble(
            DEFAULT_NAME.to_string(),
            DEFAULT_IP.to_string(),
            DEFAULT_PORT,
            sink,
            playback,
        )
    }

    pub(crate) fn assemble(
        name: String,
        ip: String,
        port: u16,
        sink: Arc<dyn MessageSink>,
        playback: PlaybackConfig,
    ) -> Self {
        let library = Library {
            name,
            ip,
            port,
            events: BTreeMap::new(),
            last_id: 0,
            sink,
        };
        let transport = Transport {
            state: PlaybackState::Idle,
            clock: PlaybackClock::default(),
            progress: 0,
            active: false,
            playback,
        };

        Self {
            shared: Arc::new(Shared {
                library: Mutex::new(library),
                transport: Mutex::new(transport),
                resumed: Condvar::new(),
                stop_requested: AtomicBool::new(false),
                looping: AtomicBool::new(false),
                subscribers: Mutex::new(Vec::new()),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> Result<String> {
        Ok(self.shared.lock_library()?.name.clone())
    }

    pub fn set_name(&self, name: impl Into<String>) -> Result<()> {
        self.shared.lock_library()?.name = name.into();
        Ok(())
    }

    pub fn ip(&self) -> Result<String> {
        Ok(self.shared.lock_library()?.ip.clone())
    }

    pub fn port(&self) -> Result<u16> {
        Ok(self.shared.lock_library()?.port)
    }

    /// Points the timeline at a new OSC/UDP target and reattaches every event.
    /// Only allowed while playback is not running.
    pub fn set_sink(&self, ip: impl Into<String>, port: u16) -> Result<()> {
        let ip = ip.into();
        let sink = Arc::new(OscUdpSink::new(ip.clone(), port));
        self.install_sink(Some((ip, port)), sink)
    }

    /// Replaces the transport while keeping the recorded ip and port, e.g. to
    /// print messages instead of sending them.
    pub fn replace_sink(&self, sink: Arc<dyn MessageSink>) -> Result<()> {
        self.install_sink(None, sink)
    }

    fn install_sink(
        &self,
        target: Option<(String, u16)>,
        sink: Arc<dyn MessageSink>,
    ) -> Result<()> {
        {
            let transport = self.shared.lock_transport()?;
            if transport.active || !transport.state.is_at_rest() {
                return Err(ShowlineError::InvalidTransition {
                    action: "change the sink",
                    state: transport.state,
                });
            }
        }

        let mut library = self.shared.lock_library()?;
        if let Some((ip, port)) = target {
            library.ip = ip;
            library.port = port;
        }
        library.sink = sink;
        library.attach_all();
        tracing::debug!(ip = %library.ip, port = library.port, "sink attached to all events");
        Ok(())
    }

    pub fn set_loop(&self, looping: bool) {
        self.shared.looping.store(looping, Ordering::SeqCst);
    }

    pub fn is_looping(&self) -> bool {
        self.shared.looping.load(Ordering::SeqCst)
    }

    /// Stores `event` under the next id and attaches the current sink.
    pub fn add(&self, mut event: Event) -> Result<EventId> {
        let id = {
            let mut library = self.shared.lock_library()?;
            library.last_id += 1;
            let id = EventId::new(library.last_id);
            event.attach_sink(library.sink.clone());
            library.events.insert(id, event);
            id
        };
        self.shared
            .log(format!("New event added to the timeline: ID = {id}"));
        Ok(id)
    }

    /// Removes and returns the event. Unknown ids are reported as
    /// [`ShowlineError::NotFound`].
    pub fn remove(&self, id: EventId) -> Result<Event> {
        let removed = self
            .shared
            .lock_library()?
            .events
            .remove(&id)
            .ok_or(ShowlineError::NotFound(id))?;
        self.shared
            .log(format!("Event removed from the timeline: ID = {id}"));
        Ok(removed)
    }

    pub fn event(&self, id: EventId) -> Result<Option<Event>> {
        Ok(self.shared.lock_library()?.events.get(&id).cloned())
    }

    /// Applies an edit to one event.
    ///
    /// The edit runs on a copy with no lock held: a failing setter leaves the
    /// stored event untouched and the closure may read the timeline. An event
    /// removed while the edit ran is reported as [`ShowlineError::NotFound`].
    pub fn update_event<F>(&self, id: EventId, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Event) -> Result<()>,
    {
        let mut edited = self.event(id)?.ok_or(ShowlineError::NotFound(id))?;
        edit(&mut edited)?;

        let mut library = self.shared.lock_library()?;
        let sink = library.sink.clone();
        let slot = library
            .events
            .get_mut(&id)
            .ok_or(ShowlineError::NotFound(id))?;
        edited.attach_sink(sink);
        *slot = edited;
        Ok(())
    }

    /// Snapshot of all events in id order.
    pub fn events(&self) -> Result<Vec<(EventId, Event)>> {
        Ok(self
            .shared
            .lock_library()?
            .events
            .iter()
            .map(|(id, event)| (*id, event.clone()))
            .collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.shared.lock_library()?.events.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Latest event time, which is the nominal run length. `0.0` when empty.
    pub fn max_time(&self) -> Result<f64> {
        Ok(max_time(self.shared.lock_library()?.events.values()))
    }

    pub fn state(&self) -> Result<PlaybackState> {
        Ok(self.shared.lock_transport()?.state)
    }

    pub fn progress(&self) -> Result<u8> {
        Ok(self.shared.lock_transport()?.progress)
    }

    /// Playback position of the current run, paused time excluded.
    pub fn elapsed(&self) -> Result<Duration> {
        Ok(self.shared.lock_transport()?.clock.elapsed())
    }

    /// True while a scheduling thread is alive, including the short gap
    /// between two loop passes.
    pub fn is_active(&self) -> Result<bool> {
        Ok(self.shared.lock_transport()?.active)
    }

    /// Receives every notification published from now on.
    pub fn subscribe(&self) -> Result<Receiver<Notification>> {
        let (sender, receiver) = channel();
        self.shared
            .subscribers
            .lock()
            .map_err(|_| ShowlineError::msg("subscriber list has been poisoned"))?
            .push(sender);
        Ok(receiver)
    }

    /// Starts playback on a background thread and returns immediately.
    ///
    /// After [`Timeline::stop`] the previous thread may still be winding down;
    /// until it exits `run` fails with [`ShowlineError::InvalidTransition`].
    /// Call [`Timeline::join`] first to restart without a gap.
    pub fn run(&self) -> Result<()> {
        let mut worker = self.lock_worker()?;
        {
            let mut transport = self.shared.lock_transport()?;
            if !transport.state.is_at_rest() {
                return Err(ShowlineError::AlreadyRunning);
            }
            if transport.active {
                return Err(ShowlineError::InvalidTransition {
                    action: "run",
                    state: transport.state,
                });
            }
            transport.active = true;
            transport.state = PlaybackState::Running;
            transport.clock = PlaybackClock::start();
            transport.progress = 0;
            self.shared.stop_requested.store(false, Ordering::SeqCst);
        }
        self.shared
            .notify(Notification::StateChanged(PlaybackState::Running));

        if let Some(finished) = worker.take() {
            let _ = finished.join();
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("showline-scheduler".to_string())
            .spawn(move || shared.run_forever());

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                {
                    let mut transport = self.shared.lock_transport()?;
                    transport.active = false;
                    transport.state = PlaybackState::Stopped;
                }
                self.shared
                    .notify(Notification::StateChanged(PlaybackState::Stopped));
                Err(err.into())
            }
        }
    }

    /// Closes the pause gate. Only valid while running.
    pub fn pause(&self) -> Result<()> {
        {
            let mut transport = self.shared.lock_transport()?;
            if transport.state != PlaybackState::Running {
                return Err(ShowlineError::InvalidTransition {
                    action: "pause",
                    state: transport.state,
                });
            }
            transport.state = PlaybackState::Paused;
            transport.clock.pause();
        }
        self.shared
            .notify(Notification::StateChanged(PlaybackState::Paused));
        self.shared.log("Timeline paused".to_string());
        Ok(())
    }

    /// Reopens the pause gate. Elapsed time continues from where it was
    /// paused. Only valid while paused.
    pub fn resume(&self) -> Result<()> {
        {
            let mut transport = self.shared.lock_transport()?;
            if transport.state != PlaybackState::Paused {
                return Err(ShowlineError::InvalidTransition {
                    action: "resume",
                    state: transport.state,
                });
            }
            transport.state = PlaybackState::Running;
            transport.clock.resume();
        }
        self.shared.resumed.notify_all();
        self.shared
            .notify(Notification::StateChanged(PlaybackState::Running));
        self.shared.log("Timeline resumed".to_string());
        Ok(())
    }

    /// Requests the end of playback.
    ///
    /// Cancellation is cooperative: the scheduling thread notices the request
    /// at its next poll or interpolation tick, so one more message may leave
    /// within that interval. Use [`Timeline::join`] to wait for the thread.
    pub fn stop(&self) -> Result<()> {
        self.shared.request_stop()?;
        self.shared.log("Timeline stopped".to_string());
        Ok(())
    }

    /// Blocks until the scheduling thread, if any, has exited.
    pub fn join(&self) -> Result<()> {
        let handle = self.lock_worker()?.take();
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| ShowlineError::msg("scheduler thread panicked")),
            None => Ok(()),
        }
    }

    /// Stops playback and discards every event, the id counter, the name and
    /// the network target.
    pub fn reset(&self) -> Result<()> {
        if self.is_active()? {
            self.shared.request_stop()?;
        }
        self.join()?;

        {
            let mut library = self.shared.lock_library()?;
            library.events.clear();
            library.last_id = 0;
            library.name = DEFAULT_NAME.to_string();
            library.ip = DEFAULT_IP.to_string();
            library.port = DEFAULT_PORT;
            library.sink = Arc::new(OscUdpSink::new(DEFAULT_IP, DEFAULT_PORT));
        }
        {
            let mut transport = self.shared.lock_transport()?;
            transport.state = PlaybackState::Idle;
            transport.clock.reset();
            transport.progress = 0;
            self.shared.stop_requested.store(false, Ordering::SeqCst);
        }
        self.shared
            .notify(Notification::StateChanged(PlaybackState::Idle));
        self.shared.notify(Notification::Progress(0));
        Ok(())
    }

    fn lock_worker(&self) -> Result<MutexGuard<'_, Option<JoinHandle<()>>>> {
        self.worker
            .lock()
            .map_err(|_| ShowlineError::msg("scheduler handle has been poisoned"))
    }
}

impl Drop for Timeline {
    fn drop(&mut self) {
        let Ok(mut worker) = self.worker.lock() else {
            return;
        };
        if let Some(handle) = worker.take() {
            // The flag must be raised under the transport lock or a paused
            // scheduler can miss the wakeup.
            if self.shared.request_stop().is_err() {
                self.shared.stop_requested.store(true, Ordering::SeqCst);
                self.shared.resumed.notify_all();
            }
            let _ = handle.join();
        }
    }
}

impl fmt::Debug for Timeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeline")
            .field("name", &self.name().ok())
            .field("state", &self.state().ok())
            .field("events", &self.len().ok())
            .finish()
    }
}

impl Shared {
    fn lock_library(&self) -> Result<MutexGuard<'_, Library>> {
        self.library
            .lock()
            .map_err(|_| ShowlineError::msg("event library has been poisoned"))
    }

    fn lock_transport(&self) -> Result<MutexGuard<'_, Transport>> {
        self.transport
            .lock()
            .map_err(|_| ShowlineError::msg("playback transport has been poisoned"))
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn notify(&self, notification: Notification) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|subscriber| subscriber.send(notification.clone()).is_ok());
        }
    }

    fn log(&self, message: String) {
        tracing::info!("{message}");
        self.notify(Notification::Log(message));
    }

    fn request_stop(&self) -> Result<()> {
        {
            let mut transport = self.lock_transport()?;
            self.stop_requested.store(true, Ordering::SeqCst);
            transport.state = PlaybackState::Stopped;
            transport.clock.pause();
        }
        self.resumed.notify_all();
        self.notify(Notification::StateChanged(PlaybackState::Stopped));
        Ok(())
    }

    /// Body of the scheduling thread. Looping timelines are played as
    /// repeated full passes, each restarting from time zero.
    fn run_forever(&self) {
        let _release = RunGuard(self);
        let mut first_pass = true;
        loop {
            let outcome = match self.play_pass(first_pass) {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!(%err, "scheduler aborted");
                    PassOutcome::Stopped
                }
            };
            first_pass = false;

            let again = outcome == PassOutcome::Completed
                && self.looping.load(Ordering::SeqCst)
                && !self.stop_requested();

            let delay = match self.finish_pass() {
                Ok(delay) => delay,
                Err(err) => {
                    tracing::error!(%err, "scheduler could not record the end of a pass");
                    return;
                }
            };
            if !again {
                return;
            }

            thread::sleep(delay);
            if self.stop_requested() {
                return;
            }
        }
    }

    /// Marks the pass as stopped and returns the delay before the next one.
    fn finish_pass(&self) -> Result<Duration> {
        let delay = {
            let mut transport = self.lock_transport()?;
            transport.state = PlaybackState::Stopped;
            transport.clock.pause();
            transport.playback.loop_restart_delay()
        };
        self.notify(Notification::StateChanged(PlaybackState::Stopped));
        Ok(delay)
    }

    fn play_pass(&self, first_pass: bool) -> Result<PassOutcome> {
        let mut events: Vec<Event> = self
            .lock_library()?
            .events
            .values()
            .cloned()
            .collect();
        // Stable: events sharing a time keep id order.
        events.sort_by(|a, b| a.time().total_cmp(&b.time()));
        let max_time = max_time(events.iter());

        let playback = {
            let mut transport = self.lock_transport()?;
            if self.stop_requested() {
                return Ok(PassOutcome::Stopped);
            }
            if !first_pass {
                transport.state = PlaybackState::Running;
                transport.clock = PlaybackClock::start();
            }
            transport.progress = 0;
            transport.playback
        };
        if !first_pass {
            self.notify(Notification::StateChanged(PlaybackState::Running));
        }
        self.notify(Notification::Progress(0));
        self.log("Timeline started".to_string());

        let options = EmitOptions {
            tick: playback.tick_interval(),
            cancel: Some(&self.stop_requested),
        };

        for event in &events {
            let Some(elapsed) = self.wait_until(event.time(), playback.poll_interval())? else {
                return Ok(PassOutcome::Stopped);
            };

            if let Err(err) = event.trigger_with(&options) {
                tracing::warn!(address = event.address(), %err, "event failed");
                self.log(format!(
                    "Event at {}s on {} failed: {err}",
                    event.time(),
                    event.address()
                ));
            }
            if self.stop_requested() {
                return Ok(PassOutcome::Stopped);
            }

            // 100 is reserved for passes that reach their end.
            let progress = if max_time > 0.0 {
                ((elapsed / max_time * 100.0).floor() as u8).min(99)
            } else {
                99
            };
            self.set_progress(progress)?;
        }

        if self.stop_requested() {
            return Ok(PassOutcome::Stopped);
        }
        self.set_progress(100)?;
        Ok(PassOutcome::Completed)
    }

    /// Waits until the clock reaches `target` seconds. Returns the elapsed
    /// time at that point, or `None` if a stop was requested meanwhile.
    fn wait_until(&self, target: f64, poll: Duration) -> Result<Option<f64>> {
        loop {
            if self.stop_requested() {
                return Ok(None);
            }

            let elapsed = {
                let mut transport = self.lock_transport()?;
                while transport.state == PlaybackState::Paused && !self.stop_requested() {
                    transport = self
                        .resumed
                        .wait(transport)
                        .map_err(|_| ShowlineError::msg("playback transport has been poisoned"))?;
                }
                if self.stop_requested() {
                    return Ok(None);
                }
                transport.clock.elapsed().as_secs_f64()
            };

            let remaining = target - elapsed;
            if remaining <= 0.0 {
                return Ok(Some(elapsed));
            }
            thread::sleep(poll.min(Duration::from_secs_f64(remaining)));
        }
    }

    fn set_progress(&self, progress: u8) -> Result<()> {
        self.lock_transport()?.progress = progress;
        self.notify(Notification::Progress(progress));
        Ok(())
    }
}

/// Releases the run guard when the scheduling thread exits, panics included.
struct RunGuard<'a>(&'a Shared);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let interrupted = {
            let mut transport = self
                .0
                .transport
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            transport.active = false;
            let interrupted = !transport.state.is_at_rest();
            if interrupted {
                transport.state = PlaybackState::Stopped;
                transport.clock.pause();
            }
            interrupted
        };
        if interrupted {
            self.0
                .notify(Notification::StateChanged(PlaybackState::Stopped));
        }
    }
}

fn max_time<'a>(events: impl Iterator<Item = &'a Event>) -> f64 {
    events.map(Event::time).fold(0.0, f64::max)
}
