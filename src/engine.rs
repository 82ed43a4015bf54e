// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The lighting control engine.
//!
//! Every producer (surface, simulator, timeline, audio, keyframes) turns its input into
//! intents and enqueues them. A single dispatcher thread drains the queue into the
//! arbiter, so writes are applied one batch at a time in arrival order. The emitter runs
//! on its own thread and only takes the arbiter lock to copy the universe.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, span, warn, Level};

use crate::{
    arbiter::{Arbiter, Intent, Lease, Mode, Rejected, Source, Write},
    audio::{AudioAdapter, Feature, Mapping},
    dmx::{
        emitter::{Emitter, EmitterStats},
        transport::{Transport, TransportError},
    },
    lighting::{
        error::{PatchError, TimelineError},
        keyframe::{Keyframe, KeyframeBank},
        model::{FixtureModel, UNIVERSE_SIZE},
        timeline::{Scheduler, Sequence},
        types::ProjectorState,
    },
    playsync::CancelHandle,
};

/// The default emitter period, 25 frames per second.
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(40);

/// The default timeline producer period.
pub const DEFAULT_TIMELINE_TICK: Duration = Duration::from_millis(10);

/// Undelivered events beyond this many are dropped.
const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error(transparent)]
    Timeline(#[from] TimelineError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("no keyframe at index {0}")]
    UnknownKeyframe(usize),
    #[error("the engine has stopped")]
    Stopped,
}

/// Notifications for presentation layers and the playlist.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    ModeChanged(Mode),
    TimelineFinished { sequence: String },
    WriteRejected { source: Source, reason: Rejected },
}

/// Tunables for the engine threads.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// The emitter period.
    pub period: Duration,
    /// The Art-Net universe.
    pub universe: u16,
    /// How often the timeline producer advances.
    pub timeline_tick: Duration,
    pub mapping: Mapping,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            period: DEFAULT_PERIOD,
            universe: 0,
            timeline_tick: DEFAULT_TIMELINE_TICK,
            mapping: Mapping::default(),
        }
    }
}

enum Command {
    Apply(Intent),
    /// Acknowledged once everything enqueued before it has been applied.
    Flush(Sender<()>),
    Shutdown,
}

/// A running timeline producer thread.
struct Producer {
    cancel_handle: CancelHandle,
    join: JoinHandle<()>,
}

impl Producer {
    fn stop(self) {
        self.cancel_handle.cancel();
        if self.join.join().is_err() {
            error!("Timeline producer panicked.");
        }
    }
}

#[derive(Default)]
struct Control {
    scheduler: Option<Arc<Mutex<Scheduler>>>,
    producer: Option<Producer>,
}

pub struct Engine {
    arbiter: Arc<Arbiter>,
    settings: EngineSettings,
    commands: Sender<Command>,
    events_tx: Sender<EngineEvent>,
    events_rx: Receiver<EngineEvent>,
    control: Mutex<Control>,
    adapter: Mutex<AudioAdapter>,
    keyframes: Mutex<KeyframeBank>,
    emitter_stats: Arc<EmitterStats>,
    emitter_cancel: CancelHandle,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Starts the dispatcher and emitter threads. The engine starts in manual mode.
    pub fn new(
        model: FixtureModel,
        transport: Box<dyn Transport>,
        settings: EngineSettings,
    ) -> Engine {
        let arbiter = Arc::new(Arbiter::new(model));
        let (commands, commands_rx) = crossbeam_channel::unbounded();
        let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_BUFFER);

        let dispatcher = {
            let arbiter = arbiter.clone();
            let events_tx = events_tx.clone();
            thread::spawn(move || Engine::dispatch(arbiter, commands_rx, events_tx))
        };

        let emitter = Emitter::new(transport, settings.universe);
        let emitter_stats = emitter.stats();
        let emitter_cancel = CancelHandle::new();
        let emitter = emitter.start(arbiter.clone(), settings.period, emitter_cancel.clone());

        info!(
            projectors = arbiter.projection().len(),
            period = ?settings.period,
            universe = settings.universe,
            "Engine started."
        );

        Engine {
            arbiter,
            adapter: Mutex::new(AudioAdapter::new(settings.mapping.clone())),
            settings,
            commands,
            events_tx,
            events_rx,
            control: Mutex::new(Control::default()),
            keyframes: Mutex::new(KeyframeBank::new()),
            emitter_stats,
            emitter_cancel,
            threads: Mutex::new(vec![dispatcher, emitter]),
        }
    }

    /// Applies queued intents in order until shut down.
    fn dispatch(
        arbiter: Arc<Arbiter>,
        commands: Receiver<Command>,
        events: Sender<EngineEvent>,
    ) {
        let span = span!(Level::INFO, "dispatcher");
        let _enter = span.enter();

        for command in commands.iter() {
            match command {
                Command::Apply(intent) => match arbiter.apply(&intent) {
                    Ok(updates) => debug!(source = %intent.source, updates, "Intent applied."),
                    Err(reason) => {
                        let _ = events.try_send(EngineEvent::WriteRejected {
                            source: intent.source,
                            reason,
                        });
                    }
                },
                Command::Flush(ack) => {
                    let _ = ack.send(());
                }
                Command::Shutdown => break,
            }
        }
        debug!("Dispatcher stopped.");
    }

    fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands.send(command).map_err(|_| EngineError::Stopped)
    }

    fn notify(&self, event: EngineEvent) {
        if self.events_tx.try_send(event).is_err() {
            debug!("Event buffer full, dropping event.");
        }
    }

    /// Enqueues an intent. It is applied if its lease is still current when dequeued.
    pub fn submit(&self, intent: Intent) -> Result<(), EngineError> {
        self.send(Command::Apply(intent))
    }

    /// Enqueues writes from a source under its current lease. Writes from a source whose
    /// mode is inactive are rejected and reported.
    pub fn write(&self, source: Source, writes: Vec<Write>) -> Result<(), EngineError> {
        let lease = self
            .arbiter
            .lease(source)
            .unwrap_or_else(|| self.arbiter.current());
        self.submit(Intent::new(source, lease, writes))
    }

    /// Blocks until every intent enqueued so far has been applied or rejected.
    pub fn sync(&self) -> Result<(), EngineError> {
        let (ack, done) = crossbeam_channel::bounded(1);
        self.send(Command::Flush(ack))?;
        done.recv().map_err(|_| EngineError::Stopped)
    }

    pub fn mode(&self) -> Mode {
        self.arbiter.mode()
    }

    /// Switches the active mode.
    ///
    /// A running timeline producer is stopped and joined before the switch. Entering
    /// audio-reactive mode renders the last received feature straight away, and entering
    /// timeline playback starts the loaded sequence.
    pub fn select_mode(&self, mode: Mode) -> Result<Lease, EngineError> {
        let mut control = self.control.lock();
        if let Some(producer) = control.producer.take() {
            producer.stop();
        }

        let lease = self.arbiter.switch_mode(mode);
        self.notify(EngineEvent::ModeChanged(mode));

        match mode {
            Mode::AudioReactive => {
                let writes = self.adapter.lock().render();
                if !writes.is_empty() {
                    self.submit(Intent::new(Source::Audio, lease, writes))?;
                }
            }
            Mode::TimelinePlayback => match &control.scheduler {
                Some(scheduler) => {
                    control.producer = Some(self.start_producer(scheduler.clone(), lease)?);
                }
                None => warn!("Timeline playback selected with no sequence loaded."),
            },
            Mode::Manual | Mode::Programmed => {}
        }
        Ok(lease)
    }

    /// Loads a sequence and plays it from the start in timeline playback mode.
    pub fn play_timeline(&self, sequence: Sequence) -> Result<Lease, EngineError> {
        {
            let mut control = self.control.lock();
            if let Some(producer) = control.producer.take() {
                producer.stop();
            }
            control.scheduler = Some(Arc::new(Mutex::new(Scheduler::new(sequence))));
        }
        self.select_mode(Mode::TimelinePlayback)
    }

    /// Starts playback and the thread that advances it.
    fn start_producer(
        &self,
        scheduler: Arc<Mutex<Scheduler>>,
        lease: Lease,
    ) -> Result<Producer, EngineError> {
        let members = self.arbiter.with_model(|model| model.members());
        let (writes, name) = {
            let mut scheduler = scheduler.lock();
            scheduler.set_members(members);
            (scheduler.play(), scheduler.sequence().name.clone())
        };
        self.submit(Intent::new(Source::Timeline, lease, writes))?;

        let cancel_handle = CancelHandle::new();
        let commands = self.commands.clone();
        let events = self.events_tx.clone();
        let tick = self.settings.timeline_tick;

        let join = {
            let cancel_handle = cancel_handle.clone();
            thread::spawn(move || {
                let span = span!(Level::INFO, "timeline");
                let _enter = span.enter();

                let submit = |writes: Vec<Write>| {
                    commands
                        .send(Command::Apply(Intent::new(Source::Timeline, lease, writes)))
                        .is_ok()
                };

                let mut last = Instant::now();
                while !cancel_handle.wait_timeout(tick) {
                    let now = Instant::now();
                    let result = scheduler.lock().advance(now - last);
                    last = now;

                    if !result.writes.is_empty() && !submit(result.writes) {
                        return;
                    }
                    if result.finished {
                        let _ = events.try_send(EngineEvent::TimelineFinished { sequence: name });
                        return;
                    }
                }
            })
        };

        Ok(Producer {
            cancel_handle,
            join,
        })
    }

    fn with_scheduler<R>(&self, f: impl FnOnce(&mut Scheduler) -> R) -> Option<R> {
        let scheduler = self.control.lock().scheduler.clone()?;
        let mut scheduler = scheduler.lock();
        Some(f(&mut scheduler))
    }

    /// Moves the timeline to a position. The fixtures are updated straight away when the
    /// timeline is playing back. Returns false if no sequence is loaded.
    pub fn seek(&self, position: Duration) -> Result<bool, EngineError> {
        let Some(writes) = self.with_scheduler(|scheduler| scheduler.seek(position)) else {
            return Ok(false);
        };
        if let Some(lease) = self.arbiter.lease(Source::Timeline) {
            self.submit(Intent::new(Source::Timeline, lease, writes))?;
        }
        Ok(true)
    }

    pub fn pause(&self) -> bool {
        self.with_scheduler(Scheduler::pause).is_some()
    }

    pub fn resume(&self) -> bool {
        self.with_scheduler(Scheduler::resume).is_some()
    }

    /// Sets the playback rate. Returns false if no sequence is loaded or the rate is not finite.
    pub fn set_rate(&self, rate: f64) -> bool {
        self.with_scheduler(|scheduler| scheduler.set_rate(rate))
            .unwrap_or(false)
    }

    /// Sets or clears the timeline loop window.
    pub fn set_loop(&self, window: Option<(Duration, Duration)>) -> Result<(), EngineError> {
        match self.with_scheduler(|scheduler| scheduler.set_loop(window)) {
            Some(result) => Ok(result?),
            None => Err(TimelineError::NoSequence.into()),
        }
    }

    /// The timeline position, if a sequence is loaded.
    pub fn position(&self) -> Option<Duration> {
        self.with_scheduler(|scheduler| scheduler.position())
    }

    /// Takes an audio feature. It only produces writes while audio-reactive mode is active,
    /// but is always kept so that activating the mode can render it.
    pub fn ingest_feature(&self, feature: Feature) -> Result<(), EngineError> {
        let writes = self.adapter.lock().ingest(feature);
        match self.arbiter.lease(Source::Audio) {
            Some(lease) if !writes.is_empty() => {
                self.submit(Intent::new(Source::Audio, lease, writes))
            }
            _ => Ok(()),
        }
    }

    pub fn set_mapping(&self, mapping: Mapping) {
        self.adapter.lock().set_mapping(mapping);
    }

    /// Records the current state of every projector. Returns the keyframe index.
    pub fn capture_keyframe(&self) -> Result<usize, EngineError> {
        self.sync()?;
        let index = self
            .keyframes
            .lock()
            .push(Keyframe::new(self.arbiter.projection()));
        info!(index, "Keyframe captured.");
        Ok(index)
    }

    /// Restores a keyframe. Only applied in programmed mode.
    pub fn recall_keyframe(&self, index: usize) -> Result<(), EngineError> {
        let writes = self
            .keyframes
            .lock()
            .get(index)
            .map(Keyframe::writes)
            .ok_or(EngineError::UnknownKeyframe(index))?;
        self.write(Source::Programmed, writes)
    }

    pub fn keyframe_count(&self) -> usize {
        self.keyframes.lock().len()
    }

    /// The universe as the emitter would send it now.
    pub fn snapshot(&self) -> [u8; UNIVERSE_SIZE] {
        self.arbiter.snapshot()
    }

    pub fn projection(&self) -> Vec<ProjectorState> {
        self.arbiter.projection()
    }

    /// Gives direct access to the fixture model for patching.
    pub fn with_model<R>(&self, f: impl FnOnce(&mut FixtureModel) -> R) -> R {
        self.arbiter.with_model(f)
    }

    /// The number of intents rejected by the arbiter.
    pub fn rejected(&self) -> u64 {
        self.arbiter.rejected()
    }

    pub fn emitter_stats(&self) -> Arc<EmitterStats> {
        self.emitter_stats.clone()
    }

    /// The engine event stream.
    pub fn events(&self) -> Receiver<EngineEvent> {
        self.events_rx.clone()
    }

    /// Stops every engine thread. Pending intents are applied first.
    pub fn shutdown(&self) {
        if let Some(producer) = self.control.lock().producer.take() {
            producer.stop();
        }
        self.emitter_cancel.cancel();
        let _ = self.commands.send(Command::Shutdown);

        for join in self.threads.lock().drain(..) {
            if join.join().is_err() {
                error!("Engine thread panicked.");
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        dmx::transport::MockTransport,
        lighting::{
            color::Color,
            timeline::{Clip, ClipKeyframe, Track},
            types::{ChannelMode, Group, Target},
        },
        testutil::eventually,
    };

    fn settings() -> EngineSettings {
        EngineSettings {
            period: Duration::from_millis(5),
            timeline_tick: Duration::from_millis(2),
            ..Default::default()
        }
    }

    fn engine(model: FixtureModel) -> (Engine, MockTransport) {
        let transport = MockTransport::new();
        let engine = Engine::new(model, Box::new(transport.clone()), settings());
        (engine, transport)
    }

    fn six_groups() -> FixtureModel {
        let mut model = FixtureModel::new();
        for group in Group::ALL {
            model.patch(group, ChannelMode::Five).unwrap();
        }
        model
    }

    fn color_of(engine: &Engine, group: Group) -> Color {
        engine
            .projection()
            .iter()
            .find(|p| p.group == group)
            .unwrap()
            .color
    }

    fn lat_fade() -> Sequence {
        Sequence::new(
            "lat fade",
            None,
            vec![Track::new(
                "lat",
                Some(Group::Lat.into()),
                vec![Clip::new(
                    Duration::ZERO,
                    Duration::from_millis(1000),
                    vec![
                        ClipKeyframe::new(0.0, Color::BLACK, 100),
                        ClipKeyframe::new(1.0, Color::WHITE, 100),
                    ],
                )],
            )],
        )
    }

    #[test]
    fn test_red_face_end_to_end() {
        let (engine, transport) = engine(six_groups());
        let addresses: Vec<u16> = engine
            .with_model(|model| model.projectors().iter().map(|p| p.address).collect());
        assert_eq!(vec![1, 11, 21, 31, 41, 51], addresses);

        engine
            .write(
                Source::Surface,
                vec![Write::Level {
                    target: Target::All,
                    level: 100,
                }],
            )
            .unwrap();
        engine.sync().unwrap();
        let before = engine.snapshot();

        engine
            .write(
                Source::Simulator,
                vec![Write::Color {
                    target: Group::Face.into(),
                    color: Color::RED,
                }],
            )
            .unwrap();
        engine.sync().unwrap();
        let after = engine.snapshot();
        assert_eq!([255, 0, 0, 255, 0], after[0..5]);
        assert_eq!(before[5..], after[5..]);

        // The emitter picks it up on its next tick.
        eventually(
            || transport.last_frame().is_some_and(|frame| frame[18..23] == [255, 0, 0, 255, 0]),
            "Red face never emitted",
        );
    }

    #[test]
    fn test_audio_ignored_in_manual_mode() {
        let (engine, _) = engine(FixtureModel::reference_rig().unwrap());
        let before = engine.snapshot();

        engine.ingest_feature(Feature::new(0.8, vec![])).unwrap();
        engine.sync().unwrap();
        assert_eq!(before, engine.snapshot());
        assert_eq!(Mode::Manual, engine.mode());

        // Activation renders the held feature.
        engine.select_mode(Mode::AudioReactive).unwrap();
        engine.sync().unwrap();
        assert_ne!(before, engine.snapshot());
        let level = engine.projection()[0].level;
        assert_eq!(80, level);
    }

    #[test]
    fn test_switched_away_mode_cannot_write() {
        let (engine, _) = engine(FixtureModel::reference_rig().unwrap());
        let events = engine.events();
        let audio = engine.select_mode(Mode::AudioReactive).unwrap();
        engine.select_mode(Mode::Manual).unwrap();
        let manual = engine.snapshot();

        // A producer that still holds the old lease.
        engine
            .submit(Intent::new(
                Source::Audio,
                audio,
                vec![Write::Color {
                    target: Target::All,
                    color: Color::WHITE,
                }],
            ))
            .unwrap();
        engine.sync().unwrap();

        assert_eq!(manual, engine.snapshot());
        assert_eq!(1, engine.rejected());
        let rejected: Vec<EngineEvent> = events
            .try_iter()
            .filter(|event| matches!(event, EngineEvent::WriteRejected { .. }))
            .collect();
        assert_eq!(1, rejected.len());
    }

    #[test]
    fn test_timeline_stops_on_switch() {
        let (engine, _) = engine(FixtureModel::reference_rig().unwrap());
        engine.play_timeline(lat_fade()).unwrap();
        eventually(
            || engine.position().is_some_and(|p| p > Duration::from_millis(50)),
            "Timeline never advanced",
        );

        engine.select_mode(Mode::Manual).unwrap();
        engine.sync().unwrap();
        let stopped = engine.snapshot();
        let position = engine.position().unwrap();

        thread::sleep(Duration::from_millis(50));
        engine.sync().unwrap();
        assert_eq!(stopped, engine.snapshot());
        assert_eq!(position, engine.position().unwrap());
    }

    #[test]
    fn test_bicolor_timeline_uses_patched_rig() {
        let (engine, _) = engine(FixtureModel::reference_rig().unwrap());
        let blue = Color::new(0, 0, 255);
        let clip = Clip::solid(Duration::ZERO, Duration::from_millis(1000), Color::RED, 100)
            .with_color2(blue);
        engine
            .play_timeline(Sequence::new(
                "bicolor",
                None,
                vec![Track::new("contre", Some(Group::Contre.into()), vec![clip])],
            ))
            .unwrap();
        assert!(engine.pause());
        assert!(engine.seek(Duration::from_millis(100)).unwrap());
        engine.sync().unwrap();

        let contre: Vec<Color> = engine
            .projection()
            .iter()
            .filter(|p| p.group == Group::Contre)
            .map(|p| p.color)
            .collect();
        assert_eq!(vec![Color::RED, blue, Color::RED, blue, Color::RED, blue], contre);
    }

    #[test]
    fn test_timeline_seek_and_finish() {
        let (engine, _) = engine(FixtureModel::reference_rig().unwrap());
        let events = engine.events();
        assert!(!engine.seek(Duration::ZERO).unwrap());
        assert!(matches!(
            engine.set_loop(None),
            Err(EngineError::Timeline(TimelineError::NoSequence))
        ));

        engine.play_timeline(lat_fade()).unwrap();
        assert!(engine.pause());
        assert!(engine.seek(Duration::from_millis(999)).unwrap());
        engine.sync().unwrap();
        assert_eq!(Color::WHITE, color_of(&engine, Group::Lat));
        assert_eq!(Color::BLACK, color_of(&engine, Group::Face));

        assert!(engine.resume());
        eventually(
            || {
                events
                    .try_iter()
                    .any(|event| matches!(event, EngineEvent::TimelineFinished { .. }))
            },
            "Timeline never finished",
        );
    }

    #[test]
    fn test_keyframes() {
        let (engine, _) = engine(FixtureModel::reference_rig().unwrap());
        engine
            .write(
                Source::Surface,
                vec![
                    Write::Color {
                        target: Group::Contre.into(),
                        color: Color::RED,
                    },
                    Write::Level {
                        target: Group::Contre.into(),
                        level: 90,
                    },
                ],
            )
            .unwrap();
        let index = engine.capture_keyframe().unwrap();
        let captured = engine.snapshot();

        engine
            .write(
                Source::Surface,
                vec![Write::Color {
                    target: Target::All,
                    color: Color::WHITE,
                }],
            )
            .unwrap();
        engine.sync().unwrap();

        // Recall outside programmed mode is rejected.
        engine.recall_keyframe(index).unwrap();
        engine.sync().unwrap();
        assert_ne!(captured, engine.snapshot());

        engine.select_mode(Mode::Programmed).unwrap();
        engine.recall_keyframe(index).unwrap();
        engine.sync().unwrap();
        assert_eq!(captured, engine.snapshot());

        assert!(matches!(
            engine.recall_keyframe(5),
            Err(EngineError::UnknownKeyframe(5))
        ));
    }

    #[test]
    fn test_emitter_survives_transport_failure() {
        let (engine, transport) = engine(FixtureModel::reference_rig().unwrap());
        let stats = engine.emitter_stats();
        transport.set_should_fail(true);
        eventually(|| stats.failures() >= 5, "Emitter stopped ticking");
        transport.set_should_fail(false);
        let sent = transport.frame_count();
        eventually(|| transport.frame_count() > sent, "Emitter never recovered");
        engine.shutdown();
    }
}
