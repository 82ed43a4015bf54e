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
use std::{io, sync::Arc, time::Duration};

use tokio::{
    sync::mpsc::{self, Sender},
    task::{JoinError, JoinHandle},
};
use tracing::{debug, error, info, span, Instrument, Level, Span};

use crate::{
    arbiter::{Mode, Source, Write},
    audio::Feature,
    engine::{Engine, EngineError, EngineEvent},
    playlist::{ModeRequest, Playlist},
};

pub mod keyboard;
pub mod midi;
pub mod multi;

/// How often the engine event bridge checks whether the controller has gone away.
const BRIDGE_POLL: Duration = Duration::from_millis(100);

/// Controller events that will trigger behavior in the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Fixture writes from the surface or the simulator.
    Write { source: Source, writes: Vec<Write> },

    /// Switches the active mode.
    SelectMode(Mode),

    /// Captures a keyframe of the current fixture state.
    Capture,

    /// Recalls a captured keyframe.
    Recall(usize),

    /// Moves the timeline.
    Seek(Duration),

    Pause,

    Resume,

    /// Sets the timeline playback rate.
    Rate(f64),

    /// Moves the show to the next entry and applies it.
    Next,

    /// Moves the show to the previous entry and applies it.
    Prev,

    /// An audio analysis frame.
    Feature(Feature),
}

pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>>;
}

/// Drives the engine from control events.
pub struct Controller {
    handle: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller with the given driver. The current show entry, if any, is
    /// applied straight away.
    pub fn new(
        engine: Arc<Engine>,
        playlist: Option<Arc<Playlist>>,
        driver: Arc<dyn Driver>,
    ) -> Controller {
        Controller {
            handle: tokio::spawn(
                Controller::trigger_events(engine, playlist, driver)
                    .instrument(span!(Level::INFO, "controller")),
            ),
        }
    }

    /// Join will block until the controller finishes.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }

    /// Triggers engine behavior by watching the driver and getting events from it.
    async fn trigger_events(
        engine: Arc<Engine>,
        playlist: Option<Arc<Playlist>>,
        driver: Arc<dyn Driver>,
    ) {
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let join_handle = driver.monitor_events(events_tx);
        let (engine_events_tx, mut engine_events_rx) = mpsc::channel(16);
        let bridge = Controller::bridge_engine_events(&engine, engine_events_tx);

        if let Some(playlist) = &playlist {
            info!(show = playlist.name(), entry = %playlist.current_entry(), "Controller started.");
            let request = playlist.current();
            let engine = engine.clone();
            match Controller::blocking(move || Controller::apply(&engine, request)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(err = %e, "Error applying the first show entry."),
                Err(e) => error!(err = %e, "Engine call failed."),
            }
        } else {
            info!("Controller started.");
        }

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    debug!(event = ?event, "Received event.");
                    let (engine, playlist) = (engine.clone(), playlist.clone());
                    let handled = Controller::blocking(move || {
                        Controller::handle(&engine, playlist.as_deref(), event)
                    });
                    match handled.await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!(err = %e, "Error talking to engine."),
                        Err(e) => error!(err = %e, "Engine call failed."),
                    }
                }
                Some(event) = engine_events_rx.recv() => {
                    Controller::report(event);
                }
            }
        }

        info!("Controller closing.");
        drop(engine_events_rx);
        if let Err(e) = join_handle.await {
            error!("Error waiting for event monitor to stop: {}", e);
        }
        if let Err(e) = bridge.await {
            error!("Error waiting for engine event bridge to stop: {}", e);
        }
    }

    /// Runs an engine call on the blocking pool. Engine calls wait on the engine's threads,
    /// so they stay off the async workers.
    async fn blocking<R, F>(f: F) -> Result<R, JoinError>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let span = Span::current();
        tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            f()
        })
        .await
    }

    /// Forwards engine events into the controller until the controller stops listening.
    fn bridge_engine_events(engine: &Engine, events_tx: Sender<EngineEvent>) -> JoinHandle<()> {
        let events = engine.events();
        tokio::task::spawn_blocking(move || {
            while !events_tx.is_closed() {
                match events.recv_timeout(BRIDGE_POLL) {
                    Ok(event) => {
                        if events_tx.blocking_send(event).is_err() {
                            return;
                        }
                    }
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
                }
            }
        })
    }

    fn report(event: EngineEvent) {
        match event {
            EngineEvent::ModeChanged(mode) => info!(%mode, "Mode changed."),
            EngineEvent::TimelineFinished { sequence } => {
                info!(%sequence, "Sequence finished.")
            }
            EngineEvent::WriteRejected { source, reason } => {
                debug!(%source, %reason, "Write rejected.")
            }
        }
    }

    fn handle(engine: &Engine, playlist: Option<&Playlist>, event: Event) -> Result<(), EngineError> {
        match event {
            Event::Write { source, writes } => engine.write(source, writes),
            Event::SelectMode(mode) => engine.select_mode(mode).map(|_| ()),
            Event::Capture => engine.capture_keyframe().map(|_| ()),
            Event::Recall(index) => engine.recall_keyframe(index),
            Event::Seek(position) => {
                if !engine.seek(position)? {
                    info!("No sequence loaded, ignoring seek.");
                }
                Ok(())
            }
            Event::Pause => {
                engine.pause();
                Ok(())
            }
            Event::Resume => {
                engine.resume();
                Ok(())
            }
            Event::Rate(rate) => {
                if !engine.set_rate(rate) {
                    info!(rate, "Unable to set the playback rate.");
                }
                Ok(())
            }
            Event::Next => match playlist {
                Some(playlist) => Controller::apply(engine, playlist.next()),
                None => Ok(()),
            },
            Event::Prev => match playlist {
                Some(playlist) => Controller::apply(engine, playlist.prev()),
                None => Ok(()),
            },
            Event::Feature(feature) => engine.ingest_feature(feature),
        }
    }

    /// Applies a show entry's mode request.
    fn apply(engine: &Engine, request: ModeRequest) -> Result<(), EngineError> {
        match request {
            ModeRequest::Select(mode) => engine.select_mode(mode),
            ModeRequest::Timeline(sequence) => engine.play_timeline(sequence.as_ref().clone()),
            ModeRequest::Hold => engine.select_mode(Mode::Manual),
        }
        .map(|_| ())
    }
}
