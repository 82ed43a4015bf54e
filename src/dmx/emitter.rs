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

//! The periodic frame emitter. Every tick copies the universe out of the arbiter and
//! sends it, whether or not anything changed since the previous tick.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tracing::{debug, error, info, span, Level};

use super::{
    artnet::{self, SequenceCounter},
    thread_priority,
    transport::Transport,
};
use crate::{arbiter::Arbiter, lighting::model::UNIVERSE_SIZE, playsync::CancelHandle};

/// Transport failures after the first are only logged every this many.
const FAILURE_LOG_INTERVAL: u64 = 100;

/// Frame counters shared with the engine.
#[derive(Debug, Default)]
pub struct EmitterStats {
    frames: AtomicU64,
    failures: AtomicU64,
}

impl EmitterStats {
    /// The number of ticks so far, sent or not.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// The number of frames the transport failed to send.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Wraps universe snapshots in Art-Net and hands them to the transport.
pub struct Emitter {
    transport: Box<dyn Transport>,
    universe: u16,
    sequence: SequenceCounter,
    stats: Arc<EmitterStats>,
}

impl Emitter {
    pub fn new(transport: Box<dyn Transport>, universe: u16) -> Emitter {
        Emitter {
            transport,
            universe,
            sequence: SequenceCounter::new(),
            stats: Arc::new(EmitterStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<EmitterStats> {
        self.stats.clone()
    }

    /// Sends one frame. A failed send drops the frame. The sequence number advances anyway.
    pub fn emit(&mut self, data: &[u8; UNIVERSE_SIZE]) {
        let sequence = self.sequence.next();
        let frame = artnet::frame(sequence, self.universe, data);
        self.stats.frames.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.transport.send(&frame) {
            let failures = self.stats.failures.fetch_add(1, Ordering::Relaxed) + 1;
            if failures == 1 || failures % FAILURE_LOG_INTERVAL == 0 {
                error!(err = %e, failures, "Unable to send Art-Net frame.");
            }
        }
    }

    /// Starts the emitter thread. It ticks every `period` until cancelled.
    pub fn start(
        mut self,
        arbiter: Arc<Arbiter>,
        period: Duration,
        cancel_handle: CancelHandle,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            let span = span!(Level::INFO, "emitter", universe = self.universe);
            let _enter = span.enter();

            thread_priority::raise_emitter_priority();
            info!(period = ?period, "Emitter started.");

            let started = Instant::now();
            let mut next = started;
            while !cancel_handle.is_cancelled() {
                let data = arbiter.snapshot_at(started.elapsed());
                self.emit(&data);

                next = next_tick(next, period, Instant::now());
                let now = Instant::now();
                if next > now {
                    spin_sleep::sleep(next - now);
                }
            }
            debug!(frames = self.stats.frames(), "Emitter stopped.");
        })
    }
}

/// Schedules the tick after `last`. Ticks stay on a fixed grid, except after a stall of
/// more than a period, which restarts the grid from `now` instead of bursting to catch up.
fn next_tick(last: Instant, period: Duration, now: Instant) -> Instant {
    let next = last + period;
    if now > next + period {
        now
    } else {
        next
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        dmx::transport::MockTransport,
        lighting::{
            color::Color,
            model::FixtureModel,
            types::{ChannelMode, Group},
        },
        testutil::eventually,
    };

    #[test]
    fn test_next_tick() {
        let start = Instant::now();
        let period = Duration::from_millis(40);
        // On time or a little late: stay on the grid.
        assert_eq!(start + period, next_tick(start, period, start));
        assert_eq!(
            start + period,
            next_tick(start, period, start + Duration::from_millis(70))
        );
        // A long stall: restart from now.
        let late = start + Duration::from_millis(500);
        assert_eq!(late, next_tick(start, period, late));
    }

    #[test]
    fn test_failures_do_not_stop_sequence() {
        let transport = MockTransport::new();
        let mut emitter = Emitter::new(Box::new(transport.clone()), 0);
        let data = [0u8; UNIVERSE_SIZE];

        emitter.emit(&data);
        transport.set_should_fail(true);
        emitter.emit(&data);
        emitter.emit(&data);
        transport.set_should_fail(false);
        emitter.emit(&data);

        let frames = transport.frames();
        assert_eq!(2, frames.len());
        assert_eq!(1, frames[0][12]);
        assert_eq!(4, frames[1][12]);
        assert_eq!(4, emitter.stats().frames());
        assert_eq!(2, emitter.stats().failures());
    }

    #[test]
    fn test_emitter_thread() {
        let mut model = FixtureModel::new();
        model
            .patch(Group::Face, Default::default())
            .expect("patch");
        model.set_color(Group::Face.into(), Color::RED);
        let arbiter = Arc::new(Arbiter::new(model));

        let transport = MockTransport::new();
        let emitter = Emitter::new(Box::new(transport.clone()), 1);
        let stats = emitter.stats();
        let cancel_handle = CancelHandle::new();
        let join = emitter.start(arbiter, Duration::from_millis(5), cancel_handle.clone());

        // Frames keep coming while nothing changes, and failures don't stop them.
        eventually(|| transport.frame_count() >= 3, "No frames emitted");
        transport.set_should_fail(true);
        let failed_at = stats.frames();
        eventually(|| stats.frames() >= failed_at + 3, "Emitter stopped on failure");
        transport.set_should_fail(false);
        let sent = transport.frame_count();
        eventually(|| transport.frame_count() > sent, "Emitter did not recover");

        cancel_handle.cancel();
        join.join().unwrap();

        let frame = transport.last_frame().unwrap();
        assert_eq!(artnet::FRAME_SIZE, frame.len());
        assert_eq!([1, 0], frame[14..16]);
        assert_eq!(255, frame[18]);
        assert!(stats.failures() >= 3);
    }

    #[test]
    fn test_emitter_blinks_strobe_without_channel() {
        let mut model = FixtureModel::new();
        model
            .patch(Group::Face, ChannelMode::Four)
            .expect("patch");
        model.set_color(Group::Face.into(), Color::WHITE);
        model.set_level(Group::Face.into(), 100);
        model.set_strobe(Group::Face.into(), 100);
        let arbiter = Arc::new(Arbiter::new(model));

        let transport = MockTransport::new();
        let emitter = Emitter::new(Box::new(transport.clone()), 0);
        let cancel_handle = CancelHandle::new();
        let join = emitter.start(arbiter, Duration::from_millis(10), cancel_handle.clone());

        let red_channel = |frame: &Vec<u8>| frame[18];
        eventually(
            || {
                let frames = transport.frames();
                frames.iter().any(|frame| red_channel(frame) == 255)
                    && frames.iter().any(|frame| red_channel(frame) == 0)
            },
            "Strobe did not blink",
        );

        cancel_handle.cancel();
        join.join().unwrap();
        // The dimmer channel holds while the colour blinks.
        assert!(transport.frames().iter().all(|frame| frame[21] == 255));
    }
}
