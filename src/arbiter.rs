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

//! Mode arbitration. Exactly one mode owns fixture writes at a time.
//!
//! Producers ask for a [Lease] and attach it to every [Intent] they submit. Switching
//! modes bumps the epoch under the same lock that guards the fixture model, so an intent
//! built under an old lease can never land once the new mode is active.

use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::lighting::{
    color::Color,
    model::{FixtureModel, UNIVERSE_SIZE},
    types::{Group, ProjectorState, Target},
};

/// The exclusive owner of fixture writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Manual,
    #[serde(alias = "audio")]
    AudioReactive,
    Programmed,
    #[serde(alias = "timeline")]
    TimelinePlayback,
}

impl Mode {
    pub const ALL: [Mode; 4] = [
        Mode::Manual,
        Mode::AudioReactive,
        Mode::Programmed,
        Mode::TimelinePlayback,
    ];
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Manual => "manual",
            Mode::AudioReactive => "audio",
            Mode::Programmed => "programmed",
            Mode::TimelinePlayback => "timeline",
        })
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(Mode::Manual),
            "audio" | "audioreactive" => Ok(Mode::AudioReactive),
            "programmed" => Ok(Mode::Programmed),
            "timeline" | "timelineplayback" => Ok(Mode::TimelinePlayback),
            _ => Err(format!("unknown mode '{}'", s)),
        }
    }
}

/// Where an intent comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// The physical control surface.
    Surface,
    /// The on-screen (or keyboard) simulator of the control surface.
    Simulator,
    Audio,
    Programmed,
    Timeline,
}

impl Source {
    /// The mode this source writes in.
    pub fn mode(&self) -> Mode {
        match self {
            Source::Surface | Source::Simulator => Mode::Manual,
            Source::Audio => Mode::AudioReactive,
            Source::Programmed => Mode::Programmed,
            Source::Timeline => Mode::TimelinePlayback,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Source::Surface => "surface",
            Source::Simulator => "simulator",
            Source::Audio => "audio",
            Source::Programmed => "programmed",
            Source::Timeline => "timeline",
        })
    }
}

/// A single fixture mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Write {
    Color { target: Target, color: Color },
    /// Colours one member of a group, counted in address order.
    MemberColor { group: Group, member: u8, color: Color },
    Level { target: Target, level: u8 },
    Mute { target: Target, muted: bool },
    ToggleMute { target: Target },
    Strobe { target: Target, speed: u8 },
    Blackout(bool),
}

impl Write {
    /// The projectors this write may touch. Blackout is global and has no target.
    pub fn target(&self) -> Option<Target> {
        match *self {
            Write::Color { target, .. }
            | Write::Level { target, .. }
            | Write::Mute { target, .. }
            | Write::ToggleMute { target }
            | Write::Strobe { target, .. } => Some(target),
            Write::MemberColor { group, .. } => Some(Target::Group(group)),
            Write::Blackout(_) => None,
        }
    }

    /// Applies the write. Returns the number of projectors affected.
    pub fn apply(&self, model: &mut FixtureModel) -> usize {
        match *self {
            Write::Color { target, color } => model.set_color(target, color),
            Write::MemberColor {
                group,
                member,
                color,
            } => model.set_member_color(group, usize::from(member), color),
            Write::Level { target, level } => model.set_level(target, level),
            Write::Mute { target, muted } => model.set_mute(target, muted),
            Write::ToggleMute { target } => model.toggle_mute(target),
            Write::Strobe { target, speed } => model.set_strobe(target, speed),
            Write::Blackout(blackout) => {
                model.set_blackout(blackout);
                model.projectors().len()
            }
        }
    }
}

/// Proof that a producer may write in a mode epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub mode: Mode,
    pub epoch: u64,
}

impl fmt::Display for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.mode, self.epoch)
    }
}

/// A batch of writes applied atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub source: Source,
    pub lease: Lease,
    pub writes: Vec<Write>,
}

impl Intent {
    pub fn new(source: Source, lease: Lease, writes: Vec<Write>) -> Intent {
        Intent {
            source,
            lease,
            writes,
        }
    }
}

/// Why an intent was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejected {
    #[error("{writer} does not write in {active} mode")]
    WrongSource { writer: Source, active: Mode },
    #[error("lease {lease} is stale, current lease is {current}")]
    StaleLease { lease: Lease, current: Lease },
}

struct State {
    mode: Mode,
    epoch: u64,
    model: FixtureModel,
}

impl State {
    fn lease(&self) -> Lease {
        Lease {
            mode: self.mode,
            epoch: self.epoch,
        }
    }
}

/// Owns the fixture model and decides which source may write to it.
pub struct Arbiter {
    state: Mutex<State>,
    rejected: AtomicU64,
}

impl Arbiter {
    /// Creates an arbiter in manual mode.
    pub fn new(model: FixtureModel) -> Arbiter {
        Arbiter {
            state: Mutex::new(State {
                mode: Mode::Manual,
                epoch: 0,
                model,
            }),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> Mode {
        self.state.lock().mode
    }

    /// The current lease.
    pub fn current(&self) -> Lease {
        self.state.lock().lease()
    }

    /// Gets a lease for the source if its mode is active.
    pub fn lease(&self, source: Source) -> Option<Lease> {
        let state = self.state.lock();
        (source.mode() == state.mode).then(|| state.lease())
    }

    /// Makes a mode active. Leases handed out before the switch become stale, even when
    /// switching to the mode that was already active. The fixture state is kept.
    pub fn switch_mode(&self, mode: Mode) -> Lease {
        let mut state = self.state.lock();
        let previous = state.mode;
        state.mode = mode;
        state.epoch += 1;
        info!(from = %previous, to = %mode, epoch = state.epoch, "Mode switched.");
        state.lease()
    }

    /// Applies an intent if its lease is current and its source writes in the active mode.
    /// Returns the number of projector updates.
    pub fn apply(&self, intent: &Intent) -> Result<usize, Rejected> {
        let mut state = self.state.lock();
        let current = state.lease();
        let rejected = if intent.source.mode() != state.mode {
            Some(Rejected::WrongSource {
                writer: intent.source,
                active: state.mode,
            })
        } else if intent.lease != current {
            Some(Rejected::StaleLease {
                lease: intent.lease,
                current,
            })
        } else {
            None
        };
        if let Some(rejected) = rejected {
            drop(state);
            self.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(source = %intent.source, err = %rejected, "Write rejected.");
            return Err(rejected);
        }

        Ok(intent
            .writes
            .iter()
            .map(|write| write.apply(&mut state.model))
            .sum())
    }

    /// The number of rejected intents so far.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Copies the universe out of the model.
    pub fn snapshot(&self) -> [u8; UNIVERSE_SIZE] {
        self.state.lock().model.snapshot_all()
    }

    /// Copies the universe out of the model at a point of the emitter clock.
    pub fn snapshot_at(&self, clock: Duration) -> [u8; UNIVERSE_SIZE] {
        self.state.lock().model.snapshot_at(clock)
    }

    /// The read-only projection for presentation layers.
    pub fn projection(&self) -> Vec<ProjectorState> {
        self.state.lock().model.projection()
    }

    /// Gives direct access to the model for patching. Not gated by mode.
    pub fn with_model<R>(&self, f: impl FnOnce(&mut FixtureModel) -> R) -> R {
        f(&mut self.state.lock().model)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn red_face(source: Source, lease: Lease) -> Intent {
        Intent::new(
            source,
            lease,
            vec![
                Write::Color {
                    target: Group::Face.into(),
                    color: Color::RED,
                },
                Write::Level {
                    target: Group::Face.into(),
                    level: 100,
                },
            ],
        )
    }

    #[test]
    fn test_manual_accepts_surface_and_simulator() {
        let arbiter = Arbiter::new(FixtureModel::reference_rig().unwrap());
        assert_eq!(Mode::Manual, arbiter.mode());
        let lease = arbiter.lease(Source::Surface).unwrap();
        assert_eq!(Some(lease), arbiter.lease(Source::Simulator));
        assert_eq!(None, arbiter.lease(Source::Timeline));

        assert_eq!(Ok(8), arbiter.apply(&red_face(Source::Simulator, lease)));
        assert_eq!(Ok(8), arbiter.apply(&red_face(Source::Surface, lease)));
        assert_eq!(255, arbiter.snapshot()[0]);
    }

    #[test]
    fn test_inactive_source_is_rejected() {
        let arbiter = Arbiter::new(FixtureModel::reference_rig().unwrap());
        let before = arbiter.snapshot();
        let lease = arbiter.current();

        assert_eq!(
            Err(Rejected::WrongSource {
                writer: Source::Audio,
                active: Mode::Manual
            }),
            arbiter.apply(&red_face(Source::Audio, lease))
        );
        assert_eq!(1, arbiter.rejected());
        assert_eq!(before, arbiter.snapshot());
    }

    #[test]
    fn test_switch_invalidates_old_leases() {
        let arbiter = Arbiter::new(FixtureModel::reference_rig().unwrap());
        let old = arbiter.switch_mode(Mode::TimelinePlayback);
        let intent = red_face(Source::Timeline, old);

        // Re-entering the same mode still starts a new epoch.
        let new = arbiter.switch_mode(Mode::TimelinePlayback);
        assert_ne!(old, new);
        assert!(matches!(
            arbiter.apply(&intent),
            Err(Rejected::StaleLease { .. })
        ));

        arbiter.switch_mode(Mode::Manual);
        assert!(arbiter
            .apply(&red_face(Source::Timeline, new))
            .is_err());
        assert_eq!(2, arbiter.rejected());
        assert_eq!([0u8; UNIVERSE_SIZE], arbiter.snapshot());
    }

    #[test]
    fn test_switch_keeps_fixture_state() {
        let arbiter = Arbiter::new(FixtureModel::reference_rig().unwrap());
        let lease = arbiter.current();
        arbiter.apply(&red_face(Source::Surface, lease)).unwrap();
        let lit = arbiter.snapshot();

        arbiter.switch_mode(Mode::AudioReactive);
        assert_eq!(lit, arbiter.snapshot());
    }

    #[test]
    fn test_mode_parsing() {
        for mode in Mode::ALL {
            assert_eq!(Ok(mode), mode.to_string().parse());
        }
        assert!("disco".parse::<Mode>().is_err());
    }
}
