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

//! Sequences of time-positioned clips and the scheduler that plays them back.
//!
//! Evaluation is pure: the writes for a position only depend on the sequence and the
//! position, so seeking re-evaluates instead of replaying the skipped clips.

use std::{f64::consts::PI, fmt, mem, time::Duration};

use serde::Deserialize;
use tracing::{debug, info};

use super::{
    color::Color,
    error::TimelineError,
    types::{Members, Target},
};
use crate::arbiter::Write;

/// The slowest and fastest playback rates.
pub const MIN_RATE: f64 = 0.05;
pub const MAX_RATE: f64 = 16.0;

/// How far ahead of its neighbour each member of a wave runs.
const WAVE_MEMBER_OFFSET: Duration = Duration::from_millis(150);

/// How a clip moves between its keyframes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    #[default]
    Linear,
    /// Holds each keyframe until the next one.
    Step,
}

/// A colour and level at a fractional position (0.0-1.0) of a clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipKeyframe {
    pub at: f64,
    pub color: Color,
    pub level: u8,
}

impl ClipKeyframe {
    pub fn new(at: f64, color: Color, level: u8) -> ClipKeyframe {
        ClipKeyframe {
            at: if at.is_finite() { at.clamp(0.0, 1.0) } else { 0.0 },
            color,
            level: level.min(100),
        }
    }
}

/// Effects layered on top of a clip's colour and level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipEffect {
    /// Drives the projectors' own strobe channel.
    Strobe { speed: u8 },
    /// Alternates between the clip's level and darkness.
    Flash { speed: u8 },
    /// Breathes the level with a sine envelope.
    Pulse { speed: u8 },
    /// A pulse that runs across the members of the target, each a little ahead of the last.
    Wave { speed: u8 },
}

impl ClipEffect {
    /// Full on/off period of a flash, from 0 (slow) to 100 (fast).
    fn flash_period(speed: u8) -> Duration {
        let factor = (10 - u64::from(speed.min(100)) / 12).max(1);
        Duration::from_millis(factor * 80)
    }

    fn pulse_period(speed: u8) -> Duration {
        Duration::from_millis(200 + (100 - u64::from(speed.min(100))) * 18)
    }

    /// Scales a level for the given time into the clip and position of the member within
    /// the clip's target.
    fn scale_level(&self, level: u8, elapsed: Duration, member: usize) -> u8 {
        match *self {
            ClipEffect::Strobe { .. } => level,
            ClipEffect::Flash { speed } => {
                let period = ClipEffect::flash_period(speed).as_millis();
                if elapsed.as_millis() % period < period / 2 {
                    level
                } else {
                    0
                }
            }
            ClipEffect::Pulse { speed } => sine_scaled(level, elapsed, speed),
            ClipEffect::Wave { speed } => {
                let offset = WAVE_MEMBER_OFFSET * u32::try_from(member).unwrap_or(u32::MAX);
                sine_scaled(level, elapsed + offset, speed)
            }
        }
    }
}

fn sine_scaled(level: u8, elapsed: Duration, speed: u8) -> u8 {
    let period = ClipEffect::pulse_period(speed).as_secs_f64();
    let phase = (elapsed.as_secs_f64() / period * 2.0 * PI).sin() * 0.5 + 0.5;
    (f64::from(level) * phase).round() as u8
}

impl fmt::Display for ClipEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClipEffect::Strobe { speed } => write!(f, "strobe({})", speed),
            ClipEffect::Flash { speed } => write!(f, "flash({})", speed),
            ClipEffect::Pulse { speed } => write!(f, "pulse({})", speed),
            ClipEffect::Wave { speed } => write!(f, "wave({})", speed),
        }
    }
}

/// A time-positioned lighting change.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub start: Duration,
    pub duration: Duration,
    /// Keyframes sorted by position.
    keyframes: Vec<ClipKeyframe>,
    pub interpolation: Interpolation,
    /// Overrides the track scope.
    pub scope: Option<Target>,
    pub fade_in: Duration,
    pub fade_out: Duration,
    pub effect: Option<ClipEffect>,
    /// Second colour of a bicolour clip, taken by every other member of the target.
    pub color2: Option<Color>,
}

impl Clip {
    pub fn new(start: Duration, duration: Duration, mut keyframes: Vec<ClipKeyframe>) -> Clip {
        keyframes.sort_by(|a, b| a.at.total_cmp(&b.at));
        Clip {
            start,
            duration,
            keyframes,
            interpolation: Interpolation::default(),
            scope: None,
            fade_in: Duration::ZERO,
            fade_out: Duration::ZERO,
            effect: None,
            color2: None,
        }
    }

    /// A clip holding one colour at one level.
    pub fn solid(start: Duration, duration: Duration, color: Color, level: u8) -> Clip {
        Clip::new(start, duration, vec![ClipKeyframe::new(0.0, color, level)])
    }

    pub fn with_scope(mut self, scope: impl Into<Target>) -> Clip {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Clip {
        self.interpolation = interpolation;
        self
    }

    pub fn with_fades(mut self, fade_in: Duration, fade_out: Duration) -> Clip {
        self.fade_in = fade_in;
        self.fade_out = fade_out;
        self
    }

    pub fn with_effect(mut self, effect: ClipEffect) -> Clip {
        self.effect = Some(effect);
        self
    }

    pub fn with_color2(mut self, color2: Color) -> Clip {
        self.color2 = Some(color2);
        self
    }

    pub fn keyframes(&self) -> &[ClipKeyframe] {
        &self.keyframes
    }

    /// The end of the clip, exclusive.
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }

    pub fn contains(&self, position: Duration) -> bool {
        self.start <= position && position < self.end()
    }

    /// The colour and level of the clip at an absolute position for one member of its
    /// target, counted in address order, or None outside the clip.
    pub fn sample_member(&self, position: Duration, member: usize) -> Option<(Color, u8)> {
        if !self.contains(position) {
            return None;
        }
        let elapsed = position - self.start;
        let fraction = elapsed.as_secs_f64() / self.duration.as_secs_f64();

        let (color, level) = self.interpolate(fraction)?;
        let color = match self.color2 {
            Some(color2) if member % 2 == 1 => color2,
            _ => color,
        };
        let mut level = (f64::from(level) * self.envelope(elapsed)).round() as u8;
        if let Some(effect) = self.effect {
            level = effect.scale_level(level, elapsed, member);
        }
        Some((color, level))
    }

    /// Returns true if the members of the clip's target can differ from each other.
    pub fn per_member(&self) -> bool {
        self.color2.is_some() || matches!(self.effect, Some(ClipEffect::Wave { .. }))
    }

    fn interpolate(&self, fraction: f64) -> Option<(Color, u8)> {
        let first = self.keyframes.first()?;
        // The last keyframe at or before the fraction.
        let previous = match self.keyframes.iter().rposition(|k| k.at <= fraction) {
            Some(index) => index,
            None => return Some((first.color, first.level)),
        };
        let from = &self.keyframes[previous];
        let to = match (self.interpolation, self.keyframes.get(previous + 1)) {
            (Interpolation::Linear, Some(to)) => to,
            _ => return Some((from.color, from.level)),
        };

        let t = (fraction - from.at) / (to.at - from.at);
        let level = f64::from(from.level) + (f64::from(to.level) - f64::from(from.level)) * t;
        Some((from.color.lerp(&to.color, t), level.round() as u8))
    }

    /// The fade envelope, 0.0-1.0.
    fn envelope(&self, elapsed: Duration) -> f64 {
        let mut envelope: f64 = 1.0;
        if !self.fade_in.is_zero() {
            envelope = envelope.min(elapsed.as_secs_f64() / self.fade_in.as_secs_f64());
        }
        if !self.fade_out.is_zero() {
            let remaining = self.duration.saturating_sub(elapsed);
            envelope = envelope.min(remaining.as_secs_f64() / self.fade_out.as_secs_f64());
        }
        envelope.clamp(0.0, 1.0)
    }
}

/// An ordered list of clips with a default scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub name: String,
    pub scope: Option<Target>,
    pub clips: Vec<Clip>,
}

impl Track {
    pub fn new(name: impl Into<String>, scope: Option<Target>, clips: Vec<Clip>) -> Track {
        Track {
            name: name.into(),
            scope,
            clips,
        }
    }
}

/// A named show segment made of tracks.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    pub name: String,
    /// The declared total duration. Defaults to the end of the last clip.
    pub duration: Option<Duration>,
    pub tracks: Vec<Track>,
}

impl Sequence {
    pub fn new(name: impl Into<String>, duration: Option<Duration>, tracks: Vec<Track>) -> Sequence {
        Sequence {
            name: name.into(),
            duration,
            tracks,
        }
    }

    /// The total duration of the sequence.
    pub fn total(&self) -> Duration {
        self.duration.unwrap_or_else(|| {
            self.tracks
                .iter()
                .flat_map(|track| track.clips.iter())
                .map(Clip::end)
                .max()
                .unwrap_or_default()
        })
    }

    /// The writes the sequence implies at the given position.
    ///
    /// Every projector starts black at level 0. Active clips are then applied in declaration
    /// order, and only the last write of each kind per target is kept, so later tracks win
    /// over earlier ones and later clips win within a track. Bicolour and wave clips write
    /// each member of their target separately, as resolved by `members`.
    pub fn evaluate(&self, position: Duration, members: &Members) -> Vec<Write> {
        let mut writes = vec![
            Write::Color {
                target: Target::All,
                color: Color::BLACK,
            },
            Write::Level {
                target: Target::All,
                level: 0,
            },
            Write::Strobe {
                target: Target::All,
                speed: 0,
            },
        ];

        for track in self.tracks.iter() {
            for clip in track.clips.iter() {
                if !clip.contains(position) {
                    continue;
                }
                let scope = clip.scope.or(track.scope).unwrap_or(Target::All);
                let mut targets: Vec<Target> = Vec::new();
                if clip.per_member() {
                    targets.extend(members.resolve(scope).into_iter().map(Target::Projector));
                }
                if targets.is_empty() {
                    targets.push(scope);
                }

                for (member, target) in targets.into_iter().enumerate() {
                    let Some((color, level)) = clip.sample_member(position, member) else {
                        continue;
                    };
                    push_last(&mut writes, Write::Color { target, color });
                    push_last(&mut writes, Write::Level { target, level });
                    if let Some(ClipEffect::Strobe { speed }) = clip.effect {
                        push_last(&mut writes, Write::Strobe { target, speed });
                    }
                }
            }
        }
        writes
    }
}

/// Appends a write, dropping any earlier write of the same kind to the same target.
fn push_last(writes: &mut Vec<Write>, write: Write) {
    writes.retain(|existing| {
        mem::discriminant(existing) != mem::discriminant(&write)
            || existing.target() != write.target()
    });
    writes.push(write);
}

/// The playback state of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}

/// The result of advancing a scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub position: Duration,
    pub writes: Vec<Write>,
    /// Set once, on the tick that reaches the end of a sequence without a loop.
    pub finished: bool,
}

/// Plays a sequence back against elapsed time.
pub struct Scheduler {
    sequence: Sequence,
    total: Duration,
    position: Duration,
    rate: f64,
    state: PlaybackState,
    loop_window: Option<(Duration, Duration)>,
    members: Members,
}

impl Scheduler {
    pub fn new(sequence: Sequence) -> Scheduler {
        let total = sequence.total();
        Scheduler {
            sequence,
            total,
            position: Duration::ZERO,
            rate: 1.0,
            state: PlaybackState::Idle,
            loop_window: None,
            members: Members::default(),
        }
    }

    /// Sets the rig that bicolour and wave clips are spread over.
    pub fn set_members(&mut self, members: Members) {
        self.members = members;
    }

    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn position(&self) -> Duration {
        self.position
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Starts playback. An idle scheduler restarts from the beginning.
    pub fn play(&mut self) -> Vec<Write> {
        if self.state == PlaybackState::Idle {
            self.position = Duration::ZERO;
        }
        self.state = PlaybackState::Playing;
        info!(sequence = %self.sequence.name, total = ?self.total, "Timeline playing.");
        self.evaluate()
    }

    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
            debug!(position = ?self.position, "Timeline paused.");
        }
    }

    pub fn resume(&mut self) {
        if self.state == PlaybackState::Paused {
            self.state = PlaybackState::Playing;
            debug!(position = ?self.position, "Timeline resumed.");
        }
    }

    /// Jumps to a position, clamped to the sequence, and returns the writes at that position.
    pub fn seek(&mut self, position: Duration) -> Vec<Write> {
        self.position = position.min(self.total);
        debug!(position = ?self.position, "Timeline seek.");
        self.evaluate()
    }

    /// Sets the playback rate, clamped to the supported range. Non-finite rates are ignored.
    pub fn set_rate(&mut self, rate: f64) -> bool {
        if !rate.is_finite() {
            return false;
        }
        self.rate = rate.clamp(MIN_RATE, MAX_RATE);
        true
    }

    /// Sets or clears the loop window. The window is clamped to the sequence.
    pub fn set_loop(&mut self, window: Option<(Duration, Duration)>) -> Result<(), TimelineError> {
        self.loop_window = match window {
            Some((start, end)) => {
                let (start, end) = (start.min(self.total), end.min(self.total));
                if start >= end {
                    return Err(TimelineError::InvalidLoop {
                        start_ms: start.as_millis(),
                        end_ms: end.as_millis(),
                    });
                }
                Some((start, end))
            }
            None => None,
        };
        Ok(())
    }

    /// Moves the play position forward by `elapsed` scaled by the rate.
    pub fn advance(&mut self, elapsed: Duration) -> Tick {
        if self.state != PlaybackState::Playing {
            return Tick {
                position: self.position,
                writes: Vec::new(),
                finished: false,
            };
        }

        let mut position = self.position + elapsed.mul_f64(self.rate);
        let mut finished = false;
        match self.loop_window {
            Some((start, end)) if position >= end => {
                let length = (end - start).as_nanos();
                let offset = (position.saturating_sub(start)).as_nanos() % length;
                position = start + Duration::from_nanos(offset as u64);
            }
            _ if position >= self.total => {
                position = self.total;
                finished = true;
                self.state = PlaybackState::Idle;
                info!(sequence = %self.sequence.name, "Timeline finished.");
            }
            _ => {}
        }

        self.position = position;
        Tick {
            position,
            writes: self.sequence.evaluate(position, &self.members),
            finished,
        }
    }

    /// The writes at the current position.
    pub fn evaluate(&self) -> Vec<Write> {
        self.sequence.evaluate(self.position, &self.members)
    }
}
