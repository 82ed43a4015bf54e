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

//! Turns analysed audio features into fixture writes.
//!
//! Features arrive on their own cadence. The adapter only keeps the latest one, so a
//! slow or bursty analyser never holds up the frame emitter.

use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{
    arbiter::Write,
    lighting::{color::Color, palette::ColorPalette, types::Group},
};

/// The number of samples in the running average used for beat detection.
const BEAT_WINDOW: usize = 40;

/// A beat is a level this much above the running average.
const BEAT_RATIO: f64 = 1.4;

/// Quiet passages never produce beats below this level.
const BEAT_FLOOR: f64 = 0.25;

/// The minimum time between two beats.
const BEAT_SPACING: Duration = Duration::from_millis(300);

/// Strong beats flash the rig white above this level.
const FLASH_LEVEL: f64 = 0.75;

/// How long a flash lasts.
const FLASH_DURATION: Duration = Duration::from_millis(150);

/// The highest hue a spectrum mapping uses, so the top band doesn't wrap back to red.
const SPECTRUM_MAX_HUE: f64 = 300.0;

/// One analysed audio sample. Values are 0.0-1.0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Feature {
    pub level: f64,
    pub bands: Vec<f64>,
}

impl Feature {
    /// Creates a feature. Values are clamped and non-finite values count as silence.
    pub fn new(level: f64, bands: Vec<f64>) -> Feature {
        Feature {
            level: sanitize(level),
            bands: bands.into_iter().map(sanitize).collect(),
        }
    }

    /// The index of the loudest band.
    pub fn dominant_band(&self) -> Option<usize> {
        self.bands
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(index, _)| index)
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// How features drive the fixtures.
#[derive(Debug, Clone, PartialEq)]
pub enum Mapping {
    /// The level drives the brightness of a fixed colour.
    Energy { groups: Vec<Group>, color: Color },
    /// The loudest band picks the hue and the level drives the brightness.
    Spectrum { groups: Vec<Group> },
    /// A beat-synchronised show: white face light, back and side lights rotating
    /// through a palette on every beat, and a white flash on strong beats.
    Scene {
        palette: ColorPalette,
        caps: HashMap<Group, u8>,
    },
}

impl Mapping {
    /// A scene around a dominant colour, with the default caps.
    pub fn scene(dominant: Color) -> Mapping {
        Mapping::Scene {
            palette: ColorPalette::generated("scene", dominant),
            caps: HashMap::from([(Group::Face, 50)]),
        }
    }
}

impl Default for Mapping {
    fn default() -> Self {
        Mapping::Energy {
            groups: Group::ALL.to_vec(),
            color: Color::WHITE,
        }
    }
}

/// Detects beats on a live level stream.
#[derive(Debug, Default)]
pub struct BeatTracker {
    history: VecDeque<f64>,
    last_beat: Option<Instant>,
    beats: u64,
}

impl BeatTracker {
    pub fn new() -> BeatTracker {
        BeatTracker::default()
    }

    /// Records a level. Returns true if it is a beat.
    pub fn observe(&mut self, level: f64, at: Instant) -> bool {
        if self.history.len() == BEAT_WINDOW {
            self.history.pop_front();
        }
        self.history.push_back(level);
        let average = self.history.iter().sum::<f64>() / self.history.len() as f64;

        let spaced = self
            .last_beat
            .map_or(true, |last| at.saturating_duration_since(last) >= BEAT_SPACING);
        if spaced && level > (average * BEAT_RATIO).max(BEAT_FLOOR) {
            self.last_beat = Some(at);
            self.beats += 1;
            return true;
        }
        false
    }

    /// The number of beats seen so far.
    pub fn beats(&self) -> u64 {
        self.beats
    }
}

/// Holds the latest feature and renders it through a mapping.
pub struct AudioAdapter {
    mapping: Mapping,
    tracker: BeatTracker,
    latest: Option<Feature>,
    flash_until: Option<Instant>,
    contre_color: usize,
    lat_color: usize,
}

impl AudioAdapter {
    pub fn new(mapping: Mapping) -> AudioAdapter {
        AudioAdapter {
            mapping,
            tracker: BeatTracker::new(),
            latest: None,
            flash_until: None,
            contre_color: 0,
            lat_color: 0,
        }
    }

    pub fn set_mapping(&mut self, mapping: Mapping) {
        self.mapping = mapping;
    }

    /// Takes a feature arriving now.
    pub fn ingest(&mut self, feature: Feature) -> Vec<Write> {
        self.ingest_at(feature, Instant::now())
    }

    /// Takes a feature arriving at the given time and renders it.
    pub fn ingest_at(&mut self, feature: Feature, at: Instant) -> Vec<Write> {
        if self.tracker.observe(feature.level, at) {
            self.on_beat(feature.level, at);
        }
        self.latest = Some(feature);
        self.render_at(at)
    }

    fn on_beat(&mut self, level: f64, at: Instant) {
        let beat = self.tracker.beats();
        debug!(beat, level, "Beat.");

        let Mapping::Scene { palette, .. } = &self.mapping else {
            return;
        };
        if palette.is_empty() {
            return;
        }
        self.contre_color = (beat as usize) % palette.len();
        // Every fourth beat the sides take a neighbouring colour.
        self.lat_color = if beat % 4 == 0 {
            (self.contre_color + 2) % palette.len()
        } else {
            self.contre_color
        };
        if beat % 4 == 0 && level > FLASH_LEVEL {
            self.flash_until = Some(at + FLASH_DURATION);
        }
    }

    /// Renders the held feature now.
    pub fn render(&self) -> Vec<Write> {
        self.render_at(Instant::now())
    }

    /// Renders the held feature. Nothing is rendered before the first feature arrives.
    pub fn render_at(&self, at: Instant) -> Vec<Write> {
        let Some(feature) = &self.latest else {
            return Vec::new();
        };
        let energy = feature.level;

        match &self.mapping {
            Mapping::Energy { groups, color } => {
                group_writes(groups.iter().map(|g| (*g, *color, percent(energy))))
            }
            Mapping::Spectrum { groups } => {
                let hue = match (feature.dominant_band(), feature.bands.len()) {
                    (Some(band), count) if count > 1 => {
                        band as f64 / (count - 1) as f64 * SPECTRUM_MAX_HUE
                    }
                    _ => 0.0,
                };
                let color = Color::from_hsv(hue, 1.0, 1.0);
                group_writes(groups.iter().map(|g| (*g, color, percent(energy))))
            }
            Mapping::Scene { palette, caps } => {
                let flashing = self.flash_until.is_some_and(|until| at < until);
                let cap = |group: Group| f64::from(caps.get(&group).copied().unwrap_or(100)) / 100.0;
                let level = |group: Group, base: f64, scale: f64| {
                    let level = if flashing { 100.0 } else { base + energy * scale };
                    (level * cap(group)).clamp(0.0, 100.0) as u8
                };
                let color = |index: usize| {
                    if flashing {
                        Color::WHITE
                    } else {
                        palette.cycle(index).unwrap_or(Color::WHITE)
                    }
                };

                group_writes([
                    (Group::Face, Color::WHITE, level(Group::Face, 60.0, 20.0)),
                    (Group::Contre, color(self.contre_color), level(Group::Contre, 65.0, 25.0)),
                    (Group::Lat, color(self.lat_color), level(Group::Lat, 65.0, 25.0)),
                    (Group::Douche1, Color::BLACK, 0),
                    (Group::Douche2, Color::BLACK, 0),
                    (Group::Douche3, Color::BLACK, 0),
                ])
            }
        }
    }
}

fn percent(value: f64) -> u8 {
    (value * 100.0).round() as u8
}

fn group_writes(groups: impl IntoIterator<Item = (Group, Color, u8)>) -> Vec<Write> {
    groups
        .into_iter()
        .flat_map(|(group, color, level)| {
            [
                Write::Color {
                    target: group.into(),
                    color,
                },
                Write::Level {
                    target: group.into(),
                    level,
                },
            ]
        })
        .collect()
}
