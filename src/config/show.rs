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

//! The persisted show format. A show is a name, optional colour palettes and an ordered
//! list of entries tagged by `kind`.

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use serde::Deserialize;

use super::error::ConfigError;
use crate::{
    arbiter::Mode,
    lighting::{
        color::Color,
        palette::ColorPalette,
        timeline::{Clip, ClipEffect, ClipKeyframe, Interpolation, Sequence, Track},
        types::Target,
    },
    playlist::{Entry, Playlist},
};

pub const DEFAULT_VOLUME: u8 = 100;
pub const DEFAULT_CLIP_LEVEL: u8 = 100;

/// A parsed show.
#[derive(Debug)]
pub struct Show {
    pub name: String,
    pub palettes: Vec<ColorPalette>,
    pub entries: Vec<Entry>,
}

impl Show {
    /// Turns the show into a playlist.
    pub fn into_playlist(self) -> Result<Playlist, ConfigError> {
        let name = self.name.clone();
        Playlist::new(self.name, self.entries).ok_or(ConfigError::EmptyShow(name))
    }
}

/// A YAML representation of a show.
#[derive(Deserialize)]
pub(super) struct ShowFile {
    name: String,

    #[serde(default)]
    palettes: HashMap<String, Vec<String>>,

    #[serde(default)]
    entries: Vec<EntryFile>,
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum EntryFile {
    Media {
        path: PathBuf,
        volume: Option<u8>,
        mode: Option<Mode>,
    },
    Pause {
        duration: Option<String>,
    },
    Tempo {
        bpm: u32,
        duration: String,
    },
    Sequence {
        path: PathBuf,
        volume: Option<u8>,
        sequence: SequenceFile,
    },
}

#[derive(Deserialize)]
struct SequenceFile {
    name: String,
    duration_ms: Option<u64>,
    #[serde(default)]
    tracks: Vec<TrackFile>,
}

#[derive(Deserialize)]
struct TrackFile {
    name: String,
    /// "all", a group name or "#<projector id>".
    scope: Option<String>,
    #[serde(default)]
    clips: Vec<ClipFile>,
}

#[derive(Deserialize)]
struct ClipFile {
    start_ms: u64,
    duration_ms: u64,
    /// Shorthand for a single held keyframe.
    color: Option<String>,
    level: Option<u8>,
    keyframes: Option<Vec<KeyframeFile>>,
    interpolation: Option<Interpolation>,
    scope: Option<String>,
    fade_in_ms: Option<u64>,
    fade_out_ms: Option<u64>,
    effect: Option<EffectFile>,
    /// Makes the clip bicolour: every other member of the target takes this colour.
    color2: Option<String>,
}

#[derive(Deserialize)]
struct KeyframeFile {
    at: f64,
    color: String,
    level: Option<u8>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum EffectFile {
    Strobe { speed: u8 },
    Flash { speed: u8 },
    Pulse { speed: u8 },
    Wave { speed: u8 },
}

impl From<&EffectFile> for ClipEffect {
    fn from(effect: &EffectFile) -> ClipEffect {
        match *effect {
            EffectFile::Strobe { speed } => ClipEffect::Strobe { speed },
            EffectFile::Flash { speed } => ClipEffect::Flash { speed },
            EffectFile::Pulse { speed } => ClipEffect::Pulse { speed },
            EffectFile::Wave { speed } => ClipEffect::Wave { speed },
        }
    }
}

/// Resolves colour references against the show's palettes.
struct Resolver {
    palettes: HashMap<String, ColorPalette>,
}

impl Resolver {
    fn new(palettes: &HashMap<String, Vec<String>>) -> Result<Resolver, ConfigError> {
        let mut resolved = HashMap::new();
        for (name, colors) in palettes.iter() {
            let entries = colors
                .iter()
                .map(|color| Ok((color.trim().to_string(), parse_color(color)?)))
                .collect::<Result<Vec<(String, Color)>, ConfigError>>()?;
            resolved.insert(name.clone(), ColorPalette::labelled(name.clone(), entries));
        }
        Ok(Resolver { palettes: resolved })
    }

    /// Parses `#rrggbb`, a colour name or `palette:<name>:<entry>`, where the entry is an
    /// index or the text the colour was written as in the palette.
    fn color(&self, value: &str) -> Result<Color, ConfigError> {
        let Some(reference) = value.trim().strip_prefix("palette:") else {
            return parse_color(value);
        };

        let (name, entry) = reference.split_once(':').ok_or_else(|| ConfigError::Color {
            value: value.to_string(),
            reason: "expected palette:<name>:<entry>".to_string(),
        })?;
        let palette = self
            .palettes
            .get(name)
            .ok_or_else(|| ConfigError::UnknownPalette(name.to_string()))?;
        match entry.parse::<usize>() {
            Ok(index) => palette.get(index).ok_or_else(|| ConfigError::PaletteIndex {
                palette: name.to_string(),
                index,
            }),
            Err(_) => palette.find(entry).ok_or_else(|| ConfigError::PaletteEntry {
                palette: name.to_string(),
                entry: entry.to_string(),
            }),
        }
    }

    fn sequence(&self, sequence: &SequenceFile) -> Result<Sequence, ConfigError> {
        let tracks = sequence
            .tracks
            .iter()
            .map(|track| {
                let clips = track
                    .clips
                    .iter()
                    .map(|clip| self.clip(clip))
                    .collect::<Result<Vec<Clip>, ConfigError>>()?;
                Ok(Track::new(
                    track.name.clone(),
                    parse_scope(track.scope.as_deref())?,
                    clips,
                ))
            })
            .collect::<Result<Vec<Track>, ConfigError>>()?;

        Ok(Sequence::new(
            sequence.name.clone(),
            sequence.duration_ms.map(Duration::from_millis),
            tracks,
        ))
    }

    fn clip(&self, clip: &ClipFile) -> Result<Clip, ConfigError> {
        let keyframes = match (&clip.keyframes, &clip.color) {
            (Some(keyframes), _) => keyframes
                .iter()
                .map(|keyframe| {
                    Ok(ClipKeyframe::new(
                        keyframe.at,
                        self.color(&keyframe.color)?,
                        keyframe.level.unwrap_or(DEFAULT_CLIP_LEVEL),
                    ))
                })
                .collect::<Result<Vec<ClipKeyframe>, ConfigError>>()?,
            (None, Some(color)) => vec![ClipKeyframe::new(
                0.0,
                self.color(color)?,
                clip.level.unwrap_or(DEFAULT_CLIP_LEVEL),
            )],
            (None, None) => vec![],
        };

        let mut built = Clip::new(
            Duration::from_millis(clip.start_ms),
            Duration::from_millis(clip.duration_ms),
            keyframes,
        )
        .with_interpolation(clip.interpolation.unwrap_or_default())
        .with_fades(
            Duration::from_millis(clip.fade_in_ms.unwrap_or(0)),
            Duration::from_millis(clip.fade_out_ms.unwrap_or(0)),
        );
        if let Some(scope) = parse_scope(clip.scope.as_deref())? {
            built = built.with_scope(scope);
        }
        if let Some(effect) = &clip.effect {
            built = built.with_effect(effect.into());
        }
        if let Some(color2) = &clip.color2 {
            built = built.with_color2(self.color(color2)?);
        }
        Ok(built)
    }
}

fn parse_color(value: &str) -> Result<Color, ConfigError> {
    value.parse().map_err(|reason| ConfigError::Color {
        value: value.to_string(),
        reason,
    })
}

fn parse_scope(scope: Option<&str>) -> Result<Option<Target>, ConfigError> {
    scope
        .map(|value| {
            value.parse().map_err(|reason| ConfigError::Target {
                value: value.to_string(),
                reason,
            })
        })
        .transpose()
}

fn check_volume(index: usize, volume: Option<u8>) -> Result<u8, ConfigError> {
    match volume.unwrap_or(DEFAULT_VOLUME) {
        volume if volume <= 100 => Ok(volume),
        volume => Err(ConfigError::Entry {
            index,
            reason: format!("volume {} is above 100", volume),
        }),
    }
}

impl ShowFile {
    /// Validates the show and resolves its colours and durations.
    pub(super) fn into_show(self) -> Result<Show, ConfigError> {
        if self.entries.is_empty() {
            return Err(ConfigError::EmptyShow(self.name));
        }
        let resolver = Resolver::new(&self.palettes)?;

        let entries = self
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                Ok(match entry {
                    EntryFile::Media { path, volume, mode } => Entry::Media {
                        path: path.clone(),
                        volume: check_volume(index, *volume)?,
                        mode: mode.unwrap_or_default(),
                    },
                    EntryFile::Pause { duration } => Entry::Pause {
                        duration: duration
                            .as_ref()
                            .map(|d| super::engine::parse_duration(Some(d), Duration::ZERO))
                            .transpose()?,
                    },
                    EntryFile::Tempo { bpm, duration } => {
                        if *bpm == 0 {
                            return Err(ConfigError::Entry {
                                index,
                                reason: "tempo of 0 bpm".to_string(),
                            });
                        }
                        Entry::Tempo {
                            bpm: *bpm,
                            duration: super::engine::parse_duration(
                                Some(duration),
                                Duration::ZERO,
                            )?,
                        }
                    }
                    EntryFile::Sequence {
                        path,
                        volume,
                        sequence,
                    } => Entry::Sequence {
                        path: path.clone(),
                        volume: check_volume(index, *volume)?,
                        sequence: Arc::new(resolver.sequence(sequence)?),
                    },
                })
            })
            .collect::<Result<Vec<Entry>, ConfigError>>()?;

        let mut palettes: Vec<ColorPalette> = resolver.palettes.into_values().collect();
        palettes.sort_by(|a, b| a.name().cmp(b.name()));

        Ok(Show {
            name: self.name,
            palettes,
            entries,
        })
    }
}
