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
use std::{collections::HashMap, net::SocketAddr, path::PathBuf, time::Duration};

use duration_string::DurationString;
use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::{
    audio::Mapping,
    controller::midi::Layout,
    engine::{EngineSettings, DEFAULT_PERIOD, DEFAULT_TIMELINE_TICK},
    lighting::{
        color::Color,
        model::FixtureModel,
        palette::ColorPalette,
        types::{ChannelMode, Group},
    },
};

pub const DEFAULT_ARTNET_DESTINATION: &str = "2.0.0.15:6454";
pub const DEFAULT_ARTNET_UNIVERSE: u16 = 0;

/// A YAML representation of the engine configuration.
#[derive(Deserialize, Clone, Default)]
pub struct EngineConfig {
    /// The Art-Net output.
    artnet: Option<ArtNet>,

    /// Explicit fixtures. The reference rig is patched when absent.
    patch: Option<Vec<PatchEntry>>,

    /// How often the timeline advances, e.g. "10ms".
    timeline_tick: Option<String>,

    surface: Option<Surface>,

    audio: Option<Audio>,
}

impl EngineConfig {
    pub fn artnet(&self) -> ArtNet {
        self.artnet.clone().unwrap_or_default()
    }

    pub fn surface(&self) -> Surface {
        self.surface.clone().unwrap_or_default()
    }

    /// Gets the patch entries. These are the reference rig if none are configured.
    pub fn patch_entries(&self) -> Vec<PatchEntry> {
        match &self.patch {
            Some(patch) => patch.clone(),
            None => FixtureModel::reference_rig()
                .map(|model| {
                    model
                        .projectors()
                        .iter()
                        .map(|p| PatchEntry::new(p.group, Some(p.mode), Some(p.address)))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Builds the fixture model. Entries without an address are auto-patched.
    pub fn model(&self) -> Result<FixtureModel, ConfigError> {
        let Some(patch) = &self.patch else {
            return Ok(FixtureModel::reference_rig()?);
        };

        let mut model = FixtureModel::new();
        for entry in patch.iter() {
            match entry.address {
                Some(address) => model.patch_at(entry.group, entry.mode(), address)?,
                None => model.patch(entry.group, entry.mode())?,
            };
        }
        Ok(model)
    }

    /// Gets the timeline tick.
    pub fn timeline_tick(&self) -> Result<Duration, ConfigError> {
        parse_duration(self.timeline_tick.as_ref(), DEFAULT_TIMELINE_TICK)
    }

    /// Builds the engine settings.
    pub fn settings(&self) -> Result<EngineSettings, ConfigError> {
        let artnet = self.artnet();
        Ok(EngineSettings {
            period: artnet.period()?,
            universe: artnet.universe(),
            timeline_tick: self.timeline_tick()?,
            mapping: self.audio.clone().unwrap_or_default().mapping(),
        })
    }
}

/// A YAML representation of the Art-Net output.
#[derive(Deserialize, Clone, Default)]
pub struct ArtNet {
    /// The destination address and port.
    destination: Option<String>,

    universe: Option<u16>,

    /// The frame period, e.g. "40ms".
    period: Option<String>,

    /// Allows broadcast destinations.
    broadcast: Option<bool>,
}

impl ArtNet {
    /// Gets the destination.
    pub fn destination(&self) -> Result<SocketAddr, ConfigError> {
        let value = self
            .destination
            .as_deref()
            .unwrap_or(DEFAULT_ARTNET_DESTINATION);
        value.parse().map_err(|source| ConfigError::Destination {
            value: value.to_string(),
            source,
        })
    }

    pub fn universe(&self) -> u16 {
        self.universe.unwrap_or(DEFAULT_ARTNET_UNIVERSE)
    }

    /// Gets the frame period.
    pub fn period(&self) -> Result<Duration, ConfigError> {
        parse_duration(self.period.as_ref(), DEFAULT_PERIOD)
    }

    pub fn broadcast(&self) -> bool {
        self.broadcast.unwrap_or(false)
    }
}

/// One patched fixture.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct PatchEntry {
    group: Group,

    /// The channel mode, 5 channels if absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<ChannelMode>,

    /// The 1-based start address. The next free slot if absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<u16>,
}

impl PatchEntry {
    pub fn new(group: Group, mode: Option<ChannelMode>, address: Option<u16>) -> PatchEntry {
        PatchEntry {
            group,
            mode,
            address,
        }
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode.unwrap_or_default()
    }
}

/// A YAML representation of the control surface.
#[derive(Deserialize, Clone, Default)]
pub struct Surface {
    /// A raw MIDI device, e.g. /dev/snd/midiC1D0.
    device: Option<PathBuf>,

    /// The groups driven by each fader.
    faders: Option<Vec<Vec<Group>>>,

    /// The pad colour for each grid row, top to bottom.
    pad_colors: Option<Vec<Color>>,
    /// Colour pairs of the bicolour pad column, one per row.
    pad_bicolors: Option<Vec<(Color, Color)>>,
}

impl Surface {
    pub fn device(&self) -> Option<PathBuf> {
        self.device.clone()
    }

    /// Builds the surface layout, falling back to the defaults for anything unset.
    pub fn layout(&self) -> Layout {
        let default = Layout::default();
        Layout {
            fader_groups: self.faders.clone().unwrap_or(default.fader_groups),
            palette: self
                .pad_colors
                .clone()
                .map(|colors| ColorPalette::new("pads", colors))
                .unwrap_or(default.palette),
            bicolors: self.pad_bicolors.clone().unwrap_or(default.bicolors),
        }
    }
}

/// How audio features drive the fixtures.
#[derive(Deserialize, Clone, Default, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MappingKind {
    #[default]
    Energy,
    Spectrum,
    Scene,
}

/// A YAML representation of the audio mapping.
#[derive(Deserialize, Clone, Default)]
pub struct Audio {
    mapping: Option<MappingKind>,

    /// The groups driven by energy and spectrum mappings.
    groups: Option<Vec<Group>>,

    /// The colour of the energy mapping.
    color: Option<Color>,

    /// The dominant colour of the scene palette.
    dominant: Option<Color>,

    /// Level caps per group for the scene mapping.
    caps: Option<HashMap<Group, u8>>,
}

impl Audio {
    pub fn mapping(&self) -> Mapping {
        let groups = self.groups.clone().unwrap_or_else(|| Group::ALL.to_vec());
        match self.mapping.clone().unwrap_or_default() {
            MappingKind::Energy => Mapping::Energy {
                groups,
                color: self.color.unwrap_or(Color::WHITE),
            },
            MappingKind::Spectrum => Mapping::Spectrum { groups },
            MappingKind::Scene => {
                let mut mapping = Mapping::scene(self.dominant.unwrap_or(Color::RED));
                if let (Mapping::Scene { caps, .. }, Some(configured)) =
                    (&mut mapping, &self.caps)
                {
                    caps.extend(configured.iter().map(|(group, cap)| (*group, (*cap).min(100))));
                }
                mapping
            }
        }
    }
}

pub(super) fn parse_duration(
    value: Option<&String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    value.map_or(Ok(default), |duration| {
        Ok(DurationString::from_string(duration.clone())
            .map_err(|source| ConfigError::Duration {
                value: duration.clone(),
                source,
            })?
            .into())
    })
}

#[cfg(test)]
mod test {
    use config::{Config, File, FileFormat};

    use super::*;

    fn parse(yaml: &str) -> EngineConfig {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse("{}");
        let artnet = config.artnet();
        assert_eq!(
            "2.0.0.15:6454".parse::<SocketAddr>().unwrap(),
            artnet.destination().unwrap()
        );
        assert_eq!(0, artnet.universe());
        assert!(!artnet.broadcast());

        let settings = config.settings().unwrap();
        assert_eq!(Duration::from_millis(40), settings.period);
        assert_eq!(Duration::from_millis(10), settings.timeline_tick);
        assert_eq!(Mapping::default(), settings.mapping);

        let model = config.model().unwrap();
        assert_eq!(
            FixtureModel::reference_rig().unwrap().projection(),
            model.projection()
        );
        assert_eq!(model.projectors().len(), config.patch_entries().len());
    }

    #[test]
    fn test_explicit_config() {
        let config = parse(
            r##"
artnet:
  destination: 192.168.1.255:6454
  universe: 3
  period: 25ms
  broadcast: true
timeline_tick: 5ms
patch:
  - group: face
    mode: 3
  - group: douche2
    address: 100
  - group: lat
surface:
  faders:
    - [face, lat]
  pad_colors: ["#00ff00", "blue"]
  pad_bicolors:
    - [red, "#00ff00"]
audio:
  mapping: scene
  dominant: "#0000ff"
  caps:
    contre: 40
"##,
        );

        let artnet = config.artnet();
        assert_eq!(3, artnet.universe());
        assert!(artnet.broadcast());
        assert_eq!(Duration::from_millis(25), config.settings().unwrap().period);
        assert_eq!(Duration::from_millis(5), config.timeline_tick().unwrap());

        let model = config.model().unwrap();
        let patched: Vec<(Group, u16, ChannelMode)> = model
            .projectors()
            .iter()
            .map(|p| (p.group, p.address, p.mode))
            .collect();
        assert_eq!(
            vec![
                (Group::Face, 1, ChannelMode::Three),
                (Group::Lat, 11, ChannelMode::Five),
                (Group::Douche2, 100, ChannelMode::Five),
            ],
            patched
        );

        let layout = config.surface().layout();
        assert_eq!(vec![vec![Group::Face, Group::Lat]], layout.fader_groups);
        assert_eq!(Some(Color::new(0, 255, 0)), layout.palette.get(0));
        assert_eq!(2, layout.palette.len());
        assert_eq!(vec![(Color::RED, Color::new(0, 255, 0))], layout.bicolors);

        match config.settings().unwrap().mapping {
            Mapping::Scene { caps, .. } => {
                assert_eq!(Some(&50), caps.get(&Group::Face));
                assert_eq!(Some(&40), caps.get(&Group::Contre));
            }
            other => panic!("expected a scene mapping, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_values() {
        let config = parse("artnet:\n  destination: nowhere\n  period: soon\n");
        assert!(matches!(
            config.artnet().destination(),
            Err(ConfigError::Destination { .. })
        ));
        assert!(matches!(
            config.settings(),
            Err(ConfigError::Duration { .. })
        ));

        let config = parse("patch:\n  - group: face\n    address: 510\n");
        assert!(matches!(config.model(), Err(ConfigError::Patch(_))));
    }
}
