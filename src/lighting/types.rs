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

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::{color::Color, error::PatchError};

/// The fixed set of projector groups on the rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Group {
    Face,
    Lat,
    Contre,
    Douche1,
    Douche2,
    Douche3,
}

impl Group {
    /// Every group, in display order.
    pub const ALL: [Group; 6] = [
        Group::Face,
        Group::Lat,
        Group::Contre,
        Group::Douche1,
        Group::Douche2,
        Group::Douche3,
    ];

    /// Gets the name of the group as used in configuration and show files.
    pub fn name(&self) -> &'static str {
        match self {
            Group::Face => "face",
            Group::Lat => "lat",
            Group::Contre => "contre",
            Group::Douche1 => "douche1",
            Group::Douche2 => "douche2",
            Group::Douche3 => "douche3",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Group {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Group::ALL
            .into_iter()
            .find(|group| group.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown group '{}'", s))
    }
}

/// The DMX personality of a projector. Determines how many channels it occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ChannelMode {
    /// RGB only, the level is applied to the colour itself.
    Three,
    /// RGB + dimmer.
    Four,
    /// RGB + dimmer + strobe.
    #[default]
    Five,
    /// RGB + dimmer + strobe + an unused channel held at zero.
    Six,
}

impl ChannelMode {
    /// The number of DMX channels this mode occupies.
    pub fn width(&self) -> u16 {
        match self {
            ChannelMode::Three => 3,
            ChannelMode::Four => 4,
            ChannelMode::Five => 5,
            ChannelMode::Six => 6,
        }
    }
}

impl TryFrom<u8> for ChannelMode {
    type Error = PatchError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            3 => Ok(ChannelMode::Three),
            4 => Ok(ChannelMode::Four),
            5 => Ok(ChannelMode::Five),
            6 => Ok(ChannelMode::Six),
            other => Err(PatchError::InvalidChannelMode(other)),
        }
    }
}

impl From<ChannelMode> for u8 {
    fn from(mode: ChannelMode) -> u8 {
        mode.width() as u8
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}CH", self.width())
    }
}

/// A stable projector identifier. Identifiers are never reused by a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectorId(pub u32);

impl fmt::Display for ProjectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The recipients of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// A single projector.
    Projector(ProjectorId),
    /// Every member of a group.
    Group(Group),
    /// Every patched projector.
    All,
}

impl Target {
    /// Returns true if this target includes the given projector.
    pub fn includes(&self, id: ProjectorId, group: Group) -> bool {
        match self {
            Target::Projector(target) => *target == id,
            Target::Group(target) => *target == group,
            Target::All => true,
        }
    }
}

impl From<Group> for Target {
    fn from(group: Group) -> Self {
        Target::Group(group)
    }
}

impl From<ProjectorId> for Target {
    fn from(id: ProjectorId) -> Self {
        Target::Projector(id)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Projector(id) => write!(f, "projector {}", id),
            Target::Group(group) => write!(f, "group {}", group),
            Target::All => f.write_str("all"),
        }
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Target::All);
        }
        if let Some(id) = s.strip_prefix('#') {
            return id
                .parse::<u32>()
                .map(|id| Target::Projector(ProjectorId(id)))
                .map_err(|e| format!("invalid projector id '{}': {}", s, e));
        }
        s.parse::<Group>().map(Target::Group)
    }
}

/// A patched projector and its current state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projector {
    /// The identifier of the projector.
    pub id: ProjectorId,
    /// The group this projector belongs to.
    pub group: Group,
    /// The 1-based DMX address of the first channel.
    pub address: u16,
    /// The channel personality.
    pub mode: ChannelMode,
    /// The base colour. The level is applied by the channel codec.
    pub color: Color,
    /// The master level, 0-100.
    pub level: u8,
    /// Muted projectors output zero on every channel.
    pub muted: bool,
    /// Strobe speed, 0 is off, 1-100 is slow to fast.
    pub strobe: u8,
}

impl Projector {
    /// Creates a dark projector at the given address.
    pub fn new(id: ProjectorId, group: Group, address: u16, mode: ChannelMode) -> Projector {
        Projector {
            id,
            group,
            address,
            mode,
            color: Color::BLACK,
            level: 0,
            muted: false,
            strobe: 0,
        }
    }

    /// The last channel (inclusive) used by this projector.
    pub fn last_channel(&self) -> u16 {
        self.address + self.mode.width() - 1
    }

    /// Returns true if this projector's channels overlap the given range.
    pub fn overlaps(&self, address: u16, width: u16) -> bool {
        address <= self.last_channel() && self.address <= address + width - 1
    }

    /// Captures the writable portion of the projector's state.
    pub fn state(&self) -> ProjectorState {
        ProjectorState {
            id: self.id,
            group: self.group,
            color: self.color,
            level: self.level,
            muted: self.muted,
            strobe: self.strobe,
        }
    }
}

/// A read-only projection of a projector, handed to presentation layers and keyframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectorState {
    pub id: ProjectorId,
    pub group: Group,
    pub color: Color,
    pub level: u8,
    pub muted: bool,
    pub strobe: u8,
}

/// The patched projectors in address order, used to address the members of a target one
/// by one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Members {
    projectors: Vec<(ProjectorId, Group)>,
}

impl Members {
    pub fn new(projectors: Vec<(ProjectorId, Group)>) -> Members {
        Members { projectors }
    }

    /// The projectors a target resolves to, in address order.
    pub fn resolve(&self, target: Target) -> Vec<ProjectorId> {
        self.projectors
            .iter()
            .filter(|(id, group)| target.includes(*id, *group))
            .map(|(id, _)| *id)
            .collect()
    }
}
