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

use serde::{Deserialize, Serialize};

use super::types::{ProjectorState, Target};
use crate::arbiter::Write;

/// A snapshot of every projector, applied instantaneously when recalled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    states: Vec<ProjectorState>,
}

impl Keyframe {
    pub fn new(states: Vec<ProjectorState>) -> Keyframe {
        Keyframe { states }
    }

    /// The writes that restore this keyframe.
    pub fn writes(&self) -> Vec<Write> {
        self.states
            .iter()
            .flat_map(|state| {
                let target = Target::Projector(state.id);
                [
                    Write::Color {
                        target,
                        color: state.color,
                    },
                    Write::Level {
                        target,
                        level: state.level,
                    },
                    Write::Mute {
                        target,
                        muted: state.muted,
                    },
                    Write::Strobe {
                        target,
                        speed: state.strobe,
                    },
                ]
            })
            .collect()
    }
}

/// Recorded keyframes, recallable by index.
#[derive(Debug, Default, Clone)]
pub struct KeyframeBank {
    keyframes: Vec<Keyframe>,
}

impl KeyframeBank {
    pub fn new() -> KeyframeBank {
        KeyframeBank::default()
    }

    /// Stores a keyframe and returns its index.
    pub fn push(&mut self, keyframe: Keyframe) -> usize {
        self.keyframes.push(keyframe);
        self.keyframes.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&Keyframe> {
        self.keyframes.get(index)
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lighting::{
        color::Color,
        model::FixtureModel,
        types::{Group, Target},
    };

    #[test]
    fn test_keyframe_restores_model() {
        let mut model = FixtureModel::reference_rig().unwrap();
        model.set_color(Group::Lat.into(), Color::RED);
        model.set_level(Group::Lat.into(), 70);
        model.set_mute(Group::Face.into(), true);
        let expected = model.snapshot_all();

        let mut bank = KeyframeBank::new();
        let index = bank.push(Keyframe::new(model.projection()));
        assert_eq!(0, index);

        model.set_color(Target::All, Color::WHITE);
        model.set_level(Target::All, 10);
        model.set_mute(Target::All, false);
        assert_ne!(expected, model.snapshot_all());

        for write in bank.get(index).unwrap().writes() {
            write.apply(&mut model);
        }
        assert_eq!(expected, model.snapshot_all());
        assert!(bank.get(1).is_none());
    }
}
