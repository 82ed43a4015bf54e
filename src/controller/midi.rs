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

//! An APC mini style control surface read from a raw MIDI device.
//!
//! Layout: CC 48-56 are the faders, notes 0-63 the 8x8 pad grid (note 56 is the top left
//! pad), notes 100-107 the fader mute buttons, notes 112-119 the effect buttons and note
//! 122 the blackout button.

use std::{
    fs::OpenOptions,
    io::{self, Read},
    path::PathBuf,
};

use midly::{
    live::LiveEvent,
    num::{u4, u7},
    stream::MidiStream,
    MidiMessage,
};
use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{debug, info, span, Level};

use super::Event;
use crate::{
    arbiter::{Source, Write},
    lighting::{
        color::{level_from_midi, velocity_for, Color},
        palette::ColorPalette,
        types::{Group, Target},
    },
};

pub const FADER_CC: u8 = 48;
pub const FADERS: usize = 9;
/// The fader that sets the strobe speed.
pub const STROBE_FADER: usize = 8;
pub const GRID_PADS: u8 = 64;
pub const GRID_COLUMNS: u8 = 8;
pub const MUTE_NOTE: u8 = 100;
pub const EFFECT_NOTE: u8 = 112;
pub const BLACKOUT_NOTE: u8 = 122;

/// LED velocity of a lit button below the grid.
const BUTTON_ON: u8 = 1;

/// Which colour of a bicolour pad each member of a group takes: false for the first
/// colour, true for the second.
const BICOLOR_PATTERN: [(Group, &[bool]); 2] = [
    (Group::Lat, &[false, false]),
    (Group::Contre, &[true, false, true, true, false, true]),
];

/// The default bicolour pads, one per grid row.
const DEFAULT_BICOLORS: [(Color, Color); 8] = [
    (Color::new(255, 0, 0), Color::new(0, 200, 0)),
    (Color::new(255, 0, 0), Color::new(255, 128, 0)),
    (Color::new(255, 0, 0), Color::new(255, 105, 180)),
    (Color::new(0, 0, 255), Color::new(0, 255, 255)),
    (Color::new(0, 200, 0), Color::new(255, 255, 0)),
    (Color::new(0, 0, 255), Color::new(128, 0, 255)),
    (Color::new(255, 128, 0), Color::new(255, 255, 0)),
    (Color::new(0, 255, 255), Color::new(128, 0, 255)),
];

/// How the surface maps onto the rig.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    /// The groups driven by each fader. Pad columns use the same group sets.
    pub fader_groups: Vec<Vec<Group>>,
    /// The pad colour of each grid row, top to bottom.
    pub palette: ColorPalette,
    /// The colour pairs of the bicolour column, the first column after the group columns,
    /// one per grid row. The pairs are spread over the lat and contre members.
    pub bicolors: Vec<(Color, Color)>,
}

impl Default for Layout {
    fn default() -> Self {
        Layout {
            fader_groups: vec![
                vec![Group::Face],
                vec![Group::Contre, Group::Lat],
                vec![Group::Douche1, Group::Douche2, Group::Douche3],
            ],
            palette: ColorPalette::pads(),
            bicolors: DEFAULT_BICOLORS.to_vec(),
        }
    }
}

impl Layout {
    fn bicolor_column(&self) -> Option<u8> {
        let column = u8::try_from(self.fader_groups.len()).ok()?;
        (column < GRID_COLUMNS && !self.bicolors.is_empty()).then_some(column)
    }
}

/// The state of the surface, tracked to toggle buttons and drive its LEDs.
pub struct Surface {
    layout: Layout,
    faders: [u8; FADERS],
    muted: [bool; FADERS],
    strobe: bool,
    blackout: bool,
}

impl Surface {
    pub fn new(layout: Layout) -> Surface {
        Surface {
            layout,
            faders: [0; FADERS],
            muted: [false; FADERS],
            strobe: false,
            blackout: false,
        }
    }

    fn groups(&self, index: usize) -> Option<&[Group]> {
        self.layout.fader_groups.get(index).map(Vec::as_slice)
    }

    fn group_writes(&self, index: usize, write: impl Fn(Target) -> Write) -> Option<Event> {
        let groups = self.groups(index)?;
        Some(Event::Write {
            source: Source::Surface,
            writes: groups.iter().map(|group| write((*group).into())).collect(),
        })
    }

    fn strobe_speed(&self) -> u8 {
        self.faders[STROBE_FADER].max(1)
    }

    /// Translates a MIDI event into a controller event.
    pub fn handle(&mut self, event: &LiveEvent) -> Option<Event> {
        let LiveEvent::Midi { message, .. } = event else {
            return None;
        };

        match *message {
            MidiMessage::Controller { controller, value } => {
                self.fader(controller.as_int(), value.as_int())
            }
            MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => self.press(key.as_int()),
            _ => None,
        }
    }

    fn fader(&mut self, controller: u8, value: u8) -> Option<Event> {
        let index = usize::from(controller.checked_sub(FADER_CC)?);
        if index >= FADERS {
            return None;
        }
        let level = level_from_midi(value);
        self.faders[index] = level;

        if index == STROBE_FADER {
            return self.strobe.then(|| Event::Write {
                source: Source::Surface,
                writes: vec![Write::Strobe {
                    target: Target::All,
                    speed: self.strobe_speed(),
                }],
            });
        }
        self.group_writes(index, |target| Write::Level { target, level })
    }

    fn press(&mut self, note: u8) -> Option<Event> {
        match note {
            note if note < GRID_PADS => self.pad(note),
            note if (MUTE_NOTE..MUTE_NOTE + 8).contains(&note) => {
                let index = usize::from(note - MUTE_NOTE);
                self.groups(index)?;
                self.muted[index] = !self.muted[index];
                let muted = self.muted[index];
                self.group_writes(index, |target| Write::Mute { target, muted })
            }
            EFFECT_NOTE => {
                self.strobe = !self.strobe;
                let speed = if self.strobe { self.strobe_speed() } else { 0 };
                Some(Event::Write {
                    source: Source::Surface,
                    writes: vec![Write::Strobe {
                        target: Target::All,
                        speed,
                    }],
                })
            }
            BLACKOUT_NOTE => {
                self.blackout = !self.blackout;
                Some(Event::Write {
                    source: Source::Surface,
                    writes: vec![Write::Blackout(self.blackout)],
                })
            }
            other => {
                debug!(note = other, "Unassigned button.");
                None
            }
        }
    }

    fn pad(&self, note: u8) -> Option<Event> {
        let (row, column) = pad_position(note);
        if Some(column) == self.layout.bicolor_column() {
            return self.bicolor_pad(row);
        }
        let color = self.layout.palette.cycle(usize::from(row))?;
        self.group_writes(usize::from(column), |target| Write::Color { target, color })
    }

    fn bicolor_pad(&self, row: u8) -> Option<Event> {
        let (first, second) = *self.layout.bicolors.get(usize::from(row))?;
        let writes = BICOLOR_PATTERN
            .iter()
            .flat_map(|(group, pattern)| {
                pattern.iter().zip(0u8..).map(move |(use_second, member)| Write::MemberColor {
                    group: *group,
                    member,
                    color: if *use_second { second } else { first },
                })
            })
            .collect();
        Some(Event::Write {
            source: Source::Surface,
            writes,
        })
    }

    /// The LED state of every assigned pad and button as (note, velocity).
    pub fn leds(&self) -> Vec<(u8, u8)> {
        let columns = self.layout.fader_groups.len().min(usize::from(GRID_COLUMNS)) as u8;
        let bicolor_column = self.layout.bicolor_column();
        let mut leds: Vec<(u8, u8)> = (0..GRID_PADS)
            .filter_map(|note| {
                let (row, column) = pad_position(note);
                let color = if Some(column) == bicolor_column {
                    self.layout.bicolors.get(usize::from(row))?.0
                } else if column < columns {
                    self.layout.palette.cycle(usize::from(row))?
                } else {
                    return None;
                };
                Some((note, velocity_for(color)))
            })
            .collect();

        let button = |on: bool| if on { BUTTON_ON } else { 0 };
        leds.extend(
            (0..columns).map(|index| (MUTE_NOTE + index, button(self.muted[usize::from(index)]))),
        );
        leds.push((EFFECT_NOTE, button(self.strobe)));
        leds.push((BLACKOUT_NOTE, button(self.blackout)));
        leds
    }
}

/// The (row, column) of a grid pad, row 0 being the top.
pub fn pad_position(note: u8) -> (u8, u8) {
    (7 - note / GRID_COLUMNS, note % GRID_COLUMNS)
}

/// Writes LED updates as note on messages.
fn write_leds<W: io::Write>(writer: &mut W, leds: &[(u8, u8)]) -> io::Result<()> {
    for (note, velocity) in leds.iter() {
        let event = LiveEvent::Midi {
            channel: u4::new(0),
            message: MidiMessage::NoteOn {
                key: u7::from_int_lossy(*note),
                vel: u7::from_int_lossy(*velocity),
            },
        };
        event.write_std(&mut *writer)?;
    }
    writer.flush()
}

/// A controller that reads a control surface from a raw MIDI device.
pub struct Driver {
    device: PathBuf,
    layout: Layout,
}

impl Driver {
    pub fn new(device: PathBuf, layout: Layout) -> Driver {
        Driver { device, layout }
    }

    /// Reads MIDI bytes until the reader closes, sending translated events and answering
    /// with LED feedback.
    fn monitor_io<R, W>(
        events_tx: &Sender<Event>,
        surface: &mut Surface,
        mut reader: R,
        mut writer: W,
    ) -> io::Result<()>
    where
        R: Read,
        W: io::Write,
    {
        let mut leds = surface.leds();
        write_leds(&mut writer, &leds)?;

        let mut stream: MidiStream = MidiStream::new();
        let mut buffer = [0u8; 256];
        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                return Ok(());
            }

            let mut events = Vec::new();
            stream.feed(&buffer[..read], |event| {
                if let Some(event) = surface.handle(&event) {
                    events.push(event);
                }
            });

            for event in events {
                events_tx
                    .blocking_send(event)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            }

            let updated = surface.leds();
            let changed: Vec<(u8, u8)> = updated
                .iter()
                .filter(|led| !leds.contains(led))
                .copied()
                .collect();
            if !changed.is_empty() {
                write_leds(&mut writer, &changed)?;
            }
            leds = updated;
        }
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        let device = self.device.clone();
        let layout = self.layout.clone();

        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "MIDI driver", device = %device.display());
            let _enter = span.enter();

            let input = OpenOptions::new().read(true).write(true).open(&device)?;
            let output = input.try_clone()?;
            info!("MIDI driver started.");

            let mut surface = Surface::new(layout);
            let result = Driver::monitor_io(&events_tx, &mut surface, input, output);
            info!("MIDI device closed.");
            result
        })
    }
}
