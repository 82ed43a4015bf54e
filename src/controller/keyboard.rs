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
use std::{io, time::Duration};

use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{info, span, warn, Level};

use super::Event;
use crate::{
    arbiter::{Source, Write},
    audio::Feature,
    lighting::{color::Color, types::Target},
};

const USAGE: &str = "mode <manual|audio|programmed|timeline>, color <target> <color>, \
level <target> <0-100>, mute <target>, unmute <target>, strobe <target> <0-100>, \
blackout <on|off>, capture, recall <n>, seek <ms>, pause, resume, rate <r>, next, prev, \
audio <level> [bands...]";

/// A control surface simulator driven from the keyboard.
pub struct Driver {}

impl Driver {
    pub fn new() -> Driver {
        Driver {}
    }

    /// Reads and dispatches one command. Returns false once the input is exhausted.
    fn monitor_io<R, W>(events_tx: &Sender<Event>, mut reader: R, mut writer: W) -> io::Result<bool>
    where
        R: io::BufRead,
        W: io::Write,
    {
        write!(writer, "Command: ")?;
        writer.flush()?;
        let mut input: String = String::default();
        if reader.read_line(&mut input)? == 0 {
            return Ok(false);
        }
        if input.trim().is_empty() {
            return Ok(true);
        }

        match parse_command(&input) {
            Ok(event) => events_tx
                .blocking_send(event)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?,
            Err(e) => {
                warn!(input = input.trim(), err = %e, "Unrecognized input");
                writeln!(writer, "{}\nUsage: {}", e, USAGE)?;
            }
        }
        Ok(true)
    }
}

impl Default for Driver {
    fn default() -> Self {
        Driver::new()
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "keyboard driver");
            let _enter = span.enter();

            info!("Keyboard driver started.");

            while Self::monitor_io(&events_tx, io::stdin().lock(), io::stdout())? {}
            info!("Keyboard input closed.");
            Ok(())
        })
    }
}

/// Parses a simulator command into an event.
fn parse_command(input: &str) -> Result<Event, String> {
    let words: Vec<&str> = input.split_whitespace().collect();
    let arg = |index: usize| {
        words
            .get(index)
            .copied()
            .ok_or_else(|| format!("'{}' is missing an argument", words[0]))
    };
    let target = |index: usize| arg(index)?.parse::<Target>();
    let percent = |index: usize| {
        let value = arg(index)?;
        value
            .parse::<u8>()
            .ok()
            .filter(|value| *value <= 100)
            .ok_or_else(|| format!("'{}' is not a level between 0 and 100", value))
    };
    let simulated = |write: Write| Event::Write {
        source: Source::Simulator,
        writes: vec![write],
    };

    let Some(command) = words.first() else {
        return Err("empty command".to_string());
    };
    let event = match command.to_lowercase().as_str() {
        "mode" => Event::SelectMode(arg(1)?.parse()?),
        "color" | "colour" => simulated(Write::Color {
            target: target(1)?,
            color: arg(2)?.parse::<Color>()?,
        }),
        "level" => simulated(Write::Level {
            target: target(1)?,
            level: percent(2)?,
        }),
        "mute" => simulated(Write::Mute {
            target: target(1)?,
            muted: true,
        }),
        "unmute" => simulated(Write::Mute {
            target: target(1)?,
            muted: false,
        }),
        "strobe" => simulated(Write::Strobe {
            target: target(1)?,
            speed: percent(2)?,
        }),
        "blackout" => match arg(1)? {
            "on" => simulated(Write::Blackout(true)),
            "off" => simulated(Write::Blackout(false)),
            other => return Err(format!("expected on or off, got '{}'", other)),
        },
        "capture" => Event::Capture,
        "recall" => Event::Recall(
            arg(1)?
                .parse()
                .map_err(|e| format!("invalid keyframe index: {}", e))?,
        ),
        "seek" => Event::Seek(Duration::from_millis(
            arg(1)?
                .parse()
                .map_err(|e| format!("invalid position: {}", e))?,
        )),
        "pause" => Event::Pause,
        "resume" => Event::Resume,
        "rate" => Event::Rate(
            arg(1)?
                .parse()
                .map_err(|e| format!("invalid rate: {}", e))?,
        ),
        "next" => Event::Next,
        "prev" => Event::Prev,
        "audio" => {
            let values = words[1..]
                .iter()
                .map(|value| value.parse::<f64>())
                .collect::<Result<Vec<f64>, _>>()
                .map_err(|e| format!("invalid audio feature: {}", e))?;
            let Some((level, bands)) = values.split_first() else {
                return Err("'audio' is missing a level".to_string());
            };
            Event::Feature(Feature::new(*level, bands.to_vec()))
        }
        other => return Err(format!("unknown command '{}'", other)),
    };
    Ok(event)
}
