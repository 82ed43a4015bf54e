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
use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use parking_lot::RwLock;
use tracing::{info, span, Level, Span};

use crate::{arbiter::Mode, lighting::timeline::Sequence};

/// One step of a show.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// A media file played in a given lighting mode.
    Media {
        path: PathBuf,
        volume: u8,
        mode: Mode,
    },
    /// A pause, optionally timed.
    Pause { duration: Option<Duration> },
    /// A click track.
    Tempo { bpm: u32, duration: Duration },
    /// A media file with a lighting sequence synchronised to it.
    Sequence {
        path: PathBuf,
        volume: u8,
        sequence: Arc<Sequence>,
    },
}

impl Entry {
    /// What the engine should do when this entry becomes current.
    pub fn mode_request(&self) -> ModeRequest {
        match self {
            Entry::Media { mode, .. } => ModeRequest::Select(*mode),
            Entry::Sequence { sequence, .. } => ModeRequest::Timeline(sequence.clone()),
            Entry::Pause { .. } | Entry::Tempo { .. } => ModeRequest::Hold,
        }
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Media { path, volume, mode } => {
                write!(f, "{} (volume {}, {})", path.display(), volume, mode)
            }
            Entry::Pause { duration: Some(d) } => write!(f, "pause ({:?})", d),
            Entry::Pause { duration: None } => write!(f, "pause"),
            Entry::Tempo { bpm, duration } => write!(f, "tempo {} bpm ({:?})", bpm, duration),
            Entry::Sequence {
                path,
                volume,
                sequence,
            } => write!(
                f,
                "{} (volume {}, sequence '{}', {} tracks)",
                path.display(),
                volume,
                sequence.name,
                sequence.tracks.len()
            ),
        }
    }
}

/// The mode change an entry asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum ModeRequest {
    Select(Mode),
    /// Play the sequence in timeline playback mode.
    Timeline(Arc<Sequence>),
    /// Hold the fixtures in manual mode.
    Hold,
}

/// A show: an ordered list of entries and a position in it.
pub struct Playlist {
    name: String,
    entries: Vec<Entry>,
    position: RwLock<usize>,
    span: Span,
}

impl fmt::Display for Playlist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Show {} ({} entries):", self.name, self.entries.len())?;
        for entry in self.entries.iter() {
            writeln!(f, "  - {}", entry)?;
        }
        Ok(())
    }
}

impl Playlist {
    /// Creates a new playlist. Returns None if there are no entries.
    pub fn new(name: impl Into<String>, entries: Vec<Entry>) -> Option<Playlist> {
        if entries.is_empty() {
            return None;
        }
        Some(Playlist {
            name: name.into(),
            entries,
            position: RwLock::new(0),
            span: span!(Level::INFO, "playlist"),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> usize {
        *self.position.read()
    }

    /// Moves to the next entry. Stays put at the end of the playlist.
    pub fn next(&self) -> ModeRequest {
        let _enter = self.span.enter();

        let mut position = self.position.write();
        if *position < self.entries.len() - 1 {
            *position += 1;
        }
        let entry = &self.entries[*position];
        info!(position = *position, entry = %entry, "Moving to next playlist position.");
        entry.mode_request()
    }

    /// Moves to the previous entry. Stays put at the start of the playlist.
    pub fn prev(&self) -> ModeRequest {
        let _enter = self.span.enter();

        let mut position = self.position.write();
        if *position > 0 {
            *position -= 1;
        }
        let entry = &self.entries[*position];
        info!(position = *position, entry = %entry, "Moving to previous playlist position.");
        entry.mode_request()
    }

    pub fn current(&self) -> ModeRequest {
        self.current_entry().mode_request()
    }

    pub fn current_entry(&self) -> &Entry {
        &self.entries[*self.position.read()]
    }
}
