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
use std::net::AddrParseError;

use crate::lighting::error::PatchError;

/// Typed error for config and show load failures so callers can distinguish
/// e.g. file-not-found from a bad colour without string matching.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config load/parse error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid duration '{value}': {source}")]
    Duration {
        value: String,
        source: duration_string::Error,
    },

    #[error("invalid Art-Net destination '{value}': {source}")]
    Destination {
        value: String,
        source: AddrParseError,
    },

    #[error("invalid colour '{value}': {reason}")]
    Color { value: String, reason: String },

    #[error("invalid target '{value}': {reason}")]
    Target { value: String, reason: String },

    #[error("unknown palette '{0}'")]
    UnknownPalette(String),

    #[error("palette '{palette}' has no colour at index {index}")]
    PaletteIndex { palette: String, index: usize },

    #[error("palette '{palette}' has no colour '{entry}'")]
    PaletteEntry { palette: String, entry: String },

    #[error("show '{0}' has no entries")]
    EmptyShow(String),

    #[error("invalid show entry {index}: {reason}")]
    Entry { index: usize, reason: String },

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error("unable to write config: {0}")]
    Io(#[from] std::io::Error),

    #[error("unable to serialize config: {0}")]
    Serialize(#[from] serde_yml::Error),
}
