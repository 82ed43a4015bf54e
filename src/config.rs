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
use std::{fs, path::Path};

use config::{Config, File, FileFormat};
use tracing::info;

mod engine;
mod error;
mod show;

pub use engine::{ArtNet, Audio, EngineConfig, MappingKind, PatchEntry, Surface};
pub use error::ConfigError;
pub use show::Show;

/// Loads the engine configuration from a YAML file.
pub fn load_engine_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = Config::builder()
        .add_source(File::from(path).format(FileFormat::Yaml))
        .build()?
        .try_deserialize()?;
    info!(path = %path.display(), "Loaded engine config.");
    Ok(config)
}

/// Loads and validates a show file.
pub fn load_show(path: &Path) -> Result<Show, ConfigError> {
    let show: show::ShowFile = Config::builder()
        .add_source(File::from(path).format(FileFormat::Yaml))
        .build()?
        .try_deserialize()?;
    let show = show.into_show()?;
    info!(
        path = %path.display(),
        name = %show.name,
        entries = show.entries.len(),
        "Loaded show."
    );
    Ok(show)
}

/// Writes a patch out as an explicit `patch:` section, e.g. to freeze the reference rig
/// before editing it.
pub fn save_patch(entries: &[PatchEntry], path: &Path) -> Result<(), ConfigError> {
    #[derive(serde::Serialize)]
    struct PatchFile<'a> {
        patch: &'a [PatchEntry],
    }

    let serialized = serde_yml::to_string(&PatchFile { patch: entries })?;
    fs::write(path, serialized)?;
    Ok(())
}
