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
use std::{error::Error, io, path::PathBuf, sync::Arc};

use clap::{crate_version, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mystrow::{
    config::{self, EngineConfig},
    controller::{self, Controller},
    dmx::{
        artnet::{self, SequenceCounter},
        transport::UdpTransport,
    },
    engine::Engine,
    lighting::{
        color::Color,
        types::{ChannelMode, Target},
    },
};

const SYSTEMD_SERVICE: &str = r#"
[Unit]
Description=stage lighting controller

[Service]
Type=simple
Restart=on-failure
EnvironmentFile=-/etc/default/mystrow
ExecStart=/usr/local/bin/mystrow start "$MYSTROW_CONFIG" --show "$MYSTROW_SHOW"

[Install]
WantedBy=multi-user.target
Alias=mystrow.service
"#;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A stage lighting controller."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start runs the engine, driven by the keyboard and the configured control surface.
    Start {
        /// The path to the engine config.
        config_path: String,
        /// The path to a show to run.
        #[arg(short, long)]
        show: Option<String>,
    },
    /// Prints the patch table.
    Patch {
        /// The path to the engine config.
        config_path: String,
        /// Prints the projectors as JSON.
        #[arg(long)]
        json: bool,
        /// Writes the patch out as an explicit patch section.
        #[arg(short, long)]
        save: Option<String>,
    },
    /// Verifies a show and prints it.
    Show {
        /// The path to the show.
        path: String,
    },
    /// Prints an Art-Net frame with every projector at full white, for checking wiring.
    Frame {
        /// The path to the engine config.
        config_path: String,
    },
    /// Prints a systemd service definition to stdout.
    Systemd {},
}

fn load_config(path: &str) -> Result<EngineConfig, Box<dyn Error>> {
    Ok(config::load_engine_config(&PathBuf::from(path))?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Logs go to stderr to keep the keyboard prompt readable.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config_path, show } => {
            let config = load_config(&config_path)?;
            let artnet = config.artnet();
            let transport = UdpTransport::bind(artnet.destination()?, artnet.broadcast())?;
            let engine = Arc::new(Engine::new(
                config.model()?,
                Box::new(transport),
                config.settings()?,
            ));

            let playlist = match show {
                Some(path) => {
                    let playlist = config::load_show(&PathBuf::from(path))?.into_playlist()?;
                    println!("{}", playlist);
                    Some(Arc::new(playlist))
                }
                None => None,
            };

            let surface = config.surface();
            let mut drivers: Vec<Arc<dyn controller::Driver>> =
                vec![Arc::new(controller::keyboard::Driver::new())];
            if let Some(device) = surface.device() {
                drivers.push(Arc::new(controller::midi::Driver::new(
                    device,
                    surface.layout(),
                )));
            }

            let mut controller = Controller::new(
                engine.clone(),
                playlist,
                Arc::new(controller::multi::Driver::new(drivers)),
            );
            controller.join().await?;
            engine.shutdown();
        }
        Commands::Patch {
            config_path,
            json,
            save,
        } => {
            let config = load_config(&config_path)?;
            let model = config.model()?;

            if let Some(save) = save {
                config::save_patch(&config.patch_entries(), &PathBuf::from(&save))?;
                println!("Patch written to {}.", save);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(model.projectors())?);
                return Ok(());
            }

            println!("Patch (projectors: {}):", model.projectors().len());
            for projector in model.projectors() {
                println!(
                    "  - {} {:<8} {:>3}-{:<3} {}",
                    projector.id,
                    projector.group.name(),
                    projector.address,
                    projector.last_channel(),
                    projector.mode,
                );
            }
            let used: u16 = model.projectors().iter().map(|p| p.mode.width()).sum();
            println!(
                "{} of 512 channels used, default mode {}.",
                used,
                ChannelMode::default()
            );
        }
        Commands::Show { path } => {
            let show = config::load_show(&PathBuf::from(&path))?;
            for palette in show.palettes.iter() {
                let colors: Vec<String> = palette.colors().iter().map(Color::to_hex).collect();
                println!("Palette {}: {}", palette.name(), colors.join(", "));
            }
            print!("{}", show.into_playlist()?);
        }
        Commands::Frame { config_path } => {
            let config = load_config(&config_path)?;
            let mut model = config.model()?;
            model.set_color(Target::All, Color::WHITE);
            model.set_level(Target::All, 100);

            let frame = artnet::frame(
                SequenceCounter::new().next(),
                config.artnet().universe(),
                &model.snapshot_all(),
            );
            println!(
                "ArtDmx to {} ({} bytes):",
                config.artnet().destination()?,
                frame.len()
            );
            print!("{}", artnet::hex_dump(&frame));
        }
        Commands::Systemd {} => {
            println!("{}", SYSTEMD_SERVICE);
        }
    }

    Ok(())
}
