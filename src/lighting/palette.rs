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

use super::color::Color;

/// Hue offsets, in degrees, used to derive a palette from a dominant colour.
const GENERATED_HUE_OFFSETS: [f64; 8] = [0.0, 20.0, -20.0, 40.0, -40.0, 60.0, -60.0, 180.0];

/// Lower bounds keeping generated colours vivid on stage.
const GENERATED_MIN_SATURATION: f64 = 150.0 / 255.0;
const GENERATED_MIN_VALUE: f64 = 200.0 / 255.0;

/// A named, ordered set of colours. Entries may carry a label to be looked up by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorPalette {
    name: String,
    colors: Vec<Color>,
    #[serde(default)]
    labels: Vec<String>,
}

impl ColorPalette {
    /// Creates a new palette.
    pub fn new(name: impl Into<String>, colors: Vec<Color>) -> ColorPalette {
        ColorPalette {
            name: name.into(),
            colors,
            labels: Vec::new(),
        }
    }

    /// Creates a palette of labelled entries.
    pub fn labelled(name: impl Into<String>, entries: Vec<(String, Color)>) -> ColorPalette {
        let (labels, colors) = entries.into_iter().unzip();
        ColorPalette {
            name: name.into(),
            colors,
            labels,
        }
    }

    /// Derives eight related colours around a dominant colour. Greys fall back to red.
    pub fn generated(name: impl Into<String>, dominant: Color) -> ColorPalette {
        let (hue, saturation, value) = match dominant.to_hsv() {
            (Some(hue), saturation, value) => (hue, saturation, value),
            (None, _, _) => (0.0, 1.0, 1.0),
        };
        let saturation = saturation.max(GENERATED_MIN_SATURATION);
        let value = value.max(GENERATED_MIN_VALUE);

        ColorPalette::new(
            name,
            GENERATED_HUE_OFFSETS
                .iter()
                .map(|offset| Color::from_hsv(hue + offset, saturation, value))
                .collect(),
        )
    }

    /// The default pad colours of the surface, one per grid row.
    pub fn pads() -> ColorPalette {
        ColorPalette::labelled(
            "pads",
            ["white", "red", "orange", "yellow", "green", "cyan", "blue", "magenta"]
                .iter()
                .filter_map(|name| Some((name.to_string(), Color::from_name(name).ok()?)))
                .collect(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Gets the colour at the given index.
    pub fn get(&self, index: usize) -> Option<Color> {
        self.colors.get(index).copied()
    }

    /// Gets the colour of the entry with the given label, ignoring case.
    pub fn find(&self, label: &str) -> Option<Color> {
        let index = self
            .labels
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(label.trim()))?;
        self.get(index)
    }

    /// Gets the colour at the given index, wrapping around the end of the palette.
    pub fn cycle(&self, index: usize) -> Option<Color> {
        if self.colors.is_empty() {
            return None;
        }
        self.get(index % self.colors.len())
    }

    pub fn colors(&self) -> &[Color] {
        &self.colors
    }
}
