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

//! Colour representation and the channel codec that turns projector state into DMX bytes.

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use super::types::{ChannelMode, Projector};

/// The lowest DMX value that starts the strobe on the supported projectors.
const STROBE_MIN: u16 = 16;

/// The fastest strobe DMX value.
const STROBE_MAX: u16 = 250;

/// One on/off cycle of the strobe drawn on projectors without a strobe channel.
pub const VIRTUAL_STROBE_PERIOD: Duration = Duration::from_millis(200);

/// An RGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);
    pub const WHITE: Color = Color::new(255, 255, 255);
    pub const RED: Color = Color::new(255, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Builds a colour from wide components, clamping each to 0-255.
    pub fn clamped(r: i32, g: i32, b: i32) -> Self {
        let clamp = |v: i32| v.clamp(0, 255) as u8;
        Self::new(clamp(r), clamp(g), clamp(b))
    }

    pub fn from_hex(hex: &str) -> Result<Self, String> {
        let digits = hex.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(format!("invalid hex colour '{}'", hex));
        }

        let component = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16)
                .map_err(|e| format!("invalid hex colour '{}': {}", hex, e))
        };

        Ok(Color::new(component(0..2)?, component(2..4)?, component(4..6)?))
    }

    /// The colours offered by the pad grid and the simulator, by name.
    pub fn from_name(name: &str) -> Result<Self, String> {
        let color = match name.trim().to_lowercase().as_str() {
            "black" => Color::new(0, 0, 0),
            "white" => Color::new(255, 255, 255),
            "red" => Color::new(255, 0, 0),
            "orange" => Color::new(255, 136, 0),
            "yellow" => Color::new(255, 221, 0),
            "green" => Color::new(0, 255, 0),
            "cyan" => Color::new(0, 221, 221),
            "blue" => Color::new(0, 0, 255),
            "magenta" | "violet" => Color::new(255, 0, 255),
            "purple" => Color::new(128, 0, 128),
            _ => return Err(format!("unknown colour name '{}'", name)),
        };
        Ok(color)
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Hue in degrees, saturation and value in 0.0-1.0.
    pub fn from_hsv(h: f64, s: f64, v: f64) -> Self {
        let h = h.rem_euclid(360.0);
        let s = s.clamp(0.0, 1.0);
        let v = v.clamp(0.0, 1.0);
        let c = v * s;
        let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
        let m = v - c;

        let sector = (h / 60.0).floor() as u8 % 6;
        let (r, g, b) = match sector {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };

        let to_u8 = |component: f64| ((component + m) * 255.0).round().clamp(0.0, 255.0) as u8;
        Self::new(to_u8(r), to_u8(g), to_u8(b))
    }

    /// Returns (hue, saturation, value). Hue is `None` for greys.
    pub fn to_hsv(&self) -> (Option<f64>, f64, f64) {
        let r = f64::from(self.r) / 255.0;
        let g = f64::from(self.g) / 255.0;
        let b = f64::from(self.b) / 255.0;
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;

        let saturation = if max > 0.0 { delta / max } else { 0.0 };
        if delta <= f64::EPSILON {
            return (None, saturation, max);
        }

        let hue = if max == r {
            60.0 * ((g - b) / delta).rem_euclid(6.0)
        } else if max == g {
            60.0 * ((b - r) / delta + 2.0)
        } else {
            60.0 * ((r - g) / delta + 4.0)
        };
        (Some(hue), saturation, max)
    }

    /// Linearly interpolate between two colours.
    /// `t` should be between 0.0 (returns `self`) and 1.0 (returns `other`).
    pub fn lerp(&self, other: &Color, t: f64) -> Self {
        let t = t.clamp(0.0, 1.0);
        let lerp_u8 = |a: u8, b: u8| -> u8 {
            (f64::from(a) + (f64::from(b) - f64::from(a)) * t).round() as u8
        };

        Self::new(
            lerp_u8(self.r, other.r),
            lerp_u8(self.g, other.g),
            lerp_u8(self.b, other.b),
        )
    }

    /// Scales the colour by a 0-100 level.
    pub fn scaled(&self, level: u8) -> Self {
        let level = u16::from(level.min(100));
        let scale = |c: u8| (u16::from(c) * level / 100) as u8;
        Self::new(scale(self.r), scale(self.g), scale(self.b))
    }

    /// A rough perceived brightness, used by tests and the simulator display.
    pub fn luma(&self) -> u8 {
        ((u32::from(self.r) * 299 + u32::from(self.g) * 587 + u32::from(self.b) * 114) / 1000)
            as u8
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().starts_with('#') {
            Color::from_hex(s)
        } else {
            Color::from_name(s)
        }
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> String {
        color.to_hex()
    }
}

/// Converts a 0-100 level to a DMX dimmer value.
pub fn dimmer_value(level: u8) -> u8 {
    (u16::from(level.min(100)) * 255 / 100) as u8
}

/// Converts a 0-100 strobe speed to a DMX strobe value. Zero turns the strobe off.
pub fn strobe_value(speed: u8) -> u8 {
    if speed == 0 {
        return 0;
    }
    (STROBE_MIN + u16::from(speed.min(100)) * (STROBE_MAX - STROBE_MIN) / 100) as u8
}

/// Writes the DMX channels for the projector into `out`, which must be at least as
/// wide as the projector's channel mode.
///
/// `clock` is the emitter's running time. Projectors without a strobe channel blink their
/// RGB channels against it while their strobe is on, dark for the second half of every
/// `VIRTUAL_STROBE_PERIOD`.
pub fn encode(projector: &Projector, clock: Duration, out: &mut [u8]) {
    let width = usize::from(projector.mode.width());
    let out = &mut out[..width];

    if projector.muted {
        out.fill(0);
        return;
    }

    let color = match projector.mode {
        ChannelMode::Three => projector.color.scaled(projector.level),
        _ => projector.color,
    };
    let color = if width < 5 && projector.strobe > 0 && !virtual_strobe_lit(clock) {
        Color::BLACK
    } else {
        color
    };
    out[0] = color.r;
    out[1] = color.g;
    out[2] = color.b;

    if width >= 4 {
        out[3] = dimmer_value(projector.level);
    }
    if width >= 5 {
        out[4] = strobe_value(projector.strobe);
    }
    if width >= 6 {
        out[5] = 0;
    }
}

fn virtual_strobe_lit(clock: Duration) -> bool {
    let period = VIRTUAL_STROBE_PERIOD.as_millis();
    clock.as_millis() % period < period / 2
}

/// Converts a 7-bit MIDI value to a 0-100 level.
pub fn level_from_midi(value: u8) -> u8 {
    (u16::from(value.min(127)) * 100 / 127) as u8
}

/// Converts a 0-100 level to a 7-bit MIDI value.
pub fn level_to_midi(level: u8) -> u8 {
    (u16::from(level.min(100)) * 127 / 100) as u8
}

/// Exact simulator colours and the pad velocity that lights them on the surface.
/// White and red are crossed on the hardware.
const PAD_VELOCITIES: [(Color, u8); 8] = [
    (Color::new(255, 255, 255), 3),
    (Color::new(255, 0, 0), 5),
    (Color::new(255, 136, 0), 9),
    (Color::new(255, 221, 0), 13),
    (Color::new(0, 255, 0), 21),
    (Color::new(0, 221, 221), 37),
    (Color::new(0, 0, 255), 45),
    (Color::new(255, 0, 255), 53),
];

/// Converts a colour to the pad LED velocity that best represents it.
pub fn velocity_for(color: Color) -> u8 {
    if let Some((_, velocity)) = PAD_VELOCITIES.iter().find(|(c, _)| *c == color) {
        return *velocity;
    }

    let Color { r, g, b } = color;
    if r > 200 && g > 200 && b > 200 {
        5
    } else if r > 150 && g < 150 && b < 150 {
        3
    } else if r > 200 && g > 100 && g < 200 && b < 100 {
        9
    } else if r > 200 && g > 200 && b < 100 {
        13
    } else if g > 150 && r < 150 && b < 150 {
        21
    } else if g > 150 && b > 150 && r < 100 {
        37
    } else if b > 150 && r < 150 && g < 150 {
        45
    } else if r > 150 && b > 150 && g < 100 {
        53
    } else {
        5
    }
}

/// The colour a pad LED shows for the given velocity, for mirroring the surface on screen.
pub fn led_color(velocity: u8) -> Option<Color> {
    let color = match velocity {
        0 => Color::BLACK,
        3 => Color::new(255, 0, 0),
        5 => Color::new(255, 255, 160),
        9 => Color::new(255, 136, 0),
        13 => Color::new(220, 255, 0),
        21 | 25 => Color::new(0, 255, 0),
        37 => Color::new(0, 221, 221),
        45 => Color::new(0, 0, 255),
        49 => Color::new(255, 0, 160),
        53 => Color::new(160, 0, 255),
        _ => return None,
    };
    Some(color)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lighting::types::{Group, ProjectorId};

    fn projector(mode: ChannelMode) -> Projector {
        Projector::new(ProjectorId(0), Group::Face, 1, mode)
    }

    #[test]
    fn test_parse_colors() {
        assert_eq!(Ok(Color::new(255, 136, 0)), "#ff8800".parse::<Color>());
        assert_eq!(Ok(Color::new(0, 0, 255)), "Blue".parse::<Color>());
        assert!("#ff88".parse::<Color>().is_err());
        assert!("mauve".parse::<Color>().is_err());
        assert_eq!("#00dddd", Color::from_name("cyan").unwrap().to_hex());
    }

    #[test]
    fn test_lerp_rounds() {
        let mid = Color::BLACK.lerp(&Color::WHITE, 0.5);
        assert_eq!(Color::new(128, 128, 128), mid);
        assert_eq!(Color::WHITE, Color::BLACK.lerp(&Color::WHITE, 0.999));
        assert_eq!(Color::BLACK, Color::BLACK.lerp(&Color::WHITE, -1.0));
    }

    #[test]
    fn test_hsv_round_trip_hue() {
        let color = Color::from_hsv(120.0, 1.0, 1.0);
        assert_eq!(Color::new(0, 255, 0), color);
        let (hue, saturation, value) = color.to_hsv();
        assert_eq!(Some(120.0), hue);
        assert_eq!(1.0, saturation);
        assert_eq!(1.0, value);
        assert_eq!(None, Color::new(40, 40, 40).to_hsv().0);
    }

    #[test]
    fn test_encode_five_channels() {
        let mut projector = projector(ChannelMode::Five);
        projector.color = Color::RED;
        projector.level = 100;

        let mut out = [9u8; 8];
        encode(&projector, Duration::ZERO, &mut out);
        assert_eq!([255, 0, 0, 255, 0, 9, 9, 9], out);

        projector.level = 50;
        projector.strobe = 100;
        encode(&projector, Duration::ZERO, &mut out);
        assert_eq!([255, 0, 0, 127, 250], out[..5]);
    }

    #[test]
    fn test_encode_three_channels_applies_level() {
        let mut projector = projector(ChannelMode::Three);
        projector.color = Color::new(200, 100, 50);
        projector.level = 50;

        let mut out = [0u8; 3];
        encode(&projector, Duration::ZERO, &mut out);
        assert_eq!([100, 50, 25], out);
    }

    #[test]
    fn test_encode_muted_and_six_channels() {
        let mut projector = projector(ChannelMode::Six);
        projector.color = Color::WHITE;
        projector.level = 100;
        projector.strobe = 10;

        let mut out = [7u8; 6];
        encode(&projector, Duration::ZERO, &mut out);
        assert_eq!([255, 255, 255, 255, 39, 0], out);

        projector.muted = true;
        encode(&projector, Duration::ZERO, &mut out);
        assert_eq!([0u8; 6], out);
    }

    #[test]
    fn test_encode_blinks_without_strobe_channel() {
        let mut four = projector(ChannelMode::Four);
        four.color = Color::WHITE;
        four.level = 100;
        four.strobe = 100;

        let mut out = [0u8; 4];
        let frames: Vec<[u8; 4]> = [0, 60, 120, 180, 240]
            .into_iter()
            .map(|millis| {
                encode(&four, Duration::from_millis(millis), &mut out);
                out
            })
            .collect();
        assert_eq!(
            vec![
                [255, 255, 255, 255],
                [255, 255, 255, 255],
                [0, 0, 0, 255],
                [0, 0, 0, 255],
                [255, 255, 255, 255],
            ],
            frames
        );

        // Strobe off holds steady.
        four.strobe = 0;
        encode(&four, Duration::from_millis(150), &mut out);
        assert_eq!([255, 255, 255, 255], out);

        // A strobe channel takes over from the blink.
        let mut five = projector(ChannelMode::Five);
        five.color = Color::WHITE;
        five.level = 100;
        five.strobe = 100;
        let mut out = [0u8; 5];
        encode(&five, Duration::from_millis(150), &mut out);
        assert_eq!([255, 255, 255, 255, 250], out);
    }

    #[test]
    fn test_midi_levels() {
        assert_eq!(0, level_from_midi(0));
        assert_eq!(100, level_from_midi(127));
        assert_eq!(50, level_from_midi(64));
        assert_eq!(127, level_to_midi(100));
        assert_eq!(0, level_to_midi(0));
    }

    #[test]
    fn test_velocities() {
        assert_eq!(3, velocity_for(Color::WHITE));
        assert_eq!(5, velocity_for(Color::RED));
        assert_eq!(45, velocity_for(Color::new(10, 20, 200)));
        assert_eq!(21, velocity_for(Color::new(20, 200, 20)));
        assert_eq!(5, velocity_for(Color::new(90, 90, 90)));
        assert_eq!(Some(Color::new(0, 0, 255)), led_color(45));
        assert_eq!(Some(Color::BLACK), led_color(0));
        assert_eq!(None, led_color(100));
    }
}
