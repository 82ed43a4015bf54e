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

use crate::lighting::model::UNIVERSE_SIZE;

/// The standard Art-Net UDP port.
pub const ARTNET_PORT: u16 = 6454;

const ID: &[u8; 8] = b"Art-Net\0";
const OP_DMX: u16 = 0x5000;
const PROTOCOL_VERSION: u16 = 14;
const HEADER_SIZE: usize = 18;

/// The size of an ArtDmx packet carrying a full universe.
pub const FRAME_SIZE: usize = HEADER_SIZE + UNIVERSE_SIZE;

/// Builds an ArtDmx packet.
///
/// The opcode and universe are little endian, the protocol version and data length are
/// big endian.
pub fn frame(sequence: u8, universe: u16, data: &[u8; UNIVERSE_SIZE]) -> [u8; FRAME_SIZE] {
    let mut packet = [0u8; FRAME_SIZE];
    packet[0..8].copy_from_slice(ID);
    packet[8..10].copy_from_slice(&OP_DMX.to_le_bytes());
    packet[10..12].copy_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    packet[12] = sequence;
    // Physical input port.
    packet[13] = 0;
    packet[14..16].copy_from_slice(&universe.to_le_bytes());
    packet[16..18].copy_from_slice(&(UNIVERSE_SIZE as u16).to_be_bytes());
    packet[HEADER_SIZE..].copy_from_slice(data);
    packet
}

/// The wrapping ArtDmx sequence number.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    current: u8,
}

impl SequenceCounter {
    pub fn new() -> SequenceCounter {
        SequenceCounter::default()
    }

    /// Advances the counter and returns the new value. The first frame is 1.
    pub fn next(&mut self) -> u8 {
        self.current = self.current.wrapping_add(1);
        self.current
    }
}

/// Formats a frame as hex, 16 bytes per line.
pub fn hex_dump(frame: &[u8]) -> String {
    frame
        .chunks(16)
        .enumerate()
        .map(|(line, chunk)| {
            let bytes: Vec<String> = chunk.iter().map(|byte| format!("{:02x}", byte)).collect();
            format!("{:04x}: {}", line * 16, bytes.join(" "))
        })
        .collect::<Vec<String>>()
        .join("\n")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let mut data = [0u8; UNIVERSE_SIZE];
        data[0] = 255;
        data[511] = 7;

        let packet = frame(42, 3, &data);
        assert_eq!(530, packet.len());
        assert_eq!(b"Art-Net\0", &packet[0..8]);
        assert_eq!([0x00, 0x50], packet[8..10]);
        assert_eq!([0, 14], packet[10..12]);
        assert_eq!(42, packet[12]);
        assert_eq!(0, packet[13]);
        assert_eq!([3, 0], packet[14..16]);
        assert_eq!([0x02, 0x00], packet[16..18]);
        assert_eq!(255, packet[18]);
        assert_eq!(7, packet[529]);
    }

    #[test]
    fn test_sequence_wraps() {
        let mut counter = SequenceCounter::new();
        assert_eq!(1, counter.next());
        for _ in 0..254 {
            counter.next();
        }
        assert_eq!(0, counter.next());
        assert_eq!(1, counter.next());
    }

    #[test]
    fn test_hex_dump() {
        let dump = hex_dump(&frame(1, 0, &[0u8; UNIVERSE_SIZE]));
        assert!(dump.starts_with("0000: 41 72 74 2d 4e 65 74 00 00 50 00 0e 01 00 00 00"));
        assert_eq!(34, dump.lines().count());
    }
}
