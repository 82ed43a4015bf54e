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

use super::types::ProjectorId;

/// Errors raised while patching. The fixture model is unchanged when one is returned.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("channel mode {0} is not supported (expected 3, 4, 5 or 6)")]
    InvalidChannelMode(u8),

    #[error("channels {address}-{last} overlap projector {existing}")]
    Overlap {
        address: u16,
        last: u16,
        existing: ProjectorId,
    },

    #[error("channels {address}-{last} fall outside of the universe")]
    OutOfRange { address: u16, last: u32 },

    #[error("no free slot left in the universe for a {0}-channel projector")]
    UniverseFull(u16),

    #[error("projector {0} is not patched")]
    UnknownProjector(ProjectorId),
}

/// Errors raised by the timeline scheduler.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TimelineError {
    #[error("loop window {start_ms}ms-{end_ms}ms is empty after clamping to the sequence")]
    InvalidLoop { start_ms: u128, end_ms: u128 },

    #[error("no sequence is loaded")]
    NoSequence,
}
