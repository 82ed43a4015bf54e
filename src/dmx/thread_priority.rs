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

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{debug, warn};

/// The environment variable holding the emitter priority, 0-99.
pub const PRIORITY_ENV: &str = "MYSTROW_EMITTER_PRIORITY";

/// Setting this to a truthy value requests SCHED_FIFO for the emitter thread.
pub const REALTIME_ENV: &str = "MYSTROW_EMITTER_REALTIME";

/// Parses a 0-99 priority.
fn parse_priority(value: &str) -> Option<ThreadPriorityValue> {
    let value = value.trim().parse::<u8>().ok()?;
    if value >= 100 {
        return None;
    }
    ThreadPriorityValue::try_from(value).ok()
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

/// Raises the priority of the calling thread if the environment asks for it. The emitter
/// keeps running at normal priority when the platform refuses.
pub fn raise_emitter_priority() {
    let Some(priority) = std::env::var(PRIORITY_ENV)
        .ok()
        .and_then(|value| parse_priority(&value))
    else {
        return;
    };

    let priority = ThreadPriority::Crossplatform(priority);
    if let Err(e) = set_current_thread_priority(priority) {
        warn!(err = ?e, "Unable to raise emitter thread priority.");
        return;
    }
    debug!(?priority, "Raised emitter thread priority.");

    #[cfg(unix)]
    if env_flag(REALTIME_ENV) {
        use thread_priority::unix::{
            set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
            ThreadSchedulePolicy,
        };
        if let Err(e) = set_thread_priority_and_policy(
            thread_native_id(),
            priority,
            ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
        ) {
            warn!(err = ?e, "Unable to use SCHED_FIFO for the emitter thread.");
        }
    }
}
