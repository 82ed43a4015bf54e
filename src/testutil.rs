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
use std::{
    future::Future,
    thread,
    time::{Duration, Instant},
};

const TIMEOUT: Duration = Duration::from_secs(5);
const MAX_TICK: Duration = Duration::from_millis(50);

/// Wait for the given predicate to return true or fail.
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    let mut tick = Duration::from_millis(2);

    while !predicate() {
        if start.elapsed() > TIMEOUT {
            panic!("{}", error_msg);
        }
        thread::sleep(tick);
        tick = (tick * 2).min(MAX_TICK);
    }
}

/// Wait for the given async predicate to return true or fail.
pub async fn eventually_async<F, Fut>(mut predicate: F, error_msg: &str)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    let mut tick = Duration::from_millis(2);

    while !predicate().await {
        if start.elapsed() > TIMEOUT {
            panic!("{}", error_msg);
        }
        tokio::time::sleep(tick).await;
        tick = (tick * 2).min(MAX_TICK);
    }
}
