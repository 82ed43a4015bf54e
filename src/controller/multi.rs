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
use std::{io, sync::Arc};

use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::error;

use super::Event;

/// A driver that merges the events of several other drivers.
pub struct Driver {
    sub_drivers: Vec<Arc<dyn super::Driver>>,
}

impl Driver {
    pub fn new(sub_drivers: Vec<Arc<dyn super::Driver>>) -> Driver {
        Driver { sub_drivers }
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        let join_handles = self
            .sub_drivers
            .iter()
            .map(|driver| driver.monitor_events(events_tx.clone()))
            .collect::<Vec<_>>();

        tokio::spawn(async move {
            let mut failed = None;
            for result in futures_util::future::join_all(join_handles).await {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(err = %e, "Driver failed.");
                        failed = Some(e);
                    }
                    Err(e) => {
                        error!(err = %e, "Driver panicked.");
                        failed = Some(io::Error::new(io::ErrorKind::Other, e));
                    }
                }
            }
            failed.map_or(Ok(()), Err)
        })
    }
}

#[cfg(test)]
mod test {
    use std::{io, sync::Arc};

    use tokio::sync::mpsc;

    use super::Driver;
    use crate::{
        arbiter::Mode,
        controller::{Driver as _, Event},
    };

    struct OneShot(Event);

    impl crate::controller::Driver for OneShot {
        fn monitor_events(
            &self,
            events_tx: mpsc::Sender<Event>,
        ) -> tokio::task::JoinHandle<Result<(), io::Error>> {
            let event = self.0.clone();
            tokio::spawn(async move {
                events_tx
                    .send(event)
                    .await
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            })
        }
    }

    struct Failing;

    impl crate::controller::Driver for Failing {
        fn monitor_events(
            &self,
            _: mpsc::Sender<Event>,
        ) -> tokio::task::JoinHandle<Result<(), io::Error>> {
            tokio::spawn(async { Err(io::Error::new(io::ErrorKind::NotFound, "no device")) })
        }
    }

    #[tokio::test]
    async fn test_multi_driver() {
        let driver = Driver::new(vec![
            Arc::new(OneShot(Event::Pause)),
            Arc::new(OneShot(Event::SelectMode(Mode::Programmed))),
        ]);
        let (events_tx, mut events_rx) = mpsc::channel(4);
        driver.monitor_events(events_tx).await.unwrap().unwrap();

        let mut events = vec![events_rx.recv().await.unwrap(), events_rx.recv().await.unwrap()];
        events.sort_by_key(|event| format!("{:?}", event));
        assert_eq!(vec![Event::Pause, Event::SelectMode(Mode::Programmed)], events);
        assert_eq!(None, events_rx.recv().await);
    }

    #[tokio::test]
    async fn test_multi_driver_failure() {
        let driver = Driver::new(vec![Arc::new(OneShot(Event::Resume)), Arc::new(Failing)]);
        let (events_tx, _events_rx) = mpsc::channel(4);
        let result = driver.monitor_events(events_tx).await.unwrap();
        assert_eq!(io::ErrorKind::NotFound, result.unwrap_err().kind());
    }
}
