// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Feeding a pipeline from a live event source.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::error::CollectorError;

use super::{Collector, CollectorEvent};

/// Feed `events` into `collector` until every sender is dropped.
///
/// While the source is quiet, [`Collector::flush_if_due`] runs every `tick`
/// so a partial batch is not held back until the next event. The collector
/// is left open; the caller closes it. Returns the number of events fed.
pub async fn feed_channel<C, P>(
    collector: &mut C,
    events: &mut mpsc::Receiver<CollectorEvent>,
    tick: Duration,
    mut progress: P,
) -> Result<usize, CollectorError>
where
    C: Collector,
    P: FnMut(usize),
{
    let mut ticker = tokio::time::interval(tick.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut fed = 0usize;
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => {
                    collector.process(event).await?;
                    fed += 1;
                    progress(fed);
                }
                None => break,
            },
            _ = ticker.tick() => collector.flush_if_due().await?,
        }
    }
    debug!(fed, "Event source closed");
    Ok(fed)
}
