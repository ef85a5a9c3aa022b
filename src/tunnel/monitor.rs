// ABOUTME: Liveness monitor: probes a transport on a fixed interval.
// ABOUTME: The first failed or stalled probe is reported as a fault and ends the monitor.

use super::error::Fault;
use crate::ssh::{self, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

pub(crate) async fn run(
    transport: Arc<dyn Transport>,
    interval: Duration,
    cancel: CancellationToken,
    faults: mpsc::Sender<Fault>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        // A probe that outlives one interval counts as a failure.
        let probe = tokio::select! {
            _ = cancel.cancelled() => return,
            result = tokio::time::timeout(interval, transport.probe()) => result,
        };

        let error = match probe {
            Ok(Ok(())) => {
                trace!("Liveness probe ok");
                continue;
            }
            Ok(Err(e)) => e,
            Err(_) => ssh::Error::Timeout(interval),
        };

        warn!(error = %error, "Liveness probe failed");
        let _ = faults.try_send(Fault::Liveness(error));
        return;
    }
}
