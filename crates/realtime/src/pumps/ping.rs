//! WebSocket ping pump: periodic keepalive pings.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Queues a keepalive ping every `period` until cancelled or the write
/// pump is gone. The first ping goes out one full period after connect.
///
/// Liveness is enforced on the read side by the read deadline.
pub(crate) async fn ping_pump(
    write_tx: mpsc::Sender<tungstenite::Message>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while cancel
        .run_until_cancelled(ticks.tick())
        .await
        .is_some()
    {
        let ping = tungstenite::Message::Ping(Vec::new().into());
        if write_tx.send(ping).await.is_err() {
            trace!("write pump gone, stopping pings");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ping_pump_stops_on_cancel() {
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let c = cancel.clone();
        let handle = tokio::spawn(async move {
            ping_pump(tx, Duration::from_secs(25), c).await;
        });

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");
    }

    #[tokio::test(start_paused = true)]
    async fn ping_pump_sends_on_each_period() {
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let c = cancel.clone();
        tokio::spawn(async move {
            ping_pump(tx, Duration::from_secs(25), c).await;
        });

        tokio::time::sleep(Duration::from_secs(51)).await;
        assert!(matches!(rx.try_recv(), Ok(tungstenite::Message::Ping(_))));
        assert!(matches!(rx.try_recv(), Ok(tungstenite::Message::Ping(_))));
        assert!(rx.try_recv().is_err());
        cancel.cancel();
    }
}
