//! Liveness monitoring for WebSocket connections.
//!
//! A per-connection task pings on an interval and counts ticks where no pong
//! has arrived since the previous ping. Too many misses in a row and the
//! session is torn down so half-open connections cannot pin resources.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::registry::ProviderRegistry;
use crate::session::{teardown, ConnectionSession};

pub fn spawn(
    session: Arc<ConnectionSession>,
    providers: Arc<ProviderRegistry>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(session.config.heartbeat_interval_secs);
        let max_misses = session.config.heartbeat_max_misses;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick fires immediately, skip it
        ticker.tick().await;

        let mut misses: u32 = 0;
        loop {
            ticker.tick().await;
            if !session.is_active() {
                return;
            }

            if session.last_pong().elapsed() > interval {
                misses += 1;
                tracing::debug!(connection = %session.id, misses, "heartbeat miss");
            } else {
                misses = 0;
            }

            if !session.send_ping() {
                // writer is gone, the connection is already dead
                misses = max_misses;
            }

            if misses >= max_misses {
                tracing::warn!(connection = %session.id, "heartbeat timeout");
                teardown(&session, &providers, "heartbeat timeout").await;
                return;
            }
        }
    })
}
