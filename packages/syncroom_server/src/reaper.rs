//! Periodic liveness sweep for connections that vanished without a clean disconnect.

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::ws::server::SyncServerHandle;

/// Asks the sync server to evict stale sessions every `period` until it shuts down.
pub async fn run(sync_server: SyncServerHandle, period: Duration) {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        log::trace!("Reaping stale sessions");
        if sync_server.reap().is_err() {
            log::debug!("Sync server stopped; ending reaper");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, ws::server::SyncServer};

    #[test_log::test(tokio::test(start_paused = true))]
    async fn stops_when_the_server_is_gone() {
        let (server, handle) = SyncServer::new(&Config::default());
        drop(server);

        tokio::time::timeout(Duration::from_secs(120), run(handle, Duration::from_secs(60)))
            .await
            .unwrap();
    }
}
