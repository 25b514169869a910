use crate::config::KeepAliveConfig;
use crate::dispatcher::LoopEvent;
use log::{debug, info, warn};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use vertocore::MessageId;

/// Periodic liveness pings for one connection.
///
/// The monitor only owns the ticker; the ping itself is sent and correlated
/// by the dispatch loop like any other request. At most one ping is
/// outstanding at a time.
pub(crate) struct KeepAliveMonitor {
    config: KeepAliveConfig,
    ticker: Option<JoinHandle<()>>,
    outstanding: Option<MessageId>,
}

impl KeepAliveMonitor {
    pub fn new(config: KeepAliveConfig) -> Self {
        Self {
            config,
            ticker: None,
            outstanding: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Starts ticking for the connection tagged `generation`.
    pub fn start(&mut self, generation: u64, loop_tx: mpsc::UnboundedSender<LoopEvent>) {
        self.stop();
        let interval = self.config.interval;
        debug!(target: "Verto/Keepalive", "Starting keepalive every {interval:?}");
        self.ticker = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if loop_tx.send(LoopEvent::KeepAliveTick { generation }).is_err() {
                    debug!(target: "Verto/Keepalive", "Dispatch loop gone, exiting keepalive ticker.");
                    return;
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            debug!(target: "Verto/Keepalive", "Stopping keepalive");
            ticker.abort();
        }
        self.outstanding = None;
    }

    /// Whether a tick should produce a ping.
    pub fn should_ping(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        if let Some(id) = &self.outstanding {
            debug!(target: "Verto/Keepalive", "Ping {id} still outstanding, skipping tick");
            return false;
        }
        true
    }

    pub fn ping_sent(&mut self, id: MessageId) {
        debug!(target: "Verto/Keepalive", "Sending keepalive ping {id}");
        self.outstanding = Some(id);
    }

    /// Records the response to a ping. Any response proves liveness.
    pub fn pong_received(&mut self, id: &MessageId) {
        if self.outstanding.as_ref() == Some(id) {
            debug!(target: "Verto/Keepalive", "Received keepalive pong {id}");
            self.outstanding = None;
        } else {
            info!(target: "Verto/Keepalive", "Late keepalive response {id}");
        }
    }

    pub fn ping_timed_out(&mut self, id: &MessageId) {
        warn!(
            target: "Verto/Keepalive",
            "No keepalive response to {id} within {:?}", self.config.timeout
        );
        self.outstanding = None;
    }
}

impl Drop for KeepAliveMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
