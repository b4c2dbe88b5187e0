//! Broker link: owns the rumqttc event loop, tracks connection state, and
//! publishes readings.

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, NetworkOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::config::MqttConfig;

/// Outgoing request queue depth between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 10;

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// How the event loop reacts to failed connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed pause between attempts; it never grows.
    pub delay: Duration,
    /// Give up after this many consecutive failures.  `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn forever(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Pause before the next attempt after `failures` consecutive failures,
    /// or `None` once the attempt budget is spent.
    pub fn next_delay(&self, failures: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if failures >= max => None,
            _ => Some(self.delay),
        }
    }

    /// Pause after a poll error.  The first error after a working
    /// connection reconnects straight away; only failed attempts wait.
    pub fn pause_after_error(&self, was_connected: bool, failures: u32) -> Option<Duration> {
        if was_connected {
            Some(Duration::ZERO)
        } else {
            self.next_delay(failures)
        }
    }
}

/// `<prefix>-<suffix in lowercase hex>`, unique enough per process.
pub fn client_id(prefix: &str, suffix: u16) -> String {
    format!("{prefix}-{suffix:x}")
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

pub struct Link {
    client: AsyncClient,
    connected: watch::Receiver<bool>,
    client_id: String,
}

impl Link {
    /// Configure the client and spawn the event loop.  The first connection
    /// attempt happens in the background; use [`Link::wait_connected`] before
    /// publishing.
    pub fn connect(cfg: &MqttConfig) -> Self {
        let client_id = client_id(&cfg.client_id_prefix, fastrand::u16(..));

        let mut options = MqttOptions::new(client_id.clone(), cfg.host.clone(), cfg.port);
        options.set_keep_alive(Duration::from_secs(cfg.keep_alive_s));

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        let mut network = NetworkOptions::new();
        network.set_connection_timeout(cfg.connect_timeout_s);
        eventloop.set_network_options(network);

        let (state_tx, connected) = watch::channel(false);
        let policy = RetryPolicy::forever(Duration::from_secs(cfg.reconnect_delay_s));
        tokio::spawn(drive(eventloop, state_tx, policy));

        tracing::info!(
            host = %cfg.host,
            port = cfg.port,
            client_id = %client_id,
            "mqtt link started"
        );

        Self {
            client,
            connected,
            client_id,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Block until the broker has acknowledged a connection.  Fails only if
    /// the event loop has stopped for good.
    pub async fn wait_connected(&mut self) -> Result<()> {
        self.connected
            .wait_for(|up| *up)
            .await
            .map(|_| ())
            .context("mqtt event loop stopped")
    }

    /// Fire-and-forget publish (QoS 0, not retained).
    pub async fn publish(&self, topic: &str, payload: String) -> Result<()> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .with_context(|| format!("publish to {topic} failed"))
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Poll the event loop, mirroring connection state into `state` and pausing
/// per `policy` after each failure.  rumqttc reconnects on the next poll.
async fn drive(mut eventloop: EventLoop, state: watch::Sender<bool>, policy: RetryPolicy) {
    let mut failures: u32 = 0;
    // Session acknowledged and not yet errored; a broker Disconnect clears
    // `state` but the loss only surfaces as the next poll error.
    let mut session = false;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                failures = 0;
                session = true;
                state.send_replace(true);
                tracing::info!("mqtt connected");
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                state.send_replace(false);
                tracing::warn!("mqtt disconnected by broker");
            }
            Ok(_) => {}
            Err(e) => {
                state.send_replace(false);
                let was_connected = std::mem::replace(&mut session, false);
                if !was_connected {
                    failures = failures.saturating_add(1);
                }
                match policy.pause_after_error(was_connected, failures) {
                    Some(delay) if delay.is_zero() => {
                        tracing::warn!("mqtt connection lost: {e}. reconnecting");
                    }
                    Some(delay) => {
                        tracing::warn!(
                            failures,
                            retry_in_s = delay.as_secs(),
                            "mqtt connection failed: {e}"
                        );
                        sleep(delay).await;
                    }
                    None => {
                        tracing::error!(failures, "mqtt connection failed: {e}. giving up");
                        return;
                    }
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
