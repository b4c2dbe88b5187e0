mod adc;
mod config;
mod input;
mod mqtt;
mod reading;
mod sensors;
mod sim;
mod station;

use anyhow::{Context, Result};
use std::{env, time::Duration};
use tokio::time::{sleep_until, Instant};
use tracing_subscriber::EnvFilter;

use input::ModeButton;
use mqtt::Link;
use sensors::SensorSource;
use sim::FloodSim;
use station::{Mode, Station};

pub(crate) use reading::Reading;

#[cfg(feature = "gpio")]
type Sensors = sensors::HardwareSensors;
#[cfg(not(feature = "gpio"))]
type Sensors = sensors::MockSensors;

/// How often the mode button is sampled while waiting for the next cycle.
const BUTTON_POLL: Duration = Duration::from_millis(5);

/// Milliseconds since `boot` on the monotonic clock.
fn millis_since(boot: Instant) -> u64 {
    boot.elapsed().as_millis() as u64
}

/// Encode and publish one reading.  Failures are logged and the cycle moves
/// on; the next reading is produced on schedule.
async fn publish<S: SensorSource>(link: &Link, topic: &str, station: &Station<S>, reading: &Reading) {
    let payload = match reading.to_payload() {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(?reading, "{e:#}");
            return;
        }
    };

    match link.publish(topic, payload.clone()).await {
        Ok(()) => tracing::info!(topic, mode = %station.mode(), %payload, "published reading"),
        Err(e) => tracing::warn!("{e:#}"),
    }

    if station.mode() == Mode::Simulated {
        let sim = station.sim();
        tracing::debug!(
            phase = %sim.phase(),
            phase_since_ms = sim.last_change_ms(),
            drift = ?sim.drift(),
            "simulator state"
        );
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "flood-node.toml".to_string());
    let cfg = config::load(&config_path)?;
    let boot = Instant::now();

    // ── Reading source ──────────────────────────────────────────────
    let seed = cfg.sim.seed.unwrap_or_else(|| fastrand::u64(..));
    let sim = FloodSim::new(millis_since(boot), seed).with_phase_duration(cfg.sim.phase_duration_ms);
    let sensors = Sensors::new(&cfg.sensors).context("failed to initialise sensors")?;
    let mut station = Station::new(cfg.mode, sim, sensors);

    let mut button = if cfg.input.button_enabled {
        Some(ModeButton::new(cfg.input.button_pin, cfg.input.debounce_ms)?)
    } else {
        None
    };

    tracing::info!(
        mode = %station.mode(),
        seed,
        phase_duration_ms = cfg.sim.phase_duration_ms,
        publish_every_ms = cfg.publish_every_ms,
        "flood node starting"
    );

    // ── MQTT ────────────────────────────────────────────────────────
    let mut link = Link::connect(&cfg.mqtt);
    let topic = cfg.mqtt.topic.as_str();
    let cadence = Duration::from_millis(cfg.publish_every_ms);

    loop {
        if !link.is_connected() {
            tracing::info!(client_id = link.client_id(), "waiting for broker");
        }
        link.wait_connected().await?;

        let now = millis_since(boot);
        if let Some(reading) = station.next_reading(now) {
            publish(&link, topic, &station, &reading).await;
        }

        // Fixed delay after publish, sampling the button meanwhile so a
        // press shorter than the cadence still registers.
        let deadline = Instant::now() + cadence;
        match button.as_mut() {
            Some(button) => {
                while Instant::now() < deadline {
                    if button.poll(millis_since(boot)) {
                        station.toggle_mode(millis_since(boot));
                    }
                    sleep_until((Instant::now() + BUTTON_POLL).min(deadline)).await;
                }
            }
            None => sleep_until(deadline).await,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn millis_since_tracks_monotonic_clock() {
        let boot = Instant::now();
        assert_eq!(millis_since(boot), 0);
        tokio::time::advance(Duration::from_millis(45_001)).await;
        assert_eq!(millis_since(boot), 45_001);
    }

    /// Hardware that is never consulted in simulated mode.
    struct Unplugged;

    impl SensorSource for Unplugged {
        fn read(&mut self) -> Result<Reading> {
            anyhow::bail!("no sensors attached")
        }
    }

    #[test]
    fn simulated_cycle_publishes_valid_payloads() {
        // One full flood event at the default cadence, end to end through
        // the station and payload encoder.
        let mut station = Station::new(Mode::Simulated, FloodSim::new(0, 7), Unplugged);
        let mut phases = Vec::new();
        for i in 0..=(5 * 45_000 / 2_000 + 5) {
            let reading = station.next_reading(i * 2_000).unwrap();
            let json: serde_json::Value =
                serde_json::from_str(&reading.to_payload().unwrap()).unwrap();
            assert_eq!(json.as_object().unwrap().len(), 5);
            let phase = station.sim().phase();
            if phases.last() != Some(&phase) {
                phases.push(phase);
            }
        }
        use sim::Phase::*;
        assert_eq!(phases, vec![Normal, Rising, Alert, Critical, Receding, Normal]);
    }
}
