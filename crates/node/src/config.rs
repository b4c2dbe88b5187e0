//! Node configuration: optional TOML file, environment overrides, and
//! validation.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use crate::adc::{AnalogChannel, ADS1115_MAX, MAX_CHANNEL};
use crate::input::DEBOUNCE_MS;
use crate::sensors::SensorsConfig;
use crate::sim::PHASE_DURATION_MS;
use crate::station::Mode;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Startup mode; the button toggles it at runtime.
    pub mode: Mode,
    /// Pause after each publish.
    pub publish_every_ms: u64,
    pub mqtt: MqttConfig,
    pub sim: SimConfig,
    pub input: InputConfig,
    pub sensors: SensorsConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    /// A random 16-bit hex suffix is appended per process.
    pub client_id_prefix: String,
    pub keep_alive_s: u64,
    /// Upper bound on a single connection attempt.
    pub connect_timeout_s: u64,
    /// Fixed pause between failed connection attempts.
    pub reconnect_delay_s: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub phase_duration_ms: u64,
    /// Fixed seed for reproducible runs; random when unset.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub button_enabled: bool,
    pub button_pin: u8,
    pub debounce_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Simulated,
            publish_every_ms: 2_000,
            mqtt: MqttConfig::default(),
            sim: SimConfig::default(),
            input: InputConfig::default(),
            sensors: SensorsConfig::default(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".to_string(),
            port: 1883,
            topic: "fiap/gs/inundacao".to_string(),
            client_id_prefix: "esp32-client".to_string(),
            keep_alive_s: 30,
            connect_timeout_s: 5,
            reconnect_delay_s: 5,
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            phase_duration_ms: PHASE_DURATION_MS,
            seed: None,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            button_enabled: true,
            button_pin: 4,
            debounce_ms: DEBOUNCE_MS,
        }
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins on the Raspberry Pi 40-pin header available for general
/// use.  GPIO 0-1 belong to the ID EEPROM and 2-3 to the ADS1115's I2C bus.
const VALID_GPIO_PINS: &[u8] = &[
    4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

/// rumqttc refuses keep-alive intervals shorter than this.
const MIN_KEEP_ALIVE_S: u64 = 5;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate every section.  Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.publish_every_ms == 0 {
            errors.push("publish_every_ms must be positive".to_string());
        }
        self.validate_mqtt(&mut errors);
        self.validate_sim(&mut errors);
        self.validate_pins(&mut errors);
        self.validate_sensors(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_mqtt(&self, errors: &mut Vec<String>) {
        let m = &self.mqtt;

        if m.host.trim().is_empty() {
            errors.push("mqtt.host is empty".to_string());
        }
        if m.port == 0 {
            errors.push("mqtt.port must be non-zero".to_string());
        }
        if m.topic.trim().is_empty() {
            errors.push("mqtt.topic is empty".to_string());
        } else if m.topic.contains(['+', '#']) {
            errors.push(format!(
                "mqtt.topic '{}' contains a wildcard; publish topics must be literal",
                m.topic
            ));
        }
        if m.client_id_prefix.trim().is_empty() {
            errors.push("mqtt.client_id_prefix is empty".to_string());
        }
        if m.keep_alive_s < MIN_KEEP_ALIVE_S {
            errors.push(format!(
                "mqtt.keep_alive_s must be at least {MIN_KEEP_ALIVE_S}, got {}",
                m.keep_alive_s
            ));
        }
        if m.connect_timeout_s == 0 {
            errors.push("mqtt.connect_timeout_s must be positive".to_string());
        }
        if m.reconnect_delay_s == 0 {
            errors.push("mqtt.reconnect_delay_s must be positive".to_string());
        }
    }

    fn validate_sim(&self, errors: &mut Vec<String>) {
        if self.sim.phase_duration_ms == 0 {
            errors.push("sim.phase_duration_ms must be positive".to_string());
        }
        // Phases shorter than the publish cadence would be skipped over.
        if self.sim.phase_duration_ms > 0
            && self.publish_every_ms > 0
            && self.sim.phase_duration_ms < self.publish_every_ms
        {
            errors.push(format!(
                "sim.phase_duration_ms ({}) is shorter than publish_every_ms ({})",
                self.sim.phase_duration_ms, self.publish_every_ms
            ));
        }
    }

    fn validate_pins(&self, errors: &mut Vec<String>) {
        let mut pins: Vec<(&str, u8)> = vec![
            ("sensors.trigger_pin", self.sensors.trigger_pin),
            ("sensors.echo_pin", self.sensors.echo_pin),
            ("sensors.dht_pin", self.sensors.dht_pin),
        ];
        if self.input.button_enabled {
            pins.push(("input.button_pin", self.input.button_pin));
        }

        let mut seen: HashSet<u8> = HashSet::new();
        for (name, pin) in pins {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "{name}: {pin} is not a usable BCM GPIO pin (allowed: 4-27)"
                ));
            } else if !seen.insert(pin) {
                errors.push(format!("{name}: GPIO {pin} is already in use"));
            }
        }
    }

    fn validate_sensors(&self, errors: &mut Vec<String>) {
        let s = &self.sensors;

        if !(s.mount_height_cm > 0.0) {
            errors.push(format!(
                "sensors.mount_height_cm must be positive, got {}",
                s.mount_height_cm
            ));
        }
        if s.adc_addr > 0x7F {
            errors.push(format!(
                "sensors.adc_addr {:#x} is not a 7-bit I2C address",
                s.adc_addr
            ));
        }

        validate_channel("sensors.rain", &s.rain, errors);
        validate_channel("sensors.soil", &s.soil, errors);
        if s.rain.channel == s.soil.channel {
            errors.push(format!(
                "sensors.rain and sensors.soil both use ADS1115 channel {}",
                s.rain.channel
            ));
        }
    }
}

fn validate_channel(ctx: &str, ch: &AnalogChannel, errors: &mut Vec<String>) {
    if ch.channel > MAX_CHANNEL {
        errors.push(format!(
            "{ctx}: channel {} out of range (0-{MAX_CHANNEL})",
            ch.channel
        ));
    }
    if !(0..=ADS1115_MAX).contains(&ch.raw_dry) {
        errors.push(format!(
            "{ctx}: raw_dry {} out of ADS1115 range [0, {ADS1115_MAX}]",
            ch.raw_dry
        ));
    }
    if !(0..=ADS1115_MAX).contains(&ch.raw_wet) {
        errors.push(format!(
            "{ctx}: raw_wet {} out of ADS1115 range [0, {ADS1115_MAX}]",
            ch.raw_wet
        ));
    }
    if ch.raw_dry == ch.raw_wet {
        errors.push(format!(
            "{ctx}: raw_dry and raw_wet are both {}, calibration range is zero",
            ch.raw_dry
        ));
    }
    if !(ch.full_scale > 0.0) {
        errors.push(format!(
            "{ctx}: full_scale must be positive, got {}",
            ch.full_scale
        ));
    }
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

/// Parse `key` with `FromStr`, naming the variable on failure.
fn parse_var<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}"))
}

impl Config {
    /// Overlay variables from `lookup` (normally `std::env::var`).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("MQTT_HOST") {
            self.mqtt.host = v;
        }
        if let Some(v) = lookup("MQTT_PORT") {
            self.mqtt.port = parse_var("MQTT_PORT", &v)?;
        }
        if let Some(v) = lookup("MQTT_TOPIC") {
            self.mqtt.topic = v;
        }
        if let Some(v) = lookup("CLIENT_ID_PREFIX") {
            self.mqtt.client_id_prefix = v;
        }
        if let Some(v) = lookup("NODE_MODE") {
            self.mode = parse_var("NODE_MODE", &v)?;
        }
        if let Some(v) = lookup("PUBLISH_EVERY_MS") {
            self.publish_every_ms = parse_var("PUBLISH_EVERY_MS", &v)?;
        }
        if let Some(v) = lookup("SIM_SEED") {
            self.sim.seed = Some(parse_var("SIM_SEED", &v)?);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Parse a TOML config string.  Missing keys take their defaults.
pub fn parse(contents: &str) -> Result<Config> {
    toml::from_str(contents).context("failed to parse config")
}

/// Read `path` (defaults when it does not exist), apply environment
/// overrides, and validate the result.
pub fn load(path: &str) -> Result<Config> {
    load_with(path, |k| std::env::var(k).ok())
}

/// [`load`] with overrides taken from `lookup` instead of the process
/// environment.
pub fn load_with(path: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let mut config = if Path::new(path).exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;
        parse(&contents).with_context(|| format!("config file: {path}"))?
    } else {
        tracing::info!(path, "no config file, using defaults");
        Config::default()
    };

    config
        .apply_overrides(lookup)
        .context("invalid environment override")?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
