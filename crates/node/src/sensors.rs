//! Real-sensor path.  The `gpio` feature gates the hardware drivers
//! (HC-SR04 ultrasonic ranger, ADS1115 rain/soil probes, DHT22); without it,
//! a mock source produces calm readings and logs that it is not wired.

use anyhow::{bail, Result};
use serde::Deserialize;

use crate::adc::AnalogChannel;
use crate::Reading;

#[cfg(feature = "gpio")]
use crate::adc::Ads1115;
#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, InputPin, IoPin, Mode, OutputPin};
#[cfg(feature = "gpio")]
use std::{
    thread,
    time::{Duration, Instant},
};

/// Anything that can produce a reading from the physical world.
pub trait SensorSource {
    fn read(&mut self) -> Result<Reading>;
}

/// Speed of sound at ~20 °C in cm/µs.
const SOUND_CM_PER_US: f32 = 0.0343;

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SensorsConfig {
    /// BCM pin driving the HC-SR04 trigger.
    pub trigger_pin: u8,
    /// BCM pin reading the HC-SR04 echo (through a divider).
    pub echo_pin: u8,
    /// BCM pin on the DHT22 data line.
    pub dht_pin: u8,
    /// Distance from the ranger to the river bed.
    pub mount_height_cm: f32,
    /// 7-bit I2C address of the ADS1115.
    pub adc_addr: u16,
    pub rain: AnalogChannel,
    pub soil: AnalogChannel,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            trigger_pin: 23,
            echo_pin: 24,
            dht_pin: 17,
            mount_height_cm: 500.0,
            adc_addr: 0x48,
            rain: AnalogChannel {
                channel: 0,
                raw_dry: 26000,
                raw_wet: 8000,
                full_scale: 100.0,
            },
            soil: AnalogChannel {
                channel: 1,
                raw_dry: 26000,
                raw_wet: 12000,
                full_scale: 100.0,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Water level from an echo round-trip time, given how high above the bed
/// the ranger is mounted.  Never negative.
pub fn echo_to_level_cm(echo_us: u32, mount_height_cm: f32) -> f32 {
    let distance = echo_us as f32 * SOUND_CM_PER_US / 2.0;
    (mount_height_cm - distance).max(0.0)
}

/// Decode a DHT22 frame into `(temp_c, humidity_pct)`.
#[cfg_attr(not(feature = "gpio"), allow(dead_code))]
pub fn decode_dht22(frame: [u8; 5]) -> Result<(f32, f32)> {
    let sum = frame[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != frame[4] {
        bail!(
            "dht22 checksum mismatch: computed {sum:#04x}, frame says {:#04x}",
            frame[4]
        );
    }

    let humidity = u16::from_be_bytes([frame[0], frame[1]]) as f32 / 10.0;
    let magnitude = u16::from_be_bytes([frame[2] & 0x7F, frame[3]]) as f32 / 10.0;
    let temp = if frame[2] & 0x80 != 0 { -magnitude } else { magnitude };
    Ok((temp, humidity))
}

// ---------------------------------------------------------------------------
// Hardware sensors (production: requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------

/// Longest echo we wait for; ~5 m round trip.
#[cfg(feature = "gpio")]
const ECHO_TIMEOUT: Duration = Duration::from_millis(30);

/// High pulses longer than this are a `1` bit in the DHT22 frame.
#[cfg(feature = "gpio")]
const DHT_BIT_THRESHOLD_US: u128 = 50;

#[cfg(feature = "gpio")]
pub struct HardwareSensors {
    trigger: OutputPin,
    echo: InputPin,
    dht: IoPin,
    adc: Ads1115,
    cfg: SensorsConfig,
}

#[cfg(feature = "gpio")]
impl HardwareSensors {
    pub fn new(cfg: &SensorsConfig) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut trigger = gpio.get(cfg.trigger_pin)?.into_output();
        trigger.set_low();
        let echo = gpio.get(cfg.echo_pin)?.into_input();
        let mut dht = gpio.get(cfg.dht_pin)?.into_io(Mode::Output);
        dht.set_high();
        let adc = Ads1115::new(cfg.adc_addr)?;

        tracing::info!(
            trigger = cfg.trigger_pin,
            echo = cfg.echo_pin,
            dht = cfg.dht_pin,
            "hardware sensors initialised"
        );

        Ok(Self {
            trigger,
            echo,
            dht,
            adc,
            cfg: cfg.clone(),
        })
    }

    /// Fire one 10 µs trigger pulse and time the echo.
    fn measure_echo_us(&mut self) -> Result<u32> {
        self.trigger.set_low();
        thread::sleep(Duration::from_micros(2));
        self.trigger.set_high();
        thread::sleep(Duration::from_micros(10));
        self.trigger.set_low();

        let wait = Instant::now();
        while self.echo.is_low() {
            if wait.elapsed() > ECHO_TIMEOUT {
                bail!("ultrasonic echo never started");
            }
        }
        let start = Instant::now();
        while self.echo.is_high() {
            if start.elapsed() > ECHO_TIMEOUT {
                bail!("ultrasonic echo never ended");
            }
        }
        Ok(start.elapsed().as_micros() as u32)
    }

    /// Bit-bang one DHT22 transaction.
    fn read_dht(&mut self) -> Result<(f32, f32)> {
        // Start signal: hold low >1 ms, then release.
        self.dht.set_mode(Mode::Output);
        self.dht.set_low();
        thread::sleep(Duration::from_millis(2));
        self.dht.set_high();
        self.dht.set_mode(Mode::Input);

        // Response: low 80 µs, high 80 µs.
        self.wait_level(false)?;
        self.wait_level(true)?;
        self.wait_level(false)?;

        let mut frame = [0u8; 5];
        for bit in 0..40 {
            self.wait_level(true)?;
            let high = Instant::now();
            self.wait_level(false)?;
            if high.elapsed().as_micros() > DHT_BIT_THRESHOLD_US {
                frame[bit / 8] |= 0x80 >> (bit % 8);
            }
        }

        self.dht.set_mode(Mode::Output);
        self.dht.set_high();
        decode_dht22(frame)
    }

    /// Spin until the DHT line reads `high`, giving up after 1 ms.
    fn wait_level(&self, high: bool) -> Result<()> {
        let start = Instant::now();
        while self.dht.is_high() != high {
            if start.elapsed() > Duration::from_millis(1) {
                bail!("dht22 timed out waiting for {}", if high { "high" } else { "low" });
            }
        }
        Ok(())
    }
}

#[cfg(feature = "gpio")]
impl SensorSource for HardwareSensors {
    fn read(&mut self) -> Result<Reading> {
        let echo_us = self.measure_echo_us()?;
        let rain = self.adc.read_scaled(&self.cfg.rain)?;
        let soil = self.adc.read_scaled(&self.cfg.soil)?;
        let (temp, humidity) = self.read_dht()?;

        Ok(Reading {
            water_level_cm: echo_to_level_cm(echo_us, self.cfg.mount_height_cm),
            rain_mm_hour: rain,
            soil_humidity_pct: soil,
            temp_c: temp,
            humidity_air_pct: humidity,
        })
    }
}

// ---------------------------------------------------------------------------
// Mock sensors (development: no hardware, calm weather with a little noise)
// ---------------------------------------------------------------------------

#[cfg(not(feature = "gpio"))]
pub struct MockSensors {
    rng: fastrand::Rng,
    cfg: SensorsConfig,
}

#[cfg(not(feature = "gpio"))]
impl MockSensors {
    pub fn new(cfg: &SensorsConfig) -> Result<Self> {
        tracing::info!(
            trigger = cfg.trigger_pin,
            echo = cfg.echo_pin,
            dht = cfg.dht_pin,
            "[mock-gpio] sensors registered (not wired)"
        );
        Ok(Self {
            rng: fastrand::Rng::new(),
            cfg: cfg.clone(),
        })
    }

    fn jitter(&mut self, center: f32, spread: f32) -> f32 {
        center + (self.rng.f32() * 2.0 - 1.0) * spread
    }
}

#[cfg(not(feature = "gpio"))]
impl SensorSource for MockSensors {
    fn read(&mut self) -> Result<Reading> {
        // An echo for a river ~180 cm deep under the configured mount.
        let distance_cm = self.cfg.mount_height_cm - self.jitter(180.0, 1.5);
        let echo_us = (distance_cm * 2.0 / SOUND_CM_PER_US).max(0.0) as u32;

        Ok(Reading {
            water_level_cm: echo_to_level_cm(echo_us, self.cfg.mount_height_cm),
            rain_mm_hour: self.jitter(2.0, 2.0).max(0.0),
            soil_humidity_pct: self.jitter(65.0, 1.0),
            temp_c: self.jitter(25.0, 1.0),
            humidity_air_pct: self.jitter(82.0, 2.0),
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- echo_to_level_cm ---------------------------------------------------

    #[test]
    fn echo_converts_round_trip_to_level() {
        // 20 000 µs round trip = 343 cm to the surface.
        let level = echo_to_level_cm(20_000, 500.0);
        assert!((level - 157.0).abs() < 0.01, "level {level}");
    }

    #[test]
    fn echo_past_bed_clamps_to_zero() {
        assert_eq!(echo_to_level_cm(40_000, 500.0), 0.0);
    }

    #[test]
    fn zero_echo_reads_full_mount_height() {
        assert_eq!(echo_to_level_cm(0, 420.0), 420.0);
    }

    // -- decode_dht22 -------------------------------------------------------

    #[test]
    fn dht22_positive_temperature() {
        // 65.2 %RH, 35.1 °C
        let frame = [0x02, 0x8C, 0x01, 0x5F, 0xEE];
        let (t, h) = decode_dht22(frame).unwrap();
        assert!((t - 35.1).abs() < 1e-4, "temp {t}");
        assert!((h - 65.2).abs() < 1e-4, "humidity {h}");
    }

    #[test]
    fn dht22_negative_temperature() {
        // -10.1 °C
        let frame = [0x02, 0x8C, 0x80, 0x65, 0x73];
        let (t, _) = decode_dht22(frame).unwrap();
        assert!((t + 10.1).abs() < 1e-4, "temp {t}");
    }

    #[test]
    fn dht22_bad_checksum_is_error() {
        let err = decode_dht22([0x02, 0x8C, 0x01, 0x5F, 0x00]).unwrap_err();
        assert!(format!("{err}").contains("checksum"), "{err}");
    }

    // -- Mock source --------------------------------------------------------

    #[cfg(not(feature = "gpio"))]
    #[test]
    fn mock_sensors_produce_calm_finite_readings() {
        let mut s = MockSensors::new(&SensorsConfig::default()).unwrap();
        for _ in 0..100 {
            let r = s.read().unwrap();
            assert!(r.is_finite());
            assert!((170.0..190.0).contains(&r.water_level_cm), "water {}", r.water_level_cm);
            assert!((0.0..=4.0).contains(&r.rain_mm_hour), "rain {}", r.rain_mm_hour);
            assert!((63.0..=67.0).contains(&r.soil_humidity_pct));
        }
    }

    #[test]
    fn default_wiring_uses_distinct_pins() {
        let c = SensorsConfig::default();
        assert_ne!(c.trigger_pin, c.echo_pin);
        assert_ne!(c.trigger_pin, c.dht_pin);
        assert_ne!(c.echo_pin, c.dht_pin);
        assert_ne!(c.rain.channel, c.soil.channel);
    }
}
