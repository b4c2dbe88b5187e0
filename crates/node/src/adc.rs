//! ADS1115 16-bit ADC driver over I2C for the rain and soil probes.
//!
//! Reads single-ended channels at PGA ±4.096 V, 128 SPS, single-shot mode.
//! Raw counts are mapped onto physical units with a two-point calibration
//! (`raw_dry` reads as `0`, `raw_wet` as `full_scale`).

#![cfg_attr(not(feature = "gpio"), allow(dead_code))]

use serde::Deserialize;
use std::time::Duration;

#[cfg(feature = "gpio")]
use rppal::i2c::I2c;
#[cfg(feature = "gpio")]
use std::thread;

// ── ADS1115 register addresses ──────────────────────────────────────────────

/// Conversion result register (read-only, 16-bit signed).
const REG_CONVERSION: u8 = 0x00;
/// Configuration register (read/write).
const REG_CONFIG: u8 = 0x01;

// ── Config register bit fields ──────────────────────────────────────────────
//
// Layout (MSB first):
//   [15]    OS       write 1 to start single-shot conversion
//   [14:12] MUX      input multiplexer (channel selection)
//   [11:9]  PGA      programmable gain amplifier
//   [8]     MODE     0 = continuous, 1 = single-shot
//   [7:5]   DR       data rate
//   [4:2]   comparator mode/polarity/latch
//   [1:0]   COMP_QUE 11 = comparator off

/// OS=1, PGA=001 (±4.096 V), MODE=1, DR=100 (128 SPS), COMP_QUE=11.
const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;

/// MUX values for AINx vs GND.
const MUX_SHIFT: u8 = 12;
const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

pub const MAX_CHANNEL: u8 = 3;

/// Largest single-ended reading (15-bit unsigned).
pub const ADS1115_MAX: i32 = 32767;

/// Conversion takes ~7.8 ms at 128 SPS.
const CONVERSION_WAIT: Duration = Duration::from_millis(9);

/// Conversion-ready flag when the config register is read back.
const OS_READY_BIT: u16 = 1 << 15;

fn config_for_channel(channel: u8) -> u16 {
    CONFIG_BASE | (MUX_SINGLE_ENDED[channel as usize] << MUX_SHIFT)
}

// ── Calibration ─────────────────────────────────────────────────────────────

/// One analog probe: which input it is wired to and how its counts map onto
/// a physical value.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AnalogChannel {
    pub channel: u8,
    pub raw_dry: i32,
    pub raw_wet: i32,
    /// Physical value reported at `raw_wet`.
    pub full_scale: f32,
}

impl AnalogChannel {
    /// Linear map of `raw` between the calibration points, clamped to
    /// `[0, full_scale]`.  A zero-width calibration yields NaN so the read is
    /// rejected downstream.
    pub fn scale(&self, raw: i32) -> f32 {
        let range = self.raw_dry - self.raw_wet;
        if range == 0 {
            return f32::NAN;
        }
        let frac = (self.raw_dry - raw) as f32 / range as f32;
        frac.clamp(0.0, 1.0) * self.full_scale
    }
}

// ── Driver ──────────────────────────────────────────────────────────────────

#[cfg(feature = "gpio")]
pub struct Ads1115 {
    i2c: I2c,
}

#[cfg(feature = "gpio")]
impl Ads1115 {
    /// Open I2C bus 1 and address the ADS1115 at `addr`.
    pub fn new(addr: u16) -> anyhow::Result<Self> {
        let mut i2c = I2c::new()?;
        i2c.set_slave_address(addr)?;
        tracing::info!(addr = format_args!("0x{addr:02x}"), "ads1115 initialised");
        Ok(Self { i2c })
    }

    /// Single-shot read of `channel`, clamped to the single-ended range.
    pub fn read_raw(&mut self, channel: u8) -> anyhow::Result<i32> {
        anyhow::ensure!(
            channel <= MAX_CHANNEL,
            "ADS1115 channel {channel} out of range (0-{MAX_CHANNEL})"
        );

        self.i2c
            .block_write(REG_CONFIG, &config_for_channel(channel).to_be_bytes())?;
        thread::sleep(CONVERSION_WAIT);

        for _ in 0..3 {
            let mut buf = [0u8; 2];
            self.i2c.block_read(REG_CONFIG, &mut buf)?;
            if u16::from_be_bytes(buf) & OS_READY_BIT != 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let mut buf = [0u8; 2];
        self.i2c.block_read(REG_CONVERSION, &mut buf)?;
        Ok((i16::from_be_bytes(buf) as i32).clamp(0, ADS1115_MAX))
    }

    /// Read `ch` and return its calibrated value.
    pub fn read_scaled(&mut self, ch: &AnalogChannel) -> anyhow::Result<f32> {
        let raw = self.read_raw(ch.channel)?;
        tracing::trace!(channel = ch.channel, raw, "adc sample");
        Ok(ch.scale(raw))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn soil() -> AnalogChannel {
        AnalogChannel {
            channel: 1,
            raw_dry: 26000,
            raw_wet: 12000,
            full_scale: 100.0,
        }
    }

    // -- Config register construction -----------------------------------------

    #[test]
    fn config_register_per_channel() {
        assert_eq!(config_for_channel(0), 0xC383);
        assert_eq!(config_for_channel(1), 0xD383);
        assert_eq!(config_for_channel(2), 0xE383);
        assert_eq!(config_for_channel(3), 0xF383);
    }

    #[test]
    fn config_base_fields() {
        assert_eq!((CONFIG_BASE >> 15) & 1, 1, "OS should start a conversion");
        assert_eq!((CONFIG_BASE >> 9) & 0b111, 0b001, "PGA should be ±4.096 V");
        assert_eq!((CONFIG_BASE >> 8) & 1, 1, "MODE should be single-shot");
        assert_eq!((CONFIG_BASE >> 5) & 0b111, 0b100, "DR should be 128 SPS");
        assert_eq!(CONFIG_BASE & 0b11, 0b11, "comparator should be off");
    }

    // -- Calibration ----------------------------------------------------------

    #[test]
    fn scale_calibration_endpoints() {
        let ch = soil();
        assert_eq!(ch.scale(26000), 0.0);
        assert_eq!(ch.scale(12000), 100.0);
        assert_eq!(ch.scale(19000), 50.0);
    }

    #[test]
    fn scale_clamps_outside_calibration() {
        let ch = soil();
        assert_eq!(ch.scale(30000), 0.0);
        assert_eq!(ch.scale(0), 100.0);
    }

    #[test]
    fn scale_inverted_wiring() {
        // Rain probes that read higher when wet.
        let ch = AnalogChannel {
            channel: 0,
            raw_dry: 1000,
            raw_wet: 21000,
            full_scale: 80.0,
        };
        assert_eq!(ch.scale(1000), 0.0);
        assert_eq!(ch.scale(21000), 80.0);
        assert_eq!(ch.scale(11000), 40.0);
    }

    #[test]
    fn scale_zero_range_is_nan() {
        let ch = AnalogChannel {
            raw_wet: 26000,
            ..soil()
        };
        assert!(ch.scale(20000).is_nan());
    }
}
