//! The node's reading producer: the flood simulator or the real sensors,
//! selected by the current mode.

use std::{fmt, str::FromStr};

use serde::Deserialize;

use crate::sensors::SensorSource;
use crate::sim::FloodSim;
use crate::Reading;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Readings come from the phase simulator.
    #[serde(alias = "sim")]
    Simulated,
    /// Readings come from the attached hardware.
    Real,
}

impl Mode {
    pub fn toggled(self) -> Self {
        match self {
            Self::Simulated => Self::Real,
            Self::Real => Self::Simulated,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simulated => write!(f, "sim"),
            Self::Real => write!(f, "real"),
        }
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sim" | "simulated" => Ok(Self::Simulated),
            "real" => Ok(Self::Real),
            other => anyhow::bail!("unknown mode {other:?} (use sim/real)"),
        }
    }
}

pub struct Station<S> {
    mode: Mode,
    sim: FloodSim,
    sensors: S,
}

impl<S: SensorSource> Station<S> {
    pub fn new(mode: Mode, sim: FloodSim, sensors: S) -> Self {
        Self { mode, sim, sensors }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn sim(&self) -> &FloodSim {
        &self.sim
    }

    /// Switch modes.  Entering `Simulated` always restarts the flood cycle
    /// from `Normal`, whatever the phase timer says.
    pub fn set_mode(&mut self, mode: Mode, now_ms: u64) {
        if mode == Mode::Simulated {
            self.sim.restart(now_ms);
        }
        if mode != self.mode {
            tracing::info!(from = %self.mode, to = %mode, "mode changed");
        }
        self.mode = mode;
    }

    pub fn toggle_mode(&mut self, now_ms: u64) {
        self.set_mode(self.mode.toggled(), now_ms);
    }

    /// Produce this cycle's reading.  `None` means the hardware read failed
    /// and nothing should be published this cycle.
    pub fn next_reading(&mut self, now_ms: u64) -> Option<Reading> {
        match self.mode {
            Mode::Simulated => Some(self.sim.tick(now_ms)),
            Mode::Real => match self.sensors.read() {
                Ok(r) if r.is_finite() => Some(r),
                Ok(r) => {
                    tracing::warn!(reading = ?r, "sensor returned non-numeric values, skipping cycle");
                    None
                }
                Err(e) => {
                    tracing::warn!("sensor read failed, skipping cycle: {e:#}");
                    None
                }
            },
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
