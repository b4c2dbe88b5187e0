//! Five-phase flood simulator.
//!
//! Drives synthetic readings through one flood event after another:
//!
//! ```text
//! Normal ──▶ Rising ──▶ Alert ──▶ Critical ──▶ Receding
//!   ▲                                              │
//!   └──────────────[reset to baseline]─────────────┘
//! ```
//!
//! Each phase lasts `phase_duration_ms`.  Water level, rainfall and soil
//! humidity are carried across ticks as bounded random walks; temperature and
//! air humidity are fresh draws every tick.  The per-phase rules live in
//! [`Phase::profile`] so the table can be checked on its own.

use std::fmt;

use crate::Reading;

/// Default time spent in each phase before advancing.
pub const PHASE_DURATION_MS: u64 = 45_000;

/// Accumulator values at the start of every cycle.
pub const BASELINE: DriftState = DriftState {
    rain_mm_hour: 5.0,
    water_level_cm: 180.0,
    soil_humidity_pct: 65.0,
};

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Calm weather, light rain at most.
    Normal,
    /// Storm onset: heavy rain, river climbing.
    Rising,
    /// Sustained rain on saturated soil, river past the alert mark.
    Alert,
    /// Rain easing off while the river peaks.
    Critical,
    /// River and soil draining back towards baseline.
    Receding,
}

impl Phase {
    pub const COUNT: usize = 5;

    const ORDER: [Phase; Phase::COUNT] = [
        Phase::Normal,
        Phase::Rising,
        Phase::Alert,
        Phase::Critical,
        Phase::Receding,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// The phase that follows this one; Receding wraps to Normal.
    pub fn next(self) -> Phase {
        Self::ORDER[(self.index() + 1) % Self::COUNT]
    }

    /// Generation rules for this phase.
    pub fn profile(self) -> &'static PhaseProfile {
        &PROFILES[self.index()]
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Rising => write!(f, "rising"),
            Self::Alert => write!(f, "alert"),
            Self::Critical => write!(f, "critical"),
            Self::Receding => write!(f, "receding"),
        }
    }
}

// ---------------------------------------------------------------------------
// Profile table
// ---------------------------------------------------------------------------

/// Closed-open interval `[lo, hi)` for a uniform draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub lo: f32,
    pub hi: f32,
}

const fn span(lo: f32, hi: f32) -> Span {
    Span { lo, hi }
}

/// How one accumulated channel evolves during a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule {
    /// Report the accumulator unchanged.
    Hold,
    /// Fresh draw reported as-is; the accumulator is left alone.
    Fresh(Span),
    /// Fresh draw that also overwrites the accumulator.
    Replace(Span),
    /// `acc = min(acc + draw, ceiling)`.
    Rise { step: Span, ceiling: f32 },
    /// `acc = max(acc - draw, floor)`.
    Fall { step: Span, floor: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseProfile {
    pub rain: Rule,
    pub water: Rule,
    pub soil: Rule,
    pub temp: Span,
    pub humidity_air: Span,
}

/// Indexed by `Phase::index()`.
const PROFILES: [PhaseProfile; Phase::COUNT] = [
    // Normal
    PhaseProfile {
        rain: Rule::Fresh(span(0.0, 10.0)),
        water: Rule::Hold,
        soil: Rule::Hold,
        temp: span(24.0, 29.0),
        humidity_air: span(80.0, 88.0),
    },
    // Rising
    PhaseProfile {
        rain: Rule::Replace(span(50.0, 75.0)),
        water: Rule::Rise { step: span(8.0, 12.0), ceiling: 300.0 },
        soil: Rule::Rise { step: span(2.0, 4.0), ceiling: 90.0 },
        temp: span(23.0, 26.0),
        humidity_air: span(88.0, 95.0),
    },
    // Alert
    PhaseProfile {
        rain: Rule::Replace(span(25.0, 50.0)),
        water: Rule::Rise { step: span(10.0, 15.0), ceiling: 420.0 },
        soil: Rule::Rise { step: span(0.5, 1.5), ceiling: 95.0 },
        temp: span(22.0, 25.0),
        humidity_air: span(92.0, 98.0),
    },
    // Critical: soil is saturated and noisy, so it is not accumulated.
    PhaseProfile {
        rain: Rule::Replace(span(5.0, 25.0)),
        water: Rule::Rise { step: span(1.0, 5.0), ceiling: 450.0 },
        soil: Rule::Fresh(span(95.0, 100.0)),
        temp: span(22.0, 25.0),
        humidity_air: span(90.0, 96.0),
    },
    // Receding
    PhaseProfile {
        rain: Rule::Replace(span(0.0, 5.0)),
        water: Rule::Fall { step: span(4.0, 8.0), floor: 180.0 },
        soil: Rule::Fall { step: span(1.0, 2.0), floor: 65.0 },
        temp: span(23.0, 27.0),
        humidity_air: span(85.0, 92.0),
    },
];

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// The three values that drift across ticks within one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftState {
    pub rain_mm_hour: f32,
    pub water_level_cm: f32,
    pub soil_humidity_pct: f32,
}

pub struct FloodSim {
    phase: Phase,
    last_change_ms: u64,
    phase_duration_ms: u64,
    drift: DriftState,
    rng: fastrand::Rng,
}

impl FloodSim {
    /// Start a fresh cycle in `Normal` at baseline, with the phase clock
    /// anchored at `now_ms`.
    pub fn new(now_ms: u64, seed: u64) -> Self {
        Self {
            phase: Phase::Normal,
            last_change_ms: now_ms,
            phase_duration_ms: PHASE_DURATION_MS,
            drift: BASELINE,
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    pub fn with_phase_duration(mut self, ms: u64) -> Self {
        self.phase_duration_ms = ms;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn drift(&self) -> DriftState {
        self.drift
    }

    pub fn last_change_ms(&self) -> u64 {
        self.last_change_ms
    }

    /// Force `Normal` at baseline and restart the phase clock.
    pub fn restart(&mut self, now_ms: u64) {
        self.phase = Phase::Normal;
        self.last_change_ms = now_ms;
        self.drift = BASELINE;
        tracing::info!(now_ms, "simulation cycle restarted");
    }

    /// Advance the model to `now_ms` and produce one reading.
    ///
    /// At most one phase transition happens per call, however long the gap
    /// since the previous one.
    pub fn tick(&mut self, now_ms: u64) -> Reading {
        if now_ms.saturating_sub(self.last_change_ms) > self.phase_duration_ms {
            self.advance(now_ms);
        }

        let profile = self.phase.profile();
        let rng = &mut self.rng;
        let drift = &mut self.drift;

        // Draw order is part of the seeded output: rain, water, soil, temp, air.
        let rain = profile.rain.apply(&mut drift.rain_mm_hour, rng);
        let water = profile.water.apply(&mut drift.water_level_cm, rng);
        let soil = profile.soil.apply(&mut drift.soil_humidity_pct, rng);

        Reading {
            water_level_cm: water,
            rain_mm_hour: rain,
            soil_humidity_pct: soil,
            temp_c: uniform(rng, profile.temp),
            humidity_air_pct: uniform(rng, profile.humidity_air),
        }
    }

    fn advance(&mut self, now_ms: u64) {
        let from = self.phase;
        self.phase = from.next();
        self.last_change_ms = now_ms;
        if self.phase == Phase::Normal {
            self.drift = BASELINE;
        }
        tracing::info!(%from, to = %self.phase, now_ms, "phase changed");
    }
}

impl Rule {
    /// Evolve `acc` under this rule and return the value to report.
    fn apply(self, acc: &mut f32, rng: &mut fastrand::Rng) -> f32 {
        match self {
            Rule::Hold => *acc,
            Rule::Fresh(s) => uniform(rng, s),
            Rule::Replace(s) => {
                *acc = uniform(rng, s);
                *acc
            }
            Rule::Rise { step, ceiling } => {
                *acc = (*acc + uniform(rng, step)).min(ceiling);
                *acc
            }
            Rule::Fall { step, floor } => {
                *acc = (*acc - uniform(rng, step)).max(floor);
                *acc
            }
        }
    }
}

/// Draw from `[lo, hi)` in steps of a thousandth of the span.
fn uniform(rng: &mut fastrand::Rng, s: Span) -> f32 {
    s.lo + rng.u32(0..1000) as f32 / 1000.0 * (s.hi - s.lo)
}

// ===========================================================================
// Tests
// ===========================================================================
