//! Mode push-button.  The `gpio` feature gates the real rppal input pin;
//! without it, a mock pin that is never pressed stands in.
//!
//! The button is wired active-low with the internal pull-up enabled, so a
//! press is a falling edge.

use anyhow::Result;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, InputPin};

/// Default settle time before a level change is accepted.
pub const DEBOUNCE_MS: u64 = 50;

// ---------------------------------------------------------------------------
// Debouncer
// ---------------------------------------------------------------------------

/// Edge detector for a bouncing contact.
///
/// A level change restarts the settle timer; the stable level only follows
/// the raw level once it has held for longer than `window_ms`.  The first
/// sample is taken as the stable level, so a button held at boot (or a line
/// stuck low) never reports a press.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window_ms: u64,
    last_raw_low: Option<bool>,
    stable_low: bool,
    last_edge_ms: u64,
}

impl Debouncer {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            last_raw_low: None,
            stable_low: false,
            last_edge_ms: 0,
        }
    }

    /// Feed one raw sample.  Returns `true` exactly once per accepted press
    /// (settled high→low transition).
    pub fn update(&mut self, raw_low: bool, now_ms: u64) -> bool {
        let Some(last) = self.last_raw_low else {
            self.last_raw_low = Some(raw_low);
            self.stable_low = raw_low;
            self.last_edge_ms = now_ms;
            return false;
        };

        if raw_low != last {
            self.last_raw_low = Some(raw_low);
            self.last_edge_ms = now_ms;
        }

        if now_ms.saturating_sub(self.last_edge_ms) > self.window_ms && raw_low != self.stable_low {
            self.stable_low = raw_low;
            return self.stable_low;
        }

        false
    }

    #[cfg(test)]
    pub fn is_pressed(&self) -> bool {
        self.stable_low
    }
}

// ---------------------------------------------------------------------------
// Real GPIO input (requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub(crate) struct ButtonPin {
    pin: InputPin,
}

#[cfg(feature = "gpio")]
impl ButtonPin {
    pub(crate) fn new(bcm_pin: u8) -> Result<Self> {
        let pin = Gpio::new()?.get(bcm_pin)?.into_input_pullup();
        tracing::info!(bcm_pin, "mode button ready");
        Ok(Self { pin })
    }

    pub(crate) fn is_low(&mut self) -> bool {
        self.pin.is_low()
    }
}

// ---------------------------------------------------------------------------
// Mock input (development: no hardware, never pressed)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub(crate) struct ButtonPin {
    pub(super) low: bool,
}

#[cfg(not(feature = "gpio"))]
impl ButtonPin {
    pub(crate) fn new(bcm_pin: u8) -> Result<Self> {
        tracing::info!(bcm_pin, "[mock-gpio] mode button registered (not wired)");
        Ok(Self { low: false })
    }

    pub(crate) fn is_low(&mut self) -> bool {
        self.low
    }
}

// ---------------------------------------------------------------------------
// Button
// ---------------------------------------------------------------------------

pub(crate) struct ModeButton {
    pin: ButtonPin,
    debouncer: Debouncer,
}

impl ModeButton {
    pub(crate) fn new(bcm_pin: u8, debounce_ms: u64) -> Result<Self> {
        Ok(Self {
            pin: ButtonPin::new(bcm_pin)?,
            debouncer: Debouncer::new(debounce_ms),
        })
    }

    /// Sample the pin once; `true` when a debounced press just landed.
    pub(crate) fn poll(&mut self, now_ms: u64) -> bool {
        let low = self.pin.is_low();
        self.debouncer.update(low, now_ms)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed `(low, now_ms)` samples and return the times a press fired.
    fn presses(d: &mut Debouncer, samples: &[(bool, u64)]) -> Vec<u64> {
        samples
            .iter()
            .filter(|(low, t)| d.update(*low, *t))
            .map(|(_, t)| *t)
            .collect()
    }

    // -- Debouncer ----------------------------------------------------------

    #[test]
    fn idle_high_never_fires() {
        let mut d = Debouncer::new(DEBOUNCE_MS);
        let samples: Vec<(bool, u64)> = (0..100).map(|i| (false, i * 10)).collect();
        assert!(presses(&mut d, &samples).is_empty());
        assert!(!d.is_pressed());
    }

    #[test]
    fn clean_press_fires_once_after_window() {
        let mut d = Debouncer::new(DEBOUNCE_MS);
        let fired = presses(
            &mut d,
            &[(false, 0), (true, 100), (true, 140), (true, 150), (true, 151), (true, 200)],
        );
        // Edge at 100; 150 - 100 = 50 is not past the window, 151 is.
        assert_eq!(fired, vec![151]);
        assert!(d.is_pressed());
    }

    #[test]
    fn bounce_restarts_settle_timer() {
        let mut d = Debouncer::new(DEBOUNCE_MS);
        let fired = presses(
            &mut d,
            &[
                (false, 0),
                (true, 100),
                (false, 110),
                (true, 120),
                (false, 125),
                (true, 130),
                (true, 175),
                (true, 181),
            ],
        );
        assert_eq!(fired, vec![181]);
    }

    #[test]
    fn release_does_not_fire() {
        let mut d = Debouncer::new(DEBOUNCE_MS);
        presses(&mut d, &[(false, 0), (true, 10), (true, 70)]);
        assert!(d.is_pressed());
        let fired = presses(&mut d, &[(false, 100), (false, 200)]);
        assert!(fired.is_empty());
        assert!(!d.is_pressed());
    }

    #[test]
    fn two_presses_fire_twice() {
        let mut d = Debouncer::new(DEBOUNCE_MS);
        let fired = presses(
            &mut d,
            &[
                (false, 0),
                (true, 5),
                (true, 60),
                (false, 100),
                (false, 200),
                (true, 300),
                (true, 400),
            ],
        );
        assert_eq!(fired, vec![60, 400]);
    }

    #[test]
    fn short_glitch_is_ignored() {
        let mut d = Debouncer::new(DEBOUNCE_MS);
        let fired = presses(&mut d, &[(false, 0), (true, 100), (false, 120), (false, 300)]);
        assert!(fired.is_empty());
    }

    #[test]
    fn held_at_boot_never_fires() {
        let mut d = Debouncer::new(DEBOUNCE_MS);
        let samples: Vec<(bool, u64)> = (0..20).map(|i| (true, i * 5)).collect();
        assert!(presses(&mut d, &samples).is_empty());
        assert!(d.is_pressed());
    }

    #[test]
    fn held_at_boot_fires_after_release_and_press() {
        let mut d = Debouncer::new(DEBOUNCE_MS);
        let fired = presses(
            &mut d,
            &[(true, 0), (true, 100), (false, 200), (false, 260), (true, 300), (true, 351)],
        );
        assert_eq!(fired, vec![351]);
    }

    // -- ModeButton (mock) --------------------------------------------------

    #[cfg(not(feature = "gpio"))]
    #[test]
    fn mock_button_press_is_debounced() {
        let mut b = ModeButton::new(4, DEBOUNCE_MS).unwrap();
        assert!(!b.poll(0));
        b.pin.low = true;
        assert!(!b.poll(10));
        assert!(b.poll(61));
        assert!(!b.poll(120));
    }

    #[cfg(not(feature = "gpio"))]
    #[test]
    fn mock_button_held_from_boot_does_not_toggle() {
        let mut b = ModeButton::new(4, DEBOUNCE_MS).unwrap();
        b.pin.low = true;
        let fired: Vec<u64> = (0..40).map(|i| i * 5).filter(|&t| b.poll(t)).collect();
        assert!(fired.is_empty(), "press reported at {fired:?}");
    }
}
