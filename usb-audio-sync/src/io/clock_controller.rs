//! Interrupt-driven I2S feeder with adaptive bit-clock speed.
//!
//! [`PlaybackClockController`] runs in the I2S transmit interrupt. Each time
//! the FIFO drops to its low-water level it tops the FIFO up from the
//! [`AudioRingBuffer`], then compares the buffer occupancy with the session
//! watermarks and, if needed, swaps the fractional divider between the
//! nominal and fast settings.
//!
//! ## Architecture
//!
//! ```text
//! USB ISO OUT           AudioRingBuffer              I2S TX FIFO (8 words)
//! ┌──────────┐        ┌──────────────────┐         ┌─────────────┐
//! │ packets  ├─write─►│ ████████░░░░░░░░ ├─frames─►│ L R │ L R │…│
//! └──────────┘        └───────┬──────────┘         └─────────────┘
//!                             │ occupancy                  ▲
//!                             ▼                            │ X/Y
//!                      transition() ── SpeedUp/SlowDown ───┘
//! ```
//!
//! ## Hysteresis
//!
//! ```text
//!   occupancy:  0 ───────── low ═══════════ high ───────── capacity
//!   Nominal:    stay        stay            ≥ high → Fast
//!   Fast:       < low → Nominal   stay      stay
//! ```
//!
//! Between the watermarks the current mode is kept, so an occupancy that
//! wobbles inside the band never toggles the divider.
//!
//! ## Usage with RTIC
//!
//! ```ignore
//! static SESSION: SessionCell = SessionCell::new();
//!
//! #[task(binds = I2S0, local = [i2s], priority = 2)]
//! fn i2s_tx(cx: i2s_tx::Context) {
//!     SESSION.with_shared(|session| {
//!         session.on_transmit_interrupt(cx.local.i2s);
//!     });
//! }
//! ```

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::constants::{TX_FIFO_DEPTH, TX_FIFO_IRQ_DEPTH};
use crate::divider::DividerConfig;
use crate::peripheral::AudioPeripheral;

use super::ring_buffer::AudioRingBuffer;

/// Which divider pair is programmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SpeedMode {
    /// Rounded-down divider, output marginally slower than the host.
    #[default]
    Nominal = 0,
    /// Rounded-up divider, output marginally faster than the host.
    Fast = 1,
}

impl SpeedMode {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => SpeedMode::Fast,
            _ => SpeedMode::Nominal,
        }
    }
}

/// Peripheral reprogramming requested by a [`transition()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockAction {
    /// Leave the divider alone.
    Hold,
    /// Program the fast pair.
    SpeedUp,
    /// Program the nominal pair.
    SlowDown,
}

/// Occupancy thresholds, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Watermarks {
    /// At or above this the controller switches to [`SpeedMode::Fast`].
    pub high: usize,
    /// Below this the controller returns to [`SpeedMode::Nominal`].
    pub low: usize,
}

impl Watermarks {
    /// Thresholds at 5/8 (rounded up) and 3/8 (rounded down) of `capacity`.
    pub const fn for_capacity(capacity: usize) -> Self {
        Watermarks {
            high: (capacity * 5).div_ceil(8),
            low: capacity * 3 / 8,
        }
    }
}

/// Next speed mode for the given buffer occupancy.
pub fn transition(
    mode: SpeedMode,
    occupancy: usize,
    marks: Watermarks,
) -> (SpeedMode, ClockAction) {
    match mode {
        SpeedMode::Nominal if occupancy >= marks.high => (SpeedMode::Fast, ClockAction::SpeedUp),
        SpeedMode::Fast if occupancy < marks.low => (SpeedMode::Nominal, ClockAction::SlowDown),
        _ => (mode, ClockAction::Hold),
    }
}

/// Transmit-interrupt half of a playback session.
///
/// All state is owned by the interrupt that calls [`service()`](Self::service);
/// other contexts may only read it.
pub struct PlaybackClockController {
    mode: AtomicU8,
    speed_ups: AtomicU32,
    slow_downs: AtomicU32,
}

impl PlaybackClockController {
    /// Create a controller in [`SpeedMode::Nominal`].
    pub const fn new() -> Self {
        PlaybackClockController {
            mode: AtomicU8::new(SpeedMode::Nominal as u8),
            speed_ups: AtomicU32::new(0),
            slow_downs: AtomicU32::new(0),
        }
    }

    /// Current speed mode.
    pub fn mode(&self) -> SpeedMode {
        SpeedMode::from_u8(self.mode.load(Ordering::Relaxed))
    }

    /// Force [`SpeedMode::Nominal`]; the caller programs the divider.
    pub fn reset(&mut self) {
        *self.mode.get_mut() = SpeedMode::Nominal as u8;
    }

    /// Number of switches to the fast divider.
    pub fn speed_ups(&self) -> u32 {
        self.speed_ups.load(Ordering::Relaxed)
    }

    /// Number of switches back to the nominal divider.
    pub fn slow_downs(&self) -> u32 {
        self.slow_downs.load(Ordering::Relaxed)
    }

    /// Handle one transmit-FIFO interrupt.
    ///
    /// Does nothing unless the FIFO is at or below [`TX_FIFO_IRQ_DEPTH`].
    /// Otherwise fills it to [`TX_FIFO_DEPTH`], repeating the last frame if
    /// the buffer runs dry, then re-evaluates the speed mode.
    ///
    /// # Returns
    ///
    /// The number of frames written to the FIFO.
    pub fn service<P: AudioPeripheral, const N: usize>(
        &self,
        buffer: &AudioRingBuffer<N>,
        divider: &DividerConfig,
        marks: Watermarks,
        peripheral: &mut P,
    ) -> usize {
        let level = peripheral.tx_fifo_level();
        if level > TX_FIFO_IRQ_DEPTH {
            return 0;
        }

        let slots = TX_FIFO_DEPTH.saturating_sub(level);
        for _ in 0..slots {
            peripheral.send_sample(buffer.drain_frame().sample());
        }

        let occupancy = buffer.occupancy();
        let (next, action) = transition(self.mode(), occupancy, marks);
        match action {
            ClockAction::Hold => {}
            ClockAction::SpeedUp => {
                self.speed_ups.fetch_add(1, Ordering::Relaxed);
            }
            ClockAction::SlowDown => {
                self.slow_downs.fetch_add(1, Ordering::Relaxed);
            }
        }
        if action != ClockAction::Hold {
            let xy = divider.xy(next);
            peripheral.set_divider(divider.bitrate_prescaler, xy.x, xy.y);
            self.mode.store(next as u8, Ordering::Relaxed);
            trace!("clock {} at {=usize} bytes", next, occupancy);
        }

        slots
    }
}

impl Default for PlaybackClockController {
    fn default() -> Self {
        Self::new()
    }
}
