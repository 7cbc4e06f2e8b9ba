//! I2S bit-clock divider search.
//!
//! The transmitter derives its bit clock from the peripheral clock through an
//! X/Y fractional divider followed by an integer prescaler:
//!
//! ```text
//! PCLK ──► × X / Y ──► ÷ (prescaler + 1) ──► MCLK = fs × channels × width × 2
//! ```
//!
//! X and Y are 8-bit, so the exact ratio is rarely reachable. [`search()`]
//! finds two approximations per rate: a *nominal* divider that rounds down
//! (output slightly slow) and a *fast* divider that rounds up (output slightly
//! fast). The playback controller toggles between them to track the host.
//!
//! ## Fixed-point layout
//!
//! The ideal ratio `fs × channels × width × 2 × N / PCLK` is held as a
//! [`U16F16`]. N (1..=64) is chosen as large as possible while the ratio stays
//! below 1.0, which maximises the fractional resolution left for X/Y.

pub mod table;

use fixed::types::U16F16;

use crate::error::SessionError;
use crate::io::clock_controller::SpeedMode;

pub use table::{ClockProfile, DividerTable};

/// Largest prescaler stage count the I2S bit-rate register can hold.
pub const MAX_STAGES: u32 = 64;

const HALF: U16F16 = U16F16::from_bits(1 << 15);

/// PCM layout of the isochronous stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AudioFormat {
    /// Interleaved channel count.
    pub channels: u8,
    /// Bits per sample word.
    pub word_width_bits: u8,
}

impl AudioFormat {
    /// Stereo, 16-bit: the only layout the speaker descriptors advertise.
    pub const STEREO_16: Self = AudioFormat {
        channels: 2,
        word_width_bits: 16,
    };

    /// Bytes per interleaved frame.
    pub const fn frame_bytes(&self) -> usize {
        self.channels as usize * self.word_width_bits as usize / 8
    }

    /// MCLK cycles per frame (two MCLK edges per bit).
    const fn clock_multiplier(&self) -> u64 {
        self.channels as u64 * self.word_width_bits as u64 * 2
    }
}

/// One X/Y pair for the fractional divider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct XyDivider {
    /// Numerator, 1..=255.
    pub x: u8,
    /// Denominator, 1..=255.
    pub y: u8,
}

/// Divider settings for one sample rate.
///
/// `fast` never produces a slower clock than `nominal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DividerConfig {
    /// Value for the bit-rate register: stage count minus one (0..=63).
    pub bitrate_prescaler: u8,
    /// Rounded-down pair, programmed when the buffer is at or below target.
    pub nominal: XyDivider,
    /// Rounded-up pair, programmed while the buffer drains a backlog.
    pub fast: XyDivider,
}

impl DividerConfig {
    /// Prescaler stage count N.
    pub const fn stages(&self) -> u32 {
        self.bitrate_prescaler as u32 + 1
    }

    /// The X/Y pair used in `mode`.
    pub const fn xy(&self, mode: SpeedMode) -> XyDivider {
        match mode {
            SpeedMode::Nominal => self.nominal,
            SpeedMode::Fast => self.fast,
        }
    }

    /// Sample rate produced by this configuration, in millihertz.
    pub fn effective_rate_millihz(
        &self,
        peripheral_clock_hz: u32,
        format: AudioFormat,
        mode: SpeedMode,
    ) -> u64 {
        let xy = self.xy(mode);
        let numerator = u64::from(peripheral_clock_hz) * u64::from(xy.x) * 1000;
        let denominator = u64::from(xy.y) * u64::from(self.stages()) * format.clock_multiplier();
        numerator.checked_div(denominator).unwrap_or(0)
    }
}

#[derive(Clone, Copy)]
struct Candidate {
    y: u8,
    error: U16F16,
}

/// Compute the nominal/fast divider pair for `sample_rate`.
///
/// Returns [`SessionError::UnsupportedRate`] when no prescaler keeps the ratio
/// below 1.0, i.e. the peripheral clock is too slow for this rate.
pub fn search(
    sample_rate: u32,
    format: AudioFormat,
    peripheral_clock_hz: u32,
) -> Result<DividerConfig, SessionError> {
    let unsupported = SessionError::UnsupportedRate(sample_rate);
    if sample_rate == 0 || peripheral_clock_hz == 0 || format.clock_multiplier() == 0 {
        return Err(unsupported);
    }

    let base = u64::from(sample_rate) * format.clock_multiplier();
    let pclk = u64::from(peripheral_clock_hz);

    let (stages, divider) = (1..=MAX_STAGES)
        .rev()
        .find_map(|n| {
            // Overflow means a ratio far above 1.0 at this N.
            let raw = base.checked_mul(1 << 16)?.checked_mul(u64::from(n))? / pclk;
            (raw < 1 << 16).then(|| (n, U16F16::from_bits(raw as u32)))
        })
        .ok_or(unsupported)?;

    let mut round_down: Option<Candidate> = None;
    let mut round_up: Option<Candidate> = None;

    for y in (1..=u8::MAX).rev() {
        let Some(x) = divider.checked_mul_int(u32::from(y)) else {
            continue;
        };
        let whole = x.to_num::<u32>();
        if whole > u32::from(u8::MAX) {
            continue;
        }

        let frac = x.frac();
        if frac > HALF {
            // Rounding up would need X = 256.
            if whole == u32::from(u8::MAX) {
                continue;
            }
            let error = U16F16::ONE - frac;
            if round_up.map_or(true, |best| error < best.error) {
                round_up = Some(Candidate { y, error });
            }
        } else if round_down.map_or(true, |best| frac < best.error) {
            round_down = Some(Candidate { y, error: frac });
        }
    }

    // X is recomputed from the exact ratio rather than the truncated U16F16.
    let exact_x = |y: u8| u64::from(y) * base * u64::from(stages) / pclk;
    let clamp = |x: u64| x.clamp(1, u64::from(u8::MAX)) as u8;

    let nominal = round_down.map(|c| XyDivider {
        x: clamp(exact_x(c.y)),
        y: c.y,
    });
    let fast = round_up.map(|c| XyDivider {
        x: clamp(exact_x(c.y) + 1),
        y: c.y,
    });

    let (nominal, fast) = match (nominal, fast) {
        (Some(nominal), Some(fast)) => (nominal, fast),
        (Some(only), None) | (None, Some(only)) => (only, only),
        (None, None) => return Err(unsupported),
    };

    let config = DividerConfig {
        bitrate_prescaler: (stages - 1) as u8,
        nominal,
        fast,
    };
    debug!(
        "divider {=u32} Hz: N={=u32} nominal {=u8}/{=u8} fast {=u8}/{=u8}",
        sample_rate,
        stages,
        nominal.x,
        nominal.y,
        fast.x,
        fast.y
    );
    Ok(config)
}
