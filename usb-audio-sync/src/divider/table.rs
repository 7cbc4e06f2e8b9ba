//! Per-rate divider table, built once at startup.

use crate::constants::{FRAME_BYTES, SUPPORTED_RATES};

use super::{search, AudioFormat, DividerConfig};

/// Rates the speaker lists but never plays.
const UNSEARCHED_RATES: [u32; 2] = [16_000, 32_000];

/// Peripheral clock of a particular part, plus how far to bias the CD/DAT
/// rates upwards.
///
/// A crystal running a little slow makes the nominal divider fall behind the
/// host. Searching 44.1 kHz and 48 kHz a few hertz high compensates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockProfile {
    /// I2S peripheral clock in Hz.
    pub peripheral_clock_hz: u32,
    /// Added to 44 100 and 48 000 before searching.
    pub rate_trim_hz: u32,
}

impl ClockProfile {
    /// LPC18xx, I2S clocked at 180 MHz.
    pub const LPC18XX: Self = ClockProfile {
        peripheral_clock_hz: 180_000_000,
        rate_trim_hz: 0,
    };

    /// LPC43xx, I2S clocked at 204 MHz.
    pub const LPC43XX: Self = ClockProfile {
        peripheral_clock_hz: 204_000_000,
        rate_trim_hz: 1,
    };

    fn search_rate(&self, rate: u32) -> u32 {
        match rate {
            44_100 | 48_000 => rate + self.rate_trim_hz,
            _ => rate,
        }
    }
}

/// Divider configuration for each of [`SUPPORTED_RATES`].
///
/// `None` marks a rate that must be rejected at activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DividerTable {
    entries: [Option<DividerConfig>; SUPPORTED_RATES.len()],
    peripheral_clock_hz: u32,
    format: AudioFormat,
}

impl DividerTable {
    /// A table with every rate unsupported.
    pub const fn empty() -> Self {
        DividerTable {
            entries: [None; SUPPORTED_RATES.len()],
            peripheral_clock_hz: 0,
            format: AudioFormat::STEREO_16,
        }
    }

    /// Run the divider search for every playable rate.
    ///
    /// The playback path moves [`FRAME_BYTES`] per FIFO word, so a `format`
    /// with any other frame width yields a table with nothing supported.
    pub fn build(profile: &ClockProfile, format: AudioFormat) -> Self {
        let mut table = DividerTable {
            entries: [None; SUPPORTED_RATES.len()],
            peripheral_clock_hz: profile.peripheral_clock_hz,
            format,
        };

        if format.frame_bytes() != FRAME_BYTES {
            warn!(
                "{=u8}x{=u8}-bit frames are {=usize} bytes, playback needs {=usize}",
                format.channels,
                format.word_width_bits,
                format.frame_bytes(),
                FRAME_BYTES
            );
            return table;
        }

        for (entry, &rate) in table.entries.iter_mut().zip(SUPPORTED_RATES.iter()) {
            if UNSEARCHED_RATES.contains(&rate) {
                continue;
            }
            match search(profile.search_rate(rate), format, profile.peripheral_clock_hz) {
                Ok(config) => *entry = Some(config),
                Err(_) => warn!("no divider for {=u32} Hz", rate),
            }
        }

        info!(
            "divider table built for {=u32} Hz peripheral clock, {=usize} rates",
            profile.peripheral_clock_hz,
            table.supported().count()
        );
        table
    }

    /// Divider configuration for `rate`, if it is playable.
    pub fn lookup(&self, rate: u32) -> Option<DividerConfig> {
        SUPPORTED_RATES
            .iter()
            .position(|&r| r == rate)
            .and_then(|index| self.entries[index])
    }

    /// Whether [`lookup()`](Self::lookup) would succeed.
    pub fn is_supported(&self, rate: u32) -> bool {
        self.lookup(rate).is_some()
    }

    /// Playable rates with their configurations, in ascending rate order.
    pub fn supported(&self) -> impl Iterator<Item = (u32, DividerConfig)> + '_ {
        SUPPORTED_RATES
            .iter()
            .zip(self.entries.iter())
            .filter_map(|(&rate, entry)| entry.map(|config| (rate, config)))
    }

    /// Peripheral clock the table was built for.
    pub fn peripheral_clock_hz(&self) -> u32 {
        self.peripheral_clock_hz
    }

    /// Stream layout the table was built for.
    pub fn format(&self) -> AudioFormat {
        self.format
    }
}

impl Default for DividerTable {
    fn default() -> Self {
        Self::empty()
    }
}
