//! # usb-audio-sync
//!
//! A `no_std`, allocation-free playback core for a USB Audio Class speaker
//! on NXP LPC18xx/43xx parts. The host sends isochronous packets on its own
//! clock; the I2S transmitter drains them on the MCU's clock. Instead of
//! resampling, this crate keeps the two in step by switching the I2S
//! fractional divider between a *nominal* setting and a slightly *fast* one
//! depending on how full the packet buffer is.
//!
//! ## Architecture
//!
//! | Layer | Module | Purpose |
//! |-------|--------|---------|
//! | Clocking | [`divider`] | Prescaler/X/Y search and the per-rate table |
//! | Hardware | [`peripheral`] | `AudioPeripheral` trait the board implements |
//! | I/O | [`io`] | Packet ring buffer and the transmit-interrupt controller |
//! | Session | [`session`] | Rate changes and the interrupt entry points |
//! | USB | [`control`] | Sampling-frequency `SET_CUR`/`GET_CUR` |
//!
//! ## Quick start
//!
//! ```ignore
//! use usb_audio_sync::divider::{AudioFormat, ClockProfile, DividerTable};
//! use usb_audio_sync::session::SessionCell;
//!
//! static SESSION: SessionCell = SessionCell::new();
//!
//! // Startup, before enabling the USB and I2S interrupts.
//! SESSION.with_exclusive(|s| {
//!     s.install_table(DividerTable::build(&ClockProfile::LPC18XX, AudioFormat::STEREO_16));
//!     s.reconfigure(48_000, &mut i2s)
//! });
//!
//! // USB isochronous OUT:
//! SESSION.with_shared(|s| s.on_iso_packet(packet));
//!
//! // I2S transmit interrupt:
//! SESSION.with_shared(|s| s.on_transmit_interrupt(&mut i2s));
//! ```
//!
//! ## Features
//!
//! | Feature | Default | Enables |
//! |---------|---------|---------|
//! | `defmt` | no | `defmt` logging and `defmt::Format` on public types |
//!
//! ## Audio parameters
//!
//! - **Sample format:** 16-bit stereo, one `u32` frame per FIFO word
//! - **Rates listed:** [`constants::SUPPORTED_RATES`] (16 kHz and 32 kHz are rejected)
//! - **Maximum rate:** [`constants::MAX_SAMPLE_RATE`]
//! - **Buffer storage:** [`constants::AUDIO_BUFFER_BYTES`], sized per rate at activation

#![no_std]

#[macro_use]
mod fmt;

pub mod constants;
pub mod control;
pub mod divider;
pub mod error;
pub mod io;
pub mod peripheral;
pub mod session;

pub use error::SessionError;
pub use peripheral::AudioPeripheral;
pub use session::{Diagnostics, PlaybackSession, SessionCell, SessionConfig};
