//! Sample path from the USB receive interrupt to the I2S transmit FIFO.
//!
//! ## Components
//!
//! | Type | Runs in | Description |
//! |------|---------|-------------|
//! | [`AudioRingBuffer`] | USB RX (write) / I2S TX (drain) | Lock-free byte ring with flush-on-overrun |
//! | [`PlaybackClockController`] | I2S TX | FIFO top-up and nominal/fast divider hysteresis |
//!
//! ## Frame layout
//!
//! Each 32-bit FIFO word is one stereo frame as it arrives from the host:
//! left sample in the lower 16 bits, right in the upper 16. The ring buffer
//! never reorders bytes, so a packet's little-endian frames go to the wire
//! unchanged.

pub mod clock_controller;
pub mod ring_buffer;

pub use clock_controller::{transition, ClockAction, PlaybackClockController, SpeedMode, Watermarks};
pub use ring_buffer::{AudioRingBuffer, Drained, WriteOutcome};

#[cfg(test)]
pub(crate) mod mock_i2s;
