/// Bytes per stereo 16-bit frame, the unit drained into the I2S FIFO.
pub const FRAME_BYTES: usize = 4;

/// Depth of the I2S transmit FIFO in 32-bit words.
pub const TX_FIFO_DEPTH: usize = 8;

/// FIFO level at or below which the transmit interrupt fires.
pub const TX_FIFO_IRQ_DEPTH: usize = 4;

/// Highest sampling frequency the speaker accepts.
pub const MAX_SAMPLE_RATE: u32 = 48_000;

/// Sampling frequency reported before the host selects one.
pub const DEFAULT_SAMPLE_RATE: u32 = MAX_SAMPLE_RATE;

/// Number of 1 ms isochronous packets one half of the ring buffer holds.
pub const BUFFERED_PACKETS: usize = 10;

/// Static storage reserved for the ring buffer (worst case 48 kHz = 3840 bytes).
pub const AUDIO_BUFFER_BYTES: usize = 4096;

/// USB Audio sampling frequencies, in divider table order.
pub const SUPPORTED_RATES: [u32; 7] = [8_000, 11_025, 16_000, 22_050, 32_000, 44_100, 48_000];
