/// The I2S transmitter as seen by the playback path.
///
/// Implemented by the board layer on top of its HAL or register block. All
/// methods are called from interrupt context and must not block.
pub trait AudioPeripheral {
    /// Push one frame (left in the low half-word, right in the high) into
    /// the transmit FIFO.
    fn send_sample(&mut self, sample: u32);

    /// Program the bit-rate prescaler and the X/Y fractional divider.
    fn set_divider(&mut self, bitrate_prescaler: u8, x: u8, y: u8);

    /// Number of words currently queued in the transmit FIFO.
    fn tx_fifo_level(&self) -> usize;

    /// Enable transmission and its FIFO interrupt.
    fn start(&mut self);

    /// Disable transmission and its FIFO interrupt.
    fn stop(&mut self);
}
