//! Recording [`AudioPeripheral`] for tests.

use crate::peripheral::AudioPeripheral;

/// One call made on the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Sample(u32),
    Divider(u8, u8, u8),
    Start,
    Stop,
}

/// Peripheral stub that logs every call in order.
///
/// The FIFO level is whatever the test sets; samples do not raise it.
pub struct MockI2s {
    pub fifo_level: usize,
    pub running: bool,
    events: [Event; 512],
    len: usize,
}

impl MockI2s {
    pub fn new() -> Self {
        MockI2s {
            fifo_level: 0,
            running: false,
            events: [Event::Stop; 512],
            len: 0,
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events[..self.len]
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Samples sent since the last [`clear()`](Self::clear).
    pub fn samples(&self) -> impl Iterator<Item = u32> + '_ {
        self.events().iter().filter_map(|e| match e {
            Event::Sample(s) => Some(*s),
            _ => None,
        })
    }

    /// Most recent divider write.
    pub fn last_divider(&self) -> Option<(u8, u8, u8)> {
        self.events().iter().rev().find_map(|e| match e {
            Event::Divider(p, x, y) => Some((*p, *x, *y)),
            _ => None,
        })
    }

    fn push(&mut self, event: Event) {
        assert!(self.len < self.events.len(), "mock event log full");
        self.events[self.len] = event;
        self.len += 1;
    }
}

impl AudioPeripheral for MockI2s {
    fn send_sample(&mut self, sample: u32) {
        self.push(Event::Sample(sample));
    }

    fn set_divider(&mut self, bitrate_prescaler: u8, x: u8, y: u8) {
        self.push(Event::Divider(bitrate_prescaler, x, y));
    }

    fn tx_fifo_level(&self) -> usize {
        self.fifo_level
    }

    fn start(&mut self) {
        self.running = true;
        self.push(Event::Start);
    }

    fn stop(&mut self) {
        self.running = false;
        self.push(Event::Stop);
    }
}
