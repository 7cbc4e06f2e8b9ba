//! Lock-free single-producer single-consumer byte ring for isochronous audio.
//!
//! The USB receive path writes whole packets; the I2S transmit interrupt
//! drains fixed-size frames. Each side owns exactly one cursor and
//! occupancy is derived from the pair, so there is no shared counter for the
//! two interrupt levels to race on.
//!
//! # Safety Contract
//!
//! - Only ONE context may call the producer methods
//!   ([`write()`](AudioRingBuffer::write), [`reset()`](AudioRingBuffer::reset)).
//! - Only ONE context may call the consumer methods
//!   ([`drain_exact()`](AudioRingBuffer::drain_exact),
//!   [`drain_frame()`](AudioRingBuffer::drain_frame)).
//! - [`configure()`](AudioRingBuffer::configure) needs `&mut self`, i.e. both
//!   sides quiescent.
//!
//! # Overrun policy
//!
//! A write that does not fit empties the whole buffer and is itself dropped.
//! The producer cannot move the consumer's cursor, so it publishes a *flush
//! marker* instead: a sequence number and the position buffered data is
//! discarded up to. The consumer jumps its cursor to that position the next
//! time it drains and acknowledges the sequence. Until then both sides treat
//! the marker as the read position.
//!
//! ```text
//!            tail            flush.at        head
//!  ──────────┼───────────────┼───────────────┼──────────
//!            │◄─ discarded ─►│◄─── live ────►│
//! ```
//!
//! The consumer re-reads the marker after acknowledging it and after every
//! copy. A flush that lands in between sends it round again, so a drained
//! frame is never one the producer was overwriting, and nothing is played
//! twice.

use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::constants::FRAME_BYTES;

/// Result of handing one isochronous packet to the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteOutcome {
    /// The packet was appended.
    Stored,
    /// The packet did not fit; the buffer was emptied and the packet dropped.
    Overrun,
    /// No stream is configured, nothing was written.
    Dropped,
}

/// A frame handed to the transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Drained {
    /// Read from the buffer.
    Fresh(u32),
    /// Buffer ran dry; the previous frame is repeated instead of silence.
    Repeated(u32),
}

impl Drained {
    /// The frame value regardless of where it came from.
    pub const fn sample(self) -> u32 {
        match self {
            Drained::Fresh(sample) | Drained::Repeated(sample) => sample,
        }
    }
}

const fn pack_flush(sequence: u32, at: usize) -> u32 {
    (sequence << 16) | (at as u32 & 0xFFFF)
}

const fn unpack_flush(flush: u32) -> (u32, usize) {
    (flush >> 16, (flush & 0xFFFF) as usize)
}

/// Circular byte buffer with `N` bytes of backing storage.
///
/// The active capacity is chosen per session with
/// [`configure()`](Self::configure) and never exceeds `N`. Cursors run over
/// `[0, 2 × capacity)` so a completely full buffer is distinguishable from an
/// empty one without sacrificing a slot.
pub struct AudioRingBuffer<const N: usize> {
    storage: UnsafeCell<[u8; N]>,
    capacity: usize,
    /// Write cursor (only modified by the producer).
    head: AtomicUsize,
    /// Read cursor (only modified by the consumer).
    tail: AtomicUsize,
    /// Flush marker: sequence in the upper half-word, position in the lower
    /// (only modified by the producer).
    flush: AtomicU32,
    /// Last flush sequence applied to `tail` (only modified by the consumer).
    flush_ack: AtomicU32,
    /// Most recent fresh frame (consumer).
    last_frame: AtomicU32,
    overruns: AtomicU32,
    underruns: AtomicU32,
}

// SAFETY: Every atomic has a single writer (see field docs). Storage bytes in
// [tail, head) are only read by the consumer and bytes outside it are only
// written by the producer; Release stores of `head`/`tail` publish the copies
// that precede them and the matching Acquire loads observe them.
unsafe impl<const N: usize> Sync for AudioRingBuffer<N> {}

impl<const N: usize> AudioRingBuffer<N> {
    /// Create an empty buffer using all `N` bytes.
    ///
    /// # Panics
    ///
    /// Compile-time assertion: `N` must be non-zero and `2 × N` must fit the
    /// 16-bit flush position.
    pub const fn new() -> Self {
        assert!(N > 0, "ring buffer needs storage");
        assert!(2 * N <= 0xFFFF, "cursor range must fit 16 bits");

        AudioRingBuffer {
            storage: UnsafeCell::new([0; N]),
            capacity: N,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            flush: AtomicU32::new(0),
            flush_ack: AtomicU32::new(0),
            last_frame: AtomicU32::new(0),
            overruns: AtomicU32::new(0),
            underruns: AtomicU32::new(0),
        }
    }

    /// Empty the buffer and set a new capacity (clamped to `1..=N`).
    ///
    /// Cursors return to zero and the repeat frame to silence. Diagnostic
    /// counters keep running.
    pub fn configure(&mut self, capacity: usize) {
        self.capacity = capacity.clamp(1, N);
        *self.head.get_mut() = 0;
        *self.tail.get_mut() = 0;
        *self.flush.get_mut() = 0;
        *self.flush_ack.get_mut() = 0;
        *self.last_frame.get_mut() = 0;
    }

    /// Active capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes buffered and not yet drained.
    ///
    /// Safe to call from either side; a pending flush counts as applied.
    pub fn occupancy(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        self.distance(self.read_floor(), head)
    }

    /// Bytes that can be written without an overrun.
    pub fn free(&self) -> usize {
        self.capacity - self.occupancy()
    }

    /// Check if the buffer holds no data.
    pub fn is_empty(&self) -> bool {
        self.occupancy() == 0
    }

    /// Writes rejected because they did not fit.
    pub fn overruns(&self) -> u32 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Frames repeated because the buffer was dry.
    pub fn underruns(&self) -> u32 {
        self.underruns.load(Ordering::Relaxed)
    }

    // ── Producer side ──────────────────────────────────────────────────

    /// Append `bytes` (producer side).
    ///
    /// If the result would exceed the capacity, everything buffered is
    /// discarded, the overrun counter is bumped and `bytes` is dropped.
    pub fn write(&self, bytes: &[u8]) -> WriteOutcome {
        let head = self.head.load(Ordering::Relaxed);
        let used = self.distance(self.read_floor(), head);

        if used + bytes.len() > self.capacity {
            self.flush_at(head);
            let total = self.overruns.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                "audio buffer overrun #{=u32}: {=usize} buffered + {=usize} incoming",
                total,
                used,
                bytes.len()
            );
            return WriteOutcome::Overrun;
        }

        let start = head % self.capacity;
        let first = bytes.len().min(self.capacity - start);
        let base = self.storage.get().cast::<u8>();

        // SAFETY: We are the sole producer. `used + len <= capacity` means the
        // target range lies outside [tail, head), so the consumer is not
        // reading it, and both copies stay within `capacity <= N`.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), base.add(start), first);
            ptr::copy_nonoverlapping(bytes.as_ptr().add(first), base, bytes.len() - first);
        }

        // Release ordering makes the copied bytes visible before head advances.
        self.head
            .store(self.advance(head, bytes.len()), Ordering::Release);
        WriteOutcome::Stored
    }

    /// Discard everything buffered (producer side).
    ///
    /// Used on stream start/stop, where the USB receive context is the caller.
    pub fn reset(&self) {
        self.flush_at(self.head.load(Ordering::Relaxed));
    }

    fn flush_at(&self, at: usize) {
        let (sequence, _) = unpack_flush(self.flush.load(Ordering::Relaxed));
        let next = sequence.wrapping_add(1) & 0xFFFF;
        self.flush.store(pack_flush(next, at), Ordering::Release);
    }

    /// Where the consumer reads from, counting an unacknowledged flush.
    fn read_floor(&self) -> usize {
        let (sequence, at) = unpack_flush(self.flush.load(Ordering::Acquire));
        if self.flush_ack.load(Ordering::Acquire) != sequence {
            at
        } else {
            self.tail.load(Ordering::Acquire)
        }
    }

    // ── Consumer side ──────────────────────────────────────────────────

    /// Fill `out` from the buffer (consumer side).
    ///
    /// Returns `false` and leaves the buffer untouched if fewer than
    /// `out.len()` bytes are available.
    pub fn drain_exact(&self, out: &mut [u8]) -> bool {
        loop {
            let (tail, sequence) = self.apply_flush();
            let head = self.head.load(Ordering::Acquire);

            if self.distance(tail, head) < out.len() {
                return false;
            }

            let start = tail % self.capacity;
            let first = out.len().min(self.capacity - start);
            let base = self.storage.get().cast::<u8>().cast_const();

            // SAFETY: We are the sole consumer and [tail, tail + len) lies inside
            // [tail, head), which the producer does not touch until tail advances
            // or a new flush is published. The latter is caught below.
            unsafe {
                ptr::copy_nonoverlapping(base.add(start), out.as_mut_ptr(), first);
                ptr::copy_nonoverlapping(base, out.as_mut_ptr().add(first), out.len() - first);
            }

            // A flush published during the copy may have let the producer
            // overwrite what we just read. Start again from the new marker.
            if self.flush_sequence() != sequence {
                continue;
            }

            // Release ordering ensures the read completes before the space is freed.
            self.tail
                .store(self.advance(tail, out.len()), Ordering::Release);
            return true;
        }
    }

    /// Take one [`FRAME_BYTES`]-wide frame (consumer side).
    ///
    /// On underrun the previous fresh frame is returned again.
    pub fn drain_frame(&self) -> Drained {
        let mut frame = [0u8; FRAME_BYTES];
        if self.drain_exact(&mut frame) {
            let sample = u32::from_le_bytes(frame);
            self.last_frame.store(sample, Ordering::Relaxed);
            Drained::Fresh(sample)
        } else {
            self.underruns.fetch_add(1, Ordering::Relaxed);
            Drained::Repeated(self.last_frame.load(Ordering::Relaxed))
        }
    }

    /// Move `tail` to the latest published flush marker, returning the cursor
    /// to read from and the sequence it reflects.
    fn apply_flush(&self) -> (usize, u32) {
        self.apply_flush_observed(|| {})
    }

    /// [`apply_flush()`](Self::apply_flush) with a hook that runs after each
    /// load of the marker, before it is acknowledged.
    fn apply_flush_observed(&self, mut after_load: impl FnMut()) -> (usize, u32) {
        let mut acked = self.flush_ack.load(Ordering::Relaxed);
        loop {
            let (sequence, at) = unpack_flush(self.flush.load(Ordering::Acquire));
            if sequence == acked {
                return (self.tail.load(Ordering::Relaxed), sequence);
            }
            after_load();
            // Tail first: a producer that sees the ack must also see the new tail.
            self.tail.store(at, Ordering::Release);
            self.flush_ack.store(sequence, Ordering::Release);
            trace!("audio buffer flush {=u32} applied at {=usize}", sequence, at);
            // The producer may have flushed again since the load; go round
            // until the acknowledged marker is the current one.
            acked = sequence;
        }
    }

    fn flush_sequence(&self) -> u32 {
        unpack_flush(self.flush.load(Ordering::Acquire)).0
    }

    // ── Cursor arithmetic ──────────────────────────────────────────────

    fn distance(&self, from: usize, to: usize) -> usize {
        let span = 2 * self.capacity;
        (to + span - from) % span
    }

    fn advance(&self, cursor: usize, by: usize) -> usize {
        (cursor + by) % (2 * self.capacity)
    }
}

impl<const N: usize> Default for AudioRingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Buffer with 16 bytes of storage, configured down to `capacity`.
    fn ring(capacity: usize) -> AudioRingBuffer<16> {
        let mut ring = AudioRingBuffer::new();
        ring.configure(capacity);
        ring
    }

    #[test]
    fn new_is_empty() {
        let ring: AudioRingBuffer<8> = AudioRingBuffer::new();
        assert!(ring.is_empty());
        assert_eq!(ring.capacity(), 8);
        assert_eq!(ring.free(), 8);
        assert_eq!(ring.overruns(), 0);
        assert_eq!(ring.underruns(), 0);
    }

    #[test]
    fn write_and_drain_in_order() {
        let ring = ring(12);
        assert_eq!(ring.write(&[1, 2, 3, 4, 5, 6]), WriteOutcome::Stored);
        assert_eq!(ring.occupancy(), 6);

        let mut out = [0u8; 4];
        assert!(ring.drain_exact(&mut out));
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(ring.occupancy(), 2);

        let mut rest = [0u8; 2];
        assert!(ring.drain_exact(&mut rest));
        assert_eq!(rest, [5, 6]);
        assert!(ring.is_empty());
    }

    #[test]
    fn short_drain_leaves_buffer_untouched() {
        let ring = ring(12);
        ring.write(&[9, 8, 7]);

        let mut out = [0u8; 4];
        assert!(!ring.drain_exact(&mut out));
        assert_eq!(out, [0; 4]);
        assert_eq!(ring.occupancy(), 3);

        ring.write(&[6]);
        assert!(ring.drain_exact(&mut out));
        assert_eq!(out, [9, 8, 7, 6]);
    }

    #[test]
    fn full_capacity_is_usable() {
        let ring = ring(10);
        assert_eq!(ring.write(&[0xAA; 10]), WriteOutcome::Stored);
        assert_eq!(ring.occupancy(), 10);
        assert_eq!(ring.free(), 0);
        assert!(!ring.is_empty());
    }

    #[test]
    fn wraparound_with_odd_capacity() {
        // Capacity 10 is not a multiple of the frame size, so frames straddle
        // the end of storage on later laps.
        let ring = ring(10);
        let mut next_in = 0u8;
        let mut next_out = 0u8;

        for _ in 0..50 {
            let packet: [u8; 3] = core::array::from_fn(|i| next_in.wrapping_add(i as u8));
            assert_eq!(ring.write(&packet), WriteOutcome::Stored);
            next_in = next_in.wrapping_add(3);

            let mut frame = [0u8; 4];
            while ring.occupancy() >= 4 {
                assert!(ring.drain_exact(&mut frame));
                for byte in frame {
                    assert_eq!(byte, next_out);
                    next_out = next_out.wrapping_add(1);
                }
            }
        }
        assert_eq!(ring.overruns(), 0);
    }

    #[test]
    fn interleaved_occupancy_is_exact() {
        let ring = ring(16);
        let mut expected = 0usize;
        let mut next_in = 0u8;
        let mut next_out = 0u8;
        // Small LCG so the sequence is varied but reproducible.
        let mut state = 0x1234_5678u32;
        let mut roll = |modulus: u32| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            ((state >> 16) % modulus) as usize
        };

        for _ in 0..2_000 {
            if roll(2) == 0 {
                let len = roll(7);
                if expected + len > 16 {
                    continue;
                }
                let packet: [u8; 6] = core::array::from_fn(|i| next_in.wrapping_add(i as u8));
                assert_eq!(ring.write(&packet[..len]), WriteOutcome::Stored);
                next_in = next_in.wrapping_add(len as u8);
                expected += len;
            } else {
                let len = 1 + roll(5);
                let mut out = [0u8; 5];
                let drained = ring.drain_exact(&mut out[..len]);
                assert_eq!(drained, expected >= len);
                if drained {
                    for &byte in &out[..len] {
                        assert_eq!(byte, next_out, "read data that was never written");
                        next_out = next_out.wrapping_add(1);
                    }
                    expected -= len;
                }
            }
            assert_eq!(ring.occupancy(), expected);
        }
    }

    #[test]
    fn overrun_empties_and_drops_packet() {
        let ring = ring(10);
        ring.write(&[1; 8]);
        assert_eq!(ring.write(&[2; 4]), WriteOutcome::Overrun);

        assert!(ring.is_empty());
        assert_eq!(ring.overruns(), 1);

        let mut out = [0u8; 1];
        assert!(!ring.drain_exact(&mut out));
    }

    #[test]
    fn reads_after_overrun_see_only_new_data() {
        let ring = ring(10);
        ring.write(&[1, 1, 1, 1, 1, 1]);

        // Consumer takes part of the old data before the overrun.
        let mut out = [0u8; 2];
        assert!(ring.drain_exact(&mut out));
        assert_eq!(out, [1, 1]);

        ring.write(&[2, 2, 2, 2]); // fills to exactly 8
        assert_eq!(ring.write(&[3, 3, 3]), WriteOutcome::Overrun);
        assert_eq!(ring.write(&[4, 5, 6, 7]), WriteOutcome::Stored);
        assert_eq!(ring.occupancy(), 4);

        let mut frame = [0u8; 4];
        assert!(ring.drain_exact(&mut frame));
        assert_eq!(frame, [4, 5, 6, 7]);
        assert!(ring.is_empty());
    }

    #[test]
    fn producer_sees_flush_before_consumer_applies_it() {
        let ring = ring(10);
        ring.write(&[1; 9]);
        assert_eq!(ring.write(&[2; 2]), WriteOutcome::Overrun);

        // No drain in between: the flush is still pending, yet the whole
        // capacity is available again.
        assert_eq!(ring.free(), 10);
        assert_eq!(ring.write(&[3; 10]), WriteOutcome::Stored);

        let mut out = [0u8; 10];
        assert!(ring.drain_exact(&mut out));
        assert_eq!(out, [3; 10]);
    }

    #[test]
    fn repeated_flushes_before_consumer_runs() {
        let ring = ring(10);
        ring.write(&[1; 10]);
        assert_eq!(ring.write(&[2]), WriteOutcome::Overrun);
        ring.write(&[3; 6]);
        assert_eq!(ring.write(&[4; 5]), WriteOutcome::Overrun);
        ring.write(&[5, 6]);
        assert_eq!(ring.overruns(), 2);

        let mut out = [0u8; 2];
        assert!(ring.drain_exact(&mut out));
        assert_eq!(out, [5, 6]);
        assert!(ring.is_empty());
    }

    #[test]
    fn oversized_packet_overruns_empty_buffer() {
        let ring = ring(4);
        assert_eq!(ring.write(&[0; 5]), WriteOutcome::Overrun);
        assert_eq!(ring.overruns(), 1);
        assert!(ring.is_empty());
    }

    #[test]
    fn reset_discards_buffered_data() {
        let ring = ring(12);
        ring.write(&[7; 8]);
        ring.reset();
        assert!(ring.is_empty());
        assert_eq!(ring.overruns(), 0);

        ring.write(&[8, 9, 10, 11]);
        let mut out = [0u8; 4];
        assert!(ring.drain_exact(&mut out));
        assert_eq!(out, [8, 9, 10, 11]);
    }

    #[test]
    fn drain_frame_repeats_last_sample_on_underrun() {
        let ring = ring(16);
        assert_eq!(ring.drain_frame(), Drained::Repeated(0));

        ring.write(&0x1234_5678u32.to_le_bytes());
        assert_eq!(ring.drain_frame(), Drained::Fresh(0x1234_5678));
        assert_eq!(ring.drain_frame(), Drained::Repeated(0x1234_5678));
        assert_eq!(ring.drain_frame().sample(), 0x1234_5678);
        assert_eq!(ring.underruns(), 3);
        assert!(ring.is_empty());
    }

    #[test]
    fn partial_frame_is_not_consumed() {
        let ring = ring(16);
        ring.write(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(ring.drain_frame(), Drained::Fresh(0x0403_0201));
        assert_eq!(ring.drain_frame(), Drained::Repeated(0x0403_0201));
        assert_eq!(ring.occupancy(), 2);
    }

    #[test]
    fn configure_resets_cursors_and_capacity() {
        let mut ring: AudioRingBuffer<16> = AudioRingBuffer::new();
        ring.write(&[1; 12]);
        ring.drain_frame();
        ring.configure(8);

        assert_eq!(ring.capacity(), 8);
        assert!(ring.is_empty());
        assert_eq!(ring.drain_frame(), Drained::Repeated(0));

        ring.configure(64);
        assert_eq!(ring.capacity(), 16, "capacity is clamped to storage");
    }

    /// Write `count` little-endian frames numbered from `first`.
    fn write_counting<const M: usize>(ring: &AudioRingBuffer<M>, first: u32, count: u32) {
        for n in first..first + count {
            assert_eq!(ring.write(&n.to_le_bytes()), WriteOutcome::Stored);
        }
    }

    #[test]
    fn second_flush_before_acknowledge_wins() {
        let ring: AudioRingBuffer<64> = AudioRingBuffer::new();
        write_counting(&ring, 0, 4);
        ring.reset(); // flush 1 at byte 16
        write_counting(&ring, 4, 4);

        // The producer flushes again and refills the whole buffer after the
        // consumer has loaded flush 1 but before it has acknowledged it.
        let mut preempted = false;
        let (tail, _) = ring.apply_flush_observed(|| {
            if !preempted {
                preempted = true;
                ring.reset(); // flush 2 at byte 32
                write_counting(&ring, 100, 16);
            }
        });
        assert!(preempted);
        assert_eq!(tail, 32);

        for expected in 100..116 {
            assert_eq!(ring.drain_frame(), Drained::Fresh(expected));
        }
        assert_eq!(ring.drain_frame(), Drained::Repeated(115));
        assert_eq!(ring.underruns(), 1);
    }

    #[test]
    fn frames_never_replay_across_flushes() {
        fn take(ring: &AudioRingBuffer<64>, last_out: &mut Option<u32>) {
            if let Drained::Fresh(n) = ring.drain_frame() {
                assert!(last_out.map_or(true, |prev| n > prev), "{} after {:?}", n, last_out);
                *last_out = Some(n);
            }
        }

        let ring: AudioRingBuffer<64> = AudioRingBuffer::new();
        let mut next_in = 0u32;
        let mut last_out: Option<u32> = None;

        for round in 0..40u32 {
            write_counting(&ring, next_in, 5);
            next_in += 5;
            if round % 3 == 0 {
                ring.reset();
            }
            for _ in 0..(round % 4) {
                take(&ring, &mut last_out);
            }
            // Keep the producer inside capacity so only the explicit flushes fire.
            while ring.occupancy() > 32 {
                take(&ring, &mut last_out);
            }
        }
        assert_eq!(ring.overruns(), 0);
    }
}
