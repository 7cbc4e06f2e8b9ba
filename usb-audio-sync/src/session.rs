//! Playback session: the state both audio interrupts share.
//!
//! A [`PlaybackSession`] bundles the divider table, the active
//! [`SessionConfig`], the ring buffer and the clock controller. The two
//! interrupt paths reach it through `&self`:
//!
//! | Context | Entry point | Touches |
//! |---------|-------------|---------|
//! | USB isochronous receive | [`on_iso_packet()`](PlaybackSession::on_iso_packet) | write cursor, flush marker |
//! | USB stream start/stop | [`on_stream_start_stop()`](PlaybackSession::on_stream_start_stop) | flush marker |
//! | I2S transmit | [`on_transmit_interrupt()`](PlaybackSession::on_transmit_interrupt) | read cursor, speed mode, divider |
//!
//! Rate changes go through [`reconfigure()`](PlaybackSession::reconfigure),
//! which takes `&mut self`. On target the session lives in a [`SessionCell`]
//! whose [`with_exclusive()`](SessionCell::with_exclusive) masks interrupts
//! for the duration of the swap.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::constants::{AUDIO_BUFFER_BYTES, BUFFERED_PACKETS, DEFAULT_SAMPLE_RATE, MAX_SAMPLE_RATE};
use crate::divider::{AudioFormat, DividerConfig, DividerTable};
use crate::error::SessionError;
use crate::io::clock_controller::{PlaybackClockController, SpeedMode, Watermarks};
use crate::io::ring_buffer::{AudioRingBuffer, WriteOutcome};
use crate::peripheral::AudioPeripheral;

/// Ring buffer size for `sample_rate`: two halves of ten 1 ms packets.
///
/// Rates that are not whole kilohertz (the 44.1 kHz family) are all sized
/// for 44.1 kHz.
pub const fn buffer_capacity(sample_rate: u32, format: AudioFormat) -> usize {
    let sizing_rate = if sample_rate % 1000 == 0 {
        sample_rate
    } else {
        44_100
    };
    sizing_rate as usize * format.frame_bytes() * BUFFERED_PACKETS / 1000 * 2
}

/// Parameters of the running stream. Replaced wholesale on a rate change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionConfig {
    /// Sampling frequency selected by the host.
    pub sample_rate: u32,
    /// Divider pair for `sample_rate`.
    pub divider: DividerConfig,
    /// Ring buffer capacity in bytes.
    pub capacity: usize,
    /// Speed-switch thresholds derived from `capacity`.
    pub watermarks: Watermarks,
}

impl SessionConfig {
    /// Build the configuration for a buffer of `capacity` bytes.
    pub const fn new(sample_rate: u32, divider: DividerConfig, capacity: usize) -> Self {
        SessionConfig {
            sample_rate,
            divider,
            capacity,
            watermarks: Watermarks::for_capacity(capacity),
        }
    }
}

/// Point-in-time counters for the playback path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Diagnostics {
    /// Packets that found the buffer full and flushed it.
    pub overruns: u32,
    /// Frames repeated because the buffer was empty.
    pub underruns: u32,
    /// Switches to the fast divider.
    pub speed_ups: u32,
    /// Switches back to the nominal divider.
    pub slow_downs: u32,
    /// Bytes buffered right now.
    pub occupancy: usize,
    /// Divider pair currently programmed.
    pub speed_mode: SpeedMode,
}

/// Everything the USB receive and I2S transmit interrupts share.
pub struct PlaybackSession<const N: usize = AUDIO_BUFFER_BYTES> {
    table: DividerTable,
    config: Option<SessionConfig>,
    sample_rate: u32,
    buffer: AudioRingBuffer<N>,
    controller: PlaybackClockController,
}

impl<const N: usize> PlaybackSession<N> {
    /// An inactive session with an empty divider table.
    pub const fn new() -> Self {
        PlaybackSession {
            table: DividerTable::empty(),
            config: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer: AudioRingBuffer::new(),
            controller: PlaybackClockController::new(),
        }
    }

    /// An inactive session using `table`.
    pub fn with_table(table: DividerTable) -> Self {
        let mut session = Self::new();
        session.table = table;
        session
    }

    /// Replace the divider table. The running stream keeps its config.
    pub fn install_table(&mut self, table: DividerTable) {
        self.table = table;
    }

    /// The divider table rate changes are resolved against.
    pub fn table(&self) -> &DividerTable {
        &self.table
    }

    /// Configuration of the running stream, if any.
    pub fn config(&self) -> Option<&SessionConfig> {
        self.config.as_ref()
    }

    /// Whether a stream is configured.
    pub fn is_active(&self) -> bool {
        self.config.is_some()
    }

    /// Sampling frequency reported to the host.
    pub fn current_sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Switch to `sample_rate`.
    ///
    /// An unsupported rate is rejected before anything is touched, so the
    /// current stream keeps playing. Otherwise transmission is stopped, the
    /// buffer is emptied and resized, the nominal divider is programmed, the
    /// controller returns to [`SpeedMode::Nominal`] and transmission resumes.
    pub fn reconfigure<P: AudioPeripheral>(
        &mut self,
        sample_rate: u32,
        peripheral: &mut P,
    ) -> Result<(), SessionError> {
        let divider = self
            .table
            .lookup(sample_rate)
            .filter(|_| sample_rate <= MAX_SAMPLE_RATE)
            .ok_or_else(|| {
                warn!("rejecting sample rate {=u32} Hz", sample_rate);
                SessionError::UnsupportedRate(sample_rate)
            })?;

        let capacity = buffer_capacity(sample_rate, self.table.format()).min(N);
        let config = SessionConfig::new(sample_rate, divider, capacity);

        peripheral.stop();
        self.buffer.configure(capacity);
        self.controller.reset();
        peripheral.set_divider(divider.bitrate_prescaler, divider.nominal.x, divider.nominal.y);
        self.config = Some(config);
        self.sample_rate = sample_rate;
        peripheral.start();

        info!(
            "playback at {=u32} Hz, buffer {=usize} bytes, watermarks {=usize}/{=usize}",
            sample_rate,
            capacity,
            config.watermarks.low,
            config.watermarks.high
        );
        Ok(())
    }

    /// Alias of [`reconfigure()`](Self::reconfigure) for the control-request path.
    pub fn set_current_sample_rate<P: AudioPeripheral>(
        &mut self,
        sample_rate: u32,
        peripheral: &mut P,
    ) -> Result<(), SessionError> {
        self.reconfigure(sample_rate, peripheral)
    }

    /// Stop transmission and drop the stream configuration.
    ///
    /// Interrupt entry points become no-ops until the next
    /// [`reconfigure()`](Self::reconfigure).
    pub fn deactivate<P: AudioPeripheral>(&mut self, peripheral: &mut P) {
        peripheral.stop();
        self.config = None;
        self.buffer.configure(N);
        self.controller.reset();
        info!("playback stopped");
    }

    /// USB receive path: buffer one isochronous packet.
    pub fn on_iso_packet(&self, packet: &[u8]) -> WriteOutcome {
        if self.config.is_none() {
            return WriteOutcome::Dropped;
        }
        self.buffer.write(packet)
    }

    /// USB stream start/stop: discard whatever is buffered.
    ///
    /// Call from the same context as [`on_iso_packet()`](Self::on_iso_packet).
    pub fn on_stream_start_stop(&self) {
        self.buffer.reset();
    }

    /// I2S transmit interrupt: feed the FIFO and adjust the divider.
    ///
    /// Returns the number of frames pushed.
    pub fn on_transmit_interrupt<P: AudioPeripheral>(&self, peripheral: &mut P) -> usize {
        match &self.config {
            Some(config) => self.controller.service(
                &self.buffer,
                &config.divider,
                config.watermarks,
                peripheral,
            ),
            None => 0,
        }
    }

    /// The session's ring buffer.
    pub fn buffer(&self) -> &AudioRingBuffer<N> {
        &self.buffer
    }

    /// The session's clock controller.
    pub fn controller(&self) -> &PlaybackClockController {
        &self.controller
    }

    /// Snapshot of the playback counters.
    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            overruns: self.buffer.overruns(),
            underruns: self.buffer.underruns(),
            speed_ups: self.controller.speed_ups(),
            slow_downs: self.controller.slow_downs(),
            occupancy: self.buffer.occupancy(),
            speed_mode: self.controller.mode(),
        }
    }
}

impl<const N: usize> Default for PlaybackSession<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// `static`-friendly home for a [`PlaybackSession`].
///
/// Interrupt handlers use [`with_shared()`](Self::with_shared), which takes
/// no lock. Table installation and rate changes use
/// [`with_exclusive()`](Self::with_exclusive), which runs inside a
/// `critical_section` so neither interrupt can observe a half-swapped
/// session.
///
/// ```ignore
/// static SESSION: SessionCell = SessionCell::new();
///
/// // startup
/// SESSION.with_exclusive(|s| {
///     s.install_table(DividerTable::build(&ClockProfile::LPC18XX, AudioFormat::STEREO_16));
/// });
///
/// // USB isochronous OUT callback
/// SESSION.with_shared(|s| s.on_iso_packet(packet));
/// ```
pub struct SessionCell<const N: usize = AUDIO_BUFFER_BYTES> {
    session: UnsafeCell<PlaybackSession<N>>,
    exclusive: AtomicBool,
    readers: AtomicUsize,
}

// SAFETY: `&mut` access is only handed out inside a critical section while
// no `&` borrow is live (readers == 0), and `&` access is refused while an
// exclusive borrow is live. The session itself is Sync.
unsafe impl<const N: usize> Sync for SessionCell<N> {}

impl<const N: usize> SessionCell<N> {
    /// Create a cell holding an inactive session.
    pub const fn new() -> Self {
        SessionCell {
            session: UnsafeCell::new(PlaybackSession::new()),
            exclusive: AtomicBool::new(false),
            readers: AtomicUsize::new(0),
        }
    }

    /// Run `f` with shared access.
    ///
    /// Returns `None` if called from inside [`with_exclusive()`](Self::with_exclusive).
    pub fn with_shared<R>(&self, f: impl FnOnce(&PlaybackSession<N>) -> R) -> Option<R> {
        self.readers.fetch_add(1, Ordering::Acquire);
        if self.exclusive.load(Ordering::Acquire) {
            self.readers.fetch_sub(1, Ordering::Release);
            return None;
        }
        // SAFETY: `readers > 0` keeps `with_exclusive` out until we are done.
        let result = f(unsafe { &*self.session.get() });
        self.readers.fetch_sub(1, Ordering::Release);
        Some(result)
    }

    /// Run `f` with exclusive access, interrupts masked.
    ///
    /// Returns `None` if a shared or exclusive borrow is already live, i.e.
    /// when called re-entrantly.
    pub fn with_exclusive<R>(&self, f: impl FnOnce(&mut PlaybackSession<N>) -> R) -> Option<R> {
        critical_section::with(|_| {
            if self.readers.load(Ordering::Acquire) != 0
                || self.exclusive.swap(true, Ordering::Acquire)
            {
                return None;
            }
            // SAFETY: No shared borrow is live, none can start while
            // `exclusive` is set, and the critical section keeps interrupts out.
            let result = f(unsafe { &mut *self.session.get() });
            self.exclusive.store(false, Ordering::Release);
            Some(result)
        })
    }

    /// [`with_exclusive()`](Self::with_exclusive) for fallible work, with a
    /// refused borrow reported as [`SessionError::Busy`].
    ///
    /// Control requests go through here so that a request arriving while an
    /// interrupted context holds the session is STALLed rather than lost.
    pub fn try_exclusive<R>(
        &self,
        f: impl FnOnce(&mut PlaybackSession<N>) -> Result<R, SessionError>,
    ) -> Result<R, SessionError> {
        self.with_exclusive(f).unwrap_or_else(|| {
            warn!("session busy, request refused");
            Err(SessionError::Busy)
        })
    }
}

impl<const N: usize> Default for SessionCell<N> {
    fn default() -> Self {
        Self::new()
    }
}
