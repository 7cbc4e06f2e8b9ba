//! Error type shared by the divider search, session and control paths.

use thiserror::Error;

/// Errors surfaced to the control-request handler.
///
/// Buffer overruns and underruns are deliberately absent: they are recovered
/// in place and only show up in [`Diagnostics`](crate::session::Diagnostics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionError {
    /// No divider configuration exists for this rate, or it exceeds
    /// [`MAX_SAMPLE_RATE`](crate::constants::MAX_SAMPLE_RATE).
    #[error("unsupported sample rate {0} Hz")]
    UnsupportedRate(u32),

    /// A control request carried fewer bytes than its wire format needs.
    #[error("malformed control request")]
    MalformedRequest,

    /// The session was borrowed by an interrupted context and could not be
    /// reconfigured.
    #[error("playback session busy")]
    Busy,
}
