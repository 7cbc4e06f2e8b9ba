//! USB Audio Class sampling-frequency endpoint control.
//!
//! The host selects a rate with `SET_CUR` on the streaming endpoint's
//! sampling-frequency control and reads it back with `GET_CUR`. The value is
//! three bytes, little-endian:
//!
//! ```text
//!   byte:   0        1        2
//!         ┌────────┬────────┬────────┐
//!         │ f[7:0] │ f[15:8]│f[23:16]│   44 100 Hz = 44 AC 00
//!         └────────┴────────┴────────┘
//! ```
//!
//! The USB stack's class callback maps its request onto [`EndpointRequest`]
//! and passes the data stage, or `None` while it is still probing whether
//! the control is implemented.

use crate::error::SessionError;
use crate::peripheral::AudioPeripheral;
use crate::session::PlaybackSession;

/// Length of the sampling-frequency control payload.
pub const SAMPLING_FREQUENCY_LEN: usize = 3;

/// Endpoint control requests this crate answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EndpointRequest {
    /// `SET_CUR`: the host selects a rate.
    SetCurrent,
    /// `GET_CUR`: the host reads the rate back.
    GetCurrent,
}

/// Encode `rate` as the 3-byte wire value. Bits above 23 are dropped.
pub const fn encode_sampling_frequency(rate: u32) -> [u8; SAMPLING_FREQUENCY_LEN] {
    let b = rate.to_le_bytes();
    [b[0], b[1], b[2]]
}

/// Decode the 3-byte wire value at the front of `data`.
pub fn decode_sampling_frequency(data: &[u8]) -> Result<u32, SessionError> {
    match data {
        [b0, b1, b2, ..] => Ok(u32::from_le_bytes([*b0, *b1, *b2, 0])),
        _ => Err(SessionError::MalformedRequest),
    }
}

/// Handle a sampling-frequency request.
///
/// `data` is the control transfer's data stage: the host's bytes for
/// [`SetCurrent`](EndpointRequest::SetCurrent), the buffer to fill for
/// [`GetCurrent`](EndpointRequest::GetCurrent). `None` is a capability probe
/// and is acknowledged without side effects.
///
/// # Returns
///
/// The number of bytes consumed or produced. An error should be reported to
/// the host as a STALL.
///
/// On target, call this through
/// [`SessionCell::try_exclusive()`](crate::session::SessionCell::try_exclusive)
/// so that a session already borrowed by an interrupted context comes back
/// as [`SessionError::Busy`] and is STALLed too:
///
/// ```ignore
/// let result = SESSION.try_exclusive(|session| {
///     handle_sampling_frequency(session, &mut i2s, EndpointRequest::SetCurrent, Some(data))
/// });
/// ```
pub fn handle_sampling_frequency<P: AudioPeripheral, const N: usize>(
    session: &mut PlaybackSession<N>,
    peripheral: &mut P,
    request: EndpointRequest,
    data: Option<&mut [u8]>,
) -> Result<usize, SessionError> {
    let Some(data) = data else {
        return Ok(0);
    };

    match request {
        EndpointRequest::SetCurrent => {
            let rate = decode_sampling_frequency(data)?;
            debug!("host selected {=u32} Hz", rate);
            session.set_current_sample_rate(rate, peripheral)?;
            Ok(SAMPLING_FREQUENCY_LEN)
        }
        EndpointRequest::GetCurrent => {
            let out = data
                .get_mut(..SAMPLING_FREQUENCY_LEN)
                .ok_or(SessionError::MalformedRequest)?;
            out.copy_from_slice(&encode_sampling_frequency(session.current_sample_rate()));
            Ok(SAMPLING_FREQUENCY_LEN)
        }
    }
}
