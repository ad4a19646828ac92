use thiserror::Error;

/// Errors surfaced by a recording attempt.
///
/// Every variant is terminal for the attempt that produced it: the session
/// is forced into `Closed` and the user has to start a new recording.
/// Malformed inbound messages are deliberately absent here; they are logged
/// and ignored rather than surfaced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The microphone could not be acquired (permission revoked, device
    /// busy, no input device). Not retried.
    #[error("microphone unavailable: {0}")]
    DeviceUnavailable(String),

    /// The token-issuing backend refused to mint a streaming credential,
    /// typically because the account lacks an active subscription or
    /// voucher.
    #[error("{0}")]
    TokenAcquisition(String),

    /// The stored credential was rejected and the single silent refresh
    /// also failed. The user must sign in again.
    #[error("session expired, please log in again")]
    SessionExpired,

    /// The WebSocket transport failed or closed unexpectedly.
    #[error("connection error: {0}")]
    Transport(String),

    /// The speech backend sent an error payload; the message is surfaced
    /// verbatim.
    #[error("{0}")]
    Backend(String),
}
