//! Command-line arguments for the `ramble` demo binary.

use clap::Parser;

/// Live microphone transcription against a Ramble backend.
#[derive(Parser, Debug)]
#[command(name = "ramble", version, about)]
pub struct Args {
    /// Base URL of the app backend that mints streaming tokens.
    #[arg(long, default_value = "http://localhost:3000")]
    pub backend: String,

    /// Bearer access token for the backend (falls back to RAMBLE_ACCESS_TOKEN).
    #[arg(long, env = "RAMBLE_ACCESS_TOKEN")]
    pub access_token: String,

    /// Refresh token used for one silent re-authentication when the access
    /// token is rejected (falls back to RAMBLE_REFRESH_TOKEN).
    #[arg(long, env = "RAMBLE_REFRESH_TOKEN", default_value = "")]
    pub refresh_token: String,

    /// Language hints, repeatable. Defaults to the standard hint set.
    #[arg(long = "language", value_name = "CODE")]
    pub languages: Vec<String>,

    /// Free-text vocabulary context to bias recognition.
    #[arg(long)]
    pub context: Option<String>,

    /// Grace period after stop, in milliseconds, for trailing tokens.
    #[arg(long, default_value_t = 500)]
    pub grace_ms: u64,
}
