//! Typed errors for the job process.
//!
//! `anyhow` is used at the process boundary (`main`), but anything a caller
//! (or a test) might want to match on by kind is a variant here instead of a
//! string.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to bind {endpoint} to {addr}: {source}")]
    Bind {
        endpoint: &'static str,
        addr: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to dial {peer} at {addr}: {source}")]
    Dial {
        peer: &'static str,
        addr: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("could not determine the host's primary IP: {0}")]
    NoPrimaryIp(#[source] std::io::Error),

    #[error("protocol violation on {endpoint}: {reason}")]
    ProtocolViolation { endpoint: &'static str, reason: String },

    #[error("master did not acknowledge reset after {attempts} attempt(s)")]
    ResetAckExhausted { attempts: u32 },
}
