//! hooteproto - wire protocol for the remote job worker's ZMQ endpoints.
//!
//! A job process exposes four endpoints (request, worker heartbeat, client
//! heartbeat, ping) and dials two outbound channels (worker, master). Every
//! message on any of those channels is a ZMQ multipart frame whose first part
//! is a [`Tag`]; this crate defines that tag set, the handful of payload types
//! that travel alongside it, and the encode/decode helpers shared by every
//! peer. Socket construction (`socket_config`) and reconnect/retry behavior
//! (`lazy_pirate`) live alongside it since every endpoint in the fabric is
//! built from the same small set of primitives.

pub mod lazy_pirate;
pub mod socket_config;

#[cfg(feature = "peer")]
pub mod frame;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Tags exchanged on the wire. Always `part[0]` of a multipart message.
///
/// Compared by equality only; the wire representation (see [`Tag::as_bytes`])
/// is a short opaque byte string so any peer implementation -- in any
/// language -- agrees on it without sharing this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    /// client -> job: ship a code/plugin bundle for this session.
    SendFile,
    /// client -> job: construct the user object.
    InitObject,
    /// client -> job: invoke a method on the user object.
    Call,
    /// client -> job: cooperative in-band cancel of the session.
    KillJob,
    /// job -> client/worker/master: success, no exception.
    Normal,
    /// either direction: liveness probe / reply.
    Heartbeat,
    /// job -> master: re-advertise availability after a reset.
    ResetJob,
    /// job -> client: generic user exception, payload carries message+traceback.
    Exception,
    /// job -> client: `CALL` named a method the object does not expose.
    AttributeException,
    /// job -> client: failed to encode the return value.
    SerializeException,
    /// job -> client: failed to decode the call arguments.
    DeserializeException,
}

impl Tag {
    /// Stable wire encoding. Byte-exact equality is all any peer requires.
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Tag::SendFile => b"SEND_FILE",
            Tag::InitObject => b"INIT_OBJECT",
            Tag::Call => b"CALL",
            Tag::KillJob => b"KILLJOB",
            Tag::Normal => b"NORMAL",
            Tag::Heartbeat => b"HEARTBEAT",
            Tag::ResetJob => b"RESET_JOB",
            Tag::Exception => b"EXCEPTION",
            Tag::AttributeException => b"ATTRIBUTE_EXCEPTION",
            Tag::SerializeException => b"SERIALIZE_EXCEPTION",
            Tag::DeserializeException => b"DESERIALIZE_EXCEPTION",
        }
    }

    /// Parse a tag from its wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(match bytes {
            b"SEND_FILE" => Tag::SendFile,
            b"INIT_OBJECT" => Tag::InitObject,
            b"CALL" => Tag::Call,
            b"KILLJOB" => Tag::KillJob,
            b"NORMAL" => Tag::Normal,
            b"HEARTBEAT" => Tag::Heartbeat,
            b"RESET_JOB" => Tag::ResetJob,
            b"EXCEPTION" => Tag::Exception,
            b"ATTRIBUTE_EXCEPTION" => Tag::AttributeException,
            b"SERIALIZE_EXCEPTION" => Tag::SerializeException,
            b"DESERIALIZE_EXCEPTION" => Tag::DeserializeException,
            _ => return None,
        })
    }

    /// True for the four exception tags a `CALL` or `INIT_OBJECT` can reply with.
    pub fn is_exception(self) -> bool {
        matches!(
            self,
            Tag::Exception
                | Tag::AttributeException
                | Tag::SerializeException
                | Tag::DeserializeException
        )
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.as_bytes()))
    }
}

/// Errors in parsing or building a wire frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("empty multipart message")]
    Empty,
    #[error("unrecognized tag bytes: {0:?}")]
    UnknownTag(Vec<u8>),
    #[error("expected {expected} frame part(s) after the tag, found {found}")]
    WrongArity { expected: usize, found: usize },
    #[error("bincode decode failed: {0}")]
    Decode(#[from] bincode::Error),
}

/// Announcement a job sends to its worker (at startup) and to its master
/// (on every reset). Field nullability differs by occasion -- see the field
/// docs -- rather than being modeled as two separate types, mirroring the
/// original protocol's single `InitializedJob` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializedJob {
    /// Address of the job's request endpoint. Stable for the process lifetime.
    pub request_address: String,
    /// Address of the worker-heartbeat endpoint. `Some` only in the startup
    /// announcement to the worker; `None` on every reset announcement to the
    /// master, since that endpoint is bound exactly once.
    pub worker_heartbeat_address: Option<String>,
    /// Address of the client-heartbeat endpoint. Freshly bound before every
    /// announcement, startup included.
    pub client_heartbeat_address: String,
    /// Address of the ping endpoint. Bound once, never rebound.
    pub ping_address: String,
    /// Address of the worker that owns this job. `Some` only in the startup
    /// announcement; the master already knows it afterward.
    pub worker_address: Option<String>,
    /// OS process id. `Some` only in the startup announcement.
    pub pid: Option<u32>,
}

impl InitializedJob {
    /// Build the startup announcement sent once to the worker.
    pub fn for_worker(
        request_address: impl Into<String>,
        worker_heartbeat_address: impl Into<String>,
        client_heartbeat_address: impl Into<String>,
        ping_address: impl Into<String>,
        worker_address: impl Into<String>,
        pid: u32,
    ) -> Self {
        Self {
            request_address: request_address.into(),
            worker_heartbeat_address: Some(worker_heartbeat_address.into()),
            client_heartbeat_address: client_heartbeat_address.into(),
            ping_address: ping_address.into(),
            worker_address: Some(worker_address.into()),
            pid: Some(pid),
        }
    }

    /// Build the reset announcement sent to the master. Per the spec, the
    /// worker-heartbeat address, worker address, and pid are nulled out --
    /// the master only needs the (unchanged) request/ping addresses and the
    /// freshly bound client-heartbeat address.
    pub fn for_reset(
        request_address: impl Into<String>,
        client_heartbeat_address: impl Into<String>,
        ping_address: impl Into<String>,
    ) -> Self {
        Self {
            request_address: request_address.into(),
            worker_heartbeat_address: None,
            client_heartbeat_address: client_heartbeat_address.into(),
            ping_address: ping_address.into(),
            worker_address: None,
            pid: None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// The call arguments travelling in `CALL` and `INIT_OBJECT` frames:
/// positional args followed by keyword args. Kept as JSON values (rather than
/// a fixed schema) since the method being invoked is only known at runtime --
/// this is the "opaque codec" the spec allows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallArguments {
    pub args: Vec<serde_json::Value>,
    #[serde(default)]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

impl CallArguments {
    pub fn new(
        args: Vec<serde_json::Value>,
        kwargs: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self { args, kwargs }
    }

    pub fn empty() -> Self {
        Self {
            args: Vec::new(),
            kwargs: serde_json::Map::new(),
        }
    }

    /// Encode for the wire. This is the "return serialization" / "argument
    /// serialization" step the spec's exception taxonomy refers to.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Encode an arbitrary return value for a `NORMAL` reply to `CALL`.
pub fn encode_return(value: &serde_json::Value) -> Result<Vec<u8>, FrameError> {
    Ok(bincode::serialize(value)?)
}

/// Decode the bytes produced by [`encode_return`].
pub fn decode_return(bytes: &[u8]) -> Result<serde_json::Value, FrameError> {
    Ok(bincode::deserialize(bytes)?)
}

/// Encode a `SEND_FILE` bundle: a flat mapping of file name to file bytes.
pub fn encode_bundle(
    files: &std::collections::HashMap<String, Vec<u8>>,
) -> Result<Vec<u8>, FrameError> {
    Ok(bincode::serialize(files)?)
}

/// Decode a `SEND_FILE` bundle.
pub fn decode_bundle(bytes: &[u8]) -> Result<std::collections::HashMap<String, Vec<u8>>, FrameError> {
    Ok(bincode::deserialize(bytes)?)
}
