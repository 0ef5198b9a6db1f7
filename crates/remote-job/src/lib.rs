//! Remote job worker: hosts a user object behind a task registry, serves
//! `CALL` dispatch over a request/reply endpoint, and resets on client loss
//! while keeping the worker and master apprised of its liveness.

pub mod bundle;
pub mod endpoints;
pub mod error;
pub mod flags;
pub mod heartbeat;
pub mod net;
pub mod registry;
pub mod session;
pub mod transport;
