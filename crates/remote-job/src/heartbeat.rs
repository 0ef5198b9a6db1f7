//! The three heartbeat responders. All three run the same loop -- wait for
//! a probe, reply `HEARTBEAT` -- and differ only in whether a receive
//! deadline applies and what it means when one fires.

use std::sync::Arc;
use std::time::Duration;

use hooteproto::frame::{build_routed_multipart, parse_routed_multipart};
use hooteproto::Tag;
use tracing::{debug, info, warn};

use crate::flags::JobFlags;
use crate::transport::RouterEndpoint;

/// Which peer this responder answers, and what a silent peer means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// No deadline; a passive probe responder that never causes a shutdown.
    Ping,
    /// Deadline fires => worker is gone => whole process dies.
    Worker,
    /// Deadline fires => client is gone => session resets.
    Client,
}

impl Role {
    fn name(self) -> &'static str {
        match self {
            Role::Ping => "ping",
            Role::Worker => "worker-heartbeat",
            Role::Client => "client-heartbeat",
        }
    }

    fn deadline(self, timeouts: &Timeouts) -> Option<Duration> {
        match self {
            Role::Ping => None,
            Role::Worker => Some(timeouts.worker),
            Role::Client => Some(timeouts.client),
        }
    }
}

/// Receive deadlines for the two timed responders.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub client: Duration,
    pub worker: Duration,
}

/// How often the ping responder's otherwise-deadline-free receive wakes up
/// to recheck `job_alive`. Not a liveness timeout -- firing it never kills
/// anything, it just keeps the loop responsive to shutdown.
const PING_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How often a timed responder's receive wakes up to recheck the flags that
/// should end it early, while it accumulates silence toward its deadline.
/// Same interval the session driver polls on in `recv_while` -- without
/// this, a responder blocked in a single `timeout(deadline, recv())` would
/// not notice `client_alive`/`job_alive` going false until the full deadline
/// elapsed, stalling Reset for up to a whole heartbeat timeout.
const RESPONDER_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Runs one heartbeat responder to completion. Returns once the endpoint
/// should be considered closed: on a receive timeout (for timed roles), on
/// `job_alive` (or, for the client responder, `client_alive`) going false,
/// or on a socket error.
pub async fn run(endpoint: RouterEndpoint, role: Role, timeouts: Timeouts, flags: Arc<JobFlags>) {
    let deadline = role.deadline(&timeouts);
    let mut silence = Duration::ZERO;

    loop {
        if !flags.job_alive() {
            info!(responder = role.name(), "job no longer alive, exiting");
            break;
        }
        if role == Role::Client && !flags.client_alive() {
            info!(responder = role.name(), "client no longer alive, exiting");
            break;
        }

        let received = match deadline {
            Some(d) => {
                let tick = std::cmp::min(RESPONDER_POLL_INTERVAL, d.saturating_sub(silence));
                match tokio::time::timeout(tick, endpoint.recv()).await {
                    Ok(item) => {
                        silence = Duration::ZERO;
                        item
                    }
                    Err(_) => {
                        silence += tick;
                        if silence >= d {
                            on_timeout(role, &flags);
                            break;
                        }
                        continue;
                    }
                }
            }
            None => match tokio::time::timeout(PING_POLL_INTERVAL, endpoint.recv()).await {
                Ok(item) => item,
                Err(_) => continue,
            },
        };

        let multipart = match received {
            Some(Ok(m)) => m,
            Some(Err(e)) => {
                warn!(responder = role.name(), error = %e, "socket error, exiting");
                break;
            }
            None => {
                debug!(responder = role.name(), "endpoint stream closed");
                break;
            }
        };

        match parse_routed_multipart(&multipart) {
            Ok((identity, Tag::Heartbeat, _)) => {
                let reply = build_routed_multipart(&identity, Tag::Heartbeat, Vec::new());
                if endpoint.send(reply).await.is_err() {
                    warn!(responder = role.name(), "failed to send heartbeat reply, exiting");
                    break;
                }
            }
            Ok((_, other, _)) => {
                warn!(responder = role.name(), tag = %other, "unexpected tag on heartbeat endpoint, ignoring");
            }
            Err(e) => {
                warn!(responder = role.name(), error = %e, "malformed heartbeat frame, ignoring");
            }
        }
    }

    // Exit always closes its endpoint; dropping it here does that (zero
    // linger means undelivered bytes are discarded, not flushed).
    drop(endpoint);
}

fn on_timeout(role: Role, flags: &JobFlags) {
    match role {
        Role::Ping => unreachable!("ping has no deadline"),
        Role::Worker => {
            warn!("worker heartbeat timed out, job will exit");
            flags.kill_worker();
        }
        Role::Client => {
            warn!("client heartbeat timed out, session will reset");
            flags.kill_client();
        }
    }
}
