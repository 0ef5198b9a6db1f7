//! The three lifecycle flags shared across the job's concurrent activities.
//!
//! Each flag is single-writer-per-edge (only ever flipped false->true once,
//! at construction, then false forever after) except `client_alive`, which
//! the session driver flips back to true on every reset so a fresh session
//! can run calls again. No locking is needed: every write is idempotent, so
//! a race between two writers setting the same flag false twice is benign.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared liveness state for one job process.
#[derive(Debug)]
pub struct JobFlags {
    job_alive: AtomicBool,
    worker_alive: AtomicBool,
    client_alive: AtomicBool,
}

impl JobFlags {
    /// All three flags start alive.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            job_alive: AtomicBool::new(true),
            worker_alive: AtomicBool::new(true),
            client_alive: AtomicBool::new(true),
        })
    }

    pub fn job_alive(&self) -> bool {
        self.job_alive.load(Ordering::SeqCst)
    }

    /// Unrecoverable error or worker loss: the whole process is done.
    pub fn kill_job(&self) {
        self.job_alive.store(false, Ordering::SeqCst);
    }

    pub fn worker_alive(&self) -> bool {
        self.worker_alive.load(Ordering::SeqCst)
    }

    /// Worker heartbeat responder only: losing the worker kills the job too.
    pub fn kill_worker(&self) {
        self.worker_alive.store(false, Ordering::SeqCst);
        self.kill_job();
    }

    pub fn client_alive(&self) -> bool {
        self.client_alive.load(Ordering::SeqCst)
    }

    /// Client heartbeat timeout, or a call/construction exception: end the
    /// session so the driver resets, but the process keeps running.
    pub fn kill_client(&self) {
        self.client_alive.store(false, Ordering::SeqCst);
    }

    /// A fresh session gets a fresh client, observed alive until proven
    /// otherwise.
    pub fn revive_client(&self) {
        self.client_alive.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_all_alive() {
        let flags = JobFlags::new();
        assert!(flags.job_alive());
        assert!(flags.worker_alive());
        assert!(flags.client_alive());
    }

    #[test]
    fn kill_worker_also_kills_job() {
        let flags = JobFlags::new();
        flags.kill_worker();
        assert!(!flags.worker_alive());
        assert!(!flags.job_alive());
    }

    #[test]
    fn kill_client_does_not_affect_job_or_worker() {
        let flags = JobFlags::new();
        flags.kill_client();
        assert!(!flags.client_alive());
        assert!(flags.job_alive());
        assert!(flags.worker_alive());
    }

    #[test]
    fn client_revives_across_reset() {
        let flags = JobFlags::new();
        flags.kill_client();
        flags.revive_client();
        assert!(flags.client_alive());
    }

    #[test]
    fn double_kill_is_idempotent() {
        let flags = JobFlags::new();
        flags.kill_job();
        flags.kill_job();
        assert!(!flags.job_alive());
    }
}
