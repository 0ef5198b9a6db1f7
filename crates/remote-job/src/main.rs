//! Entry point for a single remote job process.
//!
//! A job is spawned by a worker with exactly two addresses to dial; it binds
//! its own four endpoints, announces itself, and runs sessions until the
//! worker disappears or an unrecoverable error occurs. This binary hosts an
//! empty task registry -- embedders that want real user objects depend on
//! `remote_job` as a library, register constructors on a
//! `remote_job::registry::TaskRegistry`, and drive `remote_job::session::run`
//! themselves; this `main` is the reference wiring and a connectivity
//! smoke-test target.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use remote_job::{endpoints, flags::JobFlags, heartbeat, registry::TaskRegistry, session};

/// Remote job worker.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address of the worker that spawned this job (`host:port`).
    #[arg(long)]
    worker_address: String,

    /// Address of the cluster master (`host:port`).
    #[arg(long)]
    master_address: String,

    /// Print the resolved configuration and exit without starting.
    #[arg(long)]
    show_config: bool,
}

/// Marker consumed by user code to avoid recursing into the cluster from
/// inside a job process.
const JOB_MARKER_ENV: &str = "XPARL_IS_REMOTE_JOB";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    std::env::set_var("CUDA_VISIBLE_DEVICES", "");
    std::env::set_var(JOB_MARKER_ENV, "1");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = hooteconf::JobConfig::load().context("failed to load job configuration")?;
    if cli.show_config {
        println!("{config:#?}");
        return Ok(());
    }

    tracing::info!(
        worker_address = %cli.worker_address,
        master_address = %cli.master_address,
        "starting remote job"
    );

    let started = endpoints::start(&cli.worker_address, &cli.master_address, "0.0.0.0")
        .await
        .context("failed to start job endpoints")?;

    let flags = JobFlags::new();
    let timeouts = heartbeat::Timeouts {
        client: config.heartbeat.client_timeout(),
        worker: config.heartbeat.worker_timeout(),
    };

    tokio::spawn(heartbeat::run(
        started.ping,
        heartbeat::Role::Ping,
        timeouts,
        flags.clone(),
    ));
    tokio::spawn(heartbeat::run(
        started.worker_heartbeat,
        heartbeat::Role::Worker,
        timeouts,
        flags.clone(),
    ));

    let session_ctx = session::SessionContext {
        ctx: started.ctx,
        announce_host: started.announce_host,
        request: started.request,
        request_address: started.request_address,
        client_heartbeat: started.client_heartbeat,
        client_heartbeat_address: started.client_heartbeat_address,
        ping_address: started.ping_address,
        master: started.master,
    };

    let registry = TaskRegistry::new();

    match session::run(session_ctx, config, registry, flags).await {
        Ok(()) => {
            tracing::info!("job exiting cleanly");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "job exiting on error");
            Err(e.into())
        }
    }
}
