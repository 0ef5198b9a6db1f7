//! The endpoint manager: binds the four server-role endpoints, connects the
//! two outbound channels, and performs the startup handshake with the
//! worker.

use std::net::IpAddr;

use anyhow::Context as _;
use hooteproto::frame::{build_multipart, parse_multipart};
use hooteproto::socket_config::{
    create_dealer_and_connect, create_router_and_bind, ZmqContext,
};
use hooteproto::{InitializedJob, Tag};
use tracing::info;

use crate::error::JobError;
use crate::net::{free_port, primary_ip};
use crate::transport::{DealerEndpoint, RouterEndpoint};

/// Everything the session driver and the heartbeat responders need after
/// startup completes.
pub struct StartedJob {
    pub ctx: ZmqContext,
    pub announce_host: IpAddr,

    pub request: RouterEndpoint,
    pub request_address: String,

    pub worker_heartbeat: RouterEndpoint,
    pub worker_heartbeat_address: String,

    pub client_heartbeat: RouterEndpoint,
    pub client_heartbeat_address: String,

    pub ping: RouterEndpoint,
    pub ping_address: String,

    /// Held open for the process lifetime even though the startup
    /// announcement is its only use.
    #[allow(dead_code)]
    pub worker: DealerEndpoint,

    pub master: DealerEndpoint,

    pub pid: u32,
}

fn bind_router(ctx: &ZmqContext, host: &str, name: &'static str) -> Result<(RouterEndpoint, String), JobError> {
    let port = free_port().map_err(|e| JobError::Bind {
        endpoint: name,
        addr: format!("{host}:0"),
        source: e.into(),
    })?;
    let addr = format!("tcp://{host}:{port}");
    let socket = create_router_and_bind(ctx, &addr, name).map_err(|e| JobError::Bind {
        endpoint: name,
        addr: addr.clone(),
        source: e,
    })?;
    Ok((RouterEndpoint::new(socket), addr))
}

/// Bind all four endpoints, dial the worker and master, and hand the
/// startup `InitializedJob` announcement to the worker. Returns once the
/// worker has acknowledged it.
pub async fn start(worker_address: &str, master_address: &str, bind_host: &str) -> Result<StartedJob, JobError> {
    let ctx = ZmqContext::new();
    let announce_host = primary_ip().map_err(JobError::NoPrimaryIp)?;

    let (request, request_local) = bind_router(&ctx, bind_host, "request")?;
    let (worker_heartbeat, worker_heartbeat_local) = bind_router(&ctx, bind_host, "worker-heartbeat")?;
    let (client_heartbeat, client_heartbeat_local) = bind_router(&ctx, bind_host, "client-heartbeat")?;
    let (ping, ping_local) = bind_router(&ctx, bind_host, "ping")?;

    let request_address = announced_address(&announce_host, &request_local);
    let worker_heartbeat_address = announced_address(&announce_host, &worker_heartbeat_local);
    let client_heartbeat_address = announced_address(&announce_host, &client_heartbeat_local);
    let ping_address = announced_address(&announce_host, &ping_local);

    let worker_dealer_addr = dial_address(worker_address);
    let worker_socket = create_dealer_and_connect(&ctx, &worker_dealer_addr, b"remote-job-worker", "worker")
        .map_err(|e| JobError::Dial { peer: "worker", addr: worker_dealer_addr.clone(), source: e })?;
    let worker = DealerEndpoint::new(worker_socket);

    let master_dealer_addr = dial_address(master_address);
    let master_socket = create_dealer_and_connect(&ctx, &master_dealer_addr, b"remote-job-master", "master")
        .map_err(|e| JobError::Dial { peer: "master", addr: master_dealer_addr.clone(), source: e })?;
    let master = DealerEndpoint::new(master_socket);

    let pid = std::process::id();

    let announcement = InitializedJob::for_worker(
        request_address.clone(),
        worker_heartbeat_address.clone(),
        client_heartbeat_address.clone(),
        ping_address.clone(),
        worker_address,
        pid,
    );
    let encoded = announcement
        .encode()
        .context("failed to encode startup InitializedJob announcement")
        .map_err(|e| JobError::Dial { peer: "worker", addr: worker_dealer_addr.clone(), source: e })?;

    let message = build_multipart(Tag::Normal, vec![encoded]);
    worker
        .send(message)
        .await
        .context("failed to send startup announcement to worker")
        .map_err(|e| JobError::Dial { peer: "worker", addr: worker_dealer_addr.clone(), source: e })?;

    let ack = worker.recv().await;
    match ack {
        Some(Ok(multipart)) => {
            let _ = parse_multipart(&multipart);
            info!(
                request_address = %request_address,
                worker_heartbeat_address = %worker_heartbeat_address,
                client_heartbeat_address = %client_heartbeat_address,
                ping_address = %ping_address,
                "worker acknowledged startup announcement"
            );
        }
        Some(Err(e)) => {
            return Err(JobError::Dial {
                peer: "worker",
                addr: worker_dealer_addr,
                source: anyhow::anyhow!("failed to receive startup acknowledgement: {e}"),
            })
        }
        None => {
            return Err(JobError::Dial {
                peer: "worker",
                addr: worker_dealer_addr,
                source: anyhow::anyhow!("worker closed the connection before acknowledging"),
            })
        }
    }

    Ok(StartedJob {
        ctx,
        announce_host,
        request,
        request_address,
        worker_heartbeat,
        worker_heartbeat_address,
        client_heartbeat,
        client_heartbeat_address,
        ping,
        ping_address,
        worker,
        master,
        pid,
    })
}

/// Rebind a fresh client-heartbeat endpoint for a new session, per the
/// invariant that this address changes on every reset.
pub fn rebind_client_heartbeat(
    ctx: &ZmqContext,
    announce_host: &IpAddr,
    bind_host: &str,
) -> Result<(RouterEndpoint, String), JobError> {
    let (endpoint, local) = bind_router(ctx, bind_host, "client-heartbeat")?;
    let address = announced_address(announce_host, &local);
    Ok((endpoint, address))
}

fn announced_address(host: &IpAddr, local_tcp_addr: &str) -> String {
    let port = local_tcp_addr.rsplit(':').next().unwrap_or_default();
    format!("{host}:{port}")
}

/// Peer addresses arrive as `host:port`; ZMQ wants a `tcp://` scheme.
fn dial_address(address: &str) -> String {
    if address.starts_with("tcp://") {
        address.to_string()
    } else {
        format!("tcp://{address}")
    }
}
