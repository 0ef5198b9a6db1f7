//! The session driver: the state machine that owns the request endpoint and
//! runs `WaitForFiles -> StartClientHeartbeat -> WaitForObject -> ServeCalls
//! -> Reset`, over and over, until `job_alive` goes false.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hooteconf::JobConfig;
use hooteproto::frame::{build_routed_multipart, parse_routed_multipart};
use hooteproto::lazy_pirate::LazyPirateConfig;
use hooteproto::socket_config::{Multipart, ZmqContext};
use hooteproto::{decode_bundle, encode_return, CallArguments, InitializedJob, Tag};
use tmq::TmqError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bundle::unpack_bundle;
use crate::endpoints::rebind_client_heartbeat;
use crate::error::JobError;
use crate::flags::JobFlags;
use crate::heartbeat::{self, Role, Timeouts};
use crate::registry::{format_exception, CallFailure, TaskRegistry, UserObject};
use crate::transport::{DealerEndpoint, RouterEndpoint};

/// The session-scoped subset of a started job: the endpoints and addresses
/// the driver itself owns. The ping and worker-heartbeat responders are
/// spawned by the caller before this is constructed, since they outlive any
/// single session and the driver has no use for them.
pub struct SessionContext {
    pub ctx: ZmqContext,
    pub announce_host: IpAddr,
    pub request: RouterEndpoint,
    pub request_address: String,
    pub client_heartbeat: RouterEndpoint,
    pub client_heartbeat_address: String,
    pub ping_address: String,
    pub master: DealerEndpoint,
}

/// Runs the session driver to completion. Returns `Ok(())` on a clean
/// shutdown and `Err` only if the master never acknowledges a reset within
/// the configured retry budget.
pub async fn run(
    started: SessionContext,
    config: JobConfig,
    registry: TaskRegistry,
    flags: Arc<JobFlags>,
) -> Result<(), JobError> {
    let SessionContext {
        ctx,
        announce_host,
        request,
        request_address,
        client_heartbeat,
        client_heartbeat_address,
        ping_address,
        master,
    } = started;

    let timeouts = Timeouts {
        client: config.heartbeat.client_timeout(),
        worker: config.heartbeat.worker_timeout(),
    };

    let mut pending_client_heartbeat = Some(client_heartbeat);
    let mut client_heartbeat_address = client_heartbeat_address;
    let mut client_heartbeat_task: Option<JoinHandle<()>> = None;

    loop {
        if !flags.job_alive() {
            info!("job no longer alive, session driver exiting");
            break;
        }
        flags.revive_client();

        // 1. WaitForFiles
        let scratch_dir = wait_for_files(&request, &config, &flags).await;
        if scratch_dir.is_none() {
            flags.kill_client();
        }

        if let Some(scratch_dir) = scratch_dir {
            // 2. StartClientHeartbeat -- not launched earlier, the client
            // isn't attached until its bundle has landed.
            if let Some(endpoint) = pending_client_heartbeat.take() {
                let responder_flags = flags.clone();
                client_heartbeat_task = Some(tokio::spawn(heartbeat::run(
                    endpoint,
                    Role::Client,
                    timeouts,
                    responder_flags,
                )));
            }

            // 3. WaitForObject
            if let Some(mut object) = wait_for_object(&request, &registry, &scratch_dir, &flags).await {
                // 4. ServeCalls
                serve_calls(&request, object.as_mut(), &flags).await;
                // `object` drops here, before Reset rebinds anything --
                // satisfies dropping the user object at the start of reset.
            }
        }

        if !flags.job_alive() {
            info!("job no longer alive after session, exiting");
            break;
        }

        // 5. Reset
        if let Some(task) = client_heartbeat_task.take() {
            let _ = task.await;
        }

        let (fresh_endpoint, fresh_address) =
            rebind_client_heartbeat(&ctx, &announce_host, "0.0.0.0")?;
        client_heartbeat_address = fresh_address;
        pending_client_heartbeat = Some(fresh_endpoint);

        if let Err(e) = announce_reset(
            &master,
            &config,
            &request_address,
            &client_heartbeat_address,
            &ping_address,
        )
        .await
        {
            error!(error = %e, "reset announcement to master exhausted its retry budget, exiting");
            flags.kill_job();
            return Err(e);
        }
        info!(client_heartbeat_address = %client_heartbeat_address, "session reset, re-advertised to master");
    }

    // 6. Exit
    if let Some(task) = client_heartbeat_task {
        let _ = task.await;
    }
    drop(ctx);
    Ok(())
}

/// How often a blocking wait on the request endpoint wakes up to recheck the
/// liveness flags that should end it. The request endpoint carries no
/// deadline of its own -- calls may run arbitrarily long -- so this is the
/// only way an idle wait (no call pending) notices `client_alive` or
/// `job_alive` going false instead of blocking forever.
const DRIVER_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Waits for the next message on `request`, polling `keep_going` between
/// attempts so a flag flip unblocks the wait even with nothing queued.
/// Returns `None` once `keep_going` reports false, whether or not a message
/// ever arrived.
async fn recv_while(
    request: &RouterEndpoint,
    mut keep_going: impl FnMut() -> bool,
) -> Option<Result<Multipart, TmqError>> {
    loop {
        if !keep_going() {
            return None;
        }
        match tokio::time::timeout(DRIVER_POLL_INTERVAL, request.recv()).await {
            Ok(item) => return item,
            Err(_) => continue,
        }
    }
}

/// Accept exactly one message on the request endpoint. If it's `SEND_FILE`,
/// unpack the bundle and ack `NORMAL`. Anything else is a protocol
/// violation that fails the session without a reply, matching the original
/// behavior of never acknowledging a frame it didn't expect.
async fn wait_for_files(request: &RouterEndpoint, config: &JobConfig, flags: &JobFlags) -> Option<PathBuf> {
    let multipart = match recv_while(request, || flags.job_alive()).await {
        Some(Ok(m)) => m,
        Some(Err(e)) => {
            warn!(error = %e, "socket error waiting for files");
            return None;
        }
        None => {
            warn!("job no longer alive while waiting for files");
            return None;
        }
    };

    let (identity, tag, parts) = match parse_routed_multipart(&multipart) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "malformed frame waiting for files");
            return None;
        }
    };

    if tag != Tag::SendFile {
        warn!(tag = %tag, "protocol violation: expected SEND_FILE");
        return None;
    }

    let files = match parts.first().map(|bytes| decode_bundle(bytes)) {
        Some(Ok(files)) => files,
        Some(Err(e)) => {
            warn!(error = %e, "malformed SEND_FILE payload");
            return None;
        }
        None => {
            warn!("SEND_FILE carried no payload");
            return None;
        }
    };

    let scratch_dir = match unpack_bundle(&config.scratch.root, &files) {
        Ok(dir) => dir,
        Err(e) => {
            error!(error = %e, "failed to unpack code bundle");
            return None;
        }
    };

    let reply = build_routed_multipart(&identity, Tag::Normal, Vec::new());
    if let Err(e) = request.send(reply).await {
        warn!(error = %e, "failed to acknowledge SEND_FILE");
        return None;
    }
    Some(scratch_dir)
}

/// Accept one message on the request endpoint. `INIT_OBJECT` constructs the
/// user object via the registry; any other outcome replies with the
/// appropriate exception and leaves the caller with no object, clearing
/// `client_alive` so the driver falls through to reset.
async fn wait_for_object(
    request: &RouterEndpoint,
    registry: &TaskRegistry,
    scratch_dir: &Path,
    flags: &JobFlags,
) -> Option<Box<dyn UserObject>> {
    let multipart = match recv_while(request, || flags.job_alive() && flags.client_alive()).await {
        Some(Ok(m)) => m,
        Some(Err(e)) => {
            warn!(error = %e, "socket error waiting for object");
            flags.kill_client();
            return None;
        }
        None => {
            warn!("no longer alive while waiting for object");
            return None;
        }
    };

    let (identity, tag, parts) = match parse_routed_multipart(&multipart) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "malformed frame waiting for object");
            flags.kill_client();
            return None;
        }
    };

    if tag != Tag::InitObject {
        warn!(tag = %tag, "protocol violation: expected INIT_OBJECT");
        let reply = build_routed_multipart(
            &identity,
            Tag::Exception,
            vec![format_exception("unknown tag").into_bytes()],
        );
        let _ = request.send(reply).await;
        flags.kill_client();
        return None;
    }

    let descriptor = match parts.first() {
        Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        None => {
            let reply = build_routed_multipart(
                &identity,
                Tag::DeserializeException,
                vec!["INIT_OBJECT carried no class descriptor".as_bytes().to_vec()],
            );
            let _ = request.send(reply).await;
            flags.kill_client();
            return None;
        }
    };

    let args = match parts.get(1).map(|bytes| CallArguments::decode(bytes)) {
        Some(Ok(args)) => args,
        Some(Err(e)) => {
            let reply = build_routed_multipart(
                &identity,
                Tag::DeserializeException,
                vec![e.to_string().into_bytes()],
            );
            let _ = request.send(reply).await;
            flags.kill_client();
            return None;
        }
        None => CallArguments::empty(),
    };

    match registry.construct(&descriptor, args, scratch_dir) {
        Ok(object) => {
            let reply = build_routed_multipart(&identity, Tag::Normal, Vec::new());
            if let Err(e) = request.send(reply).await {
                warn!(error = %e, "failed to acknowledge INIT_OBJECT");
                flags.kill_client();
                return None;
            }
            Some(object)
        }
        Err(message) => {
            warn!(descriptor = %descriptor, error = %message, "construction failed");
            let reply = build_routed_multipart(
                &identity,
                Tag::Exception,
                vec![format_exception(&message).into_bytes()],
            );
            let _ = request.send(reply).await;
            flags.kill_client();
            None
        }
    }
}

/// While both `job_alive` and `client_alive`, accept one request at a time
/// and dispatch it against the hosted object.
async fn serve_calls(request: &RouterEndpoint, object: &mut dyn UserObject, flags: &JobFlags) {
    while flags.job_alive() && flags.client_alive() {
        let multipart = match recv_while(request, || flags.job_alive() && flags.client_alive()).await {
            Some(Ok(m)) => m,
            Some(Err(e)) => {
                warn!(error = %e, "socket error serving calls");
                flags.kill_client();
                break;
            }
            None => {
                info!("no longer alive, leaving ServeCalls");
                break;
            }
        };

        let (identity, tag, parts) = match parse_routed_multipart(&multipart) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "malformed frame while serving calls");
                flags.kill_client();
                break;
            }
        };

        match tag {
            Tag::Call => dispatch_call(request, object, &identity, &parts, flags).await,
            Tag::KillJob => {
                info!("received KILLJOB, resetting session");
                let reply = build_routed_multipart(&identity, Tag::Normal, Vec::new());
                let _ = request.send(reply).await;
                flags.kill_client();
            }
            other => {
                warn!(tag = %other, "protocol violation: unexpected tag while serving calls");
                flags.kill_client();
            }
        }
    }
}

async fn dispatch_call(
    request: &RouterEndpoint,
    object: &mut dyn UserObject,
    identity: &[u8],
    parts: &[Vec<u8>],
    flags: &JobFlags,
) {
    let method = match parts.first() {
        Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        None => {
            let reply = build_routed_multipart(
                identity,
                Tag::DeserializeException,
                vec!["CALL carried no method name".as_bytes().to_vec()],
            );
            let _ = request.send(reply).await;
            flags.kill_client();
            return;
        }
    };

    let args = match parts.get(1).map(|bytes| CallArguments::decode(bytes)) {
        Some(Ok(args)) => args,
        Some(Err(e)) => {
            let reply = build_routed_multipart(
                identity,
                Tag::DeserializeException,
                vec![e.to_string().into_bytes()],
            );
            let _ = request.send(reply).await;
            flags.kill_client();
            return;
        }
        None => CallArguments::empty(),
    };

    match object.call(&method, args) {
        Ok(value) => match encode_return(&value) {
            Ok(encoded) => {
                let reply = build_routed_multipart(identity, Tag::Normal, vec![encoded]);
                if let Err(e) = request.send(reply).await {
                    warn!(error = %e, "failed to send CALL reply");
                    flags.kill_client();
                }
            }
            Err(e) => {
                let reply = build_routed_multipart(
                    identity,
                    Tag::SerializeException,
                    vec![e.to_string().into_bytes()],
                );
                let _ = request.send(reply).await;
                flags.kill_client();
            }
        },
        Err(failure) => {
            let (tag, message) = match &failure {
                CallFailure::MissingAttribute(m) => (Tag::AttributeException, m.clone()),
                CallFailure::Deserialize(m) => (Tag::DeserializeException, m.clone()),
                CallFailure::Serialize(m) => (Tag::SerializeException, m.clone()),
                CallFailure::User(m) => (Tag::Exception, format_exception(m)),
            };
            warn!(method = %method, tag = %tag, "call failed");
            let reply = build_routed_multipart(identity, tag, vec![message.into_bytes()]);
            let _ = request.send(reply).await;
            flags.kill_client();
        }
    }
}

/// Send `RESET_JOB` to the master and wait for any reply, retrying with the
/// configured backoff. Exhausting the retry budget is the one way a reset
/// can fail the whole process rather than just the session.
async fn announce_reset(
    master: &DealerEndpoint,
    config: &JobConfig,
    request_address: &str,
    client_heartbeat_address: &str,
    ping_address: &str,
) -> Result<(), JobError> {
    let announcement = InitializedJob::for_reset(request_address, client_heartbeat_address, ping_address);
    let encoded = announcement
        .encode()
        .map_err(|e| JobError::ProtocolViolation {
            endpoint: "master",
            reason: format!("failed to encode reset announcement: {e}"),
        })?;

    let retry = LazyPirateConfig {
        backoff_base: config.reset.ack_backoff_base(),
        backoff_max: config.reset.ack_backoff_max(),
        max_retries: config.reset.ack_retries,
        ..LazyPirateConfig::default()
    };

    let mut attempt = 0u32;
    loop {
        attempt += 1;

        let message = hooteproto::frame::build_multipart(Tag::ResetJob, vec![encoded.clone()]);
        if let Err(e) = master.send(message).await {
            warn!(attempt, error = %e, "failed to send RESET_JOB, will retry");
        } else {
            match tokio::time::timeout(retry.timeout, master.recv()).await {
                Ok(Some(Ok(_reply))) => return Ok(()),
                Ok(Some(Err(e))) => warn!(attempt, error = %e, "socket error awaiting reset ack"),
                Ok(None) => warn!(attempt, "master closed the connection awaiting reset ack"),
                Err(_) => warn!(attempt, "timed out awaiting reset ack"),
            }
        }

        if attempt >= config.reset.ack_retries {
            return Err(JobError::ResetAckExhausted { attempts: attempt });
        }
        tokio::time::sleep(retry.backoff_for_attempt(attempt)).await;
    }
}
