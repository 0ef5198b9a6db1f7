//! End-to-end exercise of the session driver against hand-rolled ZMQ peers
//! standing in for the worker, master, and client. No mocking framework --
//! real ROUTER/DEALER sockets over loopback TCP, matching the style of this
//! workspace's other protocol integration tests.

use std::time::Duration;

use hooteproto::frame::{build_multipart, parse_multipart};
use hooteproto::socket_config::{create_dealer_and_connect, create_router_and_bind, ZmqContext};
use hooteproto::{decode_return, CallArguments, Tag};
use serde_json::json;
use tokio::sync::mpsc;

use remote_job::registry::{CallFailure, TaskRegistry, UserObject};
use remote_job::transport::{DealerEndpoint, RouterEndpoint};
use remote_job::{endpoints, flags::JobFlags, session};

struct Adder;

impl UserObject for Adder {
    fn call(&mut self, method: &str, args: CallArguments) -> Result<serde_json::Value, CallFailure> {
        match method {
            "f" => {
                let x = args
                    .args
                    .first()
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| CallFailure::Deserialize("expected one integer argument".to_string()))?;
                Ok(json!(x + 1))
            }
            other => Err(CallFailure::MissingAttribute(format!(
                "object has no attribute '{other}'"
            ))),
        }
    }
}

fn test_config(scratch_root: std::path::PathBuf) -> hooteconf::JobConfig {
    hooteconf::JobConfig {
        heartbeat: hooteconf::HeartbeatConfig {
            client_timeout_ms: 10_000,
            worker_timeout_ms: 60_000,
        },
        reset: hooteconf::ResetConfig {
            ack_retries: 3,
            ack_backoff_base_ms: 20,
            ack_backoff_max_ms: 200,
        },
        scratch: hooteconf::ScratchConfig { root: scratch_root },
    }
}

/// Spawns the fake worker: acks the startup announcement once, then goes
/// quiet (the test never sends worker heartbeats).
fn spawn_fake_worker(ctx: &ZmqContext, addr: &str) {
    let socket = create_router_and_bind(ctx, addr, "fake-worker").expect("bind fake worker");
    let endpoint = RouterEndpoint::new(socket);
    tokio::spawn(async move {
        if let Some(Ok(multipart)) = endpoint.recv().await {
            if let Ok((identity, _tag, _parts)) = hooteproto::frame::parse_routed_multipart(&multipart) {
                let reply = hooteproto::frame::build_routed_multipart(&identity, Tag::Normal, Vec::new());
                let _ = endpoint.send(reply).await;
            }
        }
    });
}

/// Spawns the fake master: acks every `RESET_JOB` it sees and reports the
/// client-heartbeat address each announcement carried, over `tx`.
fn spawn_fake_master(ctx: &ZmqContext, addr: &str, tx: mpsc::UnboundedSender<String>) {
    let socket = create_router_and_bind(ctx, addr, "fake-master").expect("bind fake master");
    let endpoint = RouterEndpoint::new(socket);
    tokio::spawn(async move {
        loop {
            let multipart = match endpoint.recv().await {
                Some(Ok(m)) => m,
                _ => break,
            };
            let (identity, _tag, parts) = match hooteproto::frame::parse_routed_multipart(&multipart) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if let Some(payload) = parts.first() {
                if let Ok(announcement) = hooteproto::InitializedJob::decode(payload) {
                    let _ = tx.send(announcement.client_heartbeat_address);
                }
            }
            let reply = hooteproto::frame::build_routed_multipart(&identity, Tag::Normal, Vec::new());
            let _ = endpoint.send(reply).await;
        }
    });
}

fn dial(address: &str) -> String {
    if address.starts_with("tcp://") {
        address.to_string()
    } else {
        format!("tcp://{address}")
    }
}

#[tokio::test]
async fn happy_path_then_attribute_error_resets_then_recovers() {
    let peer_ctx = ZmqContext::new();

    let worker_port = remote_job::net::free_port().unwrap();
    let master_port = remote_job::net::free_port().unwrap();
    let worker_addr = format!("127.0.0.1:{worker_port}");
    let master_addr = format!("127.0.0.1:{master_port}");

    spawn_fake_worker(&peer_ctx, &format!("tcp://{worker_addr}"));
    let (reset_tx, mut reset_rx) = mpsc::unbounded_channel();
    spawn_fake_master(&peer_ctx, &format!("tcp://{master_addr}"), reset_tx);

    let started = endpoints::start(&worker_addr, &master_addr, "0.0.0.0")
        .await
        .expect("job endpoints start against fake worker/master");

    let scratch_root = tempfile::tempdir().unwrap();
    let config = test_config(scratch_root.path().to_path_buf());
    let flags = JobFlags::new();

    let registry = TaskRegistry::new();
    registry.register("Adder", |_args: CallArguments, _scratch_dir: &std::path::Path| -> Result<Box<dyn UserObject>, String> {
        Ok(Box::new(Adder))
    });

    let first_client_heartbeat_address = started.client_heartbeat_address.clone();
    let request_address = started.request_address.clone();

    let session_ctx = session::SessionContext {
        ctx: started.ctx,
        announce_host: started.announce_host,
        request: started.request,
        request_address: started.request_address.clone(),
        client_heartbeat: started.client_heartbeat,
        client_heartbeat_address: started.client_heartbeat_address,
        ping_address: started.ping_address,
        master: started.master,
    };

    let driver_flags = flags.clone();
    tokio::spawn(async move {
        let _ = session::run(session_ctx, config, registry, driver_flags).await;
    });

    let client_socket =
        create_dealer_and_connect(&peer_ctx, &dial(&request_address), b"test-client", "test-client")
            .expect("connect test client");
    let client = DealerEndpoint::new(client_socket);

    // Session 1: SEND_FILE, INIT_OBJECT, a successful CALL.
    let send_file = build_multipart(
        Tag::SendFile,
        vec![hooteproto::encode_bundle(&std::collections::HashMap::new()).unwrap()],
    );
    client.send(send_file).await.unwrap();
    let (tag, _) = recv_reply(&client).await;
    assert_eq!(tag, Tag::Normal);

    let init_object = build_multipart(
        Tag::InitObject,
        vec![b"Adder".to_vec(), CallArguments::empty().encode().unwrap()],
    );
    client.send(init_object).await.unwrap();
    let (tag, _) = recv_reply(&client).await;
    assert_eq!(tag, Tag::Normal);

    let call_f = build_multipart(
        Tag::Call,
        vec![
            b"f".to_vec(),
            CallArguments::new(vec![json!(41)], Default::default()).encode().unwrap(),
        ],
    );
    client.send(call_f).await.unwrap();
    let (tag, parts) = recv_reply(&client).await;
    assert_eq!(tag, Tag::Normal);
    assert_eq!(decode_return(&parts[0]).unwrap(), json!(42));

    // Calling an attribute the object doesn't have resets the session.
    let call_g = build_multipart(
        Tag::Call,
        vec![b"g".to_vec(), CallArguments::empty().encode().unwrap()],
    );
    client.send(call_g).await.unwrap();
    let (tag, _) = recv_reply(&client).await;
    assert_eq!(tag, Tag::AttributeException);

    let reset_address = tokio::time::timeout(Duration::from_secs(2), reset_rx.recv())
        .await
        .expect("master should observe a RESET_JOB")
        .expect("channel open");
    assert_ne!(reset_address, first_client_heartbeat_address);

    // Session 2: the same request endpoint serves a fresh session normally.
    let send_file = build_multipart(
        Tag::SendFile,
        vec![hooteproto::encode_bundle(&std::collections::HashMap::new()).unwrap()],
    );
    client.send(send_file).await.unwrap();
    let (tag, _) = recv_reply(&client).await;
    assert_eq!(tag, Tag::Normal);

    let init_object = build_multipart(
        Tag::InitObject,
        vec![b"Adder".to_vec(), CallArguments::empty().encode().unwrap()],
    );
    client.send(init_object).await.unwrap();
    let (tag, _) = recv_reply(&client).await;
    assert_eq!(tag, Tag::Normal);

    let call_f = build_multipart(
        Tag::Call,
        vec![
            b"f".to_vec(),
            CallArguments::new(vec![json!(10)], Default::default()).encode().unwrap(),
        ],
    );
    client.send(call_f).await.unwrap();
    let (tag, parts) = recv_reply(&client).await;
    assert_eq!(tag, Tag::Normal);
    assert_eq!(decode_return(&parts[0]).unwrap(), json!(11));

    flags.kill_job();
}

#[tokio::test]
async fn kill_tag_resets_with_fresh_client_heartbeat_address() {
    let peer_ctx = ZmqContext::new();

    let worker_port = remote_job::net::free_port().unwrap();
    let master_port = remote_job::net::free_port().unwrap();
    let worker_addr = format!("127.0.0.1:{worker_port}");
    let master_addr = format!("127.0.0.1:{master_port}");

    spawn_fake_worker(&peer_ctx, &format!("tcp://{worker_addr}"));
    let (reset_tx, mut reset_rx) = mpsc::unbounded_channel();
    spawn_fake_master(&peer_ctx, &format!("tcp://{master_addr}"), reset_tx);

    let started = endpoints::start(&worker_addr, &master_addr, "0.0.0.0")
        .await
        .expect("job endpoints start against fake worker/master");

    let scratch_root = tempfile::tempdir().unwrap();
    let config = test_config(scratch_root.path().to_path_buf());
    let flags = JobFlags::new();
    let registry = TaskRegistry::new();
    registry.register("Adder", |_args: CallArguments, _scratch_dir: &std::path::Path| -> Result<Box<dyn UserObject>, String> {
        Ok(Box::new(Adder))
    });

    let request_address = started.request_address.clone();
    let first_client_heartbeat_address = started.client_heartbeat_address.clone();

    let session_ctx = session::SessionContext {
        ctx: started.ctx,
        announce_host: started.announce_host,
        request: started.request,
        request_address: started.request_address.clone(),
        client_heartbeat: started.client_heartbeat,
        client_heartbeat_address: started.client_heartbeat_address,
        ping_address: started.ping_address,
        master: started.master,
    };

    let driver_flags = flags.clone();
    tokio::spawn(async move {
        let _ = session::run(session_ctx, config, registry, driver_flags).await;
    });

    let client_socket =
        create_dealer_and_connect(&peer_ctx, &dial(&request_address), b"test-client", "test-client")
            .expect("connect test client");
    let client = DealerEndpoint::new(client_socket);

    let send_file = build_multipart(
        Tag::SendFile,
        vec![hooteproto::encode_bundle(&std::collections::HashMap::new()).unwrap()],
    );
    client.send(send_file).await.unwrap();
    assert_eq!(recv_reply(&client).await.0, Tag::Normal);

    let init_object = build_multipart(
        Tag::InitObject,
        vec![b"Adder".to_vec(), CallArguments::empty().encode().unwrap()],
    );
    client.send(init_object).await.unwrap();
    assert_eq!(recv_reply(&client).await.0, Tag::Normal);

    let killjob = build_multipart(Tag::KillJob, Vec::new());
    client.send(killjob).await.unwrap();
    assert_eq!(recv_reply(&client).await.0, Tag::Normal);

    let reset_address = tokio::time::timeout(Duration::from_secs(2), reset_rx.recv())
        .await
        .expect("master should observe a RESET_JOB after KILLJOB")
        .expect("channel open");
    assert_ne!(reset_address, first_client_heartbeat_address);

    flags.kill_job();
}

#[tokio::test]
async fn silent_client_times_out_and_triggers_reset() {
    let peer_ctx = ZmqContext::new();

    let worker_port = remote_job::net::free_port().unwrap();
    let master_port = remote_job::net::free_port().unwrap();
    let worker_addr = format!("127.0.0.1:{worker_port}");
    let master_addr = format!("127.0.0.1:{master_port}");

    spawn_fake_worker(&peer_ctx, &format!("tcp://{worker_addr}"));
    let (reset_tx, mut reset_rx) = mpsc::unbounded_channel();
    spawn_fake_master(&peer_ctx, &format!("tcp://{master_addr}"), reset_tx);

    let started = endpoints::start(&worker_addr, &master_addr, "0.0.0.0")
        .await
        .expect("job endpoints start against fake worker/master");

    let scratch_root = tempfile::tempdir().unwrap();
    let mut config = test_config(scratch_root.path().to_path_buf());
    config.heartbeat.client_timeout_ms = 150;

    let flags = JobFlags::new();
    let registry = TaskRegistry::new();
    registry.register("Adder", |_args: CallArguments, _scratch_dir: &std::path::Path| -> Result<Box<dyn UserObject>, String> {
        Ok(Box::new(Adder))
    });

    let request_address = started.request_address.clone();
    let first_client_heartbeat_address = started.client_heartbeat_address.clone();

    let session_ctx = session::SessionContext {
        ctx: started.ctx,
        announce_host: started.announce_host,
        request: started.request,
        request_address: started.request_address.clone(),
        client_heartbeat: started.client_heartbeat,
        client_heartbeat_address: started.client_heartbeat_address,
        ping_address: started.ping_address,
        master: started.master,
    };

    let driver_flags = flags.clone();
    tokio::spawn(async move {
        let _ = session::run(session_ctx, config, registry, driver_flags).await;
    });

    // Attach a client far enough to start the client-heartbeat responder,
    // then go silent -- no more heartbeats, no more calls.
    let client_socket =
        create_dealer_and_connect(&peer_ctx, &dial(&request_address), b"test-client", "test-client")
            .expect("connect test client");
    let client = DealerEndpoint::new(client_socket);

    let send_file = build_multipart(
        Tag::SendFile,
        vec![hooteproto::encode_bundle(&std::collections::HashMap::new()).unwrap()],
    );
    client.send(send_file).await.unwrap();
    assert_eq!(recv_reply(&client).await.0, Tag::Normal);

    let init_object = build_multipart(
        Tag::InitObject,
        vec![b"Adder".to_vec(), CallArguments::empty().encode().unwrap()],
    );
    client.send(init_object).await.unwrap();
    assert_eq!(recv_reply(&client).await.0, Tag::Normal);

    let reset_address = tokio::time::timeout(Duration::from_secs(2), reset_rx.recv())
        .await
        .expect("master should observe a RESET_JOB once the client heartbeat times out")
        .expect("channel open");
    assert_ne!(reset_address, first_client_heartbeat_address);

    flags.kill_job();
}

async fn recv_reply(client: &DealerEndpoint) -> (Tag, Vec<Vec<u8>>) {
    let multipart = tokio::time::timeout(Duration::from_secs(2), client.recv())
        .await
        .expect("reply within deadline")
        .expect("socket still open")
        .expect("no socket error");
    parse_multipart(&multipart).expect("well-formed reply")
}
