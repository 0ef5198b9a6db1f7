//! Exercises the frame helpers over real DEALER/ROUTER sockets bound on the
//! loopback interface, rather than just the in-process Multipart helpers.

use std::sync::atomic::{AtomicU16, Ordering};

use futures::{SinkExt, StreamExt};
use hooteproto::frame::{build_multipart, build_routed_multipart, parse_multipart, parse_routed_multipart};
use hooteproto::socket_config::{create_dealer_and_connect, create_router_and_bind, ZmqContext};
use hooteproto::{CallArguments, Tag};

static NEXT_PORT: AtomicU16 = AtomicU16::new(18_900);

fn next_endpoint() -> String {
    let port = NEXT_PORT.fetch_add(1, Ordering::SeqCst);
    format!("tcp://127.0.0.1:{port}")
}

#[tokio::test]
async fn dealer_call_reaches_router_and_reply_returns() {
    let ctx = ZmqContext::new();
    let endpoint = next_endpoint();

    let mut router = create_router_and_bind(&ctx, &endpoint, "test-router").unwrap();
    let mut dealer = create_dealer_and_connect(&ctx, &endpoint, b"client-1", "test-dealer").unwrap();

    let args = CallArguments::new(vec![serde_json::json!(41)], serde_json::Map::new());
    let request = build_multipart(Tag::Call, vec![args.encode().unwrap()]);
    dealer.send(request).await.unwrap();

    let incoming = router.next().await.unwrap().unwrap();
    let (identity, tag, parts) = parse_routed_multipart(&incoming).unwrap();
    assert_eq!(tag, Tag::Call);
    let decoded = CallArguments::decode(&parts[0]).unwrap();
    assert_eq!(decoded, args);

    let reply_value = serde_json::json!(42);
    let reply = build_routed_multipart(
        &identity,
        Tag::Normal,
        vec![hooteproto::encode_return(&reply_value).unwrap()],
    );
    router.send(reply).await.unwrap();

    let response = dealer.next().await.unwrap().unwrap();
    let (tag, parts) = parse_multipart(&response).unwrap();
    assert_eq!(tag, Tag::Normal);
    assert_eq!(hooteproto::decode_return(&parts[0]).unwrap(), reply_value);
}

#[tokio::test]
async fn router_replies_with_exception_tag_on_bad_method() {
    let ctx = ZmqContext::new();
    let endpoint = next_endpoint();

    let mut router = create_router_and_bind(&ctx, &endpoint, "test-router").unwrap();
    let mut dealer = create_dealer_and_connect(&ctx, &endpoint, b"client-2", "test-dealer").unwrap();

    let request = build_multipart(Tag::Call, vec![CallArguments::empty().encode().unwrap()]);
    dealer.send(request).await.unwrap();

    let incoming = router.next().await.unwrap().unwrap();
    let (identity, _tag, _parts) = parse_routed_multipart(&incoming).unwrap();

    let reply = build_routed_multipart(
        &identity,
        Tag::AttributeException,
        vec![b"no such method".to_vec()],
    );
    router.send(reply).await.unwrap();

    let response = dealer.next().await.unwrap().unwrap();
    let (tag, parts) = parse_multipart(&response).unwrap();
    assert_eq!(tag, Tag::AttributeException);
    assert!(tag.is_exception());
    assert_eq!(parts[0], b"no such method");
}
