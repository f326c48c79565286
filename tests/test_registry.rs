use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

use wxbridge::http::request::{Method, Request, RequestBuilder};
use wxbridge::protocol::{ErrorCode, NoticeKind, ResponseFrame};
use wxbridge::registry::{BindOutcome, MAX_LISTENERS, Registry};
use wxbridge::serial::spawn_writer;
use wxbridge::settings::{self, Settings};

fn registry(events: bool) -> (Registry, DuplexStream) {
    let (serial_tx, serial_rx) = duplex(4096);
    let (writer, _task) = spawn_writer(serial_tx, 16);
    let settings = Settings {
        events,
        ..Settings::default()
    };
    (Registry::new(settings::shared(settings), writer), serial_rx)
}

fn get(path: &str) -> Request {
    RequestBuilder::new().method(Method::GET).path(path).build().unwrap()
}

fn post(path: &str, body: &[u8]) -> Request {
    RequestBuilder::new()
        .method(Method::POST)
        .path(path)
        .header("Content-Length", body.len().to_string())
        .body(body.to_vec())
        .build()
        .unwrap()
}

async fn idle(registry: &Registry, handle: usize) -> bool {
    registry.poll(1 << handle).await == vec![ResponseFrame::notice(NoticeKind::Nothing, 0, 0)]
}

async fn bind(registry: &Registry, request: &Request) -> (BindOutcome<DuplexStream>, DuplexStream) {
    let (server, client) = duplex(4096);
    (registry.match_and_bind(request, server).await, client)
}

#[tokio::test]
async fn test_register_fills_every_slot_then_fails() {
    let (registry, _serial) = registry(false);

    for expected in 0..MAX_LISTENERS {
        let handle = registry.register(&format!("/slot/{}", expected)).await.unwrap();
        assert_eq!(handle, expected);
    }

    assert_eq!(registry.register("/one-too-many").await, Err(ErrorCode::NoFreeListener));
}

#[tokio::test]
async fn test_register_validates_pattern() {
    let (registry, _serial) = registry(false);

    assert_eq!(registry.register("").await, Err(ErrorCode::InvalidArgument));
    assert_eq!(registry.register("widget").await, Err(ErrorCode::InvalidArgument));
    assert_eq!(
        registry.register(&format!("/{}", "a".repeat(31))).await,
        Err(ErrorCode::InvalidArgument)
    );
    assert_eq!(registry.register(&format!("/{}", "a".repeat(30))).await, Ok(0));
}

#[tokio::test]
async fn test_wildcard_get_binds_and_notifies() {
    let (registry, mut serial) = registry(true);
    registry.register("/widget/*").await.unwrap();

    let (outcome, _client) = bind(&registry, &get("/widget/42?x=1&name=a%20b")).await;
    assert!(matches!(outcome, BindOutcome::Bound(0)));

    let expected = ResponseFrame::notice(NoticeKind::Get, 0, 0).encode();
    let mut notice = vec![0u8; expected.len()];
    serial.read_exact(&mut notice).await.unwrap();
    assert_eq!(&notice[..], &expected[..]);

    assert!(!idle(&registry, 0).await);
    assert_eq!(registry.arg(0, "x").await.unwrap(), "1");
    assert_eq!(registry.arg(0, "name").await.unwrap(), "a b");
    assert_eq!(registry.arg(0, "missing").await.unwrap(), "");
}

#[tokio::test]
async fn test_pattern_without_wildcard_matches_prefix() {
    let (registry, _serial) = registry(false);
    registry.register("/led").await.unwrap();

    let (outcome, _client) = bind(&registry, &get("/led?state=on")).await;
    assert!(matches!(outcome, BindOutcome::Bound(0)));

    let (outcome, _client) = bind(&registry, &get("/status")).await;
    assert!(matches!(outcome, BindOutcome::Unmatched(_)));
}

#[tokio::test]
async fn test_first_registered_pattern_wins() {
    let (registry, _serial) = registry(false);
    registry.register("/api/*").await.unwrap();
    registry.register("/api/led").await.unwrap();

    let (outcome, _client) = bind(&registry, &get("/api/led")).await;
    assert!(matches!(outcome, BindOutcome::Bound(0)));
    assert!(idle(&registry, 1).await);
}

#[tokio::test]
async fn test_active_slot_reports_busy() {
    let (registry, _serial) = registry(false);
    registry.register("/widget/*").await.unwrap();

    let (first, _client1) = bind(&registry, &get("/widget/1")).await;
    assert!(matches!(first, BindOutcome::Bound(0)));

    let (second, _client2) = bind(&registry, &get("/widget/2")).await;
    assert!(matches!(second, BindOutcome::Busy(0, _)));
    assert!(!idle(&registry, 0).await);
}

#[tokio::test]
async fn test_only_get_and_post_bind() {
    let (registry, _serial) = registry(false);
    registry.register("/*").await.unwrap();

    let put = RequestBuilder::new().method(Method::PUT).path("/x").build().unwrap();
    let (outcome, _client) = bind(&registry, &put).await;

    assert!(matches!(outcome, BindOutcome::Unmatched(_)));
    assert!(idle(&registry, 0).await);
}

#[tokio::test]
async fn test_post_body_is_truncated() {
    let (registry, _serial) = registry(false);
    registry.register("/form").await.unwrap();

    let body = format!("a={}", "x".repeat(198));
    let (outcome, _client) = bind(&registry, &post("/form", body.as_bytes())).await;
    assert!(matches!(outcome, BindOutcome::Bound(0)));

    assert_eq!(registry.arg(0, "a").await.unwrap().len(), 125);
}

#[tokio::test]
async fn test_poll_filters_by_handle_bit() {
    let (registry, _serial) = registry(false);

    assert_eq!(
        registry.poll(0).await,
        vec![ResponseFrame::notice(NoticeKind::Nothing, 0, 0)]
    );

    registry.register("/a").await.unwrap();
    registry.register("/b").await.unwrap();
    registry.register("/c").await.unwrap();
    let (_, _client_a) = bind(&registry, &get("/a")).await;
    let (_, _client_c) = bind(&registry, &post("/c", b"k=v")).await;

    assert_eq!(
        registry.poll(0).await,
        vec![
            ResponseFrame::notice(NoticeKind::Get, 0, 0),
            ResponseFrame::notice(NoticeKind::Post, 2, 0),
        ]
    );
    assert_eq!(
        registry.poll(0b100).await,
        vec![ResponseFrame::notice(NoticeKind::Post, 2, 0)]
    );
    assert_eq!(
        registry.poll(0b010).await,
        vec![ResponseFrame::notice(NoticeKind::Nothing, 0, 0)]
    );
}

#[tokio::test]
async fn test_take_responder_then_release() {
    let (registry, _serial) = registry(false);
    registry.register("/widget/*").await.unwrap();
    let (_, mut client) = bind(&registry, &get("/widget/7")).await;

    let mut responder = registry.take_responder(0).await.unwrap();
    responder.write_all(b"reply").await.unwrap();
    responder.shutdown().await.unwrap();

    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, b"reply");

    // The slot stays active until released.
    assert!(matches!(registry.take_responder(0).await, Err(ErrorCode::InvalidState)));
    let (busy, _client) = bind(&registry, &get("/widget/8")).await;
    assert!(matches!(busy, BindOutcome::Busy(0, _)));

    assert!(registry.release(0).await);
    assert!(!registry.release(0).await);
    assert!(idle(&registry, 0).await);

    let (again, _client) = bind(&registry, &get("/widget/9")).await;
    assert!(matches!(again, BindOutcome::Bound(0)));
}

#[tokio::test]
async fn test_out_of_range_handles() {
    let (registry, _serial) = registry(false);

    assert!(matches!(
        registry.take_responder(MAX_LISTENERS).await,
        Err(ErrorCode::InvalidArgument)
    ));
    assert_eq!(registry.arg(MAX_LISTENERS, "x").await, Err(ErrorCode::InvalidArgument));
    assert!(matches!(registry.take_responder(0).await, Err(ErrorCode::InvalidState)));
    assert_eq!(registry.arg(0, "x").await.unwrap(), "");
}

#[tokio::test]
async fn test_arg_lookup_in_query() {
    let (registry, _serial) = registry(false);
    registry.register("/q").await.unwrap();
    let (_, _client) = bind(&registry, &get("/q?name=foo&other=bar")).await;

    assert_eq!(registry.arg(0, "name").await.unwrap(), "foo");
    assert_eq!(registry.arg(0, "other").await.unwrap(), "bar");
    assert_eq!(registry.arg(0, "missing").await.unwrap(), "");
}
