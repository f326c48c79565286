use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use tokio::net::TcpListener;
use tokio::time::timeout;

use wxbridge::bridge::{Dispatcher, SocketState};
use wxbridge::config::BridgeConfig;
use wxbridge::http::request::{Method, RequestBuilder};
use wxbridge::net::{Credentials, HostNetwork, Network};
use wxbridge::protocol::{CommandFrame, Opcode};
use wxbridge::registry::{BindOutcome, Registry};
use wxbridge::serial::{SerialReader, spawn_writer};
use wxbridge::settings::{self, Settings};

struct Harness {
    dispatcher: Dispatcher<HostNetwork, DuplexStream>,
    input: SerialReader<DuplexStream>,
    controller: DuplexStream,
    serial: DuplexStream,
    debug: DuplexStream,
    registry: Registry,
    network: HostNetwork,
}

fn harness() -> Harness {
    harness_with(BridgeConfig::default())
}

fn harness_with(config: BridgeConfig) -> Harness {
    let (controller, input) = duplex(8192);
    let (serial_tx, serial) = duplex(8192);
    let (debug, debug_rx) = duplex(8192);

    let (writer, _task) = spawn_writer(serial_tx, 64);
    let settings = settings::shared(Settings::default());
    let registry = Registry::new(settings.clone(), writer.clone());
    let network = HostNetwork::new();
    let dispatcher = Dispatcher::new(
        network.clone(),
        registry.clone(),
        settings,
        writer,
        debug_rx,
        &config,
    );

    Harness {
        dispatcher,
        input: SerialReader::new(input),
        controller,
        serial,
        debug,
        registry,
        network,
    }
}

impl Harness {
    async fn run(&mut self, op: Opcode, params: &str) -> Vec<u8> {
        self.dispatch(op.as_byte(), params).await
    }

    async fn dispatch(&mut self, opcode: u8, params: &str) -> Vec<u8> {
        let frame = CommandFrame {
            opcode,
            params: params.to_string(),
        };
        self.dispatcher.dispatch(frame, &mut self.input).await.unwrap();
        self.next_frame().await
    }

    async fn next_frame(&mut self) -> Vec<u8> {
        let mut frame = Vec::new();
        loop {
            let byte = timeout(Duration::from_secs(5), self.serial.read_u8())
                .await
                .expect("no response frame")
                .unwrap();
            frame.push(byte);
            if byte == b'\r' {
                return frame;
            }
        }
    }

    /// Parks a GET for `path` on the registry and returns the client end.
    async fn park(&self, path: &str, handle: usize) -> DuplexStream {
        let request = RequestBuilder::new()
            .method(Method::GET)
            .path(path)
            .build()
            .unwrap();
        let (server, client) = duplex(4096);
        let outcome = self.registry.match_and_bind(&request, server).await;
        assert!(matches!(outcome, BindOutcome::Bound(h) if h == handle));
        client
    }
}

async fn read_reply(client: &mut DuplexStream) -> String {
    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();
    String::from_utf8(received).unwrap()
}

fn frame(body: &str) -> Vec<u8> {
    [&[0xFE, b'='][..], body.as_bytes(), b"\r"].concat()
}

async fn peer() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let params = format!("127.0.0.1,{}", listener.local_addr().unwrap().port());
    (listener, params)
}

#[tokio::test]
async fn test_close_twice() {
    let mut h = harness();
    let (listener, params) = peer().await;

    assert_eq!(h.run(Opcode::Close, "").await, frame("E,9"));
    assert_eq!(h.run(Opcode::Connect, &params).await, frame("S,0"));
    let (_peer, _) = listener.accept().await.unwrap();

    assert_eq!(h.run(Opcode::Close, "").await, frame("S,0"));
    assert_eq!(h.run(Opcode::Close, "").await, frame("E,9"));
    assert_eq!(h.dispatcher.socket().state(), SocketState::Closed);
}

#[tokio::test]
async fn test_send_length_bounds() {
    let mut h = harness();

    assert_eq!(h.run(Opcode::Send, "0").await, frame("E,3"));
    assert_eq!(h.run(Opcode::Send, "0,0").await, frame("E,10"));
    assert_eq!(h.run(Opcode::Send, "0,1025").await, frame("E,10"));
    assert_eq!(h.run(Opcode::Send, "0,abc").await, frame("E,10"));
    assert_eq!(h.run(Opcode::Send, "0,5").await, frame("E,9"));
}

#[tokio::test]
async fn test_send_forwards_payload_from_controller() {
    let mut h = harness();
    let (listener, params) = peer().await;
    assert_eq!(h.run(Opcode::Connect, &params).await, frame("S,0"));
    let (mut peer, _) = listener.accept().await.unwrap();

    let payload: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
    h.controller.write_all(&payload).await.unwrap();
    assert_eq!(h.run(Opcode::Send, "0,1024").await, frame("S,0"));

    let mut received = vec![0u8; 1024];
    peer.read_exact(&mut received).await.unwrap();
    assert_eq!(received, payload);
}

#[tokio::test]
async fn test_recv_returns_count_then_data() {
    let mut h = harness_with(BridgeConfig {
        recv_timeout_ms: 100,
        ..BridgeConfig::default()
    });
    let (listener, params) = peer().await;

    assert_eq!(h.run(Opcode::Recv, "0,10").await, frame("E,9"));
    assert_eq!(h.run(Opcode::Connect, &params).await, frame("S,0"));
    let (mut peer, _) = listener.accept().await.unwrap();

    assert_eq!(h.run(Opcode::Recv, "0,10").await, frame("S,0"));

    peer.write_all(b"world").await.unwrap();
    assert_eq!(h.run(Opcode::Recv, "0,10").await, frame("S,5"));
    let mut data = [0u8; 5];
    h.serial.read_exact(&mut data).await.unwrap();
    assert_eq!(&data, b"world");

    assert_eq!(h.run(Opcode::Recv, "0,2000").await, frame("E,10"));
}

#[tokio::test]
async fn test_peer_close_disconnects_socket() {
    let mut h = harness();
    let (listener, params) = peer().await;
    assert_eq!(h.run(Opcode::Connect, &params).await, frame("S,0"));
    let (peer, _) = listener.accept().await.unwrap();
    drop(peer);

    assert_eq!(h.run(Opcode::Recv, "0,10").await, frame("E,11"));
    assert_eq!(h.dispatcher.socket().state(), SocketState::Closed);
    assert_eq!(h.run(Opcode::Close, "").await, frame("E,9"));
}

#[tokio::test]
async fn test_send_to_reset_peer_fails_and_closes() {
    let mut h = harness();
    let (listener, params) = peer().await;
    assert_eq!(h.run(Opcode::Connect, &params).await, frame("S,0"));
    let (peer, _) = listener.accept().await.unwrap();
    peer.set_linger(Some(Duration::ZERO)).unwrap();
    drop(peer);

    let mut failed = false;
    for _ in 0..50 {
        h.controller.write_all(b"ping").await.unwrap();
        let response = h.run(Opcode::Send, "0,4").await;
        if response == frame("E,8") {
            failed = true;
            break;
        }
        assert_eq!(response, frame("S,0"));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(failed, "writes to a reset peer never failed");
    assert_eq!(h.dispatcher.socket().state(), SocketState::Closed);
    assert_eq!(h.run(Opcode::Close, "").await, frame("E,9"));
    assert_eq!(h.run(Opcode::Send, "0,4").await, frame("E,9"));
}

#[tokio::test]
async fn test_connect_errors() {
    let mut h = harness();

    assert_eq!(h.run(Opcode::Connect, "127.0.0.1").await, frame("E,3"));
    assert_eq!(h.run(Opcode::Connect, "127.0.0.1,0").await, frame("E,2"));
    assert_eq!(h.run(Opcode::Connect, "127.0.0.1,http").await, frame("E,2"));
    assert_eq!(h.run(Opcode::Connect, "no-such-host.invalid,80").await, frame("E,6"));

    let (listener, params) = peer().await;
    drop(listener);
    assert_eq!(h.run(Opcode::Connect, &params).await, frame("E,7"));
    assert_eq!(h.dispatcher.socket().state(), SocketState::Closed);
}

#[tokio::test]
async fn test_connect_replaces_open_socket() {
    let mut h = harness();
    let (first, first_params) = peer().await;
    let (second, second_params) = peer().await;

    assert_eq!(h.run(Opcode::Connect, &first_params).await, frame("S,0"));
    let (mut old_peer, _) = first.accept().await.unwrap();

    assert_eq!(h.run(Opcode::Connect, &second_params).await, frame("S,0"));
    let (_new_peer, _) = second.accept().await.unwrap();

    let mut buf = [0u8; 1];
    assert_eq!(old_peer.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn test_passthrough_goes_to_open_socket() {
    let mut h = harness();
    h.dispatcher.forward_passthrough(Bytes::from_static(b"dropped")).await;

    let (listener, params) = peer().await;
    assert_eq!(h.run(Opcode::Connect, &params).await, frame("S,0"));
    let (mut peer, _) = listener.accept().await.unwrap();

    h.dispatcher.forward_passthrough(Bytes::from_static(b"raw")).await;
    let mut buf = [0u8; 3];
    peer.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"raw");
}

#[tokio::test]
async fn test_get_and_set_variables() {
    let mut h = harness();

    assert_eq!(h.run(Opcode::Check, "module-name").await, frame("S,wxbridge"));
    assert_eq!(h.run(Opcode::Set, "module-name,garden").await, frame("S,0"));
    assert_eq!(h.run(Opcode::Check, "module-name").await, frame("S,garden"));

    assert_eq!(h.run(Opcode::Set, "wifi-mode,2").await, frame("S,0"));
    assert_eq!(h.run(Opcode::Check, "wifi-mode").await, frame("S,AP"));

    assert_eq!(h.run(Opcode::Check, "bogus").await, frame("E,12"));
    assert_eq!(h.run(Opcode::Set, "bogus,1").await, frame("E,12"));
    assert_eq!(h.run(Opcode::Set, "version,2").await, frame("E,2"));
    assert_eq!(h.run(Opcode::Set, "baud-rate,fast").await, frame("E,2"));
    assert_eq!(h.run(Opcode::Set, "baud-rate").await, frame("E,3"));

    assert_eq!(h.run(Opcode::Check, "softap-macaddr").await, frame("S,00:00:00:00:00:00"));
    assert_eq!(h.run(Opcode::Set, "softap-macaddr,02:00:00:00:00:01").await, frame("E,2"));
    assert_eq!(h.run(Opcode::Set, "softap-ipaddr,192.168.4.1").await, frame("S,0"));
    assert_eq!(h.run(Opcode::Check, "softap-ipaddr").await, frame("S,192.168.4.1"));
    assert_eq!(h.run(Opcode::Check, "cmd-start-char").await, frame("S,254"));
    assert_eq!(h.run(Opcode::Set, "cmd-start-char,256").await, frame("E,2"));
}

#[tokio::test]
async fn test_join_records_ssid() {
    let mut h = harness();

    assert_eq!(h.run(Opcode::Join, "home").await, frame("E,2"));
    assert_eq!(h.run(Opcode::Join, "home,secret").await, frame("S,0"));
    assert_eq!(h.run(Opcode::Check, "wifi-ssid").await, frame("S,home"));
    assert_eq!(
        h.network.pending_credentials().await,
        Some(Credentials {
            ssid: "home".to_string(),
            password: "secret".to_string(),
        })
    );

    let reported = h.run(Opcode::Check, "station-ipaddr").await;
    let text = std::str::from_utf8(&reported[4..reported.len() - 1]).unwrap();
    let ip: Ipv4Addr = text.parse().unwrap();
    assert_eq!(h.network.local_ipv4().map_or(ip, |local| local), ip);
}

#[tokio::test]
async fn test_unknown_and_unimplemented_opcodes() {
    let mut h = harness();

    assert_eq!(h.dispatch(0, "").await, frame("S,0"));
    assert_eq!(h.dispatch(b'H', "ELLO").await, frame("S,0"));
    assert_eq!(h.dispatch(0x90, "").await, frame("S,0"));

    for op in [
        Opcode::Path,
        Opcode::ApScan,
        Opcode::ApGet,
        Opcode::FileInfo,
        Opcode::FileCount,
        Opcode::FileRun,
        Opcode::Udp,
    ] {
        assert_eq!(h.run(op, "").await, frame("E,12"), "{:?}", op);
    }
}

#[tokio::test]
async fn test_listen_arg_and_poll() {
    let mut h = harness();

    assert_eq!(h.run(Opcode::Listen, "/widget/*").await, frame("E,2"));
    assert_eq!(h.run(Opcode::Listen, "0,widget").await, frame("E,2"));
    assert_eq!(h.run(Opcode::Listen, "0,/widget/*").await, frame("S,0"));
    assert_eq!(h.run(Opcode::Listen, "0,/led").await, frame("S,1"));

    assert_eq!(h.run(Opcode::Poll, "x").await, frame("E,2"));
    assert_eq!(h.run(Opcode::Poll, "0").await, frame("N:0,0"));

    let request = RequestBuilder::new()
        .method(Method::POST)
        .path("/led")
        .body(b"state=on&level=5".to_vec())
        .build()
        .unwrap();
    let (server, _client) = duplex(1024);
    assert!(matches!(
        h.registry.match_and_bind(&request, server).await,
        BindOutcome::Bound(1)
    ));

    assert_eq!(h.run(Opcode::Poll, "").await, frame("P:1,0"));
    assert_eq!(h.run(Opcode::Poll, "1").await, frame("N:0,0"));
    assert_eq!(h.run(Opcode::Arg, "1,state").await, frame("S,on"));
    assert_eq!(h.run(Opcode::Arg, "1,colour").await, frame("S,"));
    assert_eq!(h.run(Opcode::Arg, "1").await, frame("E,3"));
    assert_eq!(h.run(Opcode::Arg, "12,state").await, frame("E,2"));
}

#[tokio::test]
async fn test_reply_validation() {
    let mut h = harness();
    assert_eq!(h.run(Opcode::Listen, "0,/widget/*").await, frame("S,0"));

    assert_eq!(h.run(Opcode::Reply, "0,200,5").await, frame("E,3"));
    assert_eq!(h.run(Opcode::Reply, "x,200,0,0").await, frame("E,2"));
    assert_eq!(h.run(Opcode::Reply, "12,200,0,0").await, frame("E,2"));
    assert_eq!(h.run(Opcode::Reply, "0,99,0,0").await, frame("E,2"));
    assert_eq!(h.run(Opcode::Reply, "0,1000,0,0").await, frame("E,2"));
    assert_eq!(h.run(Opcode::Reply, "0,200,many,0").await, frame("E,2"));
    assert_eq!(h.run(Opcode::Reply, "0,200,5,1025").await, frame("E,10"));
    assert_eq!(h.run(Opcode::Reply, "0,200,5,lots").await, frame("E,10"));
    assert_eq!(h.run(Opcode::Reply, "0,200,0,0").await, frame("E,9"));
}

#[tokio::test]
async fn test_reply_streams_debug_bytes() {
    let mut h = harness();
    assert_eq!(h.run(Opcode::Listen, "0,/widget/*").await, frame("S,0"));
    let mut client = h.park("/widget/42?x=1", 0).await;

    h.debug.write_all(b"hello").await.unwrap();
    assert_eq!(h.run(Opcode::Reply, "0,200,5,5").await, frame("S,0"));

    let text = read_reply(&mut client).await;
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Content-Length: 5\r\n"));
    assert!(text.contains("Content-Type: text/html\r\n"));
    assert!(text.ends_with("\r\n\r\nhello"));

    assert_eq!(h.run(Opcode::Poll, "1").await, frame("N:0,0"));
    h.debug.write_all(b"again").await.unwrap();
    assert_eq!(h.run(Opcode::Reply, "0,200,5,5").await, frame("E,9"));
}

#[tokio::test]
async fn test_reply_accepts_any_three_digit_status() {
    let mut h = harness();
    assert_eq!(h.run(Opcode::Listen, "0,/widget/*").await, frame("S,0"));
    let mut client = h.park("/widget/1", 0).await;

    h.debug.write_all(b"taken").await.unwrap();
    assert_eq!(h.run(Opcode::Reply, "0,409,5,5").await, frame("S,0"));

    let text = read_reply(&mut client).await;
    assert!(text.starts_with("HTTP/1.1 409 Client Error\r\n"));
    assert!(text.ends_with("\r\n\r\ntaken"));
}

#[tokio::test]
async fn test_rejected_reply_consumes_its_body() {
    let mut h = harness();
    assert_eq!(h.run(Opcode::Listen, "0,/widget/*").await, frame("S,0"));
    let mut client = h.park("/widget/1", 0).await;

    h.debug.write_all(b"STALE").await.unwrap();
    assert_eq!(h.run(Opcode::Reply, "0,42,5,5").await, frame("E,2"));
    h.debug.write_all(b"OLDER").await.unwrap();
    assert_eq!(h.run(Opcode::Reply, "x,200,5,5").await, frame("E,2"));
    h.debug.write_all(b"EXTRA").await.unwrap();
    assert_eq!(h.run(Opcode::Reply, "0,200,lots,5").await, frame("E,2"));
    assert_eq!(h.run(Opcode::Poll, "1").await, frame("G:0,0"));

    h.debug.write_all(b"fresh").await.unwrap();
    assert_eq!(h.run(Opcode::Reply, "0,200,5,5").await, frame("S,0"));
    assert!(read_reply(&mut client).await.ends_with("\r\n\r\nfresh"));
}

#[tokio::test]
async fn test_reply_without_pending_request_consumes_its_body() {
    let mut h = harness();
    assert_eq!(h.run(Opcode::Listen, "0,/widget/*").await, frame("S,0"));

    h.debug.write_all(b"AAAAA").await.unwrap();
    assert_eq!(h.run(Opcode::Reply, "0,200,5,5").await, frame("E,9"));

    let mut client = h.park("/widget/2", 0).await;
    h.debug.write_all(b"BBBBB").await.unwrap();
    assert_eq!(h.run(Opcode::Reply, "0,200,5,5").await, frame("S,0"));
    assert!(read_reply(&mut client).await.ends_with("\r\n\r\nBBBBB"));
}

#[tokio::test]
async fn test_reply_deadline_releases_slot() {
    let mut h = harness_with(BridgeConfig {
        reply_timeout_ms: Some(100),
        ..BridgeConfig::default()
    });
    assert_eq!(h.run(Opcode::Listen, "0,/widget/*").await, frame("S,0"));
    let mut client = h.park("/widget/1", 0).await;

    h.debug.write_all(b"ab").await.unwrap();
    assert_eq!(h.run(Opcode::Reply, "0,404,3,3").await, frame("E,10"));
    assert_eq!(h.run(Opcode::Poll, "1").await, frame("N:0,0"));
    assert!(read_reply(&mut client).await.is_empty());

    let mut client = h.park("/widget/2", 0).await;
    h.debug.write_all(b"xyz").await.unwrap();
    assert_eq!(h.run(Opcode::Reply, "0,200,3,3").await, frame("S,0"));
    assert!(read_reply(&mut client).await.ends_with("\r\n\r\nxyz"));
}
