//! Shared helpers for integration tests
//!
//! Provides scripted peers for both transports (a unix-socket peer speaking
//! the binary frame protocol and a loopback WebSocket peer) plus a minimal
//! HTTP stub for the OAuth endpoints and discovery probes.

#![allow(dead_code)]

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use discord_rpc_client::frame::{encode, Frame, FrameDecoder, OpCode};

// ---------------------------------------------------------------------------
// Unix-socket peer
// ---------------------------------------------------------------------------

#[cfg(unix)]
pub mod ipc_peer {
    use super::*;
    use tokio::net::{UnixListener, UnixStream};

    /// Bind `discord-ipc-0` in a fresh temp dir
    pub fn listen() -> (tempfile::TempDir, UnixListener) {
        let dir = tempfile::tempdir().expect("tempdir");
        let listener = UnixListener::bind(dir.path().join("discord-ipc-0")).expect("bind socket");
        (dir, listener)
    }

    /// One accepted peer connection, driven frame by frame from the test
    pub struct PeerConnection {
        stream: UnixStream,
        decoder: FrameDecoder,
    }

    impl PeerConnection {
        pub async fn accept(listener: &UnixListener) -> Self {
            let (stream, _) = listener.accept().await.expect("accept");
            Self {
                stream,
                decoder: FrameDecoder::new(),
            }
        }

        /// Accept, consume the handshake, and answer with READY
        pub async fn accept_ready(listener: &UnixListener) -> Self {
            let mut peer = Self::accept(listener).await;
            peer.expect_handshake().await;
            peer.send_ready().await;
            peer
        }

        pub async fn read_frame(&mut self) -> Frame {
            loop {
                if let Some(frame) = self.decoder.next_frame().expect("decode") {
                    return frame;
                }
                let mut buf = [0u8; 4096];
                let n = self.stream.read(&mut buf).await.expect("read");
                assert!(n > 0, "client closed the connection");
                self.decoder.extend(&buf[..n]);
            }
        }

        /// Next FRAME payload, skipping every other opcode
        pub async fn read_message(&mut self) -> Value {
            loop {
                let frame = self.read_frame().await;
                if frame.op == OpCode::Frame {
                    return frame.payload;
                }
            }
        }

        pub async fn write_frame(&mut self, op: OpCode, payload: Value) {
            let packet = encode(op, &payload).expect("encode");
            self.stream.write_all(&packet).await.expect("write");
        }

        pub async fn expect_handshake(&mut self) -> Value {
            let frame = self.read_frame().await;
            assert_eq!(frame.op, OpCode::Handshake, "first frame must be the handshake");
            frame.payload
        }

        pub async fn send_ready(&mut self) {
            self.write_frame(OpCode::Frame, ready_payload()).await;
        }

        pub async fn respond(&mut self, nonce: &str, cmd: &str, data: Value) {
            self.write_frame(
                OpCode::Frame,
                json!({"cmd": cmd, "nonce": nonce, "data": data}),
            )
            .await;
        }

        pub async fn respond_error(&mut self, nonce: &str, cmd: &str, code: u64, message: &str) {
            self.write_frame(
                OpCode::Frame,
                json!({
                    "cmd": cmd,
                    "evt": "ERROR",
                    "nonce": nonce,
                    "data": {"code": code, "message": message},
                }),
            )
            .await;
        }

        pub async fn dispatch(&mut self, evt: &str, data: Value) {
            self.write_frame(
                OpCode::Frame,
                json!({"cmd": "DISPATCH", "evt": evt, "data": data}),
            )
            .await;
        }
    }
}

// ---------------------------------------------------------------------------
// Loopback WebSocket peer
// ---------------------------------------------------------------------------

pub mod ws_peer {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::WebSocketStream;

    /// Bind an ephemeral loopback port for the WebSocket peer
    pub async fn listen() -> (u16, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        (port, listener)
    }

    pub struct WsPeer {
        ws: WebSocketStream<TcpStream>,
    }

    impl WsPeer {
        pub async fn accept(listener: &TcpListener) -> Self {
            let (stream, _) = listener.accept().await.expect("accept");
            let ws = tokio_tungstenite::accept_async(stream)
                .await
                .expect("websocket handshake");
            Self { ws }
        }

        pub async fn accept_ready(listener: &TcpListener) -> Self {
            let mut peer = Self::accept(listener).await;
            peer.send_json(ready_payload()).await;
            peer
        }

        pub async fn send_json(&mut self, value: Value) {
            self.ws
                .send(Message::Text(value.to_string()))
                .await
                .expect("send");
        }

        pub async fn read_json(&mut self) -> Value {
            loop {
                match self.ws.next().await.expect("peer stream ended") {
                    Ok(Message::Text(text)) => {
                        return serde_json::from_str(&text).expect("message JSON")
                    }
                    Ok(_) => {}
                    Err(err) => panic!("websocket error: {err}"),
                }
            }
        }

        pub async fn respond(&mut self, nonce: &str, cmd: &str, data: Value) {
            self.send_json(json!({"cmd": cmd, "nonce": nonce, "data": data}))
                .await;
        }

        pub async fn dispatch(&mut self, evt: &str, data: Value) {
            self.send_json(json!({"cmd": "DISPATCH", "evt": evt, "data": data}))
                .await;
        }

        /// Close with a normal (non-abnormal, non-fatal) code
        pub async fn close_normal(&mut self) {
            let _ = self
                .ws
                .close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                }))
                .await;
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP stub (OAuth endpoints + discovery probes)
// ---------------------------------------------------------------------------

/// Serve `/oauth2/token` and `/oauth2/token/rpc` with canned JSON and answer
/// everything else 404, which is exactly what endpoint discovery looks for.
pub async fn spawn_http_stub() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(handle_http(stream));
        }
    });
    port
}

async fn handle_http(mut stream: TcpStream) {
    let mut buf = vec![0u8; 16 * 1024];
    let mut total = 0;

    // read the full head plus the declared body
    let header_end = loop {
        match stream.read(&mut buf[total..]).await {
            Ok(0) => return,
            Ok(n) => {
                total += n;
                if let Some(pos) = find_header_end(&buf[..total]) {
                    break pos;
                }
                if total == buf.len() {
                    return;
                }
            }
            Err(_) => return,
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);
    while total < header_end + 4 + content_length {
        match stream.read(&mut buf[total..]).await {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(_) => return,
        }
    }

    let path = head.split_whitespace().nth(1).unwrap_or("/");
    let (status, body) = if path.contains("/oauth2/token/rpc") {
        ("200 OK", r#"{"rpc_token":"stub-rpc-token"}"#)
    } else if path.contains("/oauth2/token") {
        ("200 OK", r#"{"access_token":"stub-access-token"}"#)
    } else {
        ("404 Not Found", "{}")
    };
    let response = format!(
        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

// ---------------------------------------------------------------------------

/// READY dispatch as the peer sends it right after the handshake
pub fn ready_payload() -> Value {
    json!({
        "cmd": "DISPATCH",
        "evt": "READY",
        "data": {
            "v": 1,
            "config": {
                "cdn_host": "cdn.discordapp.com",
                "api_endpoint": "//discord.com/api",
                "environment": "production",
            },
        },
    })
}
