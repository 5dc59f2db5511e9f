//! Local-socket transport: named pipe (Windows) or unix domain socket
//!
//! Socket ids 0..9 are probed in order and the first that accepts wins.
//! Sandboxed installs place their socket under a suffix directory below the
//! runtime dir, so those are probed for each id too. Immediately after
//! connecting, a HANDSHAKE frame with the protocol version and client id is
//! written; the peer answers with a READY dispatch.

#[cfg(unix)]
use std::path::PathBuf;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::client::ClientConfig;
use crate::error::{Result, RpcError};
use crate::frame::{encode, FrameDecoder, OpCode};
use crate::protocol::{IncomingMessage, OutgoingMessage, PROTOCOL_VERSION};

use super::{CloseInfo, TransportEvent};

/// Socket ids probed per base directory
const SOCKET_ID_RANGE: u32 = 10;

/// Subdirectories of the runtime dir used by sandboxed installs
#[cfg(unix)]
const SANDBOX_SUBDIRS: &[&str] = &["", "snap.discord", "app/com.discordapp.Discord"];

enum IpcStream {
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
    #[cfg(windows)]
    Pipe(tokio::net::windows::named_pipe::NamedPipeClient),
}

impl IpcStream {
    async fn read_into(&mut self, buf: &mut bytes::BytesMut) -> std::io::Result<usize> {
        match self {
            #[cfg(unix)]
            IpcStream::Unix(stream) => stream.read_buf(buf).await,
            #[cfg(windows)]
            IpcStream::Pipe(pipe) => pipe.read_buf(buf).await,
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            #[cfg(unix)]
            IpcStream::Unix(stream) => stream.write_all(bytes).await,
            #[cfg(windows)]
            IpcStream::Pipe(pipe) => pipe.write_all(bytes).await,
        }
    }

    /// Half-close the write side where the platform supports it
    async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            #[cfg(unix)]
            IpcStream::Unix(stream) => stream.shutdown().await,
            #[cfg(windows)]
            IpcStream::Pipe(_) => Ok(()),
        }
    }
}

/// A connected local-socket transport
pub(crate) struct IpcTransport {
    stream: IpcStream,
    decoder: FrameDecoder,
}

impl IpcTransport {
    pub(crate) async fn connect(config: &ClientConfig) -> Result<Self> {
        let stream = open_socket(config).await?;
        let mut transport = Self {
            stream,
            decoder: FrameDecoder::new(),
        };
        transport
            .write_frame(
                OpCode::Handshake,
                &json!({ "v": PROTOCOL_VERSION, "client_id": config.client_id }),
            )
            .await?;
        Ok(transport)
    }

    /// Drain buffered frames, reading more bytes as needed
    ///
    /// PING frames are answered inline with a PONG carrying the same
    /// payload and never surface to the session.
    pub(crate) async fn recv(&mut self) -> Result<TransportEvent> {
        loop {
            while let Some(frame) = self.decoder.next_frame()? {
                match frame.op {
                    OpCode::Ping => {
                        tracing::trace!("answering ping");
                        self.write_frame(OpCode::Pong, &frame.payload).await?;
                    }
                    OpCode::Frame => {
                        let message: IncomingMessage = serde_json::from_value(frame.payload)
                            .map_err(|err| RpcError::Decode {
                                message: format!("invalid message payload: {err}"),
                            })?;
                        return Ok(TransportEvent::Message(message));
                    }
                    OpCode::Close => {
                        return Ok(TransportEvent::Closed(close_info(&frame.payload)));
                    }
                    OpCode::Handshake | OpCode::Pong => {
                        tracing::trace!(op = ?frame.op, "ignoring frame");
                    }
                }
            }

            let read = self.stream.read_into(self.decoder.buffer_mut()).await?;
            if read == 0 {
                return Ok(TransportEvent::Closed(CloseInfo::default()));
            }
        }
    }

    pub(crate) async fn send(&mut self, message: &OutgoingMessage) -> Result<()> {
        self.write_frame(OpCode::Frame, &serde_json::to_value(message)?)
            .await
    }

    /// Send a CLOSE frame, end the socket, and wait for the peer to hang up
    pub(crate) async fn close(&mut self) -> Result<()> {
        self.write_frame(OpCode::Close, &json!({})).await?;
        self.stream.shutdown().await?;
        loop {
            match self.recv().await {
                Ok(TransportEvent::Closed(_)) | Err(_) => return Ok(()),
                Ok(TransportEvent::Message(_)) => {}
            }
        }
    }

    async fn write_frame(&mut self, op: OpCode, payload: &Value) -> Result<()> {
        let packet = encode(op, payload)?;
        self.stream.write_all(&packet).await?;
        Ok(())
    }
}

fn close_info(payload: &Value) -> CloseInfo {
    CloseInfo {
        code: payload.get("code").and_then(Value::as_u64).map(|c| c as u16),
        reason: payload
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned),
    }
}

#[cfg(unix)]
async fn open_socket(config: &ClientConfig) -> Result<IpcStream> {
    for id in 0..SOCKET_ID_RANGE {
        for path in socket_paths(config, id) {
            match tokio::net::UnixStream::connect(&path).await {
                Ok(stream) => {
                    tracing::debug!(path = %path.display(), "connected to local socket");
                    return Ok(IpcStream::Unix(stream));
                }
                Err(err) => {
                    tracing::trace!(path = %path.display(), %err, "socket probe failed");
                }
            }
        }
    }
    Err(RpcError::ConnectionRefused)
}

#[cfg(unix)]
fn socket_paths(config: &ClientConfig, id: u32) -> Vec<PathBuf> {
    let base = config.socket_dir.clone().unwrap_or_else(runtime_dir);
    SANDBOX_SUBDIRS
        .iter()
        .map(|subdir| {
            let mut path = base.clone();
            if !subdir.is_empty() {
                path = path.join(subdir);
            }
            path.join(format!("discord-ipc-{id}"))
        })
        .collect()
}

/// `$XDG_RUNTIME_DIR`, then the temp-dir variables, then `/tmp`
#[cfg(unix)]
fn runtime_dir() -> PathBuf {
    ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"]
        .iter()
        .find_map(std::env::var_os)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

#[cfg(windows)]
async fn open_socket(_config: &ClientConfig) -> Result<IpcStream> {
    use tokio::net::windows::named_pipe::ClientOptions;

    for id in 0..SOCKET_ID_RANGE {
        let path = format!(r"\\.\pipe\discord-ipc-{id}");
        match ClientOptions::new().open(&path) {
            Ok(pipe) => {
                tracing::debug!(%path, "connected to named pipe");
                return Ok(IpcStream::Pipe(pipe));
            }
            Err(err) => {
                tracing::trace!(%path, %err, "pipe probe failed");
            }
        }
    }
    Err(RpcError::ConnectionRefused)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn socket_paths_include_sandbox_suffixes() {
        let config = ClientConfig::new("client").socket_dir("/run/user/1000");
        let paths = socket_paths(&config, 3);
        assert_eq!(paths[0], PathBuf::from("/run/user/1000/discord-ipc-3"));
        assert_eq!(
            paths[1],
            PathBuf::from("/run/user/1000/snap.discord/discord-ipc-3")
        );
        assert_eq!(
            paths[2],
            PathBuf::from("/run/user/1000/app/com.discordapp.Discord/discord-ipc-3")
        );
    }
}
