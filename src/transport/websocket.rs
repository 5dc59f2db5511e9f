//! Loopback WebSocket transport
//!
//! Connects to `ws://127.0.0.1:{port}/?v=1&client_id=<id>` where the port is
//! selected from the local range by the session's retry counter. Framing is
//! one JSON document per text message; the socket protocol's own framing is
//! the only layer below that.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::client::ClientConfig;
use crate::error::{Result, RpcError};
use crate::protocol::{close_codes, IncomingMessage, OutgoingMessage, PORT_RANGE, PROTOCOL_VERSION};

use super::{CloseInfo, TransportEvent};

/// A connected loopback transport
pub(crate) struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    port: u16,
}

impl WsTransport {
    pub(crate) async fn connect(config: &ClientConfig, tries: u32) -> Result<Self> {
        let port = config.port_base + (tries % u32::from(PORT_RANGE)) as u16;
        let url = format!(
            "ws://127.0.0.1:{port}/?v={PROTOCOL_VERSION}&client_id={}",
            config.client_id
        );
        let mut request = url.clone().into_client_request()?;
        if let Some(origin) = &config.origin {
            let value = HeaderValue::from_str(origin).map_err(|err| RpcError::InvalidConfig {
                message: format!("invalid origin header: {err}"),
            })?;
            request.headers_mut().insert(ORIGIN, value);
        }

        tracing::debug!(%url, "opening loopback socket");
        let (ws, _response) = match connect_async(request).await {
            Ok(connected) => connected,
            Err(tungstenite::Error::Io(err))
                if err.kind() == std::io::ErrorKind::ConnectionRefused =>
            {
                return Err(RpcError::ConnectionRefused);
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Self { ws, port })
    }

    /// REST-style base URL for the connected port
    pub(crate) fn http_endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub(crate) async fn recv(&mut self) -> Result<TransportEvent> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let message: IncomingMessage =
                        serde_json::from_str(&text).map_err(|err| RpcError::Decode {
                            message: format!("invalid message payload: {err}"),
                        })?;
                    return Ok(TransportEvent::Message(message));
                }
                Some(Ok(Message::Ping(payload))) => {
                    self.ws.send(Message::Pong(payload)).await?;
                }
                Some(Ok(Message::Close(frame))) => {
                    let info = frame
                        .map(|f| CloseInfo {
                            code: Some(u16::from(f.code)),
                            reason: Some(f.reason.into_owned()),
                        })
                        .unwrap_or_else(|| CloseInfo {
                            code: Some(close_codes::CLOSE_ABNORMAL),
                            reason: None,
                        });
                    return Ok(TransportEvent::Closed(info));
                }
                // binary frames are not part of this protocol
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!(%err, "loopback socket error");
                    return Ok(TransportEvent::Closed(CloseInfo {
                        code: Some(close_codes::CLOSE_ABNORMAL),
                        reason: Some(err.to_string()),
                    }));
                }
                None => {
                    return Ok(TransportEvent::Closed(CloseInfo {
                        code: Some(close_codes::CLOSE_ABNORMAL),
                        reason: None,
                    }));
                }
            }
        }
    }

    pub(crate) async fn send(&mut self, message: &OutgoingMessage) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.ws.send(Message::Text(text)).await?;
        Ok(())
    }

    pub(crate) async fn close(&mut self) -> Result<()> {
        match self.ws.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
