//! Local HTTP endpoint discovery
//!
//! After a successful AUTHORIZE over the local socket, the peer's REST-style
//! endpoint is located by probing the loopback port range with bare GETs.
//! The port that answers 404 is the one; every other outcome, including a
//! connection failure, advances to the next port.

use reqwest::StatusCode;

use crate::error::{Result, RpcError};
use crate::protocol::PORT_RANGE;

/// Probe attempts before giving up
const MAX_PROBES: u16 = 30;

/// Find the peer's REST base URL, e.g. `http://127.0.0.1:6463`
pub async fn find_endpoint(http: &reqwest::Client, port_base: u16) -> Result<String> {
    for tries in 0..MAX_PROBES {
        let port = port_base + tries % PORT_RANGE;
        let endpoint = format!("http://127.0.0.1:{port}");
        match http.get(&endpoint).send().await {
            Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                tracing::debug!(%endpoint, "found local HTTP endpoint");
                return Ok(endpoint);
            }
            Ok(response) => {
                tracing::trace!(%endpoint, status = %response.status(), "endpoint probe mismatch");
            }
            Err(err) => {
                tracing::trace!(%endpoint, %err, "endpoint probe failed");
            }
        }
    }
    Err(RpcError::EndpointNotFound)
}
