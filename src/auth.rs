//! OAuth2 helpers for the authorize → authenticate handshake
//!
//! Only the two-step code→token exchange sequencing lives here; the
//! endpoints themselves belong to the vendor (or, for the RPC token, to a
//! caller-supplied service). Bodies are standard form-encoded.

use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Deserialize)]
struct RpcTokenResponse {
    rpc_token: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Fetch a one-time RPC token from the vendor endpoint
pub(crate) async fn fetch_rpc_token(
    http: &reqwest::Client,
    api_base: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<String> {
    let response = http
        .post(format!("{api_base}/oauth2/token/rpc"))
        .form(&[("client_id", client_id), ("client_secret", client_secret)])
        .send()
        .await?
        .error_for_status()?;
    let body: RpcTokenResponse = response.json().await?;
    Ok(body.rpc_token)
}

/// Fetch a one-time RPC token from a caller-supplied endpoint
pub(crate) async fn fetch_rpc_token_from(
    http: &reqwest::Client,
    endpoint: &str,
) -> Result<String> {
    let response = http.get(endpoint).send().await?.error_for_status()?;
    let body: RpcTokenResponse = response.json().await?;
    Ok(body.rpc_token)
}

/// Exchange an AUTHORIZE code for an access token
pub(crate) async fn exchange_code(
    http: &reqwest::Client,
    api_base: &str,
    client_id: &str,
    client_secret: &str,
    code: &str,
    redirect_uri: Option<&str>,
) -> Result<String> {
    let mut form = vec![
        ("client_id", client_id),
        ("client_secret", client_secret),
        ("code", code),
        ("grant_type", "authorization_code"),
    ];
    if let Some(uri) = redirect_uri {
        form.push(("redirect_uri", uri));
    }
    let response = http
        .post(format!("{api_base}/oauth2/token"))
        .form(&form)
        .send()
        .await?
        .error_for_status()?;
    let body: TokenResponse = response.json().await?;
    Ok(body.access_token)
}
