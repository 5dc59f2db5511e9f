//! Loopback transport tests against an in-process WebSocket peer

mod common;

use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use common::ws_peer::{listen, WsPeer};
use discord_rpc_client::{
    Client, ClientConfig, EventKind, LoginArgs, RpcError, SessionState, TransportKind,
};

fn client_for(port: u16) -> Client {
    Client::new(
        ClientConfig::new("180984871685062656")
            .transport(TransportKind::Loopback)
            .port_base(port),
    )
}

#[tokio::test]
async fn connect_over_websocket_sets_rest_endpoint() {
    let (port, listener) = listen().await;
    let client = client_for(port);

    let peer = tokio::spawn(async move { WsPeer::accept_ready(&listener).await });

    client.connect().await.expect("connect");
    assert_eq!(client.state(), SessionState::Connected);
    // the loopback transport knows its REST base without discovery
    assert_eq!(
        client.rest_endpoint().expect("endpoint"),
        format!("http://127.0.0.1:{port}")
    );
    drop(peer.await.expect("peer task"));
}

#[tokio::test]
async fn connect_fails_when_no_listener() {
    // bind then drop to find a port that refuses connections
    let (port, listener) = listen().await;
    drop(listener);

    let client = client_for(port);
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, RpcError::ConnectionRefused));
}

#[tokio::test]
async fn requests_round_trip_over_websocket() {
    let (port, listener) = listen().await;
    let client = client_for(port);

    let peer = tokio::spawn(async move {
        let mut peer = WsPeer::accept_ready(&listener).await;
        let message = peer.read_json().await;
        assert_eq!(message["cmd"], "GET_GUILDS");
        peer.respond(
            message["nonce"].as_str().unwrap(),
            "GET_GUILDS",
            json!({"guilds": [{"id": "9", "name": "ws-guild"}]}),
        )
        .await;
        peer
    });

    client.login(LoginArgs::new()).await.expect("login");
    let guilds = client.get_guilds(None).await.expect("guilds");
    assert_eq!(guilds.len(), 1);
    assert_eq!(guilds[0].name, "ws-guild");
    drop(peer.await.expect("peer task"));
}

#[tokio::test]
async fn normal_close_reconnects_and_resubscribes() {
    let (port, listener) = listen().await;
    let client = client_for(port);

    let peer = tokio::spawn(async move {
        // first connection: ready, ack the subscription, then close with a
        // reconnectable code
        let mut peer = WsPeer::accept_ready(&listener).await;
        let subscribe = peer.read_json().await;
        assert_eq!(subscribe["cmd"], "SUBSCRIBE");
        assert_eq!(subscribe["evt"], "MESSAGE_CREATE");
        peer.respond(subscribe["nonce"].as_str().unwrap(), "SUBSCRIBE", json!({}))
            .await;
        peer.close_normal().await;

        // a normal close resets the retry counter, so the client comes back
        // to the same port
        let mut peer = WsPeer::accept_ready(&listener).await;
        let resubscribe = peer.read_json().await;
        assert_eq!(resubscribe["cmd"], "SUBSCRIBE");
        assert_eq!(resubscribe["evt"], "MESSAGE_CREATE");
        assert_eq!(resubscribe["args"]["channel_id"], "A");
        peer.respond(
            resubscribe["nonce"].as_str().unwrap(),
            "SUBSCRIBE",
            json!({}),
        )
        .await;
        peer.dispatch(
            "MESSAGE_CREATE",
            json!({"channel_id": "A", "message": {"content": "after reconnect"}}),
        )
        .await;
        peer
    });

    client.login(LoginArgs::new()).await.expect("login");
    let mut subscription = client
        .subscribe(EventKind::MessageCreate, json!({"channel_id": "A"}))
        .await
        .expect("subscribe");

    // delivery proves the registration survived the reconnection
    let payload = timeout(Duration::from_secs(5), subscription.next())
        .await
        .expect("dispatch before timeout")
        .expect("subscription alive");
    assert_eq!(payload["message"]["content"], "after reconnect");
    drop(peer.await.expect("peer task"));
}
