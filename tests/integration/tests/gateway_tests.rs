//! End-to-end tests against the WebSocket gateway
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use anyhow::Result;
use chat_gateway::protocol::OpCode;
use integration_tests::{GatewayClient, Incoming, TestServer, ALICE, BOB};
use serde_json::json;

#[tokio::test]
async fn hello_then_ready() -> Result<()> {
    let server = TestServer::start().await?;
    let mut client = GatewayClient::connect(&server.gateway_url()).await?;
    assert!(client.heartbeat_interval > 0);

    let ready = client.authenticate(&server.token_for(ALICE)?).await?;
    assert_eq!(ready.op, OpCode::Dispatch);
    assert_eq!(ready.nonce.as_deref(), Some("auth"));
    let d = ready.d.expect("ready payload");
    assert_eq!(d["user_id"], json!(ALICE.to_string()));
    assert!(d["connection_id"].as_str().is_some_and(|id| !id.is_empty()));

    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn heartbeat_is_acknowledged() -> Result<()> {
    let server = TestServer::start().await?;
    let mut client = server.client_for(ALICE).await?;

    client.send(OpCode::Heartbeat, json!(null), None).await?;
    loop {
        match client.recv().await? {
            Incoming::Frame(frame) if frame.op == OpCode::HeartbeatAck => break,
            Incoming::Frame(_) => {}
            Incoming::Closed(code) => panic!("closed while waiting for ack: {code:?}"),
        }
    }
    Ok(())
}

#[tokio::test]
async fn room_traffic_reaches_other_members() -> Result<()> {
    let server = TestServer::start().await?;
    let room_id = server.room_id("general").await?;

    let mut alice = server.client_for(ALICE).await?;
    let mut bob = server.client_for(BOB).await?;
    alice.join(room_id).await?;
    bob.join(room_id).await?;

    for text in ["hello", "world"] {
        alice
            .send(
                OpCode::SendMessage,
                json!({ "room_id": room_id, "content": text }),
                Some(text),
            )
            .await?;
        let ack = alice.expect_dispatch("messageAck").await?;
        assert_eq!(ack.nonce.as_deref(), Some(text));
    }

    let mut frame_seqs = Vec::new();
    let mut room_seqs = Vec::new();
    for expected in ["hello", "world"] {
        let frame = bob.expect_dispatch("receiveMessage").await?;
        frame_seqs.push(frame.s.expect("dispatch frames carry s"));
        let d = frame.d.expect("message payload");
        assert_eq!(d["content"], json!(expected));
        room_seqs.push(d["sequence"].as_u64().expect("room sequence"));
    }
    assert_eq!(room_seqs, vec![1, 2]);
    assert!(frame_seqs[0] < frame_seqs[1]);
    Ok(())
}

#[tokio::test]
async fn domain_errors_keep_the_socket_open() -> Result<()> {
    let server = TestServer::start().await?;
    let room_id = server.room_id("general").await?;
    let mut alice = server.client_for(ALICE).await?;

    alice
        .send(
            OpCode::SendMessage,
            json!({ "room_id": room_id, "content": "not joined yet" }),
            Some("early"),
        )
        .await?;
    let error = alice.expect_dispatch("error").await?;
    assert_eq!(error.nonce.as_deref(), Some("early"));
    assert_eq!(error.d.expect("error payload")["code"], json!("NOT_ROOM_MEMBER"));

    alice.join(room_id).await?;
    Ok(())
}

#[tokio::test]
async fn joining_before_authenticating_closes_the_socket() -> Result<()> {
    let server = TestServer::start().await?;
    let room_id = server.room_id("general").await?;
    let mut client = GatewayClient::connect(&server.gateway_url()).await?;

    client.send(OpCode::JoinRoom, json!({ "room_id": room_id }), None).await?;
    assert_eq!(client.expect_close().await?, Some(4003));
    Ok(())
}

#[tokio::test]
async fn bad_token_closes_with_authentication_failed() -> Result<()> {
    let server = TestServer::start().await?;
    let mut client = GatewayClient::connect(&server.gateway_url()).await?;

    client
        .send(OpCode::Authenticate, json!({ "token": "not-a-jwt" }), None)
        .await?;
    assert_eq!(client.expect_close().await?, Some(4004));
    Ok(())
}
