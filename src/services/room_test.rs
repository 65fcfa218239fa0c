use super::*;
use crate::state::test_helpers;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

async fn recv_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("frame receive timed out")
        .expect("channel closed")
}

async fn assert_channel_empty(rx: &mut mpsc::Receiver<Frame>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected channel to remain empty"
    );
}

#[tokio::test]
async fn broadcast_reaches_all_members_except_excluded() {
    let state = AppState::new();

    let (conn_a, mut rx_a) = test_helpers::attach_client(&state, 8).await;
    let (conn_b, mut rx_b) = test_helpers::attach_client(&state, 8).await;
    let (conn_c, mut rx_c) = test_helpers::attach_client(&state, 8).await;
    state.registry.register(conn_a, "r1", Some("a")).await;
    state.registry.register(conn_b, "r1", Some("b")).await;
    state.registry.register(conn_c, "r1", Some("c")).await;

    let frame = Frame::request("stroke:begin", Data::new()).with_room_id("r1");
    broadcast(&state, "r1", &frame, Some(conn_b)).await;

    assert_eq!(recv_frame(&mut rx_a).await.syscall, "stroke:begin");
    assert_eq!(recv_frame(&mut rx_c).await.syscall, "stroke:begin");
    assert_channel_empty(&mut rx_b).await;
}

#[tokio::test]
async fn broadcast_is_scoped_to_the_room() {
    let state = AppState::new();

    let (conn_a, mut rx_a) = test_helpers::attach_client(&state, 8).await;
    let (conn_b, mut rx_b) = test_helpers::attach_client(&state, 8).await;
    state.registry.register(conn_a, "r1", Some("a")).await;
    state.registry.register(conn_b, "r2", Some("b")).await;

    let frame = Frame::request("history:undo", Data::new()).with_room_id("r1");
    broadcast(&state, "r1", &frame, None).await;

    assert_eq!(recv_frame(&mut rx_a).await.syscall, "history:undo");
    assert_channel_empty(&mut rx_b).await;
}

#[tokio::test]
async fn broadcast_skips_full_channels_without_blocking() {
    let state = AppState::new();

    let (conn_a, mut rx_a) = test_helpers::attach_client(&state, 1).await;
    state.registry.register(conn_a, "r1", Some("a")).await;

    let frame = Frame::request("cursor:move", Data::new()).with_room_id("r1");
    broadcast(&state, "r1", &frame, None).await;
    // Channel capacity is 1: the second send is dropped, not awaited.
    broadcast(&state, "r1", &frame, None).await;

    recv_frame(&mut rx_a).await;
    assert_channel_empty(&mut rx_a).await;
}

#[tokio::test]
async fn participant_list_broadcast_carries_current_members() {
    let state = AppState::new();

    let (conn_a, mut rx_a) = test_helpers::attach_client(&state, 8).await;
    let (conn_b, mut rx_b) = test_helpers::attach_client(&state, 8).await;
    state.registry.register(conn_a, "r1", Some("a")).await;
    state.registry.register(conn_b, "r1", Some("b")).await;

    broadcast_participant_list(&state, "r1").await;

    for rx in [&mut rx_a, &mut rx_b] {
        let frame = recv_frame(rx).await;
        assert_eq!(frame.syscall, "room:participant-list");
        let participants = frame
            .data
            .get("participants")
            .and_then(|v| v.as_array())
            .expect("participants array");
        assert_eq!(participants.len(), 2);
    }
}

#[tokio::test]
async fn participant_data_exposes_wire_fields_only() {
    let state = AppState::new();
    let (conn, _rx) = test_helpers::attach_client(&state, 8).await;
    let participant = state.registry.register(conn, "r1", Some("ada")).await;

    let data = participant_data(&participant);
    assert_eq!(data.get("name").and_then(|v| v.as_str()), Some("ada"));
    assert!(data.contains_key("participant_id"));
    assert!(data.contains_key("color"));
    assert!(!data.contains_key("connection_id"));
}
