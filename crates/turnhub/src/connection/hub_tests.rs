use super::*;

#[tokio::test]
async fn accept_rejects_past_max_connections() {
    let hub = ConnectionHub::new(1, 8, 8);
    let (_id, _rx) = hub.accept().await.expect("first connection accepted");
    let err = hub.accept().await.expect_err("second connection should be rejected");
    assert!(matches!(err, CoordinatorError::Overload { .. }));
}

#[tokio::test]
async fn full_outbox_disconnects_the_connection() {
    let hub = ConnectionHub::new(8, 1, 1);
    let (id, _rx) = hub.accept().await.expect("connection accepted");
    hub.send_to_one(id, b"one".to_vec()).await.expect("first frame enqueues");
    let result = hub.send_to_one(id, b"two".to_vec()).await;
    assert!(matches!(result, Err(CoordinatorError::Overload { .. })));
    assert_eq!(hub.connection_count().await, 0);
}

#[tokio::test]
async fn response_over_backlog_cut_is_rejected_without_enqueue() {
    let hub = ConnectionHub::new(8, 8, 1);
    let (id, _rx) = hub.accept().await.expect("connection accepted");
    hub.send_to_one(id, b"fill".to_vec()).await.expect("fill enqueues");
    let result = hub.send_response(id, b"reply".to_vec()).await;
    assert!(matches!(result, Err(CoordinatorError::Overload { .. })));
    assert_eq!(hub.connection_count().await, 1);
}

#[tokio::test]
async fn broadcast_reaches_all_live_connections() {
    let hub = ConnectionHub::new(8, 8, 8);
    let (_id_a, mut rx_a) = hub.accept().await.expect("conn a");
    let (_id_b, mut rx_b) = hub.accept().await.expect("conn b");
    hub.broadcast(b"hello".to_vec()).await;
    assert_eq!(rx_a.recv().await, Some(b"hello".to_vec()));
    assert_eq!(rx_b.recv().await, Some(b"hello".to_vec()));
}

#[test]
fn local_origin_allows_empty_and_known_prefixes() {
    assert!(is_local_origin(None));
    assert!(is_local_origin(Some("http://localhost:3000")));
    assert!(is_local_origin(Some("http://127.0.0.1:8700")));
    assert!(is_local_origin(Some("desktop-bridge://app")));
    assert!(!is_local_origin(Some("https://evil.example.com")));
}
