use super::*;

#[test]
fn alloc_ids_are_monotonic() {
    let correlator = Correlator::new();
    let (a, _rx_a) = correlator.alloc();
    let (b, _rx_b) = correlator.alloc();
    assert!(b > a);
}

#[tokio::test]
async fn resolve_delivers_exactly_once() {
    let correlator = Correlator::new();
    let (id, rx) = correlator.alloc();
    correlator.resolve(id, PendingReply::Result(serde_json::json!({"ok": true})));
    let reply = rx.await;
    assert!(matches!(reply, Ok(PendingReply::Result(_))));
    assert_eq!(correlator.pending_count(), 0);
}

#[test]
fn resolve_without_waiter_is_a_no_op() {
    let correlator = Correlator::new();
    correlator.resolve(999, PendingReply::Error(RpcError::new(crate::error::ErrorCode::InternalError, "nope")));
    assert_eq!(correlator.pending_count(), 0);
}
