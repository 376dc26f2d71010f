use super::*;
use crate::connection::hub::ConnId;

fn ctx() -> HandlerContext {
    HandlerContext { state: CoordinatorState::for_tests(), conn_id: ConnId::new_v4() }
}

fn env(id: Option<Value>, method: &str) -> OwnedEnvelope {
    OwnedEnvelope { id, method: method.to_owned(), params: None }
}

#[tokio::test]
async fn empty_method_is_invalid_request() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register("noop", Arc::new(FnHandler(|_, _| async { Ok(Value::Null) })));
    let resp = dispatcher.dispatch(ctx(), env(Some(Value::from(1)), "")).await;
    let resp = resp.expect("response expected for non-null id");
    assert_eq!(resp.error.expect("error expected").code, ErrorCode::InvalidRequest.code());
}

#[tokio::test]
async fn unknown_method_with_id_is_method_not_found() {
    let dispatcher = Dispatcher::new();
    let resp = dispatcher.dispatch(ctx(), env(Some(Value::from(1)), "nope")).await;
    let resp = resp.expect("response expected for non-null id");
    assert_eq!(resp.error.expect("error expected").code, ErrorCode::MethodNotFound.code());
}

#[tokio::test]
async fn unknown_method_without_id_is_dropped() {
    let dispatcher = Dispatcher::new();
    let resp = dispatcher.dispatch(ctx(), env(None, "nope")).await;
    assert!(resp.is_none());
}

#[tokio::test]
async fn handler_failure_with_id_is_internal_error() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register(
        "boom",
        Arc::new(FnHandler(|_, _| async { Err(CoordinatorError::Internal("kaboom".to_owned())) })),
    );
    let resp = dispatcher.dispatch(ctx(), env(Some(Value::from(7)), "boom")).await;
    let resp = resp.expect("response expected for non-null id");
    let error = resp.error.expect("error expected");
    assert_eq!(error.code, ErrorCode::InternalError.code());
    assert!(error.message.contains("kaboom"));
}

#[tokio::test]
async fn handler_failure_without_id_is_dropped() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register(
        "boom",
        Arc::new(FnHandler(|_, _| async { Err(CoordinatorError::Internal("kaboom".to_owned())) })),
    );
    let resp = dispatcher.dispatch(ctx(), env(None, "boom")).await;
    assert!(resp.is_none());
}

#[tokio::test]
async fn successful_notification_has_no_response() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register("ping", Arc::new(FnHandler(|_, _| async { Ok(Value::Null) })));
    let resp = dispatcher.dispatch(ctx(), env(None, "ping")).await;
    assert!(resp.is_none());
}
