//! Request and result-stream behaviour against live provider calls.

use parcelforge_core::{
    CapabilityAdapter, CapabilityKind, DefaultHost, Diagnostic, DynamicObject, HostApi,
    ProviderError, ProviderHandle, SharedHost, Value, ValueKind,
};
use parcelforge_runtime::{DispatchOptions, Dispatcher, RequestState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const FIND_PARAMS: [ValueKind; 4] = [ValueKind::String; 4];

/// A package provider whose `find_package` runs `find`.
fn provider<F>(name: &str, find: F) -> ProviderHandle
where
    F: Fn(&[Value], &dyn parcelforge_core::ProviderRequest) -> parcelforge_core::ProviderResult<Value>
        + Send
        + Sync
        + 'static,
{
    let object = DynamicObject::new(name)
        .constant("get_package_provider_name", name)
        .member("find_package", &FIND_PARAMS, ValueKind::Unit, find)
        .build();
    CapabilityAdapter::new()
        .adapt(&object, CapabilityKind::PackageProvider)
        .unwrap()
        .with_name(name)
}

fn find_args(name: &str) -> Vec<Value> {
    vec![Value::from(name), Value::Null, Value::Null, Value::Null]
}

fn host() -> SharedHost {
    DefaultHost::new().into_shared()
}

/// Waits until the provider is cancelled, checking every few milliseconds.
fn wait_for_cancel(
    _: &[Value],
    request: &dyn parcelforge_core::ProviderRequest,
) -> parcelforge_core::ProviderResult<Value> {
    while !request.is_cancelled() {
        std::thread::sleep(Duration::from_millis(5));
    }
    Ok(Value::Null)
}

#[derive(Default)]
struct RecordingHost {
    errors: AtomicUsize,
}

impl HostApi for RecordingHost {
    fn emit(&self, diagnostic: Diagnostic) {
        if diagnostic.level == parcelforge_core::LogLevel::Error {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn ask_yes_no(&self, _prompt: &str) -> bool {
        false
    }

    fn is_interactive(&self) -> bool {
        false
    }

    fn call_session(&self) -> u64 {
        1
    }
}

#[tokio::test]
async fn test_streaming_yields_in_order_then_completes() {
    let dispatcher = Dispatcher::default();
    let handle = provider("Alpha", |_, request| {
        request.yield_value(Value::from("x"));
        request.yield_value(Value::from("y"));
        Ok(Value::Null)
    });

    let call = dispatcher.invoke_streaming(&handle, "find_package", find_args("a"), host());
    assert_eq!(call.next().await, Some(Value::from("x")));
    assert_eq!(call.next().await, Some(Value::from("y")));
    assert_eq!(call.next().await, None);
    assert_eq!(call.wait().await, RequestState::Completed);
    assert_eq!(call.next().await, None);
    assert_eq!(call.provider(), "Alpha");
}

#[tokio::test]
async fn test_cancel_before_any_yield() {
    let dispatcher = Dispatcher::default();
    let handle = provider("Slow", wait_for_cancel);

    let call = dispatcher.invoke_streaming(&handle, "find_package", find_args("a"), host());
    let consumer = {
        let call = call.clone();
        tokio::spawn(async move { call.collect().await })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    call.cancel();

    let items = tokio::time::timeout(Duration::from_secs(2), consumer)
        .await
        .expect("consumer unblocked")
        .unwrap();
    assert!(items.is_empty());
    assert_eq!(call.wait().await, RequestState::Cancelled);

    // Cancelling again is harmless.
    call.cancel();
    assert_eq!(call.state(), RequestState::Cancelled);
}

#[tokio::test]
async fn test_fault_is_reported_once() {
    let dispatcher = Dispatcher::default();
    let recorder = Arc::new(RecordingHost::default());
    let handle = provider("Broken", |_, request| {
        request.yield_value(Value::from("partial"));
        Err(ProviderError::plugin("feed unreachable"))
    });

    let call = dispatcher.invoke_streaming(&handle, "find_package", find_args("a"), recorder.clone());
    let items = call.collect().await;

    assert_eq!(items, vec![Value::from("partial")]);
    assert_eq!(call.state(), RequestState::Faulted);
    assert_eq!(recorder.errors.load(Ordering::SeqCst), 1);
    let err = call.outcome().await.unwrap_err();
    assert!(err.to_string().contains("feed unreachable"));
}

#[tokio::test]
async fn test_panicking_provider_faults_without_crashing() {
    let dispatcher = Dispatcher::default();
    let handle = provider("Panics", |_, _| panic!("provider bug"));
    let healthy = provider("Healthy", |_, request| {
        request.yield_value(Value::from("ok"));
        Ok(Value::Null)
    });

    let bad = dispatcher.invoke_streaming(&handle, "find_package", find_args("a"), host());
    let good = dispatcher.invoke_streaming(&healthy, "find_package", find_args("a"), host());

    assert_eq!(bad.wait().await, RequestState::Faulted);
    assert_eq!(good.collect().await, vec![Value::from("ok")]);
    assert_eq!(good.state(), RequestState::Completed);
}

#[tokio::test]
async fn test_single_value_invoke() {
    let dispatcher = Dispatcher::default();
    let handle = provider("Alpha", |_, _| Ok(Value::Null));

    let request = dispatcher.invoke(&handle, "get_package_provider_name", Vec::new(), host());
    assert_eq!(request.outcome().await.unwrap(), Value::from("Alpha"));
    assert_eq!(request.state(), RequestState::Completed);
}

#[tokio::test]
async fn test_invalid_arguments_fault_the_request() {
    let dispatcher = Dispatcher::default();
    let handle = provider("Alpha", |_, _| Ok(Value::Null));

    let request = dispatcher.invoke(&handle, "find_package", vec![Value::from("only one")], host());
    assert_eq!(request.wait().await, RequestState::Faulted);
    assert!(request.fault().unwrap().contains("expected 4 arguments"));
}

#[tokio::test]
async fn test_timeout_is_treated_as_cancellation() {
    let dispatcher = Dispatcher::new(DispatchOptions {
        timeout: Some(Duration::from_millis(50)),
    });
    let handle = provider("Slow", wait_for_cancel);

    let call = dispatcher.invoke_streaming(&handle, "find_package", find_args("a"), host());
    let state = tokio::time::timeout(Duration::from_secs(2), call.wait())
        .await
        .expect("timeout fired");
    assert_eq!(state, RequestState::Cancelled);
}

#[tokio::test]
async fn test_shutdown_cancels_outstanding_requests() {
    let dispatcher = Dispatcher::default();
    let handle = provider("Slow", wait_for_cancel);

    let first = dispatcher.invoke_streaming(&handle, "find_package", find_args("a"), host());
    let second = dispatcher.invoke_streaming(&handle, "find_package", find_args("b"), host());
    tokio::time::sleep(Duration::from_millis(20)).await;

    dispatcher.shutdown();
    assert!(dispatcher.is_shut_down());
    for call in [first, second] {
        let state = tokio::time::timeout(Duration::from_secs(2), call.wait())
            .await
            .expect("request settled");
        assert_eq!(state, RequestState::Cancelled);
        assert_eq!(call.next().await, None);
    }

    let late = dispatcher.invoke(&handle, "get_package_provider_name", Vec::new(), host());
    assert_eq!(late.wait().await, RequestState::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_peek_consumer() {
    let dispatcher = Dispatcher::default();
    let handle = provider("Alpha", |_, request| {
        for i in 0..3 {
            request.yield_value(Value::Integer(i));
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(Value::Null)
    });

    let call = dispatcher.invoke_streaming(&handle, "find_package", find_args("a"), host());
    let drained = {
        let call = call.clone();
        tokio::task::spawn_blocking(move || {
            let mut seen = Vec::new();
            while call.blocking_has_more() {
                if let Some(item) = call.blocking_next() {
                    seen.push(item);
                }
            }
            seen
        })
        .await
        .unwrap()
    };

    assert_eq!(drained, vec![Value::Integer(0), Value::Integer(1), Value::Integer(2)]);
    assert_eq!(call.blocking_wait(), RequestState::Completed);
}

#[tokio::test]
async fn test_provider_observes_cancellation_through_yield() {
    let dispatcher = Dispatcher::default();
    let produced = Arc::new(AtomicUsize::new(0));
    let counter = produced.clone();
    let handle = provider("Chatty", move |_, request| {
        while request.yield_value(Value::Integer(1)) {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(Value::Null)
    });

    let call = dispatcher.invoke_streaming(&handle, "find_package", find_args("a"), host());
    assert!(call.next().await.is_some());
    call.cancel();

    assert_eq!(call.wait().await, RequestState::Cancelled);
    let after_cancel = produced.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(produced.load(Ordering::SeqCst), after_cancel);
}
