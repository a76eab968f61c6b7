use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use bytes::Bytes;
use futures::{StreamExt, stream};
use rstest::{fixture, rstest};
use sluice_flow::{Publisher, PublisherStream, StreamPublisher};
use sluice_test_utils::{
    Event, RecordingSubscriber, ScriptedPublisher, Step, TestError, init_tracing,
};
use tokio::runtime::Runtime;

const WAIT: Duration = Duration::from_secs(5);

#[fixture]
fn runtime() -> Runtime {
    init_tracing();
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn chunks(n: usize) -> Vec<Result<Bytes, TestError>> {
    (0..n).map(|i| Ok(Bytes::from(vec![i as u8]))).collect()
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn stream_publisher_pulls_only_on_demand(runtime: Runtime) {
    let pulled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&pulled);
    let source = stream::iter(chunks(5)).inspect(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let (subscriber, recorded) = RecordingSubscriber::new(2);
    StreamPublisher::new(source, runtime.handle().clone()).subscribe(Box::new(subscriber));

    assert!(recorded.wait_for_events(2, WAIT));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(recorded.items().len(), 2);
    assert_eq!(pulled.load(Ordering::SeqCst), 2);

    // One extra credit lets the publisher observe the end of the source.
    recorded.request(4);
    assert!(recorded.wait_for_events(6, WAIT));
    assert_eq!(recorded.items().len(), 5);
    assert!(recorded.is_complete());
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn stream_publisher_stops_after_cancel(runtime: Runtime) {
    let source = stream::iter(chunks(100));
    let (subscriber, recorded) = RecordingSubscriber::new(1);
    StreamPublisher::new(source, runtime.handle().clone()).subscribe(Box::new(subscriber));

    assert!(recorded.wait_for_events(1, WAIT));
    recorded.cancel();
    recorded.request(10);
    thread::sleep(Duration::from_millis(50));

    assert_eq!(recorded.events().len(), 1);
    assert!(!recorded.is_complete());
    assert!(recorded.error().is_none());
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn stream_publisher_forwards_source_error(runtime: Runtime) {
    let source = stream::iter(vec![
        Ok(Bytes::from_static(b"ok")),
        Err(TestError("boom".into())),
        Ok(Bytes::from_static(b"never")),
    ]);
    let (subscriber, recorded) = RecordingSubscriber::new(10);
    StreamPublisher::new(source, runtime.handle().clone()).subscribe(Box::new(subscriber));

    assert!(recorded.wait_for_events(2, WAIT));
    thread::sleep(Duration::from_millis(20));
    let events = recorded.events();
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], Event::Next(b) if b.as_ref() == b"ok"));
    assert_eq!(recorded.error().as_deref(), Some("boom"));
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn stream_publisher_rejects_zero_demand(runtime: Runtime) {
    let (subscriber, recorded) = RecordingSubscriber::new(0);
    StreamPublisher::new(stream::iter(chunks(3)), runtime.handle().clone())
        .subscribe(Box::new(subscriber));

    assert!(recorded.wait_for_subscription(WAIT));
    recorded.request(0);

    assert!(recorded.wait_for_events(1, WAIT));
    assert_eq!(
        recorded.error().as_deref(),
        Some("subscriber requested zero items")
    );
    assert!(recorded.items().is_empty());
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publisher_stream_collects_scripted_items() {
    init_tracing();
    let publisher = ScriptedPublisher::new(vec![
        Step::chunk(b"one"),
        Step::chunk(b""),
        Step::chunk(b"two"),
        Step::Complete,
    ]);
    let log = publisher.log();

    let items: Vec<Bytes> = PublisherStream::new(publisher)
        .map(Result::unwrap)
        .collect()
        .await;

    assert_eq!(
        items,
        vec![
            Bytes::from_static(b"one"),
            Bytes::new(),
            Bytes::from_static(b"two")
        ]
    );
    assert!(log.requests().iter().all(|&n| n == 1));
    assert_eq!(log.cancel_calls(), 0);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publisher_stream_surfaces_error_then_ends() {
    init_tracing();
    let publisher = ScriptedPublisher::new(vec![Step::chunk(b"head"), Step::Fail("torn".into())]);

    let mut items = PublisherStream::new(publisher);
    assert_eq!(items.next().await.unwrap().unwrap(), "head");
    assert_eq!(items.next().await.unwrap().unwrap_err().to_string(), "torn");
    assert!(items.next().await.is_none());
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_publisher_stream_cancels() {
    init_tracing();
    let publisher = ScriptedPublisher::new(vec![
        Step::chunk(b"a"),
        Step::chunk(b"b"),
        Step::chunk(b"c"),
        Step::Complete,
    ]);
    let log = publisher.log();
    let joiner = publisher.joiner();

    let mut items = PublisherStream::new(publisher);
    assert_eq!(items.next().await.unwrap().unwrap(), "a");
    drop(items);

    tokio::task::spawn_blocking(move || joiner.join())
        .await
        .unwrap();
    assert_eq!(log.cancel_calls(), 1);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_round_trips_through_publisher() {
    init_tracing();
    let source = stream::iter(chunks(4));
    let collected: Vec<Bytes> = PublisherStream::new(StreamPublisher::current(source))
        .map(Result::unwrap)
        .collect()
        .await;
    assert_eq!(collected, chunks(4).into_iter().map(Result::unwrap).collect::<Vec<_>>());
}
