// WriteBridge consumed by an async subscriber, the way an upload client reads a request body.
use std::{io::Write, time::Duration};

use bytes::BytesMut;
use futures::StreamExt;
use rstest::rstest;
use sluice_flow::{PublisherStream, RequestBody};
use sluice_io::{BridgeError, BridgeOptions, WriteBridge};
use sluice_test_utils::init_tracing;

#[rstest]
#[case::one_item(vec![b"whole body".to_vec()])]
#[case::many_items(vec![b"a".to_vec(), b"bc".to_vec(), b"def".to_vec(), b"ghij".to_vec()])]
#[timeout(Duration::from_secs(10))]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upload_body_arrives_intact(#[case] parts: Vec<Vec<u8>>) {
    init_tracing();
    let expected: Vec<u8> = parts.concat();
    let (bridge, body) = WriteBridge::new(expected.len() as u64, BridgeOptions::default());
    assert_eq!(body.content_length(), Some(expected.len() as u64));

    let mut uploaded = PublisherStream::new(body);

    let parts_count = parts.len();
    let writer = tokio::task::spawn_blocking(move || {
        let mut bridge = bridge;
        for part in &parts {
            bridge.write_all(part)?;
        }
        bridge.close()?;
        Ok::<_, std::io::Error>(bridge.written())
    });

    let mut received = BytesMut::new();
    let mut items = 0;
    while let Some(item) = uploaded.next().await {
        received.extend_from_slice(&item.unwrap());
        items += 1;
    }

    assert_eq!(writer.await.unwrap().unwrap(), expected.len() as u64);
    assert_eq!(&received[..], &expected[..]);
    assert_eq!(items, parts_count);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_consumer_cancels_writer() {
    init_tracing();
    let (bridge, body) = WriteBridge::new(1024, BridgeOptions::default());
    let mut uploaded = PublisherStream::new(body);

    let writer = tokio::task::spawn_blocking(move || -> Result<(), BridgeError> {
        let mut bridge = bridge;
        bridge.write_byte(1)?;
        // Blocks until the consumer asks again or goes away.
        loop {
            bridge.write_byte(2)?;
        }
    });

    let first = uploaded.next().await.unwrap().unwrap();
    assert_eq!(&first[..], &[1]);
    drop(uploaded);

    let err = writer.await.unwrap().unwrap_err();
    assert!(matches!(err, BridgeError::Cancelled));
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_writer_fails_upload() {
    init_tracing();
    let (bridge, body) = WriteBridge::new(8, BridgeOptions::default());
    let mut uploaded = PublisherStream::new(body);

    let writer = tokio::task::spawn_blocking(move || {
        let mut bridge = bridge;
        bridge.write_all(b"half")?;
        drop(bridge);
        Ok::<(), std::io::Error>(())
    });

    let first = uploaded.next().await.unwrap().unwrap();
    assert_eq!(&first[..], b"half");
    let err = uploaded.next().await.unwrap().unwrap_err();
    assert_eq!(err.to_string(), "writer dropped before close");
    assert!(uploaded.next().await.is_none());

    writer.await.unwrap().unwrap();
}
