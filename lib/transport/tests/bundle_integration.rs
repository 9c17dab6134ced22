// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end bundle scenarios: sustained fanout, header-only objects,
//! membership changes mid-flight, reopen failures, and both close modes.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tokio::time::timeout;

use ostore_transport::cluster::mock::{snode, target_smap, MockSmapOwner};
use ostore_transport::stream::mock::MockConnector;
use ostore_transport::{
    config, BundleError, NodeId, ObjAttrs, ObjHdr, ObjectReader, ObjectStream, Reopen, RxKind,
    SendCallback, StreamBundle,
};

fn hdr(name: &str, size: u64) -> ObjHdr {
    ObjHdr::new(
        "bck",
        name,
        ObjAttrs {
            size,
            ..Default::default()
        },
    )
}

fn counting_cb(hits: Arc<AtomicUsize>) -> SendCallback {
    Arc::new(move |_hdr, _err| {
        hits.fetch_add(1, Ordering::SeqCst);
    })
}

fn bundle_over(
    sowner: &Arc<MockSmapOwner>,
    connector: &Arc<MockConnector>,
    trname: &str,
    multiplier: usize,
) -> Arc<StreamBundle> {
    ostore_transport::logging::init();
    StreamBundle::with_connector(
        sowner.clone(),
        snode("local", "http://127.0.0.1:9099"),
        connector.clone(),
        config::NETWORK_INTRA_DATA,
        trname,
        None,
        RxKind::Targets,
        multiplier,
    )
    .unwrap()
}

// Scenario A: sustained broadcast to 10 targets with a random multiplier and
// mixed payload sizes, then graceful close.
#[tokio::test(flavor = "multi_thread")]
async fn broadcast_throughput_mixed_sizes() {
    const TOTAL: u64 = 32 * 1024 * 1024;
    const MAX_OBJ: u64 = 1024 * 1024;

    let mut rng = rand::rng();
    let multiplier = rng.random_range(4..=16);
    let sowner = MockSmapOwner::new();
    sowner.set_smap(target_smap(1, 10));
    let connector = MockConnector::new();
    let sb = bundle_over(&sowner, &connector, "tput", multiplier);

    let mut pool = vec![0u8; MAX_OBJ as usize];
    rng.fill(&mut pool[..]);
    let pool = Bytes::from(pool);

    let completions = Arc::new(AtomicUsize::new(0));
    let cb = counting_cb(completions.clone());

    let (mut size, mut num) = (0u64, 0usize);
    while size < TOTAL {
        let objsize = rng.random_range(0..=MAX_OBJ);
        let reader = (objsize > 0).then(|| ObjectReader::from_bytes(pool.slice(..objsize as usize)));
        sb.send(hdr(&format!("obj-{num}"), objsize), reader, Some(cb.clone()))
            .await
            .unwrap();
        num += 1;
        size += objsize;
    }
    sb.close(true).await;

    assert_eq!(completions.load(Ordering::SeqCst), num);
    let stats = sb.get_stats();
    assert_eq!(stats.len(), 10);
    for (id, st) in &stats {
        assert_eq!(st.num as usize, num, "{id}: wrong object count");
        assert_eq!(st.completed, st.num, "{id}: incomplete objects");
        assert_eq!(st.bytes, size, "{id}: wrong byte count");
    }
}

// Scenario B: header-only objects (size 0, no reader) interleaved with
// regular payloads.
#[tokio::test]
async fn header_only_sends() {
    let sowner = MockSmapOwner::new();
    sowner.set_smap(target_smap(1, 3));
    let connector = MockConnector::new();
    let sb = bundle_over(&sowner, &connector, "hdr-only", 1);

    let completions = Arc::new(AtomicUsize::new(0));
    let cb = counting_cb(completions.clone());

    for i in 0..21 {
        if i % 7 == 0 {
            sb.send(hdr(&format!("o{i}"), 0), None, Some(cb.clone()))
                .await
                .unwrap();
        } else {
            sb.send(
                hdr(&format!("o{i}"), 5),
                Some(ObjectReader::from_bytes(Bytes::from_static(b"hello"))),
                Some(cb.clone()),
            )
            .await
            .unwrap();
        }
    }
    assert_eq!(completions.load(Ordering::SeqCst), 21);
    for st in sb.get_stats().values() {
        assert_eq!(st.num, 21);
        assert_eq!(st.bytes, 18 * 5);
    }
}

// Scenario C: a target joins while broadcasts continue; it receives only
// the broadcasts issued after the reconciliation.
#[tokio::test]
async fn node_joins_mid_flight() {
    let sowner = MockSmapOwner::new();
    sowner.set_smap(target_smap(1, 3));
    let connector = MockConnector::new();
    let sb = bundle_over(&sowner, &connector, "join", 1);

    for i in 0..5 {
        sb.send(hdr(&format!("pre-{i}"), 0), None, None).await.unwrap();
    }
    assert!(connector.streams_for("http://127.0.0.1:9103").is_empty());

    sowner.set_smap(target_smap(2, 4));
    sb.resync();
    assert!(sb.destinations().contains(&NodeId::from("t_3")));

    for i in 0..4 {
        sb.send(hdr(&format!("post-{i}"), 0), None, None).await.unwrap();
    }
    let stats = sb.get_stats();
    assert_eq!(stats[&NodeId::from("t_0")].num, 9);
    assert_eq!(stats[&NodeId::from("t_3")].num, 4);
}

// Scenario D: a target leaves; its streams get stopped, broadcasts skip it,
// and targeted sends to it fail with destination-mismatch.
#[tokio::test]
async fn node_leaves_mid_flight() {
    let sowner = MockSmapOwner::new();
    sowner.set_smap(target_smap(1, 4));
    let connector = MockConnector::new();
    let sb = bundle_over(&sowner, &connector, "leave", 2);

    sb.send(hdr("pre", 0), None, None).await.unwrap();

    let mut smap = target_smap(2, 4);
    smap.tmap.remove(&NodeId::from("t_1"));
    sowner.set_smap(smap);
    sb.resync();

    let gone = connector.streams_for("http://127.0.0.1:9101");
    assert_eq!(gone.len(), 2);
    assert!(gone.iter().all(|s| s.terminated()));
    assert!(!sb.destinations().contains(&NodeId::from("t_1")));

    sb.send(hdr("post", 0), None, None).await.unwrap();
    let reached: u64 = gone.iter().map(|s| s.num_sent()).sum();
    assert_eq!(reached, 1, "t_1 must not see post-resync broadcasts");

    let err = sb
        .send_to(hdr("late", 0), None, None, &[NodeId::from("t_1")])
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BundleError>(),
        Some(BundleError::DestinationMismatch { .. })
    ));
}

struct FlakyOpener {
    payload: Bytes,
    opens: AtomicUsize,
    fail_at: usize,
}

impl Reopen for FlakyOpener {
    fn reopen(&self) -> io::Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>> {
        let n = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_at {
            return Err(io::Error::other("synthetic reopen failure"));
        }
        Ok(Box::new(io::Cursor::new(self.payload.clone())))
    }
}

// Scenario E: the reader's second open fails; the first destination keeps
// its object, the rest of the fanout is abandoned.
#[tokio::test]
async fn reader_reopen_failure_aborts_fanout() {
    let sowner = MockSmapOwner::new();
    sowner.set_smap(target_smap(1, 3));
    let connector = MockConnector::new();
    let sb = bundle_over(&sowner, &connector, "flaky", 1);

    let opener = Arc::new(FlakyOpener {
        payload: Bytes::from_static(b"abc"),
        opens: AtomicUsize::new(0),
        fail_at: 2,
    });
    let reader = ObjectReader::new(opener as Arc<dyn Reopen>).unwrap();

    let err = sb.send(hdr("o", 3), Some(reader), None).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BundleError>(),
        Some(BundleError::ReaderReopen { .. })
    ));
    let handoffs: u64 = connector.streams().iter().map(|s| s.num_sent()).sum();
    assert_eq!(handoffs, 1, "only the first destination may have the object");
}

// Scenario F: graceful close completes every callback; abortive close
// returns promptly with sends still in flight.
#[tokio::test(flavor = "multi_thread")]
async fn graceful_then_abortive_close() {
    let sowner = MockSmapOwner::new();
    sowner.set_smap(target_smap(1, 4));
    let connector = MockConnector::with_delay(Duration::from_millis(2));
    let sb = bundle_over(&sowner, &connector, "drain", 2);

    let completions = Arc::new(AtomicUsize::new(0));
    let cb = counting_cb(completions.clone());
    let mut tasks = Vec::new();
    for i in 0..40 {
        let sb = sb.clone();
        let cb = cb.clone();
        tasks.push(tokio::spawn(async move {
            sb.send(
                hdr(&format!("o{i}"), 4),
                Some(ObjectReader::from_bytes(Bytes::from_static(b"data"))),
                Some(cb),
            )
            .await
            .unwrap();
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }
    sb.close(true).await;
    assert_eq!(completions.load(Ordering::SeqCst), 40);
    assert!(connector.streams().iter().all(|s| s.terminated()));

    // abortive: sends may be lost, but close returns promptly and nothing
    // deadlocks
    let sowner2 = MockSmapOwner::new();
    sowner2.set_smap(target_smap(1, 4));
    let connector2 = MockConnector::with_delay(Duration::from_millis(50));
    let sb2 = bundle_over(&sowner2, &connector2, "abort", 2);
    for i in 0..10 {
        let sb2 = sb2.clone();
        tokio::spawn(async move {
            let _ = sb2
                .send(
                    hdr(&format!("a{i}"), 4),
                    Some(ObjectReader::from_bytes(Bytes::from_static(b"data"))),
                    None,
                )
                .await;
        });
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
    timeout(Duration::from_secs(2), sb2.close(false))
        .await
        .expect("abortive close must return promptly");
    assert!(connector2.streams().iter().all(|s| s.terminated()));
    let err = sb2.send(hdr("tail", 0), None, None).await.unwrap_err();
    assert!(err.to_string().contains("terminated"));
}

// A change notification from the oracle alone (no direct resync call) must
// reconcile the bundle via the listener registration.
#[tokio::test(flavor = "multi_thread")]
async fn listener_notification_drives_resync() {
    let sowner = MockSmapOwner::new();
    sowner.set_smap(target_smap(1, 2));
    let connector = MockConnector::new();
    let sb = bundle_over(&sowner, &connector, "notify", 1);
    assert_eq!(sb.destinations().len(), 2);

    sowner.set_smap(target_smap(2, 5));
    // the listener schedules reconciliation asynchronously
    timeout(Duration::from_secs(5), async {
        while sb.smap_version() != 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("resync must be driven by the smap-changed notification");
    assert_eq!(sb.destinations().len(), 5);
}
