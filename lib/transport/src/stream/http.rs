// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! HTTP-backed object stream.
//!
//! One stream is one long-lived chunked POST: a worker task drains the
//! bounded work queue and writes each object as a length-prefixed JSON
//! header followed by raw payload chunks into the request body. The receiver
//! mux on the peer demultiplexes by the URL path
//! (`/v1/transport/<trname>`).

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{complete_send, Extra, ObjectStream, SendUnit, Stats, StreamConnector, StreamStats};
use crate::Result;

/// Depth of the wire-chunk channel between the worker and the request body.
const WIRE_CHANNEL_DEPTH: usize = 8;

/// Opens [`HttpStream`]s over a shared `reqwest` client.
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl StreamConnector for HttpConnector {
    fn connect(&self, url: &str, extra: &Extra) -> Arc<dyn ObjectStream> {
        Arc::new(HttpStream::connect(self.client.clone(), url.to_string(), extra))
    }
}

pub struct HttpStream {
    url: String,
    tx: Mutex<Option<mpsc::Sender<SendUnit>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    terminated: Arc<AtomicBool>,
    stats: Arc<StreamStats>,
}

impl HttpStream {
    /// Spawns the worker and opens the POST. Dial errors are not surfaced
    /// here: they terminate the stream, and subsequent sends fail.
    /// Must be called from within a tokio runtime.
    pub fn connect(client: reqwest::Client, url: String, extra: &Extra) -> Self {
        let (tx, rx) = mpsc::channel(extra.burst.max(1));
        let cancel = CancellationToken::new();
        let terminated = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(StreamStats::default());
        let worker = tokio::spawn(run_worker(
            client,
            url.clone(),
            rx,
            cancel.clone(),
            terminated.clone(),
            stats.clone(),
            extra.chunk_size.max(1),
        ));
        Self {
            url,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            cancel,
            terminated,
            stats,
        }
    }
}

#[async_trait]
impl ObjectStream for HttpStream {
    async fn send(&self, unit: SendUnit) -> Result<()> {
        if self.terminated() {
            return Err(anyhow!("{}: stream terminated, dropping send", self.url));
        }
        let tx = self.tx.lock().clone();
        match tx {
            Some(tx) => tx
                .send(unit)
                .await
                .map_err(|_| anyhow!("{}: stream terminated, dropping send", self.url)),
            None => Err(anyhow!("{}: stream closed", self.url)),
        }
    }

    async fn fin(&self) {
        // closing the work channel lets the worker drain and exit
        drop(self.tx.lock().take());
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }

    fn stop(&self) {
        self.terminated.store(true, Ordering::Release);
        self.cancel.cancel();
    }

    fn terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    fn stats(&self) -> Stats {
        self.stats.snapshot()
    }

    fn url(&self) -> &str {
        &self.url
    }
}

async fn run_worker(
    client: reqwest::Client,
    url: String,
    mut rx: mpsc::Receiver<SendUnit>,
    cancel: CancellationToken,
    terminated: Arc<AtomicBool>,
    stats: Arc<StreamStats>,
    chunk_size: usize,
) {
    let (wire_tx, wire_rx) = mpsc::channel::<io::Result<Bytes>>(WIRE_CHANNEL_DEPTH);
    let post = {
        let url = url.clone();
        tokio::spawn(async move {
            let resp = client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(reqwest::Body::wrap_stream(ReceiverStream::new(wire_rx)))
                .send()
                .await;
            match resp {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => warn!(%url, status = %resp.status(), "transport endpoint rejected stream"),
                Err(err) => warn!(%url, %err, "stream connection failed"),
            }
        })
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            unit = rx.recv() => match unit {
                None => break,
                Some(unit) => {
                    if let Err(err) = put_object(&wire_tx, unit, &stats, chunk_size).await {
                        warn!(%url, %err, "object send failed, terminating stream");
                        break;
                    }
                }
            }
        }
    }

    drop(wire_tx);
    if cancel.is_cancelled() {
        post.abort();
    } else {
        let _ = post.await;
    }
    terminated.store(true, Ordering::Release);
    debug!(%url, "stream worker done");
}

/// Writes one object onto the wire and runs its completion.
async fn put_object(
    wire_tx: &mpsc::Sender<io::Result<Bytes>>,
    unit: SendUnit,
    stats: &StreamStats,
    chunk_size: usize,
) -> Result<()> {
    let SendUnit {
        hdr,
        reader,
        cb,
        prc,
    } = unit;
    stats.inc_num();
    let res = async {
        let frame = encode_header(&hdr)?;
        wire_tx
            .send(Ok(frame))
            .await
            .map_err(|_| anyhow!("wire closed"))?;
        if let Some(mut reader) = reader {
            loop {
                let mut buf = BytesMut::zeroed(chunk_size);
                let n = reader.read(&mut buf[..]).await?;
                if n == 0 {
                    break;
                }
                buf.truncate(n);
                wire_tx
                    .send(Ok(buf.freeze()))
                    .await
                    .map_err(|_| anyhow!("wire closed"))?;
                stats.add_bytes(n as u64);
            }
        }
        Ok(())
    }
    .await;
    match &res {
        Ok(()) => {
            stats.inc_completed();
            complete_send(&hdr, None, cb.as_ref(), prc.as_ref());
        }
        Err(err) => complete_send(&hdr, Some(err), cb.as_ref(), prc.as_ref()),
    }
    res
}

/// Length-prefixed JSON header frame.
pub(crate) fn encode_header(hdr: &crate::obj::ObjHdr) -> Result<Bytes> {
    let body = serde_json::to_vec(hdr)?;
    let mut frame = BytesMut::with_capacity(4 + body.len());
    frame.put_u32_le(body.len() as u32);
    frame.put_slice(&body);
    Ok(frame.freeze())
}
