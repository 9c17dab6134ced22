// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-memory object stream for tests.
//!
//! Consumes payloads inline in `send`, records headers, and keeps the same
//! counters as the real stream, so bundle-level tests can assert on exactly
//! what reached each destination.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;

use super::{complete_send, Extra, ObjectStream, SendUnit, Stats, StreamConnector, StreamStats};
use crate::obj::ObjHdr;
use crate::Result;

pub struct MockStream {
    url: String,
    sent: Mutex<Vec<ObjHdr>>,
    stats: Arc<StreamStats>,
    terminated: AtomicBool,
    delay: Option<Duration>,
}

impl MockStream {
    pub fn new(url: impl Into<String>, delay: Option<Duration>) -> Self {
        Self {
            url: url.into(),
            sent: Mutex::new(Vec::new()),
            stats: Arc::new(StreamStats::default()),
            terminated: AtomicBool::new(false),
            delay,
        }
    }

    /// Headers of every object this stream accepted, in order.
    pub fn sent(&self) -> Vec<ObjHdr> {
        self.sent.lock().clone()
    }

    pub fn num_sent(&self) -> u64 {
        self.stats.snapshot().num
    }
}

#[async_trait]
impl ObjectStream for MockStream {
    async fn send(&self, unit: SendUnit) -> Result<()> {
        if self.terminated() {
            return Err(anyhow!("{}: stream terminated, dropping send", self.url));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let SendUnit {
            hdr,
            reader,
            cb,
            prc,
        } = unit;
        self.stats.inc_num();
        let mut nbytes = 0u64;
        if let Some(mut reader) = reader {
            let mut buf = [0u8; 8192];
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                nbytes += n as u64;
            }
        }
        self.stats.add_bytes(nbytes);
        self.sent.lock().push(hdr.clone());
        self.stats.inc_completed();
        complete_send(&hdr, None, cb.as_ref(), prc.as_ref());
        Ok(())
    }

    async fn fin(&self) {
        // sends complete inline, nothing to drain
        self.terminated.store(true, Ordering::Release);
    }

    fn stop(&self) {
        self.terminated.store(true, Ordering::Release);
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

/// [`StreamConnector`] that hands out [`MockStream`]s and remembers every
/// stream it created, keyed by destination URL.
#[derive(Default)]
pub struct MockConnector {
    delay: Option<Duration>,
    made: Mutex<Vec<Arc<MockStream>>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connector whose streams sleep before accepting each object, to keep
    /// sends in flight during close/resync races.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            made: Mutex::new(Vec::new()),
        })
    }

    /// Total number of streams ever created.
    pub fn created(&self) -> usize {
        self.made.lock().len()
    }

    pub fn streams(&self) -> Vec<Arc<MockStream>> {
        self.made.lock().clone()
    }

    /// Streams whose destination URL starts with the given prefix.
    pub fn streams_for(&self, url_prefix: &str) -> Vec<Arc<MockStream>> {
        self.made
            .lock()
            .iter()
            .filter(|s| s.url().starts_with(url_prefix))
            .cloned()
            .collect()
    }
}

impl StreamConnector for MockConnector {
    fn connect(&self, url: &str, _extra: &Extra) -> Arc<dyn ObjectStream> {
        let stream = Arc::new(MockStream::new(url, self.delay));
        self.made.lock().push(stream.clone());
        stream
    }
}
