// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Objects on the wire: the header that precedes every payload, and the
//! re-openable payload reader.
//!
//! Streams in a bundle are mutually independent and consume payload bytes
//! destructively, so one reader cannot feed N destinations. [`ObjectReader`]
//! pairs the consumable cursor with a shared [`Reopen`] handle; the fanout
//! path hands the original cursor to the first destination and opens a fresh
//! one per additional replica.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, ReadBuf};

/// Object attributes carried in the header.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjAttrs {
    pub size: u64,
    pub atime: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cksum_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cksum_value: Option<String>,
}

/// Per-object header. `opaque` is application metadata the transport carries
/// through unmodified.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjHdr {
    pub bucket: String,
    pub obj_name: String,
    #[serde(default, skip_serializing_if = "Bytes::is_empty")]
    pub opaque: Bytes,
    pub attrs: ObjAttrs,
}

impl ObjHdr {
    pub fn new(bucket: impl Into<String>, obj_name: impl Into<String>, attrs: ObjAttrs) -> Self {
        Self {
            bucket: bucket.into(),
            obj_name: obj_name.into(),
            opaque: Bytes::new(),
            attrs,
        }
    }
}

/// Produces independent payload readers, each positioned at offset zero.
/// Must be callable concurrently with an earlier cursor still being drained.
/// Sources that cannot cheaply re-open (one-shot network readers) must
/// buffer first; that is the caller's concern.
pub trait Reopen: Send + Sync {
    fn reopen(&self) -> io::Result<Box<dyn AsyncRead + Send + Unpin>>;
}

/// A consumable payload cursor plus the [`Reopen`] handle it came from.
pub struct ObjectReader {
    rd: Box<dyn AsyncRead + Send + Unpin>,
    opener: Arc<dyn Reopen>,
}

impl ObjectReader {
    /// Opens the initial cursor from the given source.
    pub fn new(opener: Arc<dyn Reopen>) -> io::Result<Self> {
        let rd = opener.reopen()?;
        Ok(Self { rd, opener })
    }

    /// In-memory payload; reopening clones the handle, not the bytes.
    pub fn from_bytes(payload: Bytes) -> Self {
        let opener: Arc<dyn Reopen> = Arc::new(BytesOpener(payload));
        Self {
            rd: opener
                .reopen()
                .unwrap_or_else(|_| unreachable!("in-memory reopen is infallible")),
            opener,
        }
    }

    /// Fresh reader over the same payload from a shared opener.
    pub fn reopened(opener: &Arc<dyn Reopen>) -> io::Result<Self> {
        Ok(Self {
            rd: opener.reopen()?,
            opener: opener.clone(),
        })
    }

    pub fn opener(&self) -> Arc<dyn Reopen> {
        self.opener.clone()
    }
}

impl AsyncRead for ObjectReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(self.get_mut().rd.as_mut()).poll_read(cx, buf)
    }
}

/// [`Reopen`] over an in-memory payload.
pub struct BytesOpener(pub Bytes);

impl Reopen for BytesOpener {
    fn reopen(&self) -> io::Result<Box<dyn AsyncRead + Send + Unpin>> {
        Ok(Box::new(io::Cursor::new(self.0.clone())))
    }
}

/// [`Reopen`] over a file path; every replica re-opens the file.
pub struct FileOpener {
    path: PathBuf,
}

impl FileOpener {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Reopen for FileOpener {
    fn reopen(&self) -> io::Result<Box<dyn AsyncRead + Send + Unpin>> {
        let file = std::fs::File::open(&self.path)?;
        Ok(Box::new(tokio::fs::File::from_std(file)))
    }
}
