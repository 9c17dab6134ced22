// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The stream bundle: one round-robin group of long-lived streams per
//! cluster peer of a selected role, kept in sync with the cluster map.
//!
//! The hot send path reads the bundle through an [`ArcSwap`] acquire-load
//! and never takes a lock; reconciliation serializes under `smaplock` and
//! publishes a fully built replacement map with a single release-store, so a
//! send in flight observes either the pre- or the post-reconciliation
//! bundle, never a partially mutated one.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::cluster::{self, NodeId, RxKind, Smap, SmapListener, SmapOwner, Snode};
use crate::config;
use crate::error::BundleError;
use crate::obj::{ObjHdr, ObjectReader, Reopen};
use crate::stream::{
    Extra, HttpConnector, ObjectStream, SendCallback, SendUnit, Stats, StreamConnector,
};
use crate::Result;

/// Parallel streams to the same destination, with round-robin selection.
struct Robin {
    streams: Vec<Arc<dyn ObjectStream>>,
    counter: AtomicU64,
}

type Bundle = HashMap<NodeId, Arc<Robin>>;

/// Aggregated per-destination counters, keyed by node ID.
pub type BundleStats = HashMap<NodeId, Stats>;

/// Maintains streams from this node to all peers of the selected role and
/// fans (header + payload) objects out across them.
///
/// Construction establishes the initial streams and registers the bundle as
/// a cluster-map listener; [`close`](Self::close) tears everything down and
/// deregisters. Multiple bundles may coexist, each under its own transport
/// name.
pub struct StreamBundle {
    sowner: Arc<dyn SmapOwner>,
    lsnode: Arc<Snode>,
    connector: Arc<dyn StreamConnector>,
    network: String,
    trname: String,
    extra: Extra,
    rx_kind: RxKind,
    multiplier: usize,
    smap: ArcSwap<Smap>,
    streams: ArcSwap<Bundle>,
    smaplock: Mutex<()>,
    shutdown: AtomicBool,
    listener_id: String,
    me: Weak<StreamBundle>,
    rt: tokio::runtime::Handle,
}

impl fmt::Debug for StreamBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBundle")
            .field("lsnode", &self.lsnode)
            .field("network", &self.network)
            .field("trname", &self.trname)
            .field("rx_kind", &self.rx_kind)
            .field("multiplier", &self.multiplier)
            .field("listener_id", &self.listener_id)
            .finish()
    }
}

impl StreamBundle {
    /// Creates a bundle with the default HTTP transport over the shared
    /// client. Must be called from within a tokio runtime.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sowner: Arc<dyn SmapOwner>,
        lsnode: Arc<Snode>,
        client: reqwest::Client,
        network: &str,
        trname: &str,
        extra: Option<Extra>,
        rx_kind: RxKind,
        multiplier: usize,
    ) -> Result<Arc<Self>> {
        Self::with_connector(
            sowner,
            lsnode,
            Arc::new(HttpConnector::new(client)),
            network,
            trname,
            extra,
            rx_kind,
            multiplier,
        )
    }

    /// Same as [`new`](Self::new) with an explicit stream connector.
    #[allow(clippy::too_many_arguments)]
    pub fn with_connector(
        sowner: Arc<dyn SmapOwner>,
        lsnode: Arc<Snode>,
        connector: Arc<dyn StreamConnector>,
        network: &str,
        trname: &str,
        extra: Option<Extra>,
        rx_kind: RxKind,
        multiplier: usize,
    ) -> Result<Arc<Self>> {
        if !(1..=255).contains(&multiplier) {
            return Err(BundleError::Multiplier(multiplier).into());
        }
        if !config::network_is_known(network) {
            warn!(
                network,
                known = ?config::KNOWN_NETWORKS,
                "unknown network, expecting one of the known set"
            );
        }
        let listener_id = format!("streambundle-{}-{}-{}", lsnode.daemon_id, network, trname);
        let sb = Arc::new_cyclic(|me| StreamBundle {
            sowner,
            lsnode,
            connector,
            network: network.to_string(),
            trname: trname.to_string(),
            extra: extra.unwrap_or_default(),
            rx_kind,
            multiplier,
            smap: ArcSwap::from_pointee(Smap::default()),
            streams: ArcSwap::from_pointee(Bundle::new()),
            smaplock: Mutex::new(()),
            shutdown: AtomicBool::new(false),
            listener_id,
            me: me.clone(),
            rt: tokio::runtime::Handle::current(),
        });
        sb.resync();
        sb.sowner.listeners().reg(sb.clone());
        Ok(sb)
    }

    /// Fans the object to every destination in the current bundle.
    pub async fn send(
        &self,
        hdr: ObjHdr,
        reader: Option<ObjectReader>,
        cb: Option<SendCallback>,
    ) -> Result<()> {
        let bundle = self.streams.load_full();
        if bundle.is_empty() {
            return Err(BundleError::NoStreams(self.to_string()).into());
        }
        let cb = cb.or_else(|| self.extra.callback.clone());
        let prc = refcount(cb.as_ref(), bundle.len());
        let opener = fanout_opener(reader.as_ref(), bundle.len());
        let mut original = reader;
        let mut reopen = false;
        for robin in bundle.values() {
            let replica = self.replica_reader(&mut original, opener.as_ref(), reopen)?;
            self.send_one(robin, hdr.clone(), replica, cb.clone(), prc.clone())
                .await?;
            reopen = true;
        }
        Ok(())
    }

    /// Fans the object to an explicit list of destinations. Fails with
    /// destination-mismatch before any handoff if one of them has no stream.
    pub async fn send_to(
        &self,
        hdr: ObjHdr,
        reader: Option<ObjectReader>,
        cb: Option<SendCallback>,
        nodes: &[NodeId],
    ) -> Result<()> {
        let bundle = self.streams.load_full();
        if bundle.is_empty() {
            return Err(BundleError::NoStreams(self.to_string()).into());
        }
        for id in nodes {
            if !bundle.contains_key(id) {
                return Err(BundleError::DestinationMismatch {
                    bundle: self.to_string(),
                    node: id.clone(),
                }
                .into());
            }
        }
        let cb = cb.or_else(|| self.extra.callback.clone());
        let prc = refcount(cb.as_ref(), nodes.len());
        let opener = fanout_opener(reader.as_ref(), nodes.len());
        let mut original = reader;
        let mut reopen = false;
        for id in nodes {
            let robin = &bundle[id];
            let replica = self.replica_reader(&mut original, opener.as_ref(), reopen)?;
            self.send_one(robin, hdr.clone(), replica, cb.clone(), prc.clone())
                .await?;
            reopen = true;
        }
        Ok(())
    }

    /// Closes all contained streams and deregisters from the cluster-map
    /// listeners. Graceful close drains every accepted send before
    /// returning; abortive close stops the streams immediately. Safe to call
    /// more than once.
    pub async fn close(&self, graceful: bool) {
        let bundle = {
            let _guard = self.smaplock.lock();
            self.shutdown.store(true, Ordering::Release);
            self.streams.load_full()
        };
        let live = bundle
            .values()
            .flat_map(|robin| robin.streams.iter())
            .filter(|s| !s.terminated());
        if graceful {
            futures::future::join_all(live.map(|s| s.fin())).await;
        } else {
            for s in live {
                s.stop();
            }
        }
        self.sowner.listeners().unreg(&self.listener_id);
    }

    /// Per-destination counters, summed across each destination's streams.
    pub fn get_stats(&self) -> BundleStats {
        let bundle = self.streams.load();
        bundle
            .iter()
            .map(|(id, robin)| {
                let mut total = Stats::default();
                for s in &robin.streams {
                    let st = s.stats();
                    total.num += st.num;
                    total.bytes += st.bytes;
                    total.completed += st.completed;
                }
                (id.clone(), total)
            })
            .collect()
    }

    /// Destinations currently present in the bundle.
    pub fn destinations(&self) -> Vec<NodeId> {
        self.streams.load().keys().cloned().collect()
    }

    /// Version of the last reconciled cluster map.
    pub fn smap_version(&self) -> u64 {
        self.smap.load().version
    }

    pub fn multiplier(&self) -> usize {
        self.multiplier
    }

    /// Reconciles the set of open streams with the latest cluster map.
    /// Normally driven by change notifications; callable directly to force
    /// a reconciliation. No-op if the version did not move or the bundle is
    /// shut down.
    ///
    /// # Panics
    ///
    /// Panics if the provider's snapshot version went backwards.
    pub fn resync(&self) {
        let _guard = self.smaplock.lock();
        if self.shutdown.load(Ordering::Acquire) {
            return;
        }
        let smap = self.sowner.get();
        let cur = self.smap.load_full();
        if smap.version == cur.version {
            return;
        }
        assert!(
            smap.version > cur.version,
            "{self}: cluster map version regression: {} -> {}",
            cur.version,
            smap.version
        );
        let (added, removed) =
            cluster::node_map_delta(&cur.rx_node_maps(self.rx_kind), &smap.rx_node_maps(self.rx_kind));

        let obundle = self.streams.load_full();
        let mut nbundle: Bundle = (*obundle).clone();
        for (id, si) in &added {
            if *id == self.lsnode.daemon_id {
                continue;
            }
            let to_url = config::transport_url(si.url(&self.network), &self.trname);
            let mut streams = Vec::with_capacity(self.multiplier);
            for k in 0..self.multiplier {
                let ns = self.connector.connect(&to_url, &self.extra);
                if self.multiplier > 1 {
                    info!("{self}: added stream ({k}) => {id} @ {to_url}");
                } else {
                    info!("{self}: added stream => {id} @ {to_url}");
                }
                streams.push(ns);
            }
            nbundle.insert(
                id.clone(),
                Arc::new(Robin {
                    streams,
                    counter: AtomicU64::new(0),
                }),
            );
        }
        for id in removed.keys() {
            if *id == self.lsnode.daemon_id {
                continue;
            }
            if let Some(robin) = nbundle.remove(id) {
                for os in &robin.streams {
                    // the node is gone but the stream may still be active
                    if !os.terminated() {
                        os.stop();
                    }
                    info!("{self}: removed stream => {id} @ {}", os.url());
                }
            }
        }
        self.streams.store(Arc::new(nbundle));
        self.smap.store(smap);
    }

    /// Reader for the next destination: the caller's own cursor for the
    /// first one, a fresh reopen for every replica after it.
    fn replica_reader(
        &self,
        original: &mut Option<ObjectReader>,
        opener: Option<&Arc<dyn Reopen>>,
        reopen: bool,
    ) -> Result<Option<ObjectReader>> {
        if !reopen {
            return Ok(original.take());
        }
        match opener {
            Some(opener) => {
                let reader =
                    ObjectReader::reopened(opener).map_err(|source| BundleError::ReaderReopen {
                        bundle: self.to_string(),
                        source,
                    })?;
                Ok(Some(reader))
            }
            None => Ok(None),
        }
    }

    async fn send_one(
        &self,
        robin: &Robin,
        hdr: ObjHdr,
        reader: Option<ObjectReader>,
        cb: Option<SendCallback>,
        prc: Option<Arc<AtomicI64>>,
    ) -> Result<()> {
        let i = if self.multiplier > 1 {
            robin.counter.fetch_add(1, Ordering::Relaxed) as usize % robin.streams.len()
        } else {
            0
        };
        robin.streams[i]
            .send(SendUnit {
                hdr,
                reader,
                cb,
                prc,
            })
            .await
    }
}

impl SmapListener for StreamBundle {
    fn listener_id(&self) -> &str {
        &self.listener_id
    }

    fn smap_changed(&self) {
        let smap = self.sowner.get();
        if smap.version == self.smap.load().version {
            return;
        }
        if let Some(sb) = self.me.upgrade() {
            self.rt.spawn(async move { sb.resync() });
        }
    }
}

impl fmt::Display for StreamBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}=>{}/{}",
            self.lsnode.daemon_id, self.network, self.trname
        )
    }
}

/// Shared completion refcount: allocated only when there is a callback and
/// more than one destination.
fn refcount(cb: Option<&SendCallback>, ndest: usize) -> Option<Arc<AtomicI64>> {
    (cb.is_some() && ndest > 1).then(|| Arc::new(AtomicI64::new(ndest as i64)))
}

/// Reopen handle for replicas 2..N, taken before the original cursor is
/// handed off. Skipped entirely for single-destination sends.
fn fanout_opener(reader: Option<&ObjectReader>, ndest: usize) -> Option<Arc<dyn Reopen>> {
    if ndest > 1 {
        reader.map(|r| r.opener())
    } else {
        None
    }
}
