// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Cluster topology as seen by the transport: nodes, the versioned cluster
//! map (Smap), the role selector, and the change-listener registry.
//!
//! The Smap is read-only once published; providers hand out `Arc<Smap>`
//! snapshots and bump the version on every change.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::BundleError;

pub mod mock;

/// Opaque node identifier, unique within a cluster map.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Addressing info for one network a node is reachable on.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetInfo {
    pub direct_url: String,
}

impl NetInfo {
    pub fn new(direct_url: impl Into<String>) -> Self {
        Self {
            direct_url: direct_url.into(),
        }
    }
}

/// One cluster node with its per-network addresses.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snode {
    pub daemon_id: NodeId,
    pub public_net: NetInfo,
    pub intra_control_net: NetInfo,
    pub intra_data_net: NetInfo,
}

impl Snode {
    /// URL of this node on the given network; unrecognized tags fall back to
    /// the public address.
    pub fn url(&self, network: &str) -> &str {
        match network {
            config::NETWORK_INTRA_CONTROL => &self.intra_control_net.direct_url,
            config::NETWORK_INTRA_DATA => &self.intra_data_net.direct_url,
            _ => &self.public_net.direct_url,
        }
    }
}

impl fmt::Display for Snode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.daemon_id.as_str())
    }
}

pub type NodeMap = HashMap<NodeId, Arc<Snode>>;

/// Versioned cluster map: targets and proxies, each keyed by node ID.
/// Versions strictly increase; a snapshot is never rewritten in place.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Smap {
    pub version: u64,
    pub tmap: NodeMap,
    pub pmap: NodeMap,
}

impl Smap {
    /// Node maps relevant to the given receiver role, in a fixed order.
    pub fn rx_node_maps(&self, rx: RxKind) -> Vec<&NodeMap> {
        match rx {
            RxKind::Targets => vec![&self.tmap],
            RxKind::Proxies => vec![&self.pmap],
            RxKind::AllNodes => vec![&self.tmap, &self.pmap],
        }
    }
}

/// Which class of peers a bundle streams to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RxKind {
    Targets,
    Proxies,
    AllNodes,
}

impl fmt::Display for RxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Targets => write!(f, "targets"),
            Self::Proxies => write!(f, "proxies"),
            Self::AllNodes => write!(f, "all_nodes"),
        }
    }
}

impl FromStr for RxKind {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "targets" => Ok(Self::Targets),
            "proxies" => Ok(Self::Proxies),
            "all_nodes" | "all" => Ok(Self::AllNodes),
            _ => Err(BundleError::Role(s.to_string())),
        }
    }
}

/// Set difference between two generations of role-selected node maps:
/// `added` holds nodes present only in `new`, `removed` nodes present only
/// in `old`. A node present on both sides lands in neither.
pub fn node_map_delta(old: &[&NodeMap], new: &[&NodeMap]) -> (NodeMap, NodeMap) {
    let contains = |maps: &[&NodeMap], id: &NodeId| maps.iter().any(|m| m.contains_key(id));
    let mut added = NodeMap::new();
    let mut removed = NodeMap::new();
    for map in new {
        for (id, si) in map.iter() {
            if !contains(old, id) {
                added.insert(id.clone(), si.clone());
            }
        }
    }
    for map in old {
        for (id, si) in map.iter() {
            if !contains(new, id) {
                removed.insert(id.clone(), si.clone());
            }
        }
    }
    (added, removed)
}

/// Provider of the current cluster map.
pub trait SmapOwner: Send + Sync {
    fn get(&self) -> Arc<Smap>;
    fn listeners(&self) -> Arc<SmapListeners>;
}

/// Receives cluster-map change notifications. `smap_changed` may be invoked
/// from any thread, concurrently with sends; implementations pull the
/// snapshot themselves, so coalesced notifications are harmless.
pub trait SmapListener: Send + Sync {
    fn listener_id(&self) -> &str;
    fn smap_changed(&self);
}

/// Registry of cluster-map listeners.
#[derive(Default)]
pub struct SmapListeners {
    inner: Mutex<Vec<Arc<dyn SmapListener>>>,
}

impl SmapListeners {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reg(&self, listener: Arc<dyn SmapListener>) {
        let mut inner = self.inner.lock();
        if inner
            .iter()
            .any(|l| l.listener_id() == listener.listener_id())
        {
            tracing::warn!(id = listener.listener_id(), "listener already registered");
            return;
        }
        inner.push(listener);
    }

    pub fn unreg(&self, listener_id: &str) {
        self.inner.lock().retain(|l| l.listener_id() != listener_id);
    }

    /// Fans the change notification out to every registered listener.
    pub fn notify(&self) {
        let listeners: Vec<_> = self.inner.lock().clone();
        for l in listeners {
            l.smap_changed();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
