// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-memory cluster-map provider for tests and examples.

use std::sync::Arc;

use arc_swap::ArcSwap;

use super::{NetInfo, NodeId, Smap, SmapListeners, SmapOwner, Snode};

/// [`SmapOwner`] backed by a settable snapshot. Every [`set_smap`] publishes
/// the new map and notifies registered listeners, mirroring what the cluster
/// runtime does on a membership change.
///
/// [`set_smap`]: MockSmapOwner::set_smap
pub struct MockSmapOwner {
    smap: ArcSwap<Smap>,
    listeners: Arc<SmapListeners>,
}

impl MockSmapOwner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            smap: ArcSwap::from_pointee(Smap::default()),
            listeners: SmapListeners::new(),
        })
    }

    pub fn set_smap(&self, smap: Smap) {
        self.smap.store(Arc::new(smap));
        self.listeners.notify();
    }
}

impl SmapOwner for MockSmapOwner {
    fn get(&self) -> Arc<Smap> {
        self.smap.load_full()
    }

    fn listeners(&self) -> Arc<SmapListeners> {
        self.listeners.clone()
    }
}

/// Node reachable at the same URL on all three networks.
pub fn snode(id: &str, url: &str) -> Arc<Snode> {
    Arc::new(Snode {
        daemon_id: NodeId::from(id),
        public_net: NetInfo::new(url),
        intra_control_net: NetInfo::new(url),
        intra_data_net: NetInfo::new(url),
    })
}

/// Cluster map with `n` targets `t_0..t_n`, one port apart.
pub fn target_smap(version: u64, n: usize) -> Smap {
    let mut smap = Smap {
        version,
        ..Default::default()
    };
    for i in 0..n {
        let id = format!("t_{i}");
        let url = format!("http://127.0.0.1:{}", 9100 + i);
        smap.tmap.insert(NodeId::from(id.as_str()), snode(&id, &url));
    }
    smap
}
