// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Transport-level configuration: named cluster networks, the fixed URL path
//! scheme shared with the receiver mux, and tunable defaults.
//!
//! Defaults can be overridden from the environment (`OSTORE_TRANSPORT_*`) or
//! from an optional TOML file pointed to by `OSTORE_TRANSPORT_CONFIG_PATH`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Public (client-facing) network.
pub const NETWORK_PUBLIC: &str = "public";
/// Intra-cluster control plane.
pub const NETWORK_INTRA_CONTROL: &str = "intra_control";
/// Intra-cluster data plane.
pub const NETWORK_INTRA_DATA: &str = "intra_data";

pub const KNOWN_NETWORKS: [&str; 3] = [NETWORK_PUBLIC, NETWORK_INTRA_CONTROL, NETWORK_INTRA_DATA];

/// Versioned API prefix shared with the receiving side.
pub const URL_VERSION: &str = "v1";
pub const URL_TRANSPORT: &str = "transport";

/// Default depth of a stream's work queue.
pub const DEFAULT_BURST: usize = 32;
/// Default payload chunk size on the wire.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

pub fn network_is_known(network: &str) -> bool {
    KNOWN_NETWORKS.contains(&network)
}

/// Composes the destination URL for a transport endpoint:
/// `<node URL> + /v1/transport/<trname>`.
pub fn transport_url(base: &str, trname: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        base.trim_end_matches('/'),
        URL_VERSION,
        URL_TRANSPORT,
        trname
    )
}

/// Process-wide transport defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Network tag bundles use unless told otherwise.
    pub network: String,
    /// Work-queue depth per stream.
    pub burst: usize,
    /// Payload chunk size per wire write.
    pub chunk_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            network: NETWORK_INTRA_DATA.to_string(),
            burst: DEFAULT_BURST,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl TransportConfig {
    /// Loads the config: defaults, then the optional TOML file, then
    /// `OSTORE_TRANSPORT_*` environment variables. A malformed source falls
    /// back to defaults with a warning rather than failing the caller.
    pub fn from_env() -> Self {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Ok(path) = std::env::var("OSTORE_TRANSPORT_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("OSTORE_TRANSPORT_"));
        figment.extract().unwrap_or_else(|err| {
            tracing::warn!(%err, "invalid transport config, using defaults");
            Self::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_composition() {
        assert_eq!(
            transport_url("http://10.0.0.3:8081", "rebalance"),
            "http://10.0.0.3:8081/v1/transport/rebalance"
        );
        assert_eq!(
            transport_url("http://10.0.0.3:8081/", "ec"),
            "http://10.0.0.3:8081/v1/transport/ec"
        );
    }

    #[test]
    fn known_networks() {
        assert!(network_is_known(NETWORK_INTRA_DATA));
        assert!(!network_is_known("management"));
    }

    #[test]
    fn env_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("OSTORE_TRANSPORT_BURST", "7");
            jail.set_env("OSTORE_TRANSPORT_NETWORK", NETWORK_INTRA_CONTROL);
            let cfg = TransportConfig::from_env();
            assert_eq!(cfg.burst, 7);
            assert_eq!(cfg.network, NETWORK_INTRA_CONTROL);
            assert_eq!(cfg.chunk_size, DEFAULT_CHUNK_SIZE);
            Ok(())
        });
    }
}
