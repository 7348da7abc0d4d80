use std::{collections::BTreeMap, path::{Path, PathBuf}, time::Duration};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub networks_file: PathBuf,
    pub network: String,
    pub journal_path: PathBuf,
    pub bind_addr: String,
    pub request_timeout: Duration,
    pub ledger_page_size: u64,
    pub api_max_window: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let network = get("RELAYER_NETWORK").context("Missing required env var: RELAYER_NETWORK")?;
        let networks_file = get("RELAYER_NETWORKS_FILE").unwrap_or_else(|| "networks.json".to_string());
        let journal_path = get("RELAYER_JOURNAL").unwrap_or_else(|| "relayer_journal.json".to_string());
        let bind_addr = get("RELAYER_BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_string());

        let timeout_secs: u64 = match get("RELAYER_REQUEST_TIMEOUT_SECS") {
            Some(v) => v.parse().with_context(|| format!("RELAYER_REQUEST_TIMEOUT_SECS: not a number: {v}"))?,
            None => 30,
        };
        let ledger_page_size: u64 = match get("RELAYER_LEDGER_PAGE_SIZE") {
            Some(v) => v.parse().with_context(|| format!("RELAYER_LEDGER_PAGE_SIZE: not a number: {v}"))?,
            None => 1000,
        };

        let api_max_window: u64 = match get("RELAYER_API_MAX_WINDOW") {
            Some(v) => v.parse().with_context(|| format!("RELAYER_API_MAX_WINDOW: not a number: {v}"))?,
            None => 10_000,
        };

        if network.trim().is_empty() {
            bail!("RELAYER_NETWORK must not be empty");
        }
        if timeout_secs == 0 {
            bail!("RELAYER_REQUEST_TIMEOUT_SECS must be at least 1");
        }
        // subgraph caps `first` at 1000
        if ledger_page_size == 0 || ledger_page_size > 1000 {
            bail!("RELAYER_LEDGER_PAGE_SIZE must be between 1 and 1000");
        }
        if api_max_window == 0 {
            bail!("RELAYER_API_MAX_WINDOW must be at least 1");
        }

        Ok(Self {
            networks_file: PathBuf::from(networks_file),
            network,
            journal_path: PathBuf::from(journal_path),
            bind_addr,
            request_timeout: Duration::from_secs(timeout_secs),
            ledger_page_size,
            api_max_window,
        })
    }
}

/// Contract reachable through a JSON-RPC node that signs for `from`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmEndpoint {
    pub rpc_url: String,
    pub contract: String,
    pub from: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub ledger_url: String,
    #[serde(default)]
    pub checkpoint_store: Option<EvmEndpoint>,
    #[serde(default)]
    pub registry: Option<EvmEndpoint>,
}

impl NetworkConfig {
    pub fn checkpoint_store(&self, network: &str) -> Result<&EvmEndpoint> {
        self.checkpoint_store
            .as_ref()
            .with_context(|| format!("network {network} has no checkpoint_store configured"))
    }

    pub fn registry(&self, network: &str) -> Result<&EvmEndpoint> {
        self.registry
            .as_ref()
            .with_context(|| format!("network {network} has no registry configured"))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkTable(pub BTreeMap<String, NetworkConfig>);

impl NetworkTable {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read network table {}", path.display()))?;
        Self::parse(&bytes).with_context(|| format!("Invalid network table {}", path.display()))
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let table: Self = serde_json::from_slice(bytes)?;
        for (name, net) in &table.0 {
            check_url(&format!("{name}.ledger_url"), &net.ledger_url)?;
            for (label, ep) in [("checkpoint_store", &net.checkpoint_store), ("registry", &net.registry)] {
                if let Some(ep) = ep {
                    check_url(&format!("{name}.{label}.rpc_url"), &ep.rpc_url)?;
                    check_address(&format!("{name}.{label}.contract"), &ep.contract)?;
                    check_address(&format!("{name}.{label}.from"), &ep.from)?;
                }
            }
        }
        Ok(table)
    }

    pub fn select(&self, network: &str) -> Result<NetworkConfig> {
        match self.0.get(network) {
            Some(n) => Ok(n.clone()),
            None => {
                let known: Vec<&str> = self.0.keys().map(String::as_str).collect();
                bail!("unknown network {network}; configured: {}", known.join(", "))
            }
        }
    }
}

fn check_url(field: &str, url: &str) -> Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        bail!("{field} must start with http:// or https://");
    }
    Ok(())
}

fn check_address(field: &str, addr: &str) -> Result<()> {
    badges::Address::parse_hex(addr)
        .map(|_| ())
        .with_context(|| format!("{field} is not a 20-byte hex address"))
}
