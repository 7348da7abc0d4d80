use std::sync::Arc;

use crate::config::NetworkConfig;
use crate::driver::Relayer;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub network: NetworkConfig,
    pub relayer: Relayer,
    /// Largest window a single API request may build
    pub max_window: u64,
}

impl AppState {
    pub fn new(network: NetworkConfig, relayer: Relayer, max_window: u64) -> Self {
        Self { network, relayer, max_window }
    }
}
