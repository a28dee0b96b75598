//! Global config handle.
//!
//! Uses `arc-swap` for lock-free reads from request handlers.

use crate::config::WireConfig;
use arc_swap::ArcSwap;
use std::sync::{Arc, LazyLock};

static CONFIG: LazyLock<ArcSwap<WireConfig>> =
    LazyLock::new(|| ArcSwap::from_pointee(WireConfig::default()));

#[inline]
pub fn cfg() -> Arc<WireConfig> {
    CONFIG.load_full()
}

#[inline]
pub fn init_config(config: WireConfig) -> Arc<WireConfig> {
    let arc = Arc::new(config);
    CONFIG.store(Arc::clone(&arc));
    arc
}
