//! Configuration sections of `wirestate.toml`.

mod codec;
mod dispatch;
mod runtime;
mod serve;

pub use codec::{CodecConfig, KeyEntry, KEY_ENV_PREFIX};
pub use dispatch::DispatchConfig;
pub use runtime::RuntimeConfig;
pub use serve::ServeConfig;
