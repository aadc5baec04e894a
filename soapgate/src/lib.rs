pub mod adapter;
pub mod binder;
pub mod config;
pub mod error;
pub mod logging;
pub mod transport;

pub use adapter::{Adapter, AdapterState, ServiceInfo, DEFAULT_OPERATIONS};
pub use binder::{bind, BindWarning, Bound, ParamBag};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
