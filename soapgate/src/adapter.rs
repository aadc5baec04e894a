//! Lifecycle and call surface of the bridged service.
//!
//! The adapter publishes everything a call needs (catalog, transport and the
//! operation names) as one immutable [`Snapshot`]. Initialization builds a
//! complete new snapshot and swaps it in, so calls already running finish
//! against the snapshot they started with.

use arc_swap::ArcSwap;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use std::{
    error::Error as StdError,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex, PoisonError,
    },
    thread,
};
use tracing::{debug, error, info, warn};

use soapgate_wsdl::{
    fetch::{FetchOptions, Fetcher},
    Catalog, Resolution, Resolver,
};

use crate::{
    binder::{bind, pass_through, ParamBag},
    config::BridgeConfig,
    error::{BridgeError, Result},
    transport::{SoapTransportFactory, Transport, TransportFactory},
};

/// Placeholder operations published when no backend could be set up.
pub const DEFAULT_OPERATIONS: [&str; 3] = ["GetVersion", "Echo", "Ping"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    Uninitialized,
    Resolving,
    Ready,
    DegradedDefaults,
}

pub struct Snapshot {
    state: AdapterState,
    source: Option<String>,
    catalog: Catalog,
    transport: Option<Box<dyn Transport>>,
    operations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub service_url: String,
    pub namespace: String,
    pub wsdl_source: Option<String>,
    pub client_initialized: bool,
    pub available_methods_count: usize,
    pub state: AdapterState,
    pub timestamp: i64,
}

/// Where the definition came from and what was actually loaded.
struct Source {
    origin: String,
    location: String,
}

pub struct Adapter {
    config: BridgeConfig,
    resolver: Resolver,
    factory: Box<dyn TransportFactory>,
    snapshot: ArcSwap<Snapshot>,
    resolving: AtomicBool,
    initializing: Mutex<()>,
}

impl Snapshot {
    fn uninitialized() -> Self {
        Self {
            state: AdapterState::Uninitialized,
            source: None,
            catalog: Catalog::default(),
            transport: None,
            operations: Vec::new(),
        }
    }

    fn degraded(source: Option<String>, transport: Option<Box<dyn Transport>>) -> Self {
        Self {
            state: AdapterState::DegradedDefaults,
            source,
            catalog: Catalog::default(),
            transport,
            operations: DEFAULT_OPERATIONS.iter().map(|name| name.to_string()).collect(),
        }
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn operations(&self) -> &[String] {
        &self.operations
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("state", &self.state)
            .field("source", &self.source)
            .field("operations", &self.operations)
            .field("transport", &self.transport.is_some())
            .finish()
    }
}

/// The error and every cause below it, joined into one line.
fn describe(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();

    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    message
}

/// Shapes the response values of a call into the result map.
pub fn normalize(values: Vec<(String, Value)>) -> Map<String, Value> {
    let mut result = Map::new();
    result.insert("success".into(), Value::Bool(true));

    if values.len() > 1 {
        for (index, (_, value)) in values.into_iter().enumerate() {
            result.insert(format!("result{}", index), value);
        }
    } else {
        let data = values.into_iter().next().map(|(_, value)| value);
        result.insert("data".into(), data.unwrap_or(Value::Null));
    }

    result
}

impl Adapter {
    pub fn new(config: BridgeConfig) -> Self {
        let factory = SoapTransportFactory::new(config.clone());
        Self::with_factory(config, Box::new(factory))
    }

    pub fn with_factory(config: BridgeConfig, factory: Box<dyn TransportFactory>) -> Self {
        let resolver = Resolver::new(config.artifact_dir.clone()).with_options(FetchOptions {
            connect_timeout: config.connection_timeout(),
            read_timeout: config.receive_timeout(),
        });

        Self {
            config,
            resolver,
            factory,
            snapshot: ArcSwap::from_pointee(Snapshot::uninitialized()),
            resolving: AtomicBool::new(false),
            initializing: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn state(&self) -> AdapterState {
        if self.resolving.load(Ordering::Acquire) {
            AdapterState::Resolving
        } else {
            self.snapshot.load().state
        }
    }

    /// The snapshot calls are currently served from.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Resolves the definition, builds the catalog and connects, publishing
    /// the result. Never fails: any problem leaves the adapter degraded.
    pub fn initialize(&self) -> AdapterState {
        let _guard = self
            .initializing
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        self.resolving.store(true, Ordering::Release);
        let snapshot = self.build();
        let state = snapshot.state;

        match state {
            AdapterState::Ready => info!(
                source = ?snapshot.source,
                operations = snapshot.operations.len(),
                "service adapter ready"
            ),
            _ => warn!(
                source = ?snapshot.source,
                "service adapter degraded, publishing default operations"
            ),
        }

        self.snapshot.store(Arc::new(snapshot));
        self.resolving.store(false, Ordering::Release);

        state
    }

    pub fn reinitialize(&self) -> AdapterState {
        info!("reinitializing service adapter");
        self.initialize()
    }

    fn build(&self) -> Snapshot {
        let source = match self.select_source() {
            Some(source) => source,
            None => {
                warn!("no definition source available");
                return Snapshot::degraded(None, None);
            }
        };

        let definition = match soapgate_wsdl::parse(&source.location) {
            Ok(definition) => Some(definition),
            Err(err) => {
                warn!(location = %source.location, error = %describe(&err), "unable to parse definition");
                None
            }
        };

        let transport = match self.factory.connect(&source.location, definition.as_ref()) {
            Ok(transport) => transport,
            Err(err) => {
                error!(location = %source.location, error = %describe(&err), "unable to create service client");
                return Snapshot::degraded(Some(source.origin), None);
            }
        };

        let catalog = definition.as_ref().map(Catalog::build).unwrap_or_default();
        let operations = if catalog.is_empty() {
            debug!("catalog is empty, asking the transport for operations");
            transport.operation_names()
        } else {
            catalog.names()
        };

        if operations.is_empty() {
            warn!(location = %source.location, "no operations found");
            return Snapshot::degraded(Some(source.origin), Some(transport));
        }

        Snapshot {
            state: AdapterState::Ready,
            source: Some(source.origin),
            catalog,
            transport: Some(transport),
            operations,
        }
    }

    /// Picks the definition to load: the configured URL, then the local
    /// file, then the definition published by the service itself.
    fn select_source(&self) -> Option<Source> {
        if let Some(url) = self.config.explicit_wsdl_url() {
            return Some(self.resolve_or_raw(url));
        }

        if let Some(path) = self.config.wsdl_path.as_deref() {
            if Path::new(path).exists() {
                return Some(self.resolve_or_raw(path));
            }

            debug!(path, "local definition not found");
        }

        let published = self.config.service_wsdl_url();
        if Fetcher::is_accessible(&published) {
            return Some(self.resolve_or_raw(&published));
        }

        debug!(location = %published, "published definition not reachable");
        None
    }

    fn resolve_or_raw(&self, origin: &str) -> Source {
        let location = match self.resolve_with_deadline(origin) {
            Ok(resolution) => resolution.location(),
            Err(err) => {
                warn!(
                    location = origin,
                    error = %describe(&err),
                    "resolution failed, using the definition as is"
                );
                origin.to_owned()
            }
        };

        Source {
            origin: origin.to_owned(),
            location,
        }
    }

    /// Resolves `location` on a worker thread, giving up once the configured
    /// deadline passes. An abandoned worker runs to completion in the
    /// background.
    pub fn resolve_with_deadline(&self, location: &str) -> Result<Resolution> {
        let resolver = self.resolver.clone();
        let target = location.to_owned();
        let (sender, receiver) = mpsc::channel();

        thread::Builder::new()
            .name("wsdl-resolver".into())
            .spawn(move || {
                if sender.send(resolver.resolve(&target)).is_err() {
                    debug!(location = %target, "resolution finished after its deadline");
                }
            })?;

        let deadline = self.config.resolution_deadline();
        match receiver.recv_timeout(deadline) {
            Ok(resolution) => Ok(resolution?),
            Err(_) => Err(BridgeError::Deadline {
                location: location.to_owned(),
                deadline,
            }),
        }
    }

    pub fn operation_names(&self) -> Vec<String> {
        self.snapshot.load().operations.clone()
    }

    /// Calls `operation` with arguments bound from `parameters`.
    pub fn invoke(&self, operation: &str, parameters: &ParamBag) -> Result<Map<String, Value>> {
        let snapshot = self.snapshot.load_full();
        let transport = snapshot
            .transport
            .as_ref()
            .ok_or(BridgeError::NotInitialized)?;

        let (name, arguments) = match snapshot.catalog.get(operation) {
            Some(descriptor) => (descriptor.name.as_str(), bind(descriptor, parameters).arguments),
            None => {
                debug!(operation, "operation not in catalog, passing parameters through");
                (operation, pass_through(parameters))
            }
        };

        info!(operation = name, arguments = arguments.len(), "invoking operation");

        let values = transport.invoke(name, &arguments).map_err(|err| {
            let message = describe(&err);
            error!(operation = name, error = %message, "invocation failed");

            BridgeError::ServiceInvocation {
                operation: operation.to_owned(),
                message,
            }
        })?;

        Ok(normalize(values))
    }

    /// Calls a lightweight operation, preferring one that looks like a ping
    /// and otherwise one that reports a version.
    pub fn is_healthy(&self) -> bool {
        let snapshot = self.snapshot.load_full();
        if snapshot.transport.is_none() {
            debug!("health check without a service client");
            return false;
        }

        let probe = |needle: &str| {
            snapshot
                .operations
                .iter()
                .find(|name| name.to_ascii_lowercase().contains(needle))
                .cloned()
        };

        let operation = match probe("ping").or_else(|| probe("version")) {
            Some(operation) => operation,
            None => return true,
        };

        match self.invoke(&operation, &ParamBag::new()) {
            Ok(_) => true,
            Err(err) => {
                warn!(operation = %operation, error = %err, "health check failed");
                false
            }
        }
    }

    pub fn service_info(&self) -> ServiceInfo {
        let snapshot = self.snapshot.load();

        ServiceInfo {
            service_url: self.config.service_url.clone(),
            namespace: self.config.service_namespace.clone(),
            wsdl_source: snapshot.source.clone(),
            client_initialized: snapshot.transport.is_some(),
            available_methods_count: snapshot.operations.len(),
            state: self.state(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Removes every resolved definition written to the artifact directory.
    pub fn cleanup_artifacts(&self) -> Result<usize> {
        let removed = self.resolver.cleanup_artifacts()?;
        info!(removed, "removed resolved definitions");
        Ok(removed)
    }
}
