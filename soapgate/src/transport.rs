//! The seam between the adapter and the remote service.

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

use soapgate_util::{
    security::{SecurityHeaderInterceptor, SecurityMode},
    soap::{Client, OperationCall, SoapError},
    value::Argument,
};
use soapgate_wsdl::{types::Definition, Catalog};

use crate::config::BridgeConfig;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Soap(#[from] SoapError),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// Anything able to enumerate the operations it can call.
///
/// Used as the operation catalog when no definition could be parsed.
pub trait OperationSource {
    fn operation_names(&self) -> Vec<String>;
}

pub trait Transport: OperationSource + Send + Sync {
    /// Calls `operation` with positional `arguments`, returning the response
    /// values in document order.
    fn invoke(
        &self,
        operation: &str,
        arguments: &[Argument],
    ) -> Result<Vec<(String, Value)>, TransportError>;
}

pub trait TransportFactory: Send + Sync {
    /// Connects to the service described at `source`.
    ///
    /// `definition` is the parsed form of `source` when it could be read.
    fn connect(
        &self,
        source: &str,
        definition: Option<&Definition>,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

#[derive(Debug)]
struct SoapOperation {
    action: String,
    parts: Vec<String>,
}

/// Document/literal calls over HTTP.
#[derive(Debug)]
pub struct SoapTransport {
    client: Client,
    namespace: String,
    operations: Vec<String>,
    bindings: HashMap<String, SoapOperation>,
}

impl SoapTransport {
    pub fn new(client: Client, namespace: impl Into<String>, definition: Option<&Definition>) -> Self {
        let namespace = namespace.into();
        let mut operations = Vec::new();
        let mut bindings = HashMap::new();

        if let Some(definition) = definition {
            for descriptor in Catalog::build(definition).operations() {
                let action = definition
                    .binding_operation(&descriptor.name)
                    .and_then(|binding| binding.action.clone())
                    .unwrap_or_else(|| format!("{}{}", namespace, descriptor.name));

                if !operations.contains(&descriptor.name) {
                    operations.push(descriptor.name.clone());
                }

                bindings.insert(
                    descriptor.name.clone(),
                    SoapOperation {
                        action,
                        parts: descriptor.inputs.iter().map(|input| input.name.clone()).collect(),
                    },
                );
            }
        }

        Self {
            client,
            namespace,
            operations,
            bindings,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn call(&self, operation: &str, arguments: &[Argument]) -> (OperationCall, String) {
        let binding = self.bindings.get(operation);

        let mut call = OperationCall::new(self.namespace.as_str(), operation);
        for (index, argument) in arguments.iter().enumerate() {
            let name = binding
                .and_then(|binding| binding.parts.get(index).cloned())
                .unwrap_or_else(|| format!("arg{}", index));

            call = call.with_part(name, argument.clone());
        }

        let action = binding
            .map(|binding| binding.action.clone())
            .unwrap_or_else(|| format!("{}{}", self.namespace, operation));

        (call, action)
    }
}

impl OperationSource for SoapTransport {
    fn operation_names(&self) -> Vec<String> {
        self.operations.clone()
    }
}

impl Transport for SoapTransport {
    fn invoke(
        &self,
        operation: &str,
        arguments: &[Argument],
    ) -> Result<Vec<(String, Value)>, TransportError> {
        let (call, action) = self.call(operation, arguments);
        Ok(self.client.send(call, &action)?)
    }
}

/// Builds [`SoapTransport`]s configured with the service's security header.
#[derive(Debug, Clone)]
pub struct SoapTransportFactory {
    config: BridgeConfig,
}

impl SoapTransportFactory {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// A client posting to `endpoint` with the configured security header.
    pub fn client(&self, endpoint: &str) -> Result<Client, TransportError> {
        let mut client = Client::new(
            endpoint,
            self.config.connection_timeout(),
            self.config.receive_timeout(),
        )?;

        let mode = self.config.security_mode();
        if mode == SecurityMode::Vendor {
            client.disable_policy_processing();
        }

        if self.config.security.enabled {
            let phase = self
                .config
                .header_phase()
                .map_err(|err| TransportError::Unavailable(err.to_string()))?;

            client.add_interceptor(Box::new(
                SecurityHeaderInterceptor::new(mode, self.config.credentials()).with_phase(phase),
            ));

            debug!(?mode, %phase, interceptors = ?client.interceptors(), "security enabled");
        }

        Ok(client)
    }
}

impl TransportFactory for SoapTransportFactory {
    fn connect(
        &self,
        source: &str,
        definition: Option<&Definition>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let endpoint = definition
            .and_then(Definition::endpoint)
            .unwrap_or(self.config.service_url.as_str());

        let namespace = definition
            .and_then(|definition| definition.target_namespace.clone())
            .unwrap_or_else(|| self.config.service_namespace.clone());

        info!(source, endpoint, %namespace, "creating service client");

        let client = self.client(endpoint)?;
        Ok(Box::new(SoapTransport::new(client, namespace, definition)))
    }
}
