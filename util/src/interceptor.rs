//! Outbound message pipeline.
//!
//! Interceptors run ordered by [`Phase`] and may rewrite the header blocks of
//! the message about to be written.

use std::{fmt, str::FromStr};
use thiserror::Error;
use tracing::debug;

use crate::{security::WSSE_NS, xml::XmlElement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Setup,
    PrepareSend,
    Write,
    WriteEnding,
    PrepareSendEnding,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeaderName {
    pub namespace: String,
    pub local: String,
}

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub operation: String,
    pub action: String,
    headers: Vec<(HeaderName, XmlElement)>,
}

#[derive(Debug, Error)]
pub enum InterceptorError {
    #[error("Interceptor {interceptor} rejected the message: {reason}")]
    Rejected { interceptor: String, reason: String },
}

#[derive(Debug, Error)]
#[error("Unknown interceptor phase {0}")]
pub struct UnknownPhase(String);

pub trait OutInterceptor: Send + Sync {
    fn name(&self) -> &str;

    fn phase(&self) -> Phase;

    /// Policy interceptors enforce standard WS-Security expectations on the
    /// outgoing headers and can be switched off as a group.
    fn is_policy(&self) -> bool {
        false
    }

    fn handle(&self, message: &mut OutboundMessage) -> Result<(), InterceptorError>;
}

/// Rejects a `wsse:Security` header that carries no `UsernameToken`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PolicyInterceptor;

#[derive(Default)]
pub struct Pipeline {
    interceptors: Vec<Box<dyn OutInterceptor>>,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Setup,
        Phase::PrepareSend,
        Phase::Write,
        Phase::WriteEnding,
        Phase::PrepareSendEnding,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::PrepareSend => "prepare-send",
            Phase::Write => "write",
            Phase::WriteEnding => "write-ending",
            Phase::PrepareSendEnding => "prepare-send-ending",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = UnknownPhase;

    /// Accepts `prepare-send`, `prepare_send`, `PREPARE_SEND` and `prepareSend`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized: String = value
            .chars()
            .filter(|c| !matches!(c, '-' | '_'))
            .flat_map(char::to_lowercase)
            .collect();

        Phase::ALL
            .into_iter()
            .find(|phase| phase.as_str().replace('-', "") == normalized)
            .ok_or_else(|| UnknownPhase(value.to_owned()))
    }
}

impl HeaderName {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
        }
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}{}", self.namespace, self.local)
    }
}

impl OutboundMessage {
    pub fn new(operation: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            action: action.into(),
            headers: Vec::new(),
        }
    }

    pub fn headers(&self) -> impl Iterator<Item = &XmlElement> {
        self.headers.iter().map(|(_, element)| element)
    }

    pub fn header(&self, name: &HeaderName) -> Option<&XmlElement> {
        self.headers
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, element)| element)
    }

    pub fn add_header(&mut self, name: HeaderName, element: XmlElement) {
        self.headers.push((name, element));
    }

    /// Removes every header block named `name`, returning how many there were.
    pub fn remove_header(&mut self, name: &HeaderName) -> usize {
        let before = self.headers.len();
        self.headers.retain(|(existing, _)| existing != name);
        before - self.headers.len()
    }

    /// Adds `element`, dropping any block previously attached under `name`.
    pub fn replace_header(&mut self, name: HeaderName, element: XmlElement) {
        let removed = self.remove_header(&name);
        if removed > 0 {
            debug!(header = %name, removed, "replaced existing header");
        }

        self.add_header(name, element);
    }
}

impl OutInterceptor for PolicyInterceptor {
    fn name(&self) -> &str {
        "ws-security-policy"
    }

    fn phase(&self) -> Phase {
        Phase::PrepareSendEnding
    }

    fn is_policy(&self) -> bool {
        true
    }

    fn handle(&self, message: &mut OutboundMessage) -> Result<(), InterceptorError> {
        let security = HeaderName::new(WSSE_NS, "Security");

        match message.header(&security) {
            Some(header) if header.child("UsernameToken").is_none() => {
                Err(InterceptorError::Rejected {
                    interceptor: self.name().to_owned(),
                    reason: "security header has no UsernameToken".into(),
                })
            }

            _ => Ok(()),
        }
    }
}

impl Pipeline {
    /// Inserts after every interceptor of the same or an earlier phase.
    pub fn add(&mut self, interceptor: Box<dyn OutInterceptor>) {
        let index = self
            .interceptors
            .iter()
            .position(|existing| existing.phase() > interceptor.phase())
            .unwrap_or(self.interceptors.len());

        self.interceptors.insert(index, interceptor);
    }

    /// Drops every policy interceptor, returning how many were removed.
    pub fn remove_policy(&mut self) -> usize {
        let before = self.interceptors.len();
        self.interceptors.retain(|interceptor| !interceptor.is_policy());
        before - self.interceptors.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.interceptors
            .iter()
            .map(|interceptor| interceptor.name())
            .collect()
    }

    pub fn run(&self, message: &mut OutboundMessage) -> Result<(), InterceptorError> {
        for interceptor in &self.interceptors {
            debug!(
                interceptor = interceptor.name(),
                phase = %interceptor.phase(),
                operation = %message.operation,
                "running interceptor"
            );
            interceptor.handle(message)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("interceptors", &self.names())
            .finish()
    }
}
