use super::{
    interceptor::{InterceptorError, OutInterceptor, OutboundMessage, Pipeline, PolicyInterceptor},
    value::{element_to_json, Argument, XSI_NS},
    xml::{
        events::{BytesStart, Event},
        ToXml, Writer, XmlElement,
    },
};

use bytes::Buf;
use reqwest::{blocking::Client as Reqwest, header::CONTENT_TYPE};
use serde_json::Value;
use std::{
    io::{BufRead, BufReader, Write},
    time::Duration,
};
use thiserror::Error;
use tracing::debug;

pub const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

#[derive(Debug, Error)]
pub enum SoapError {
    #[error("Unable to reach service at {url}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Service responded with status {status}")]
    Status { status: u16, body: String },

    #[error("SOAP fault {code}: {message}")]
    Fault { code: String, message: String },

    #[error("Malformed SOAP response: {0}")]
    Malformed(String),

    #[error("Error processing SOAP XML")]
    Xml(#[from] quick_xml::Error),

    #[error("Outbound message rejected")]
    Rejected(#[from] InterceptorError),
}

/// The body of a document/literal request: a wrapper element named after
/// the operation holding one child per message part.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationCall {
    pub namespace: String,
    pub operation: String,
    pub parts: Vec<(String, Argument)>,
}

#[derive(Debug)]
pub struct Envelope<T> {
    headers: Vec<XmlElement>,
    body: T,
}

pub struct Client {
    client: Reqwest,
    url: String,
    pipeline: Pipeline,
}

impl OperationCall {
    pub fn new(namespace: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            operation: operation.into(),
            parts: Vec::new(),
        }
    }

    pub fn with_part(mut self, name: impl Into<String>, value: Argument) -> Self {
        self.parts.push((name.into(), value));
        self
    }
}

impl ToXml for OperationCall {
    fn to_xml<W: Write>(&self, writer: &mut Writer<W>) -> quick_xml::Result<()> {
        let mut wrapper =
            XmlElement::new(self.operation.as_str()).with_attribute("xmlns", self.namespace.as_str());

        for (name, value) in &self.parts {
            wrapper.children.extend(value.to_elements(name));
        }

        wrapper.to_xml(writer)
    }
}

impl<T> Envelope<T> {
    pub fn new(body: T) -> Self {
        Self {
            headers: Vec::new(),
            body,
        }
    }

    pub fn with_headers(mut self, headers: Vec<XmlElement>) -> Self {
        self.headers = headers;
        self
    }

    pub fn headers(&self) -> &[XmlElement] {
        &self.headers
    }
}

impl<T: ToXml> ToXml for Envelope<T> {
    fn to_xml<W: Write>(&self, writer: &mut Writer<W>) -> quick_xml::Result<()> {
        let envelope = BytesStart::owned_name("soapenv:Envelope")
            .with_attributes([("xmlns:soapenv", SOAP_ENV_NS), ("xmlns:xsi", XSI_NS)]);
        let header = BytesStart::owned_name("soapenv:Header");
        let body = BytesStart::owned_name("soapenv:Body");

        writer.write_event(Event::Start(envelope.to_borrowed()))?;

        if !self.headers.is_empty() {
            writer.write_event(Event::Start(header.to_borrowed()))?;
            for block in &self.headers {
                block.to_xml(writer)?;
            }
            writer.write_event(Event::End(header.to_end()))?;
        }

        writer.write_event(Event::Start(body.to_borrowed()))?;
        self.body.to_xml(writer)?;
        writer.write_event(Event::End(body.to_end()))?;
        writer.write_event(Event::End(envelope.to_end()))
    }
}

fn child_text(element: &XmlElement, path: &[&str]) -> Option<String> {
    let mut current = element;
    for name in path {
        current = current.child(name)?;
    }

    current.text().map(ToOwned::to_owned)
}

fn fault(element: &XmlElement) -> SoapError {
    let code = child_text(element, &["faultcode"])
        .or_else(|| child_text(element, &["Code", "Value"]))
        .unwrap_or_default();
    let message = child_text(element, &["faultstring"])
        .or_else(|| child_text(element, &["Reason", "Text"]))
        .unwrap_or_default();

    SoapError::Fault { code, message }
}

/// Reads the return values out of a response envelope, in document order.
pub fn parse_response<R: BufRead>(input: R) -> Result<Vec<(String, Value)>, SoapError> {
    let envelope = XmlElement::parse(input)?;
    if envelope.local_name() != "Envelope" {
        return Err(SoapError::Malformed(format!(
            "expected Envelope, found {}",
            envelope.name
        )));
    }

    let body = envelope
        .child("Body")
        .ok_or_else(|| SoapError::Malformed("envelope has no Body".into()))?;

    let wrapper = match body.children.first() {
        Some(wrapper) => wrapper,
        None => return Ok(Vec::new()),
    };

    if wrapper.local_name() == "Fault" {
        return Err(fault(wrapper));
    }

    Ok(wrapper
        .children
        .iter()
        .map(|value| (value.local_name().to_owned(), element_to_json(value)))
        .collect())
}

impl Client {
    /// Creates a client posting to `url`, with policy processing enabled.
    pub fn new(
        url: impl Into<String>,
        connect_timeout: Duration,
        receive_timeout: Duration,
    ) -> Result<Self, SoapError> {
        let url = url.into();
        let client = Reqwest::builder()
            .connect_timeout(connect_timeout)
            .timeout(receive_timeout)
            .build()
            .map_err(|source| SoapError::Http {
                url: url.clone(),
                source,
            })?;

        let mut pipeline = Pipeline::default();
        pipeline.add(Box::new(PolicyInterceptor));

        Ok(Self {
            client,
            url,
            pipeline,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn add_interceptor(&mut self, interceptor: Box<dyn OutInterceptor>) {
        self.pipeline.add(interceptor);
    }

    /// Removes the interceptors enforcing standard WS-Security policies.
    pub fn disable_policy_processing(&mut self) {
        let removed = self.pipeline.remove_policy();
        debug!(removed, "policy processing disabled");
    }

    pub fn interceptors(&self) -> Vec<&str> {
        self.pipeline.names()
    }

    pub fn send(&self, call: OperationCall, action: &str) -> Result<Vec<(String, Value)>, SoapError> {
        let mut message = OutboundMessage::new(call.operation.as_str(), action);
        self.pipeline.run(&mut message)?;

        let envelope = Envelope::new(call).with_headers(message.headers().cloned().collect());
        let request = envelope.to_bytes()?;

        debug!(
            operation = %message.operation,
            action,
            envelope = %String::from_utf8_lossy(&request),
            "sending request"
        );

        let http_error = |source| SoapError::Http {
            url: self.url.clone(),
            source,
        };

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", format!("\"{}\"", action))
            .body(request)
            .send()
            .map_err(http_error)?;

        let status = response.status();
        let bytes = response.bytes().map_err(http_error)?;

        debug!(
            %status,
            body = %String::from_utf8_lossy(&bytes),
            "received response"
        );

        match parse_response(BufReader::new(bytes.clone().reader())) {
            Err(fault @ SoapError::Fault { .. }) => Err(fault),
            result if status.is_success() => result,
            _ => Err(SoapError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            }),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.url)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}
