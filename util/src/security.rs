//! Authentication header blocks.
//!
//! Two incompatible shapes are supported: the standard WS-Security
//! `UsernameToken`, and the vendor shape in which a flat list of `pfs:`
//! fields sits directly inside `wsse:Security`. The remote side reads the
//! vendor fields by element name in a fixed order, so neither the names nor
//! the order may change.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::{
    interceptor::{HeaderName, InterceptorError, OutInterceptor, OutboundMessage, Phase},
    soap::SOAP_ENV_NS,
    xml::XmlElement,
};

pub const WSSE_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
pub const WSU_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
pub const VENDOR_NS: &str = "http://pfs.com";

pub const PASSWORD_TEXT: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordText";
pub const BASE64_BINARY: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary";

pub const DEFAULT_CLIENT_ID: &str = "DEFAULT";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub client_id: Option<String>,
    pub alternate_authentication: bool,
    pub change_password: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    Standard,
    Vendor,
}

impl SecurityMode {
    /// Phase the header is attached in unless configured otherwise.
    pub fn default_phase(self) -> Phase {
        match self {
            SecurityMode::Standard => Phase::WriteEnding,
            SecurityMode::Vendor => Phase::PrepareSend,
        }
    }
}

pub fn security_header_name() -> HeaderName {
    HeaderName::new(WSSE_NS, "Security")
}

fn security_element() -> XmlElement {
    XmlElement::new("wsse:Security")
        .with_attribute("xmlns:wsse", WSSE_NS)
        .with_attribute("xmlns:wsu", WSU_NS)
        .with_attribute("xmlns:soapenv", SOAP_ENV_NS)
        .with_attribute("soapenv:mustUnderstand", "1")
}

pub fn standard_header(credentials: &Credentials, now: DateTime<Utc>) -> XmlElement {
    let millis = now.timestamp_millis();

    let token = XmlElement::new("wsse:UsernameToken")
        .with_attribute("wsu:Id", format!("UsernameToken-{}", millis))
        .with_child(XmlElement::new("wsse:Username").with_text(credentials.username.as_str()))
        .with_child(
            XmlElement::new("wsse:Password")
                .with_attribute("Type", PASSWORD_TEXT)
                .with_text(credentials.password.as_str()),
        )
        .with_child(
            XmlElement::new("wsse:Nonce")
                .with_attribute("EncodingType", BASE64_BINARY)
                .with_text(STANDARD.encode(millis.to_string())),
        )
        .with_child(
            XmlElement::new("wsu:Created")
                .with_text(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );

    security_element().with_child(token)
}

pub fn vendor_header(credentials: &Credentials) -> XmlElement {
    let field = |name: &str, value: &str| XmlElement::new(format!("pfs:{}", name)).with_text(value);

    let client_id = credentials
        .client_id
        .as_deref()
        .filter(|client_id| !client_id.is_empty())
        .unwrap_or(DEFAULT_CLIENT_ID);

    let new_password = if credentials.change_password {
        credentials.password.as_str()
    } else {
        ""
    };

    security_element()
        .with_attribute("xmlns:pfs", VENDOR_NS)
        .with_child(field("PfsClientID", client_id))
        .with_child(field("PfsUserName", &credentials.username))
        .with_child(field("PfsUserPassword", &credentials.password))
        .with_child(field("PfsUserNewPassword", new_password))
        .with_child(field("PfsKeyData", ""))
        .with_child(field(
            "PfsWindowsAuthentication",
            &credentials.alternate_authentication.to_string(),
        ))
        .with_child(field(
            "PfsChangePassword",
            &credentials.change_password.to_string(),
        ))
        .with_child(field("PfsToken", ""))
}

/// Attaches a freshly built security header to every outbound message.
#[derive(Debug, Clone)]
pub struct SecurityHeaderInterceptor {
    mode: SecurityMode,
    credentials: Credentials,
    phase: Phase,
}

impl SecurityHeaderInterceptor {
    pub fn new(mode: SecurityMode, credentials: Credentials) -> Self {
        Self {
            mode,
            credentials,
            phase: mode.default_phase(),
        }
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    pub fn header(&self) -> XmlElement {
        match self.mode {
            SecurityMode::Standard => standard_header(&self.credentials, Utc::now()),
            SecurityMode::Vendor => vendor_header(&self.credentials),
        }
    }
}

impl OutInterceptor for SecurityHeaderInterceptor {
    fn name(&self) -> &str {
        match self.mode {
            SecurityMode::Standard => "ws-security-username-token",
            SecurityMode::Vendor => "ws-security-vendor",
        }
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn handle(&self, message: &mut OutboundMessage) -> Result<(), InterceptorError> {
        message.replace_header(security_header_name(), self.header());
        Ok(())
    }
}
