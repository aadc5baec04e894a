use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{info, warn};
use url::Url;

use soapgate_util::{
    interceptor::Phase,
    security::{Credentials, SecurityMode, DEFAULT_CLIENT_ID},
};
use soapgate_wsdl::resolver::Resolver;

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub service_url: String,
    pub service_namespace: String,

    /// Explicit definition location, takes precedence over `wsdl_path`.
    pub wsdl_url: Option<String>,
    pub wsdl_path: Option<String>,

    pub connection_timeout_ms: u64,
    pub receive_timeout_ms: u64,
    pub resolution_deadline_ms: u64,

    /// Where resolved definitions are written.
    pub artifact_dir: PathBuf,

    pub security: SecurityConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub enabled: bool,
    pub mode: AuthMode,
    pub username: String,
    pub password: String,
    pub client_id: Option<String>,
    pub alternate_authentication: bool,
    pub change_password: bool,

    /// Overrides the phase the header is attached in.
    pub phase: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Vendor,
    Standard,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            service_url: "http://localhost:8080/Service.asmx".into(),
            service_namespace: "http://tempuri.org/".into(),
            wsdl_url: None,
            wsdl_path: Some("wsdl/service.wsdl".into()),
            connection_timeout_ms: 30_000,
            receive_timeout_ms: 60_000,
            resolution_deadline_ms: 120_000,
            artifact_dir: Resolver::default_artifact_dir(),
            security: SecurityConfig::default(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: AuthMode::default(),
            username: String::new(),
            password: String::new(),
            client_id: Some(DEFAULT_CLIENT_ID.into()),
            alternate_authentication: false,
            change_password: false,
            phase: None,
        }
    }
}

impl From<AuthMode> for SecurityMode {
    fn from(mode: AuthMode) -> Self {
        match mode {
            AuthMode::Vendor => SecurityMode::Vendor,
            AuthMode::Standard => SecurityMode::Standard,
        }
    }
}

fn config_error(message: impl Into<String>) -> BridgeError {
    BridgeError::Config {
        message: message.into(),
    }
}

impl BridgeConfig {
    /// Loads the configuration file, or the defaults when there is none.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "loading configuration");
                Self::from_file(path)?
            }

            Some(path) => {
                warn!(path = %path.display(), "configuration file not found, using defaults");
                Self::default()
            }

            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = Self::substitute_env_vars(content)?;

        toml::from_str(&processed).map_err(|e| config_error(format!("TOML parsing error: {}", e)))
    }

    /// Replaces `${VAR}` with the value of the environment variable, leaving
    /// unknown variables untouched.
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| config_error(e.to_string()))?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.into_owned())
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.service_url)
            .map_err(|e| config_error(format!("service_url {}: {}", self.service_url, e)))?;

        for (field, value) in [
            ("connection_timeout_ms", self.connection_timeout_ms),
            ("receive_timeout_ms", self.receive_timeout_ms),
            ("resolution_deadline_ms", self.resolution_deadline_ms),
        ] {
            if value == 0 {
                return Err(config_error(format!("{} must be positive", field)));
            }
        }

        self.header_phase()?;
        Ok(())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn resolution_deadline(&self) -> Duration {
        Duration::from_millis(self.resolution_deadline_ms)
    }

    /// `wsdl_url` when set and not blank.
    pub fn explicit_wsdl_url(&self) -> Option<&str> {
        self.wsdl_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// The definition published by the service itself.
    pub fn service_wsdl_url(&self) -> String {
        format!("{}?wsdl", self.service_url)
    }

    pub fn security_mode(&self) -> SecurityMode {
        self.security.mode.into()
    }

    pub fn header_phase(&self) -> Result<Phase> {
        match &self.security.phase {
            Some(phase) => phase
                .parse()
                .map_err(|e: soapgate_util::interceptor::UnknownPhase| config_error(e.to_string())),
            None => Ok(self.security_mode().default_phase()),
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.security.username.clone(),
            password: self.security.password.clone(),
            client_id: self.security.client_id.clone(),
            alternate_authentication: self.security.alternate_authentication,
            change_password: self.security.change_password,
        }
    }
}
