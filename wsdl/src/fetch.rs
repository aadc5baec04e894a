//! Retrieval of single XML documents, with a per-run cache and visited set.

use bytes::{Buf, Bytes};
use reqwest::{
    blocking::Client,
    header::{ACCEPT, USER_AGENT},
};
use std::{
    collections::{HashMap, HashSet},
    io::Write,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;
use xmltree::{EmitterConfig, Element};

use crate::location;

const CLIENT_USER_AGENT: &str = "soapgate WSDL client";
const ACCEPTED_TYPES: &str = "text/xml, application/xml";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Unable to open file {0}")]
    FileOpenError(PathBuf, #[source] std::io::Error),

    #[error("Unable to convert {0} to a file path")]
    PathConversionError(String),

    #[error("Unable to get {0} from server")]
    ReqwestError(String, #[source] reqwest::Error),

    #[error("Unsupported URL scheme {0}")]
    UnsupportedScheme(String),

    #[error("Error parsing XML document {0}")]
    XmlParseError(String, #[source] xmltree::ParseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
        }
    }
}

impl FetchOptions {
    /// Short timeouts used by reachability probes.
    pub fn probe() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
        }
    }
}

/// A parsed XML tree together with the location it was fetched from.
#[derive(Debug, Clone)]
pub struct Document {
    location: Url,
    root: Element,
}

impl Document {
    pub fn new(location: Url, root: Element) -> Self {
        Self { location, root }
    }

    pub fn parse<B: Buf>(location: Url, bytes: B) -> Result<Self, FetchError> {
        let root = Element::parse(bytes.reader())
            .map_err(|err| FetchError::XmlParseError(location.to_string(), err))?;

        Ok(Self::new(location, root))
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn write<W: Write>(&self, writer: W) -> Result<(), xmltree::Error> {
        self.root
            .write_with_config(writer, EmitterConfig::new().perform_indent(true))
    }
}

/// Fetches documents for a single resolution run.
///
/// The cache is keyed by the exact location string and a hit hands back the
/// tree parsed earlier. A location is only marked visited once its document
/// has been fetched and parsed successfully.
#[derive(Debug)]
pub struct Fetcher {
    options: FetchOptions,
    client: Option<Client>,
    cache: HashMap<String, Arc<Document>>,
    visited: Vec<String>,
    visited_index: HashSet<String>,
}

impl Fetcher {
    pub fn new(options: FetchOptions) -> Self {
        Self {
            options,
            client: None,
            cache: HashMap::new(),
            visited: Vec::new(),
            visited_index: HashSet::new(),
        }
    }

    pub fn fetch(&mut self, location: &Url) -> Result<Arc<Document>, FetchError> {
        if let Some(document) = self.cache.get(location.as_str()) {
            return Ok(Arc::clone(document));
        }

        info!(%location, "fetching document");
        let bytes = self.load(location)?;
        let document = Arc::new(Document::parse(location.clone(), bytes)?);

        self.cache
            .insert(location.to_string(), Arc::clone(&document));
        if self.visited_index.insert(location.to_string()) {
            self.visited.push(location.to_string());
        }

        debug!(%location, "document fetched");
        Ok(document)
    }

    /// Checks whether a location can be read at all, using short timeouts.
    pub fn is_accessible(location: &str) -> bool {
        let url = match location::to_url(location) {
            Ok(url) => url,
            Err(err) => {
                debug!(location, error = %err, "location is not accessible");
                return false;
            }
        };

        match load(&url, &FetchOptions::probe()) {
            Ok(_) => true,
            Err(err) => {
                debug!(location, error = %err, "location is not accessible");
                false
            }
        }
    }

    pub fn is_visited(&self, location: &Url) -> bool {
        self.visited_index.contains(location.as_str())
    }

    /// Locations fetched so far, in fetch order.
    pub fn visited(&self) -> &[String] {
        &self.visited
    }

    pub fn into_visited(self) -> Vec<String> {
        self.visited
    }

    fn load(&mut self, location: &Url) -> Result<Bytes, FetchError> {
        match location.scheme() {
            "http" | "https" => {
                let client = match self.client.take() {
                    Some(client) => client,
                    None => build_client(&self.options, location)?,
                };

                let bytes = get(&client, location);
                self.client = Some(client);
                bytes
            }

            _ => load(location, &self.options),
        }
    }
}

/// Reads the raw bytes behind a location without touching any cache.
pub fn load(location: &Url, options: &FetchOptions) -> Result<Bytes, FetchError> {
    match location.scheme() {
        "file" => {
            let path = location
                .to_file_path()
                .map_err(|()| FetchError::PathConversionError(location.to_string()))?;

            std::fs::read(&path)
                .map(Bytes::from)
                .map_err(|err| FetchError::FileOpenError(path, err))
        }

        "http" | "https" => get(&build_client(options, location)?, location),

        other => Err(FetchError::UnsupportedScheme(other.into())),
    }
}

fn build_client(options: &FetchOptions, location: &Url) -> Result<Client, FetchError> {
    Client::builder()
        .connect_timeout(options.connect_timeout)
        .timeout(options.read_timeout)
        .build()
        .map_err(|err| FetchError::ReqwestError(location.to_string(), err))
}

fn get(client: &Client, location: &Url) -> Result<Bytes, FetchError> {
    client
        .get(location.clone())
        .header(USER_AGENT, CLIENT_USER_AGENT)
        .header(ACCEPT, ACCEPTED_TYPES)
        .send()
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.bytes())
        .map_err(|err| FetchError::ReqwestError(location.to_string(), err))
}
