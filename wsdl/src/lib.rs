use bytes::Buf;

mod parser;

pub mod catalog;
pub mod error;
pub mod fetch;
pub mod location;
pub mod resolver;
pub mod types;

pub use catalog::{Catalog, OperationDescriptor, ParameterDescriptor};
pub use resolver::{Resolution, ResolutionReport, Resolver};

/// Parses the definition at a URL or local path.
pub fn parse<S: AsRef<str>>(location: S) -> Result<types::Definition, error::Error> {
    let url = location::to_url(location.as_ref())?;
    let bytes = fetch::load(&url, &fetch::FetchOptions::default())?;

    parse_bytes(bytes.chunk())
}

pub fn parse_bytes(bytes: &[u8]) -> Result<types::Definition, error::Error> {
    parser::parse(bytes)
}
