use thiserror::Error;

use crate::fetch::FetchError;

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("Unable to parse provided URL")]
    UrlParseError(#[from] url::ParseError),

    #[error("Unable to convert provided path {0}")]
    PathConversionError(String, Option<std::io::Error>),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid definition location")]
    LocationError(#[from] LocationError),

    #[error("Unable to load definition")]
    FetchError(#[from] FetchError),

    #[error("Error parsing XML input")]
    XmlParseError(#[from] quick_xml::Error),

    #[error("Expected a WSDL definitions element, found <{0}>")]
    UnexpectedRoot(String),

    #[error("Element <{element}> is missing required attribute `{attribute}`")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },
}
