//! Conversion of user supplied locations (URLs or filesystem paths) into
//! absolute URLs, and resolution of references relative to a document.

use std::path::Path;
use url::Url;

use crate::error::LocationError;

/// Turns a URL or a local path into an absolute URL.
///
/// Relative paths are canonicalized against the working directory, so the
/// file has to exist.
pub fn to_url(location: &str) -> Result<Url, LocationError> {
    match Url::parse(location) {
        // `C:\defs\service.wsdl` parses as a URL with a one letter scheme
        Ok(url) if url.scheme().len() == 1 => from_path(location),
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => from_path(location),
        Err(err) => Err(err.into()),
    }
}

/// Resolves `reference` against the location of the document containing it.
pub fn join(base: &Url, reference: &str) -> Result<Url, LocationError> {
    Ok(base.join(reference.trim())?)
}

fn from_path(location: &str) -> Result<Url, LocationError> {
    let path = Path::new(location)
        .canonicalize()
        .map_err(|err| LocationError::PathConversionError(location.to_owned(), Some(err)))?;

    Url::from_file_path(&path)
        .map_err(|()| LocationError::PathConversionError(location.to_owned(), None))
}
