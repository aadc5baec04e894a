//! Consolidation of a WSDL document and everything it references into a
//! single self-contained definition.
//!
//! WSDL level `import`s are merged: their `message`, `portType`, `binding`
//! and `service` elements are appended to the root definition. Schema level
//! `import`s and `include`s are inlined into the nearest enclosing `schema`
//! element. A reference that cannot be followed is left where it is and
//! reported, only a failure to load the root document is fatal.

use std::{
    fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;
use xmltree::{Element, XMLNode};

use crate::{
    error::LocationError,
    fetch::{Document, FetchError, FetchOptions, Fetcher},
    location,
};

pub const WSDL_NS: &str = "http://schemas.xmlsoap.org/wsdl/";
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema";

pub const ARTIFACT_PREFIX: &str = "resolved-wsdl-";
pub const ARTIFACT_SUFFIX: &str = ".wsdl";

/// Schemas inlined into an imported document live in its `types`, so they
/// travel with the other constructs.
const MERGED_CONSTRUCTS: [&str; 5] = ["types", "message", "portType", "binding", "service"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    WsdlImport,
    SchemaImport,
    SchemaInclude,
}

#[derive(Debug, Error)]
pub enum SkipReason {
    #[error("Unable to fetch referenced document")]
    Fetch(#[from] FetchError),

    #[error("Unable to resolve reference location")]
    Location(#[from] LocationError),

    #[error("Reference is not enclosed by a schema element")]
    NoEnclosingSchema,
}

#[derive(Debug)]
pub enum ReferenceOutcome {
    /// Top level WSDL constructs appended to the root definition.
    Merged { constructs: usize },

    /// Schema children appended to the enclosing schema.
    Inlined { elements: usize },

    /// The location was already fetched earlier in the run, the reference
    /// was dropped without fetching it again.
    AlreadyResolved,

    /// The reference was left in the document.
    Skipped(SkipReason),
}

#[derive(Debug)]
pub struct ReferenceReport {
    pub kind: ReferenceKind,
    pub base: Url,
    pub location: String,
    pub outcome: ReferenceOutcome,
}

#[derive(Debug)]
pub struct ResolutionReport {
    pub root: Url,

    /// Every distinct location fetched, in fetch order.
    pub visited: Vec<String>,

    /// One entry per reference encountered, in processing order.
    pub references: Vec<ReferenceReport>,
}

#[derive(Debug)]
pub struct Resolution {
    pub artifact: PathBuf,
    pub report: ResolutionReport,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Invalid root location")]
    Location(#[from] LocationError),

    #[error("Unable to load root document")]
    Root(#[source] FetchError),

    #[error("Unable to write resolved definition to {path}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to serialize resolved definition")]
    Serialize(#[from] xmltree::Error),
}

#[derive(Debug, Clone)]
pub struct Resolver {
    artifact_dir: PathBuf,
    options: FetchOptions,
}

enum Followed {
    Document(Url, Element),
    AlreadyResolved(Url),
    Skipped(String, SkipReason),
}

/// State for one top level resolution. Never shared between calls.
struct Run {
    fetcher: Fetcher,
    references: Vec<ReferenceReport>,
}

impl ResolutionReport {
    pub fn skipped(&self) -> impl Iterator<Item = &ReferenceReport> {
        self.references
            .iter()
            .filter(|reference| matches!(reference.outcome, ReferenceOutcome::Skipped(_)))
    }

    pub fn is_complete(&self) -> bool {
        self.skipped().next().is_none()
    }
}

impl Resolution {
    pub fn location(&self) -> String {
        self.artifact.display().to_string()
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(Self::default_artifact_dir())
    }
}

impl Resolver {
    pub fn new(artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
            options: FetchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn default_artifact_dir() -> PathBuf {
        std::env::temp_dir().join("wsdl-resolver")
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Resolves the document at `location` and persists the result as a new
    /// artifact.
    pub fn resolve(&self, location: &str) -> Result<Resolution, ResolveError> {
        let root = location::to_url(location)?;
        info!(%root, "resolving definition");

        let (document, report) = self.resolve_document(&root)?;
        let artifact = self.persist(&document)?;

        let skipped = report.skipped().count();
        if skipped > 0 {
            warn!(%root, skipped, "some references could not be resolved");
        }

        info!(
            %root,
            artifact = %artifact.display(),
            documents = report.visited.len(),
            "definition resolved"
        );

        Ok(Resolution { artifact, report })
    }

    /// Resolves the document at `root` in memory.
    pub fn resolve_document(
        &self,
        root: &Url,
    ) -> Result<(Document, ResolutionReport), ResolveError> {
        let mut run = Run {
            fetcher: Fetcher::new(self.options),
            references: Vec::new(),
        };

        let document = run.fetcher.fetch(root).map_err(ResolveError::Root)?;
        let mut working = document.root().clone();
        run.resolve_references(root, &mut working);

        let report = ResolutionReport {
            root: root.clone(),
            visited: run.fetcher.into_visited(),
            references: run.references,
        };

        Ok((Document::new(root.clone(), working), report))
    }

    /// Writes `document` to a freshly named file in the artifact directory.
    pub fn persist(&self, document: &Document) -> Result<PathBuf, ResolveError> {
        fs::create_dir_all(&self.artifact_dir).map_err(artifact_error(&self.artifact_dir))?;

        let file = tempfile::Builder::new()
            .prefix(ARTIFACT_PREFIX)
            .suffix(ARTIFACT_SUFFIX)
            .tempfile_in(&self.artifact_dir)
            .map_err(artifact_error(&self.artifact_dir))?;

        let mut writer = BufWriter::new(file.as_file());
        document.write(&mut writer)?;
        writer.flush().map_err(artifact_error(file.path()))?;
        drop(writer);

        let (_, path) = file.keep().map_err(|err| ResolveError::Artifact {
            path: err.file.path().to_path_buf(),
            source: err.error,
        })?;

        Ok(path)
    }

    /// Removes every artifact previously written to the artifact directory.
    pub fn cleanup_artifacts(&self) -> io::Result<usize> {
        let entries = match fs::read_dir(&self.artifact_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if !(name.starts_with(ARTIFACT_PREFIX) && name.ends_with(ARTIFACT_SUFFIX)) {
                continue;
            }

            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(err) => warn!(path = %entry.path().display(), error = %err, "unable to remove artifact"),
            }
        }

        info!(removed, dir = %self.artifact_dir.display(), "artifacts cleaned up");
        Ok(removed)
    }
}

impl Run {
    fn resolve_references(&mut self, base: &Url, root: &mut Element) {
        self.merge_wsdl_imports(base, root);

        let pending = self.inline_schema_references(base, root, false);
        root.children.extend(pending);
    }

    fn merge_wsdl_imports(&mut self, base: &Url, root: &mut Element) {
        let mut merged = Vec::new();
        let mut index = 0;

        while index < root.children.len() {
            let reference = match &root.children[index] {
                XMLNode::Element(child) if is_named(child, WSDL_NS, "import") => {
                    reference_location(child, "location")
                }
                _ => None,
            };

            let reference = match reference {
                Some(reference) => reference,
                None => {
                    index += 1;
                    continue;
                }
            };

            match self.follow(base, &reference) {
                Followed::Document(location, imported) => {
                    let constructs = wsdl_constructs(imported);
                    info!(%location, constructs = constructs.len(), "merged WSDL import");

                    self.record(
                        ReferenceKind::WsdlImport,
                        base,
                        location.into(),
                        ReferenceOutcome::Merged {
                            constructs: constructs.len(),
                        },
                    );

                    merged.extend(constructs);
                    root.children.remove(index);
                }

                Followed::AlreadyResolved(location) => {
                    self.record(
                        ReferenceKind::WsdlImport,
                        base,
                        location.into(),
                        ReferenceOutcome::AlreadyResolved,
                    );
                    root.children.remove(index);
                }

                Followed::Skipped(location, reason) => {
                    warn!(%location, error = %reason, "unable to import WSDL");
                    self.record(
                        ReferenceKind::WsdlImport,
                        base,
                        location,
                        ReferenceOutcome::Skipped(reason),
                    );
                    index += 1;
                }
            }
        }

        root.children.extend(merged);
    }

    /// Inlines schema references found under `element`.
    ///
    /// Nodes inlined below `element` that still need an enclosing schema are
    /// returned to the caller, to be appended to the nearest ancestor schema.
    fn inline_schema_references(
        &mut self,
        base: &Url,
        element: &mut Element,
        within_schema: bool,
    ) -> Vec<XMLNode> {
        let is_schema = is_named(element, XSD_NS, "schema");
        let within_schema = within_schema || is_schema;

        let mut pending = Vec::new();
        let mut index = 0;

        while index < element.children.len() {
            let child = match &mut element.children[index] {
                XMLNode::Element(child) => child,
                _ => {
                    index += 1;
                    continue;
                }
            };

            let kind = match schema_reference_kind(child) {
                Some(kind) => kind,
                None => {
                    pending.extend(self.inline_schema_references(base, child, within_schema));
                    index += 1;
                    continue;
                }
            };

            let reference = match reference_location(child, "schemaLocation") {
                Some(reference) => reference,
                None => {
                    index += 1;
                    continue;
                }
            };

            if !within_schema {
                warn!(%reference, "schema reference outside of a schema element, leaving it in place");
                self.record(
                    kind,
                    base,
                    reference,
                    ReferenceOutcome::Skipped(SkipReason::NoEnclosingSchema),
                );
                index += 1;
                continue;
            }

            match self.follow(base, &reference) {
                Followed::Document(location, schema) => {
                    let inlined: Vec<XMLNode> = schema
                        .children
                        .into_iter()
                        .filter(|node| matches!(node, XMLNode::Element(_)))
                        .collect();

                    info!(%location, elements = inlined.len(), "inlined schema");
                    self.record(
                        kind,
                        base,
                        location.into(),
                        ReferenceOutcome::Inlined {
                            elements: inlined.len(),
                        },
                    );

                    pending.extend(inlined);
                    element.children.remove(index);
                }

                Followed::AlreadyResolved(location) => {
                    self.record(
                        kind,
                        base,
                        location.into(),
                        ReferenceOutcome::AlreadyResolved,
                    );
                    element.children.remove(index);
                }

                Followed::Skipped(location, reason) => {
                    warn!(%location, error = %reason, "unable to inline schema");
                    self.record(kind, base, location, ReferenceOutcome::Skipped(reason));
                    index += 1;
                }
            }
        }

        if is_schema {
            element.children.extend(pending);
            Vec::new()
        } else {
            pending
        }
    }

    /// Fetches the referenced document and resolves its own references,
    /// using its location as the new base.
    fn follow(&mut self, base: &Url, reference: &str) -> Followed {
        let location = match location::join(base, reference) {
            Ok(location) => location,
            Err(err) => return Followed::Skipped(reference.to_owned(), err.into()),
        };

        if self.fetcher.is_visited(&location) {
            return Followed::AlreadyResolved(location);
        }

        let document = match self.fetcher.fetch(&location) {
            Ok(document) => document,
            Err(err) => return Followed::Skipped(location.into(), err.into()),
        };

        let mut root = document.root().clone();
        self.resolve_references(&location, &mut root);

        Followed::Document(location, root)
    }

    fn record(
        &mut self,
        kind: ReferenceKind,
        base: &Url,
        location: String,
        outcome: ReferenceOutcome,
    ) {
        self.references.push(ReferenceReport {
            kind,
            base: base.clone(),
            location,
            outcome,
        });
    }
}

fn artifact_error(path: &Path) -> impl FnOnce(io::Error) -> ResolveError {
    let path = path.to_path_buf();
    move |source| ResolveError::Artifact { path, source }
}

fn is_named(element: &Element, namespace: &str, name: &str) -> bool {
    element.name == name && element.namespace.as_deref() == Some(namespace)
}

fn schema_reference_kind(element: &Element) -> Option<ReferenceKind> {
    if is_named(element, XSD_NS, "import") {
        Some(ReferenceKind::SchemaImport)
    } else if is_named(element, XSD_NS, "include") {
        Some(ReferenceKind::SchemaInclude)
    } else {
        None
    }
}

fn reference_location(element: &Element, attribute: &str) -> Option<String> {
    element
        .attributes
        .get(attribute)
        .map(|location| location.trim())
        .filter(|location| !location.is_empty())
        .map(str::to_owned)
}

fn wsdl_constructs(root: Element) -> Vec<XMLNode> {
    root.children
        .into_iter()
        .filter(|node| match node {
            XMLNode::Element(element) => MERGED_CONSTRUCTS
                .iter()
                .any(|name| is_named(element, WSDL_NS, name)),
            _ => false,
        })
        .collect()
}
