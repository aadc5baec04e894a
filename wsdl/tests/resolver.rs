use httpmock::prelude::*;
use soapgate_wsdl::{
    catalog::Catalog,
    fetch::Document,
    resolver::{ReferenceKind, ReferenceOutcome, ResolveError, Resolver, SkipReason},
};
use std::{fs, path::Path};
use tempfile::TempDir;
use url::Url;
use xmltree::{Element, XMLNode};

fn definitions(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<wsdl:definitions xmlns:wsdl="http://schemas.xmlsoap.org/wsdl/"
                  xmlns:xs="http://www.w3.org/2001/XMLSchema"
                  xmlns:tns="urn:test"
                  targetNamespace="urn:test">
{}
</wsdl:definitions>"#,
        body
    )
}

fn schema(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" targetNamespace="urn:test">
{}
</xs:schema>"#,
        body
    )
}

fn write(dir: &Path, name: &str, contents: &str) -> Url {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    Url::from_file_path(path).unwrap()
}

fn children<'a>(element: &'a Element, name: &'a str) -> impl Iterator<Item = &'a Element> {
    element.children.iter().filter_map(move |node| match node {
        XMLNode::Element(child) if child.name == name => Some(child),
        _ => None,
    })
}

fn named<'a>(element: &'a Element, name: &'a str) -> Vec<&'a str> {
    children(element, name)
        .filter_map(|child| child.attributes.get("name").map(String::as_str))
        .collect()
}

fn count_descendants(element: &Element, name: &str) -> usize {
    element
        .children
        .iter()
        .map(|node| match node {
            XMLNode::Element(child) => {
                usize::from(child.name == name) + count_descendants(child, name)
            }
            _ => 0,
        })
        .sum()
}

fn count_named(element: &Element, local: &str, name: &str) -> usize {
    element
        .children
        .iter()
        .map(|node| match node {
            XMLNode::Element(child) => {
                let matches = child.name == local
                    && child.attributes.get("name").map(String::as_str) == Some(name);
                usize::from(matches) + count_named(child, local, name)
            }
            _ => 0,
        })
        .sum()
}

fn resolve(root: &Url) -> (Document, soapgate_wsdl::ResolutionReport) {
    Resolver::new(std::env::temp_dir())
        .resolve_document(root)
        .unwrap()
}

#[test]
fn cyclic_imports_terminate() {
    let dir = TempDir::new().unwrap();
    let a = write(
        dir.path(),
        "a.wsdl",
        &definitions(
            r#"<wsdl:import namespace="urn:test" location="b.wsdl"/>
               <wsdl:message name="FromA"/>"#,
        ),
    );
    let b = write(
        dir.path(),
        "b.wsdl",
        &definitions(
            r#"<wsdl:import namespace="urn:test" location="a.wsdl"/>
               <wsdl:message name="FromB"/>"#,
        ),
    );

    let (document, report) = resolve(&a);

    assert_eq!(report.visited, [a.to_string(), b.to_string()]);
    assert_eq!(named(document.root(), "message"), ["FromA", "FromB"]);
    assert_eq!(count_descendants(document.root(), "import"), 0);

    assert!(report.is_complete());
    assert!(report.references.iter().any(|reference| {
        reference.location == a.as_str()
            && matches!(reference.outcome, ReferenceOutcome::AlreadyResolved)
    }));
}

#[test]
fn diamond_imports_merge_once() {
    let dir = TempDir::new().unwrap();
    let root = write(
        dir.path(),
        "root.wsdl",
        &definitions(
            r#"<wsdl:import namespace="urn:test" location="left.wsdl"/>
               <wsdl:import namespace="urn:test" location="right.wsdl"/>
               <wsdl:message name="Root"/>"#,
        ),
    );

    for side in ["left", "right"] {
        write(
            dir.path(),
            &format!("{}.wsdl", side),
            &definitions(&format!(
                r#"<wsdl:import namespace="urn:test" location="shared/bottom.wsdl"/>
                   <wsdl:portType name="{}"/>"#,
                side
            )),
        );
    }

    fs::create_dir(dir.path().join("shared")).unwrap();
    write(
        dir.path(),
        "shared/bottom.wsdl",
        &definitions(
            r#"<wsdl:message name="Bottom"/>
               <wsdl:binding name="BottomBinding" type="tns:left"/>
               <wsdl:types/>"#,
        ),
    );

    let (document, report) = resolve(&root);

    assert_eq!(report.visited.len(), 4);
    assert_eq!(named(document.root(), "message"), ["Root", "Bottom"]);
    assert_eq!(named(document.root(), "portType"), ["left", "right"]);
    assert_eq!(named(document.root(), "binding"), ["BottomBinding"]);
    assert_eq!(children(document.root(), "types").count(), 1);
}

#[test]
fn schema_references_are_inlined_into_the_enclosing_schema() {
    let dir = TempDir::new().unwrap();
    let root = write(
        dir.path(),
        "service.wsdl",
        &definitions(
            r#"<wsdl:types>
                 <xs:schema targetNamespace="urn:test">
                   <xs:include schemaLocation="common.xsd"/>
                   <xs:import namespace="urn:other" schemaLocation="other.xsd"/>
                   <xs:import namespace="urn:external"/>
                   <xs:element name="Local"/>
                 </xs:schema>
               </wsdl:types>"#,
        ),
    );
    write(
        dir.path(),
        "common.xsd",
        &schema(
            r#"<xs:include schemaLocation="nested.xsd"/>
               <xs:complexType name="Money"/>
               <!-- comments are not inlined -->
               <xs:element name="Amount"/>"#,
        ),
    );
    write(dir.path(), "nested.xsd", &schema(r#"<xs:simpleType name="Code"/>"#));
    write(dir.path(), "other.xsd", &schema(r#"<xs:element name="Other"/>"#));

    let (document, report) = resolve(&root);

    let types = children(document.root(), "types").next().unwrap();
    let schema = children(types, "schema").next().unwrap();

    assert_eq!(children(schema, "include").count(), 0);
    assert_eq!(children(schema, "import").count(), 1);
    assert_eq!(named(schema, "element"), ["Local", "Amount", "Other"]);
    assert_eq!(named(schema, "complexType"), ["Money"]);
    assert_eq!(named(schema, "simpleType"), ["Code"]);

    let kinds: Vec<_> = report
        .references
        .iter()
        .map(|reference| reference.kind)
        .collect();
    assert_eq!(
        kinds,
        [
            ReferenceKind::SchemaInclude,
            ReferenceKind::SchemaInclude,
            ReferenceKind::SchemaImport
        ]
    );
    assert!(report.is_complete());
}

#[test]
fn failed_references_are_left_in_place() {
    let dir = TempDir::new().unwrap();
    let root = write(
        dir.path(),
        "service.wsdl",
        &definitions(
            r#"<wsdl:import namespace="urn:test" location="missing.wsdl"/>
               <wsdl:import namespace="urn:test" location="present.wsdl"/>
               <wsdl:types>
                 <xs:schema>
                   <xs:include schemaLocation="broken.xsd"/>
                 </xs:schema>
               </wsdl:types>"#,
        ),
    );
    write(
        dir.path(),
        "present.wsdl",
        &definitions(r#"<wsdl:message name="Present"/>"#),
    );
    write(dir.path(), "broken.xsd", "<xs:schema");

    let (document, report) = resolve(&root);

    let imports: Vec<_> = children(document.root(), "import")
        .filter_map(|import| import.attributes.get("location"))
        .collect();
    assert_eq!(imports, ["missing.wsdl"]);
    assert_eq!(named(document.root(), "message"), ["Present"]);
    assert_eq!(count_descendants(document.root(), "include"), 1);

    let skipped: Vec<_> = report.skipped().collect();
    assert_eq!(skipped.len(), 2);
    assert!(skipped.iter().all(|reference| matches!(
        reference.outcome,
        ReferenceOutcome::Skipped(SkipReason::Fetch(_))
    )));
    assert_eq!(report.visited.len(), 2);
}

#[test]
fn schema_references_outside_a_schema_are_not_followed() {
    let dir = TempDir::new().unwrap();
    let root = write(
        dir.path(),
        "service.wsdl",
        &definitions(r#"<xs:include schemaLocation="stray.xsd"/>"#),
    );
    write(dir.path(), "stray.xsd", &schema(r#"<xs:element name="Stray"/>"#));

    let (document, report) = resolve(&root);

    assert_eq!(children(document.root(), "include").count(), 1);
    assert_eq!(report.visited, [root.to_string()]);
    assert!(matches!(
        report.references[0].outcome,
        ReferenceOutcome::Skipped(SkipReason::NoEnclosingSchema)
    ));
}

#[test]
fn resolved_definition_is_persisted_and_cleaned_up() {
    let dir = TempDir::new().unwrap();
    let artifacts = dir.path().join("artifacts");

    write(
        dir.path(),
        "messages.wsdl",
        &definitions(
            r#"<wsdl:message name="EchoIn">
                 <wsdl:part name="text" type="xs:string"/>
               </wsdl:message>
               <wsdl:message name="EchoOut">
                 <wsdl:part name="result" type="xs:string"/>
               </wsdl:message>"#,
        ),
    );
    write(
        dir.path(),
        "service.wsdl",
        &definitions(
            r#"<wsdl:import namespace="urn:test" location="messages.wsdl"/>
               <wsdl:portType name="EchoPort">
                 <wsdl:operation name="Echo">
                   <wsdl:input message="tns:EchoIn"/>
                   <wsdl:output message="tns:EchoOut"/>
                 </wsdl:operation>
               </wsdl:portType>"#,
        ),
    );

    let resolver = Resolver::new(&artifacts);
    let resolution = resolver
        .resolve(dir.path().join("service.wsdl").to_str().unwrap())
        .unwrap();

    assert!(resolution.artifact.starts_with(&artifacts));
    let file_name = resolution.artifact.file_name().unwrap().to_string_lossy();
    assert!(file_name.starts_with("resolved-wsdl-"));
    assert!(file_name.ends_with(".wsdl"));

    let definition = soapgate_wsdl::parse(resolution.location()).unwrap();
    let catalog = Catalog::build(&definition);
    let echo = catalog.get("Echo").unwrap();
    assert_eq!(echo.inputs[0].name, "text");
    assert_eq!(echo.outputs[0].name, "result");

    let second = resolver
        .resolve(dir.path().join("service.wsdl").to_str().unwrap())
        .unwrap();
    assert_ne!(resolution.artifact, second.artifact);

    assert_eq!(resolver.cleanup_artifacts().unwrap(), 2);
    assert!(!resolution.artifact.exists());
}

#[test]
fn missing_root_is_fatal() {
    let dir = TempDir::new().unwrap();
    let root = Url::from_file_path(dir.path().join("absent.wsdl")).unwrap();

    assert!(matches!(
        Resolver::new(dir.path()).resolve_document(&root),
        Err(ResolveError::Root(_))
    ));
    assert!(matches!(
        Resolver::new(dir.path()).resolve("no/such/service.wsdl"),
        Err(ResolveError::Location(_))
    ));
}

#[test]
fn remote_references_are_fetched_once() {
    let server = MockServer::start();

    let root = server.mock(|when, then| {
        when.method(GET).path("/svc/service.wsdl");
        then.status(200)
            .header("content-type", "text/xml")
            .body(definitions(
                r#"<wsdl:import namespace="urn:test" location="parts.wsdl"/>
                   <wsdl:types>
                     <xs:schema>
                       <xs:include schemaLocation="types/common.xsd"/>
                     </xs:schema>
                   </wsdl:types>"#,
            ));
    });
    let parts = server.mock(|when, then| {
        when.method(GET).path("/svc/parts.wsdl");
        then.status(200).body(definitions(
            r#"<wsdl:types>
                 <xs:schema>
                   <xs:include schemaLocation="types/common.xsd"/>
                 </xs:schema>
               </wsdl:types>
               <wsdl:message name="Remote"/>"#,
        ));
    });
    let common = server.mock(|when, then| {
        when.method(GET).path("/svc/types/common.xsd");
        then.status(200)
            .body(schema(r#"<xs:element name="Common"/>"#));
    });

    let url = Url::parse(&server.url("/svc/service.wsdl")).unwrap();
    let (document, report) = resolve(&url);

    root.assert_hits(1);
    parts.assert_hits(1);
    common.assert_hits(1);

    assert_eq!(report.visited.len(), 3);
    assert_eq!(named(document.root(), "message"), ["Remote"]);
    assert_eq!(count_descendants(document.root(), "include"), 0);
    assert_eq!(count_named(document.root(), "element", "Common"), 1);
}

#[test]
fn shared_schemas_appear_once_in_the_artifact() {
    let dir = TempDir::new().unwrap();
    let root = write(
        dir.path(),
        "root.wsdl",
        &definitions(
            r#"<wsdl:import namespace="urn:test" location="parts.wsdl"/>
               <wsdl:types>
                 <xs:schema targetNamespace="urn:test">
                   <xs:include schemaLocation="common.xsd"/>
                   <xs:include schemaLocation="left.xsd"/>
                   <xs:include schemaLocation="right.xsd"/>
                 </xs:schema>
               </wsdl:types>"#,
        ),
    );
    write(
        dir.path(),
        "parts.wsdl",
        &definitions(
            r#"<wsdl:types>
                 <xs:schema targetNamespace="urn:test">
                   <xs:include schemaLocation="common.xsd"/>
                 </xs:schema>
               </wsdl:types>
               <wsdl:message name="Parts"/>"#,
        ),
    );
    write(dir.path(), "common.xsd", &schema(r#"<xs:element name="Common"/>"#));
    for side in ["left", "right"] {
        write(
            dir.path(),
            &format!("{}.xsd", side),
            &schema(&format!(
                r#"<xs:include schemaLocation="base.xsd"/>
                   <xs:element name="{}"/>"#,
                side
            )),
        );
    }
    write(dir.path(), "base.xsd", &schema(r#"<xs:element name="Base"/>"#));

    let artifacts = TempDir::new().unwrap();
    let resolution = Resolver::new(artifacts.path())
        .resolve(root.as_str())
        .unwrap();

    assert!(resolution.report.is_complete());
    assert_eq!(resolution.report.visited.len(), 6);

    let artifact = Element::parse(fs::File::open(&resolution.artifact).unwrap()).unwrap();
    assert_eq!(count_descendants(&artifact, "include"), 0);
    for name in ["Common", "Base", "left", "right"] {
        assert_eq!(count_named(&artifact, "element", name), 1, "{}", name);
    }
    assert_eq!(named(&artifact, "message"), ["Parts"]);
}

#[test]
fn remote_failures_are_skipped() {
    let server = MockServer::start();

    server.mock(|when, then| {
        when.method(GET).path("/service.wsdl");
        then.status(200).body(definitions(
            r#"<wsdl:import namespace="urn:test" location="gone.wsdl"/>"#,
        ));
    });
    server.mock(|when, then| {
        when.method(GET).path("/gone.wsdl");
        then.status(404);
    });

    let url = Url::parse(&server.url("/service.wsdl")).unwrap();
    let (document, report) = resolve(&url);

    assert_eq!(children(document.root(), "import").count(), 1);
    assert_eq!(report.skipped().count(), 1);
    assert_eq!(report.visited, [url.to_string()]);
}
