use httpmock::prelude::*;
use serde_json::{json, Value};
use soapgate::{
    transport::{OperationSource, Transport, TransportError, TransportFactory},
    Adapter, AdapterState, BridgeConfig, BridgeError, ParamBag, DEFAULT_OPERATIONS,
};
use soapgate_util::value::Argument;
use soapgate_wsdl::types::Definition;
use std::{
    fs,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use tempfile::TempDir;

type Calls = Arc<Mutex<Vec<(String, Vec<Argument>)>>>;

fn definition(endpoint: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<wsdl:definitions xmlns:wsdl="http://schemas.xmlsoap.org/wsdl/"
                  xmlns:soap="http://schemas.xmlsoap.org/wsdl/soap/"
                  xmlns:s="http://www.w3.org/2001/XMLSchema"
                  xmlns:tns="http://tempuri.org/"
                  targetNamespace="http://tempuri.org/">
  <wsdl:message name="AddSoapIn">
    <wsdl:part name="amount" type="s:int"/>
    <wsdl:part name="note" type="s:string"/>
  </wsdl:message>
  <wsdl:message name="AddSoapOut">
    <wsdl:part name="AddResult" type="s:string"/>
  </wsdl:message>
  <wsdl:message name="PingSoapIn"/>
  <wsdl:message name="PingSoapOut"/>
  <wsdl:portType name="ServiceSoap">
    <wsdl:operation name="Add">
      <wsdl:input message="tns:AddSoapIn"/>
      <wsdl:output message="tns:AddSoapOut"/>
    </wsdl:operation>
    <wsdl:operation name="Ping">
      <wsdl:input message="tns:PingSoapIn"/>
      <wsdl:output message="tns:PingSoapOut"/>
    </wsdl:operation>
  </wsdl:portType>
  <wsdl:binding name="ServiceSoap" type="tns:ServiceSoap">
    <soap:binding transport="http://schemas.xmlsoap.org/soap/http" style="document"/>
    <wsdl:operation name="Add">
      <soap:operation soapAction="http://tempuri.org/Add"/>
    </wsdl:operation>
    <wsdl:operation name="Ping">
      <soap:operation soapAction="http://tempuri.org/Ping"/>
    </wsdl:operation>
  </wsdl:binding>
  <wsdl:service name="Service">
    <wsdl:port name="ServiceSoap" binding="tns:ServiceSoap">
      <soap:address location="{}"/>
    </wsdl:port>
  </wsdl:service>
</wsdl:definitions>"#,
        endpoint
    )
}

struct RecordingTransport {
    names: Vec<String>,
    calls: Calls,
    failing: bool,
}

impl OperationSource for RecordingTransport {
    fn operation_names(&self) -> Vec<String> {
        self.names.clone()
    }
}

impl Transport for RecordingTransport {
    fn invoke(
        &self,
        operation: &str,
        arguments: &[Argument],
    ) -> Result<Vec<(String, Value)>, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((operation.to_owned(), arguments.to_vec()));

        if self.failing {
            return Err(TransportError::Unavailable("connection reset".into()));
        }

        Ok(match operation {
            "Add" => vec![("AddResult".into(), json!("5"))],
            _ => Vec::new(),
        })
    }
}

#[derive(Default)]
struct RecordingFactory {
    calls: Calls,
    connects: Arc<AtomicUsize>,
    fallback_names: Vec<String>,
    failing_transport: bool,
    refuse: bool,
}

impl TransportFactory for RecordingFactory {
    fn connect(
        &self,
        _source: &str,
        definition: Option<&Definition>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        if self.refuse {
            return Err(TransportError::Unavailable("refused".into()));
        }

        let names = match definition {
            Some(_) => Vec::new(),
            None => self.fallback_names.clone(),
        };

        Ok(Box::new(RecordingTransport {
            names,
            calls: self.calls.clone(),
            failing: self.failing_transport,
        }))
    }
}

fn config(dir: &Path) -> BridgeConfig {
    BridgeConfig {
        service_url: "http://127.0.0.1:1/Service.asmx".into(),
        wsdl_path: Some(dir.join("service.wsdl").display().to_string()),
        artifact_dir: dir.join("artifacts"),
        connection_timeout_ms: 1_000,
        receive_timeout_ms: 1_000,
        ..Default::default()
    }
}

fn with_local_definition() -> (TempDir, BridgeConfig) {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("service.wsdl"),
        definition("http://127.0.0.1:1/Service.asmx"),
    )
    .unwrap();

    let config = config(dir.path());
    (dir, config)
}

fn bag(value: Value) -> ParamBag {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {}", other),
    }
}

#[test]
fn degrades_to_defaults_without_a_source() {
    let dir = tempfile::tempdir().unwrap();
    let factory = RecordingFactory::default();
    let connects = factory.connects.clone();

    let adapter = Adapter::with_factory(config(dir.path()), Box::new(factory));
    assert_eq!(adapter.initialize(), AdapterState::DegradedDefaults);

    assert_eq!(adapter.operation_names(), DEFAULT_OPERATIONS);
    assert_eq!(connects.load(Ordering::SeqCst), 0);
    assert!(matches!(
        adapter.invoke("Ping", &ParamBag::new()),
        Err(BridgeError::NotInitialized)
    ));
    assert!(!adapter.is_healthy());

    let info = adapter.service_info();
    assert!(!info.client_initialized);
    assert_eq!(info.wsdl_source, None);
    assert_eq!(info.available_methods_count, 3);
}

#[test]
fn binds_and_normalizes_calls() {
    let (dir, config) = with_local_definition();
    let factory = RecordingFactory::default();
    let calls = factory.calls.clone();

    let adapter = Adapter::with_factory(config, Box::new(factory));
    assert_eq!(adapter.initialize(), AdapterState::Ready);
    assert_eq!(adapter.operation_names(), ["Add", "Ping"]);

    let result = adapter
        .invoke("add", &bag(json!({ "Amount": "5", "Note": "hi" })))
        .unwrap();

    assert_eq!(Value::Object(result), json!({ "success": true, "data": "5" }));
    assert_eq!(
        calls.lock().unwrap()[0],
        (
            "Add".to_owned(),
            vec![Argument::Int(5), Argument::String("hi".into())]
        )
    );

    let info = adapter.service_info();
    assert_eq!(info.state, AdapterState::Ready);
    assert!(info.client_initialized);
    assert_eq!(
        info.wsdl_source.as_deref(),
        Some(dir.path().join("service.wsdl").display().to_string().as_str())
    );

    assert_eq!(adapter.cleanup_artifacts().unwrap(), 1);
}

#[test]
fn missing_parameters_still_reach_the_service() {
    let (_dir, config) = with_local_definition();
    let factory = RecordingFactory::default();
    let calls = factory.calls.clone();

    let adapter = Adapter::with_factory(config, Box::new(factory));
    adapter.initialize();

    adapter.invoke("Add", &bag(json!({ "amount": 2 }))).unwrap();
    assert_eq!(
        calls.lock().unwrap()[0].1,
        [Argument::Int(2), Argument::Null]
    );
}

#[test]
fn transport_failures_name_the_operation() {
    let (_dir, config) = with_local_definition();
    let factory = RecordingFactory {
        failing_transport: true,
        ..Default::default()
    };

    let adapter = Adapter::with_factory(config, Box::new(factory));
    adapter.initialize();

    match adapter.invoke("Add", &ParamBag::new()) {
        Err(BridgeError::ServiceInvocation { operation, message }) => {
            assert_eq!(operation, "Add");
            assert!(message.contains("connection reset"));
        }
        other => panic!("expected invocation error, got {:?}", other),
    }

    assert!(!adapter.is_healthy());
}

#[test]
fn health_check_pings_the_service() {
    let (_dir, config) = with_local_definition();
    let factory = RecordingFactory::default();
    let calls = factory.calls.clone();

    let adapter = Adapter::with_factory(config, Box::new(factory));
    adapter.initialize();

    assert!(adapter.is_healthy());
    assert_eq!(calls.lock().unwrap()[0], ("Ping".to_owned(), Vec::new()));
}

#[test]
fn reinitialize_swaps_the_snapshot() {
    let (dir, config) = with_local_definition();
    let adapter = Adapter::with_factory(config, Box::new(RecordingFactory::default()));

    assert_eq!(adapter.initialize(), AdapterState::Ready);
    assert_eq!(adapter.reinitialize(), AdapterState::Ready);
    assert_eq!(adapter.operation_names(), ["Add", "Ping"]);

    let in_flight = adapter.snapshot();
    fs::remove_file(dir.path().join("service.wsdl")).unwrap();

    assert_eq!(adapter.reinitialize(), AdapterState::DegradedDefaults);
    assert_eq!(adapter.operation_names(), DEFAULT_OPERATIONS);

    assert_eq!(in_flight.state(), AdapterState::Ready);
    assert_eq!(in_flight.operations(), ["Add", "Ping"]);
}

#[test]
fn refused_connections_degrade() {
    let (_dir, config) = with_local_definition();
    let factory = RecordingFactory {
        refuse: true,
        ..Default::default()
    };

    let adapter = Adapter::with_factory(config, Box::new(factory));
    assert_eq!(adapter.initialize(), AdapterState::DegradedDefaults);
    assert!(!adapter.snapshot().has_transport());
}

#[test]
fn unparseable_definitions_fall_back_to_the_transport() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("service.wsdl"), "<html><body/></html>").unwrap();

    let factory = RecordingFactory {
        fallback_names: vec!["Lookup".into()],
        ..Default::default()
    };
    let calls = factory.calls.clone();

    let adapter = Adapter::with_factory(config(dir.path()), Box::new(factory));
    assert_eq!(adapter.initialize(), AdapterState::Ready);
    assert_eq!(adapter.operation_names(), ["Lookup"]);

    adapter
        .invoke("Lookup", &bag(json!({ "b": 1, "a": "two" })))
        .unwrap();
    assert_eq!(
        calls.lock().unwrap()[0].1,
        [Argument::Value(json!(1)), Argument::Value(json!("two"))]
    );
}

#[test]
fn unreachable_wsdl_url_is_used_as_is() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.wsdl_url = Some("http://127.0.0.1:1/Service.asmx?wsdl".into());

    let factory = RecordingFactory::default();
    let connects = factory.connects.clone();

    let adapter = Adapter::with_factory(config, Box::new(factory));
    assert_eq!(adapter.initialize(), AdapterState::DegradedDefaults);

    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert_eq!(
        adapter.service_info().wsdl_source.as_deref(),
        Some("http://127.0.0.1:1/Service.asmx?wsdl")
    );
}

#[test]
fn calls_the_published_service_with_vendor_headers() {
    let server = MockServer::start();
    let endpoint = server.url("/Service.asmx");

    server.mock(|when, then| {
        when.method(GET).path("/Service.asmx");
        then.status(200)
            .header("Content-Type", "text/xml")
            .body(definition(&endpoint));
    });

    let call = server.mock(|when, then| {
        when.method(POST)
            .path("/Service.asmx")
            .header("SOAPAction", "\"http://tempuri.org/Add\"")
            .body_contains("<pfs:PfsUserName>svc</pfs:PfsUserName>")
            .body_contains("<pfs:PfsClientID>DEFAULT</pfs:PfsClientID>")
            .body_contains(r#"<Add xmlns="http://tempuri.org/"><amount>5</amount><note>hi</note></Add>"#);
        then.status(200).body(
            r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
                 <soap:Body>
                   <AddResponse xmlns="http://tempuri.org/"><AddResult>7</AddResult></AddResponse>
                 </soap:Body>
               </soap:Envelope>"#,
        );
    });

    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.service_url = endpoint.clone();
    config.wsdl_path = None;
    config.security.enabled = true;
    config.security.username = "svc".into();
    config.security.password = "secret".into();

    let adapter = Adapter::new(config);
    assert_eq!(adapter.initialize(), AdapterState::Ready);
    assert_eq!(
        adapter.service_info().wsdl_source,
        Some(format!("{}?wsdl", endpoint))
    );

    let result = adapter
        .invoke("Add", &bag(json!({ "amount": 5, "note": "hi" })))
        .unwrap();

    call.assert();
    assert_eq!(Value::Object(result), json!({ "success": true, "data": "7" }));
}
