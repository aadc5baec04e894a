use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    pub namespace: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub name: String,
    pub type_name: Option<QualifiedName>,
    pub element: Option<QualifiedName>,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub name: QualifiedName,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub name: String,
    pub input: Option<QualifiedName>,
    pub output: Option<QualifiedName>,
}

#[derive(Debug, Clone)]
pub struct PortType {
    pub name: QualifiedName,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone)]
pub struct BindingOperation {
    pub name: String,
    pub action: Option<String>,
    pub style: Option<String>,
    pub input: Option<String>,
    pub output: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub name: QualifiedName,
    pub ty: QualifiedName,
    pub transport: Option<String>,
    pub style: Option<String>,
    pub operations: Vec<BindingOperation>,
}

#[derive(Debug, Clone)]
pub struct Port {
    pub name: String,
    pub binding: QualifiedName,
    pub location: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Service {
    pub name: QualifiedName,
    pub ports: Vec<Port>,
}

#[derive(Default, Debug, Clone)]
pub struct Definition {
    pub target_namespace: Option<String>,
    pub messages: Vec<Message>,
    pub port_types: Vec<PortType>,
    pub bindings: Vec<Binding>,
    pub services: Vec<Service>,
}

impl QualifiedName {
    pub fn new(namespace: Option<String>, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self::new(None, name)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{{{}}}{}", namespace, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl Definition {
    /// Looks a message up by qualified name, falling back to the local name.
    ///
    /// Constructs merged from imported documents keep the prefixes of their
    /// source document, so their references may carry a namespace other than
    /// the consolidated target namespace.
    pub fn message(&self, name: &QualifiedName) -> Option<&Message> {
        self.messages
            .iter()
            .find(|message| message.name == *name)
            .or_else(|| {
                self.messages
                    .iter()
                    .find(|message| message.name.name == name.name)
            })
    }

    /// Address of the first SOAP port declared by any service.
    pub fn endpoint(&self) -> Option<&str> {
        self.services
            .iter()
            .flat_map(|service| service.ports.iter())
            .find_map(|port| port.location.as_deref())
    }

    pub fn binding_operation(&self, operation: &str) -> Option<&BindingOperation> {
        self.bindings
            .iter()
            .flat_map(|binding| binding.operations.iter())
            .find(|candidate| candidate.name == operation)
    }
}
