use quick_xml::{
    events::{attributes::Attributes, BytesStart, Event},
    Reader,
};
use std::{collections::HashMap, io::BufRead};
use tracing::debug;

use super::{
    error,
    types::{
        Binding, BindingOperation, Definition, Message, Operation, Part, Port, PortType,
        QualifiedName, Service,
    },
};

fn get_attributes<B: BufRead, const N: usize>(
    reader: &Reader<B>,
    attributes: Attributes<'_>,
    names: [&'static str; N],
) -> Result<[Option<String>; N], error::Error> {
    const INIT: Option<String> = None;
    let mut result = [INIT; N];

    for attribute in attributes {
        let attribute = attribute?;
        let key = reader.decode(attribute.key)?;

        for (index, name) in names.iter().enumerate() {
            if key == *name {
                result[index] = Some(attribute.unescape_and_decode_value(reader)?);
                break;
            }
        }
    }

    Ok(result)
}

fn required(
    value: Option<String>,
    element: &'static str,
    attribute: &'static str,
) -> Result<String, error::Error> {
    value.ok_or(error::Error::MissingAttribute { element, attribute })
}

fn split_prefixed_name(prefixed_name: &str) -> (Option<&str>, &str) {
    match prefixed_name.split_once(':') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, prefixed_name),
    }
}

/// Namespace declarations in scope, one map per open element.
#[derive(Default)]
struct Scopes(Vec<HashMap<Option<String>, String>>);

struct Parser {
    definition: Definition,
    scopes: Scopes,
}

#[derive(Debug)]
enum ParseState {
    Definitions,

    Message {
        name: String,
        parts: Vec<Part>,
    },
    Part(Part),

    PortType {
        name: String,
        operations: Vec<Operation>,
    },
    Operation {
        name: String,
        input: Option<QualifiedName>,
        output: Option<QualifiedName>,
    },
    Input {
        message: QualifiedName,
    },
    Output {
        message: QualifiedName,
    },

    Binding {
        name: String,
        ty: QualifiedName,
        transport: Option<String>,
        style: Option<String>,
        operations: Vec<BindingOperation>,
    },
    Transport {
        transport: Option<String>,
        style: Option<String>,
    },
    BindingOperation {
        name: String,
        action: Option<String>,
        style: Option<String>,
        input: Option<String>,
        output: Option<String>,
    },
    OperationAction {
        action: Option<String>,
        style: Option<String>,
    },
    BindingInput {
        body: Option<String>,
    },
    BindingOutput {
        body: Option<String>,
    },
    BindingBody {
        body: Option<String>,
    },

    Service {
        name: String,
        ports: Vec<Port>,
    },
    Port {
        name: String,
        binding: QualifiedName,
        address: Option<String>,
    },
    Address {
        location: String,
    },

    Other,
}

impl Scopes {
    fn push<B: BufRead>(&mut self, reader: &Reader<B>, start: &BytesStart) -> Result<(), error::Error> {
        let mut declared = HashMap::new();

        for attribute in start.attributes() {
            let attribute = attribute?;
            let key = reader.decode(attribute.key)?;

            let prefix = match split_prefixed_name(key) {
                (None, "xmlns") => None,
                (Some("xmlns"), prefix) => Some(prefix.to_owned()),
                _ => continue,
            };

            declared.insert(prefix, attribute.unescape_and_decode_value(reader)?);
        }

        self.0.push(declared);
        Ok(())
    }

    fn pop(&mut self) {
        self.0.pop();
    }

    fn lookup(&self, prefix: Option<&str>) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find_map(|declared| declared.get(&prefix.map(ToOwned::to_owned)))
            .map(String::as_str)
    }

    /// Resolves a `prefix:name` attribute value against the declarations in
    /// scope. Unknown prefixes leave the name unqualified.
    fn resolve(&self, prefixed_name: &str) -> QualifiedName {
        let (prefix, name) = split_prefixed_name(prefixed_name.trim());
        let namespace = self.lookup(prefix).map(ToOwned::to_owned);

        if namespace.is_none() && prefix.is_some() {
            debug!(prefixed_name, "unknown namespace prefix");
        }

        QualifiedName::new(namespace, name)
    }
}

impl Parser {
    fn new() -> Self {
        Self {
            definition: Default::default(),
            scopes: Default::default(),
        }
    }

    fn target_named(&self, name: String) -> QualifiedName {
        QualifiedName::new(self.definition.target_namespace.clone(), name)
    }

    fn parse<B: BufRead>(mut self, mut reader: Reader<B>) -> Result<Definition, error::Error> {
        reader.trim_text(true);

        let mut stack = Vec::new();
        let mut buffer = Vec::new();

        loop {
            match reader.read_event(&mut buffer)? {
                Event::Start(start) => self.handle_start(&mut stack, &reader, start)?,
                Event::End(..) => self.handle_end(&mut stack)?,

                Event::Empty(start) => {
                    self.handle_start(&mut stack, &reader, start)?;
                    self.handle_end(&mut stack)?;
                }

                Event::Eof => break,

                _ => (),
            }

            buffer.clear();
        }

        Ok(self.definition)
    }

    fn handle_start<B: BufRead>(
        &mut self,
        stack: &mut Vec<ParseState>,
        reader: &Reader<B>,
        start: BytesStart,
    ) -> Result<(), error::Error> {
        self.scopes.push(reader, &start)?;

        let (_, local_name) = split_prefixed_name(reader.decode(start.name())?);

        let state = stack.pop();
        let mut new_state = ParseState::Other;

        match state {
            None => match local_name {
                "definitions" => {
                    let [namespace] =
                        get_attributes(reader, start.attributes(), ["targetNamespace"])?;

                    self.definition.target_namespace = namespace;
                    new_state = ParseState::Definitions;
                }

                other => return Err(error::Error::UnexpectedRoot(other.to_owned())),
            },

            Some(ParseState::Definitions) => match local_name {
                "message" => {
                    let [name] = get_attributes(reader, start.attributes(), ["name"])?;

                    new_state = ParseState::Message {
                        name: required(name, "message", "name")?,
                        parts: Vec::new(),
                    };
                }

                "portType" => {
                    let [name] = get_attributes(reader, start.attributes(), ["name"])?;

                    new_state = ParseState::PortType {
                        name: required(name, "portType", "name")?,
                        operations: Vec::new(),
                    };
                }

                "binding" => {
                    let [name, ty] = get_attributes(reader, start.attributes(), ["name", "type"])?;

                    new_state = ParseState::Binding {
                        name: required(name, "binding", "name")?,
                        ty: self.scopes.resolve(&required(ty, "binding", "type")?),
                        transport: None,
                        style: None,
                        operations: Vec::new(),
                    };
                }

                "service" => {
                    let [name] = get_attributes(reader, start.attributes(), ["name"])?;

                    new_state = ParseState::Service {
                        name: required(name, "service", "name")?,
                        ports: Vec::new(),
                    };
                }

                _ => (),
            },

            Some(ParseState::Message { .. }) => {
                if local_name == "part" {
                    let [name, ty, element] =
                        get_attributes(reader, start.attributes(), ["name", "type", "element"])?;

                    new_state = ParseState::Part(Part {
                        name: required(name, "part", "name")?,
                        type_name: ty.map(|ty| self.scopes.resolve(&ty)),
                        element: element.map(|element| self.scopes.resolve(&element)),
                    });
                }
            }

            Some(ParseState::PortType { .. }) => {
                if local_name == "operation" {
                    let [name] = get_attributes(reader, start.attributes(), ["name"])?;

                    new_state = ParseState::Operation {
                        name: required(name, "operation", "name")?,
                        input: None,
                        output: None,
                    };
                }
            }

            Some(ParseState::Operation { .. }) => match local_name {
                "input" | "output" => {
                    let [message] = get_attributes(reader, start.attributes(), ["message"])?;

                    let element = if local_name == "input" { "input" } else { "output" };
                    let message = self.scopes.resolve(&required(message, element, "message")?);

                    new_state = if local_name == "input" {
                        ParseState::Input { message }
                    } else {
                        ParseState::Output { message }
                    };
                }

                _ => (),
            },

            Some(ParseState::Binding { .. }) => match local_name {
                "binding" => {
                    let [transport, style] =
                        get_attributes(reader, start.attributes(), ["transport", "style"])?;

                    new_state = ParseState::Transport { transport, style };
                }

                "operation" => {
                    let [name] = get_attributes(reader, start.attributes(), ["name"])?;

                    new_state = ParseState::BindingOperation {
                        name: required(name, "operation", "name")?,
                        action: None,
                        style: None,
                        input: None,
                        output: None,
                    };
                }

                _ => (),
            },

            Some(ParseState::BindingOperation { .. }) => match local_name {
                "operation" => {
                    let [action, style] =
                        get_attributes(reader, start.attributes(), ["soapAction", "style"])?;

                    new_state = ParseState::OperationAction { action, style };
                }

                "input" => new_state = ParseState::BindingInput { body: None },
                "output" => new_state = ParseState::BindingOutput { body: None },

                _ => (),
            },

            Some(ParseState::BindingInput { .. } | ParseState::BindingOutput { .. }) => {
                if local_name == "body" {
                    let [body] = get_attributes(reader, start.attributes(), ["use"])?;
                    new_state = ParseState::BindingBody { body };
                }
            }

            Some(ParseState::Service { .. }) => {
                if local_name == "port" {
                    let [name, binding] =
                        get_attributes(reader, start.attributes(), ["name", "binding"])?;

                    new_state = ParseState::Port {
                        name: required(name, "port", "name")?,
                        binding: self.scopes.resolve(&required(binding, "port", "binding")?),
                        address: None,
                    };
                }
            }

            Some(ParseState::Port { .. }) => {
                if local_name == "address" {
                    let [location] = get_attributes(reader, start.attributes(), ["location"])?;

                    new_state = ParseState::Address {
                        location: required(location, "address", "location")?,
                    };
                }
            }

            _ => (),
        }

        stack.extend(state);
        stack.push(new_state);
        Ok(())
    }

    fn handle_end(&mut self, stack: &mut Vec<ParseState>) -> Result<(), error::Error> {
        self.scopes.pop();

        let state = stack.pop();
        let mut next_state = stack.pop();

        match state {
            Some(ParseState::Message { name, parts }) => {
                let name = self.target_named(name);
                self.definition.messages.push(Message { name, parts })
            }

            Some(ParseState::Part(part)) => {
                if let Some(ParseState::Message { ref mut parts, .. }) = next_state {
                    parts.push(part)
                }
            }

            Some(ParseState::PortType { name, operations }) => {
                let name = self.target_named(name);
                self.definition.port_types.push(PortType { name, operations })
            }

            Some(ParseState::Operation {
                name,
                input,
                output,
            }) => {
                if let Some(ParseState::PortType {
                    ref mut operations, ..
                }) = next_state
                {
                    operations.push(Operation {
                        name,
                        input,
                        output,
                    })
                }
            }

            Some(ParseState::Input { message }) => {
                if let Some(ParseState::Operation { ref mut input, .. }) = next_state {
                    input.get_or_insert(message);
                }
            }

            Some(ParseState::Output { message }) => {
                if let Some(ParseState::Operation { ref mut output, .. }) = next_state {
                    output.get_or_insert(message);
                }
            }

            Some(ParseState::Binding {
                name,
                ty,
                transport,
                style,
                operations,
            }) => {
                let name = self.target_named(name);
                self.definition.bindings.push(Binding {
                    name,
                    ty,
                    transport,
                    style,
                    operations,
                })
            }

            Some(ParseState::Transport {
                transport: kind,
                style: binding_style,
            }) => {
                if let Some(ParseState::Binding {
                    ref mut transport,
                    ref mut style,
                    ..
                }) = next_state
                {
                    *transport = kind;
                    *style = binding_style;
                }
            }

            Some(ParseState::BindingOperation {
                name,
                action,
                style,
                input,
                output,
            }) => {
                if let Some(ParseState::Binding {
                    ref mut operations, ..
                }) = next_state
                {
                    operations.push(BindingOperation {
                        name,
                        action,
                        style,
                        input,
                        output,
                    })
                }
            }

            Some(ParseState::OperationAction { action, style }) => {
                if let Some(ParseState::BindingOperation {
                    action: ref mut a,
                    style: ref mut s,
                    ..
                }) = next_state
                {
                    *a = action.filter(|action| !action.is_empty());
                    *s = style;
                }
            }

            Some(ParseState::BindingInput { body }) => {
                if let Some(ParseState::BindingOperation { ref mut input, .. }) = next_state {
                    *input = body
                }
            }

            Some(ParseState::BindingOutput { body }) => {
                if let Some(ParseState::BindingOperation { ref mut output, .. }) = next_state {
                    *output = body
                }
            }

            Some(ParseState::BindingBody { body: body_use }) => match next_state {
                Some(
                    ParseState::BindingInput { ref mut body }
                    | ParseState::BindingOutput { ref mut body },
                ) => *body = body_use,
                _ => (),
            },

            Some(ParseState::Service { name, ports }) => {
                let name = self.target_named(name);
                self.definition.services.push(Service { name, ports })
            }

            Some(ParseState::Port {
                name,
                binding,
                address,
            }) => {
                if let Some(ParseState::Service { ref mut ports, .. }) = next_state {
                    ports.push(Port {
                        name,
                        binding,
                        location: address,
                    })
                }
            }

            Some(ParseState::Address { location }) => {
                if let Some(ParseState::Port {
                    ref mut address, ..
                }) = next_state
                {
                    address.get_or_insert(location);
                }
            }

            _ => (),
        }

        stack.extend(next_state);
        Ok(())
    }
}

pub fn parse<B: BufRead>(input: B) -> Result<Definition, error::Error> {
    Parser::new().parse(Reader::from_reader(input))
}
