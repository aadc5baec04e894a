//! Per-operation parameter descriptors derived from a parsed definition.

use tracing::{debug, warn};

use crate::types::{Definition, Message, QualifiedName};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDescriptor {
    pub name: String,

    /// The part's declared type, else its declared element.
    pub declared_type: Option<QualifiedName>,

    /// Message parts are never optional.
    pub required: bool,

    /// Position on the wire, counted from zero.
    pub order: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDescriptor {
    pub name: String,
    pub inputs: Vec<ParameterDescriptor>,
    pub outputs: Vec<ParameterDescriptor>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    operations: Vec<OperationDescriptor>,
}

impl ParameterDescriptor {
    /// Local name of the declared type, e.g. `int` for `{xsd}int`.
    pub fn type_name(&self) -> Option<&str> {
        self.declared_type.as_ref().map(|ty| ty.name.as_str())
    }
}

fn parameters(message: &Message) -> Vec<ParameterDescriptor> {
    message
        .parts
        .iter()
        .enumerate()
        .map(|(order, part)| ParameterDescriptor {
            name: part.name.clone(),
            declared_type: part.type_name.clone().or_else(|| part.element.clone()),
            required: true,
            order,
        })
        .collect()
}

/// Looks up the message behind an operation's input or output.
///
/// An operation without that direction has no parameters for it, a
/// reference to a message that does not exist makes the operation unusable.
fn message_parameters(
    definition: &Definition,
    reference: Option<&QualifiedName>,
) -> Result<Vec<ParameterDescriptor>, QualifiedName> {
    match reference {
        None => Ok(Vec::new()),
        Some(reference) => definition
            .message(reference)
            .map(parameters)
            .ok_or_else(|| reference.clone()),
    }
}

impl Catalog {
    /// Builds one descriptor per port type operation, in declaration order.
    ///
    /// Names declared more than once (for example by two merged imports) are
    /// all kept.
    pub fn build(definition: &Definition) -> Self {
        let mut operations = Vec::new();

        for port_type in &definition.port_types {
            for operation in &port_type.operations {
                let inputs = message_parameters(definition, operation.input.as_ref());
                let outputs = message_parameters(definition, operation.output.as_ref());

                match (inputs, outputs) {
                    (Ok(inputs), Ok(outputs)) => {
                        debug!(
                            operation = %operation.name,
                            inputs = inputs.len(),
                            outputs = outputs.len(),
                            "catalogued operation"
                        );

                        operations.push(OperationDescriptor {
                            name: operation.name.clone(),
                            inputs,
                            outputs,
                        })
                    }

                    (Err(message), _) | (_, Err(message)) => warn!(
                        operation = %operation.name,
                        port_type = %port_type.name,
                        %message,
                        "skipping operation with unknown message"
                    ),
                }
            }
        }

        Self { operations }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn operations(&self) -> &[OperationDescriptor] {
        &self.operations
    }

    pub fn names(&self) -> Vec<String> {
        self.operations
            .iter()
            .map(|operation| operation.name.clone())
            .collect()
    }

    /// Finds an operation by exact name, then case-insensitively. When a name
    /// is declared more than once the last declaration wins.
    pub fn get(&self, name: &str) -> Option<&OperationDescriptor> {
        self.operations
            .iter()
            .rev()
            .find(|operation| operation.name == name)
            .or_else(|| {
                self.operations
                    .iter()
                    .rev()
                    .find(|operation| operation.name.eq_ignore_ascii_case(name))
            })
    }
}
