//! Maps a loosely keyed parameter bag onto the positional arguments an
//! operation expects.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use soapgate_util::value::Argument;
use soapgate_wsdl::{OperationDescriptor, ParameterDescriptor};

pub type ParamBag = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindWarning {
    #[error("Required parameter {name} is missing")]
    MissingRequiredParameter { name: String },

    #[error("Unable to convert {name} to {target}: {reason}")]
    CoercionFailed {
        name: String,
        target: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bound {
    pub arguments: Vec<Argument>,
    pub warnings: Vec<BindWarning>,
}

fn local_part(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// Finds the first non-null bag entry for `name`: exact key, then
/// case-insensitive, then case-insensitive with any `prefix:` stripped from
/// both sides.
fn find_value<'a>(bag: &'a ParamBag, name: &str) -> Option<&'a Value> {
    let local = local_part(name);

    bag.get(name)
        .filter(|value| !value.is_null())
        .or_else(|| first_present(bag, |key| key.eq_ignore_ascii_case(name)))
        .or_else(|| first_present(bag, |key| local_part(key).eq_ignore_ascii_case(local)))
}

fn first_present(bag: &ParamBag, matches: impl Fn(&str) -> bool) -> Option<&Value> {
    bag.iter()
        .find(|(key, value)| !value.is_null() && matches(key))
        .map(|(_, value)| value)
}

fn text(value: &Value) -> String {
    match value {
        Value::String(value) => value.clone(),
        other => other.to_string(),
    }
}

fn integral(value: &Value, min: f64, max: f64) -> Result<i64, String> {
    match value {
        Value::Number(number) => {
            if let Some(value) = number.as_i64() {
                return Ok(value);
            }

            match number.as_f64() {
                Some(value) if value.is_finite() && value >= min && value <= max => {
                    Ok(value.trunc() as i64)
                }
                _ => Err(format!("{} is out of range", number)),
            }
        }

        other => text(other)
            .parse::<i64>()
            .map_err(|err| format!("{:?}: {}", text(other), err)),
    }
}

fn floating(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| format!("{} is not representable", number)),

        other => {
            let text = text(other);
            text.trim()
                .parse::<f64>()
                .map_err(|err| format!("{:?}: {}", text, err))
        }
    }
}

/// Converts `value` to the primitive named by `target`.
///
/// Declared types other than the known primitives pass through unchanged.
pub fn coerce(target: &str, value: &Value) -> Result<Argument, String> {
    match target.to_ascii_lowercase().as_str() {
        "string" => Ok(Argument::String(text(value))),

        "int" | "integer" => {
            let wide = integral(value, i32::MIN as f64, i32::MAX as f64)?;
            i32::try_from(wide)
                .map(Argument::Int)
                .map_err(|_| format!("{} does not fit in an int", wide))
        }

        "long" => integral(value, i64::MIN as f64, i64::MAX as f64).map(Argument::Long),

        "double" => floating(value).map(Argument::Double),

        "float" => floating(value).map(|value| Argument::Float(value as f32)),

        "boolean" => match value {
            Value::Bool(value) => Ok(Argument::Boolean(*value)),
            Value::String(text) if text.eq_ignore_ascii_case("true") => Ok(Argument::Boolean(true)),
            Value::String(text) if text.eq_ignore_ascii_case("false") => {
                Ok(Argument::Boolean(false))
            }
            other => Err(format!("{} is not a boolean", other)),
        },

        _ => Ok(Argument::from(value.clone())),
    }
}

fn bind_parameter(
    operation: &str,
    parameter: &ParameterDescriptor,
    bag: &ParamBag,
    warnings: &mut Vec<BindWarning>,
) -> Argument {
    let value = match find_value(bag, &parameter.name) {
        Some(value) => value,
        None => {
            if parameter.required {
                warn!(operation, parameter = %parameter.name, "required parameter is missing");
                warnings.push(BindWarning::MissingRequiredParameter {
                    name: parameter.name.clone(),
                });
            }

            return Argument::Null;
        }
    };

    let target = match parameter.type_name() {
        Some(target) => target,
        None => return Argument::from(value.clone()),
    };

    match coerce(target, value) {
        Ok(argument) => argument,
        Err(reason) => {
            warn!(
                operation,
                parameter = %parameter.name,
                target,
                %reason,
                "passing parameter through unconverted"
            );
            warnings.push(BindWarning::CoercionFailed {
                name: parameter.name.clone(),
                target: target.to_owned(),
                reason,
            });

            Argument::from(value.clone())
        }
    }
}

/// Builds the argument list for `descriptor` out of `bag`.
///
/// Missing parameters become nulls and unconvertible values are passed as
/// they are; both are reported in [`Bound::warnings`] and never fail the
/// call.
pub fn bind(descriptor: &OperationDescriptor, bag: &ParamBag) -> Bound {
    if descriptor.inputs.is_empty() {
        debug!(operation = %descriptor.name, "no declared inputs, passing values through");
        return Bound {
            arguments: pass_through(bag),
            warnings: Vec::new(),
        };
    }

    let mut warnings = Vec::new();
    let arguments = descriptor
        .inputs
        .iter()
        .map(|parameter| bind_parameter(&descriptor.name, parameter, bag, &mut warnings))
        .collect();

    Bound {
        arguments,
        warnings,
    }
}

/// The bag's values in iteration order.
pub fn pass_through(bag: &ParamBag) -> Vec<Argument> {
    bag.values().cloned().map(Argument::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use soapgate_wsdl::types::QualifiedName;

    const XSD: &str = "http://www.w3.org/2001/XMLSchema";

    fn parameter(order: usize, name: &str, ty: Option<&str>) -> ParameterDescriptor {
        ParameterDescriptor {
            name: name.into(),
            declared_type: ty.map(|ty| QualifiedName::new(Some(XSD.into()), ty)),
            required: true,
            order,
        }
    }

    fn operation(inputs: Vec<ParameterDescriptor>) -> OperationDescriptor {
        OperationDescriptor {
            name: "Submit".into(),
            inputs,
            outputs: Vec::new(),
        }
    }

    fn bag(value: Value) -> ParamBag {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {}", other),
        }
    }

    #[test]
    fn matches_case_insensitively_and_coerces() {
        let descriptor = operation(vec![
            parameter(0, "amount", Some("int")),
            parameter(1, "note", Some("string")),
        ]);

        let bound = bind(&descriptor, &bag(json!({ "Amount": "5", "Note": "hi" })));

        assert_eq!(
            bound.arguments,
            [Argument::Int(5), Argument::String("hi".into())]
        );
        assert!(bound.warnings.is_empty());
    }

    #[test]
    fn exact_match_wins_over_case_insensitive() {
        let descriptor = operation(vec![parameter(0, "code", Some("string"))]);
        let bound = bind(&descriptor, &bag(json!({ "CODE": "upper", "code": "exact" })));

        assert_eq!(bound.arguments, [Argument::String("exact".into())]);
    }

    #[test]
    fn null_entries_fall_through_to_looser_matches() {
        let descriptor = operation(vec![
            parameter(0, "code", Some("string")),
            parameter(1, "tns:region", Some("string")),
        ]);
        let bound = bind(
            &descriptor,
            &bag(json!({ "code": null, "CODE": "x", "region": null, "ns:Region": "eu" })),
        );

        assert_eq!(
            bound.arguments,
            [Argument::String("x".into()), Argument::String("eu".into())]
        );
    }

    #[test]
    fn strips_prefixes_on_both_sides() {
        let descriptor = operation(vec![
            parameter(0, "tns:accountId", Some("long")),
            parameter(1, "Flag", Some("boolean")),
        ]);

        let bound = bind(
            &descriptor,
            &bag(json!({ "ns1:AccountID": 12, "x:flag": "TRUE" })),
        );

        assert_eq!(
            bound.arguments,
            [Argument::Long(12), Argument::Boolean(true)]
        );
    }

    #[test]
    fn missing_parameters_become_null() {
        let descriptor = operation(vec![
            parameter(0, "a", Some("int")),
            parameter(1, "b", Some("int")),
        ]);

        let bound = bind(&descriptor, &bag(json!({ "a": 1, "b": null })));

        assert_eq!(bound.arguments, [Argument::Int(1), Argument::Null]);
        assert_eq!(
            bound.warnings,
            [BindWarning::MissingRequiredParameter { name: "b".into() }]
        );
    }

    #[test]
    fn failed_coercion_keeps_the_original_value() {
        let descriptor = operation(vec![
            parameter(0, "count", Some("int")),
            parameter(1, "enabled", Some("boolean")),
        ]);

        let bound = bind(&descriptor, &bag(json!({ "count": "five", "enabled": "yes" })));

        assert_eq!(
            bound.arguments,
            [
                Argument::Value(json!("five")),
                Argument::Value(json!("yes"))
            ]
        );
        assert_eq!(bound.warnings.len(), 2);
        assert!(matches!(
            &bound.warnings[0],
            BindWarning::CoercionFailed { name, target, .. } if name == "count" && target == "int"
        ));
    }

    #[test]
    fn complex_types_pass_through() {
        let descriptor = operation(vec![
            parameter(0, "order", Some("OrderRequest")),
            parameter(1, "raw", None),
        ]);

        let order = json!({ "Id": 7, "Lines": [1, 2] });
        let bound = bind(&descriptor, &bag(json!({ "order": order, "raw": 3 })));

        assert_eq!(
            bound.arguments,
            [Argument::Value(order), Argument::Value(json!(3))]
        );
    }

    #[test]
    fn no_declared_inputs_passes_values_in_order() {
        let bound = bind(&operation(Vec::new()), &bag(json!({ "z": 1, "a": "two", "m": null })));

        assert_eq!(
            bound.arguments,
            [
                Argument::Value(json!(1)),
                Argument::Value(json!("two")),
                Argument::Null
            ]
        );
    }

    #[test]
    fn numeric_coercions() {
        assert_eq!(coerce("int", &json!(7.9)).unwrap(), Argument::Int(7));
        assert_eq!(coerce("INT", &json!("-3")).unwrap(), Argument::Int(-3));
        assert!(coerce("int", &json!(" 3")).is_err());
        assert!(coerce("int", &json!(4_294_967_296_i64)).is_err());
        assert!(coerce("int", &json!(true)).is_err());

        assert_eq!(coerce("long", &json!("9000000000")).unwrap(), Argument::Long(9_000_000_000));
        assert_eq!(coerce("double", &json!(" 2.5 ")).unwrap(), Argument::Double(2.5));
        assert_eq!(coerce("double", &json!(3)).unwrap(), Argument::Double(3.0));
        assert_eq!(coerce("float", &json!("1.5")).unwrap(), Argument::Float(1.5));
        assert!(coerce("double", &json!("abc")).is_err());
    }

    #[test]
    fn string_and_boolean_coercions() {
        assert_eq!(coerce("string", &json!(42)).unwrap(), Argument::String("42".into()));
        assert_eq!(coerce("string", &json!(false)).unwrap(), Argument::String("false".into()));
        assert_eq!(coerce("boolean", &json!(false)).unwrap(), Argument::Boolean(false));
        assert_eq!(coerce("boolean", &json!("False")).unwrap(), Argument::Boolean(false));
        assert!(coerce("boolean", &json!(1)).is_err());
        assert_eq!(
            coerce("dateTime", &json!("2024-01-01")).unwrap(),
            Argument::Value(json!("2024-01-01"))
        );
    }
}
