// SPDX-License-Identifier: Apache-2.0

//! Declarative parameter specs and the positional/named reshaping that
//! turns a request's `params` into an ordered argument list (§4.5).

use serde_json::Value;

use crate::wire::{ErrorCode, JsonRpcError};

/// The coarse shape a parameter value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Object,
    Array,
    Any,
}

impl ParamType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        }
    }
}

/// The declared shape of a single method parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub param_type: ParamType,
    pub required: bool,
    pub default: Option<Value>,
}

impl ParamSpec {
    #[must_use]
    pub fn required(name: &'static str, param_type: ParamType) -> Self {
        Self {
            name,
            param_type,
            required: true,
            default: None,
        }
    }

    #[must_use]
    pub fn optional(name: &'static str, param_type: ParamType, default: Value) -> Self {
        Self {
            name,
            param_type,
            required: false,
            default: Some(default),
        }
    }
}

/// Reshapes a request's `params` (positional array, named object, or
/// absent) into an ordered `Vec<Value>` matching `specs`, filling in
/// defaults and rejecting unknown names, too many positional values, missing
/// required values, or a value of the wrong type.
pub fn validate_params(specs: &[ParamSpec], params: Option<Value>) -> Result<Vec<Value>, JsonRpcError> {
    let named = match params {
        None => Vec::new(),
        Some(Value::Array(values)) => {
            if values.len() > specs.len() {
                return Err(JsonRpcError::new(ErrorCode::InvalidParams, "too many positional parameters"));
            }
            values.into_iter().enumerate().map(|(i, v)| (specs[i].name, v)).collect()
        }
        Some(Value::Object(map)) => {
            for key in map.keys() {
                if !specs.iter().any(|spec| spec.name == key) {
                    return Err(JsonRpcError::new(ErrorCode::InvalidParams, format!("unknown parameter `{key}`")));
                }
            }
            map.into_iter().collect()
        }
        Some(_) => return Err(JsonRpcError::new(ErrorCode::InvalidParams, "params must be an array or object")),
    };

    let mut out = Vec::with_capacity(specs.len());
    for spec in specs {
        let found = named.iter().find(|(name, _)| *name == spec.name).map(|(_, v)| v.clone());
        let value = match found {
            Some(value) => value,
            None => match &spec.default {
                Some(default) => default.clone(),
                None if spec.required => {
                    return Err(JsonRpcError::new(ErrorCode::InvalidParams, format!("missing required parameter `{}`", spec.name)))
                }
                None => Value::Null,
            },
        };
        if !value.is_null() && !spec.param_type.accepts(&value) {
            return Err(JsonRpcError::new(
                ErrorCode::InvalidParams,
                format!("parameter `{}` must be of type {}", spec.name, spec.param_type.name()),
            ));
        }
        out.push(value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn specs() -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("instance_id", ParamType::String),
            ParamSpec::optional("max_lines", ParamType::Integer, json!(100)),
        ]
    }

    #[test]
    fn named_params_fill_in_defaults() {
        let out = validate_params(&specs(), Some(json!({"instance_id": "i1"}))).unwrap();
        assert_eq!(out, vec![json!("i1"), json!(100)]);
    }

    #[test]
    fn positional_params_map_in_order() {
        let out = validate_params(&specs(), Some(json!(["i1", 5]))).unwrap();
        assert_eq!(out, vec![json!("i1"), json!(5)]);
    }

    #[test]
    fn missing_required_param_is_rejected() {
        let err = validate_params(&specs(), Some(json!({}))).unwrap_err();
        assert_eq!(err.code.code(), ErrorCode::InvalidParams.code());
    }

    #[test]
    fn unknown_named_param_is_rejected() {
        let err = validate_params(&specs(), Some(json!({"instance_id": "i1", "bogus": 1}))).unwrap_err();
        assert_eq!(err.code.code(), ErrorCode::InvalidParams.code());
    }

    #[test]
    fn wrong_type_is_rejected() {
        let err = validate_params(&specs(), Some(json!({"instance_id": 5}))).unwrap_err();
        assert_eq!(err.code.code(), ErrorCode::InvalidParams.code());
    }
}
