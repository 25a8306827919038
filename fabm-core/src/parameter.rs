//! Typed parameter values.
//!
//! The core tags every parameter with one of four type codes. Each arm of [`ParameterType`]
//! knows how to read a value through its own entry point, and each arm of [`ParameterValue`]
//! knows how to write itself back.

use crate::backend::{Backend, ModelHandle};
use crate::errors::{FabmError, FabmResult};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterType {
    Real,
    Integer,
    Logical,
    String,
}

impl ParameterType {
    /// Type code as used by the core.
    pub fn code(self) -> i32 {
        match self {
            ParameterType::Real => 1,
            ParameterType::Integer => 2,
            ParameterType::Logical => 3,
            ParameterType::String => 4,
        }
    }

    /// Read the parameter with 1-based `index` through the getter matching this type.
    ///
    /// With `default` set, the core's built-in default is returned instead of any override.
    pub fn read(
        self,
        backend: &dyn Backend,
        model: ModelHandle,
        index: usize,
        default: bool,
    ) -> ParameterValue {
        match self {
            ParameterType::Real => {
                ParameterValue::Real(backend.real_parameter(model, index, default))
            }
            ParameterType::Integer => {
                ParameterValue::Integer(backend.integer_parameter(model, index, default))
            }
            ParameterType::Logical => {
                ParameterValue::Logical(backend.logical_parameter(model, index, default))
            }
            ParameterType::String => {
                ParameterValue::String(backend.string_parameter(model, index, default))
            }
        }
    }

    /// Convert `value` to this type, rejecting values that cannot be represented.
    ///
    /// Integers are accepted for real parameters.
    pub fn coerce(self, name: &str, value: ParameterValue) -> FabmResult<ParameterValue> {
        match (self, value) {
            (ParameterType::Real, ParameterValue::Integer(v)) => Ok(ParameterValue::Real(v.into())),
            (expected, value) if value.kind() == expected => Ok(value),
            (expected, value) => Err(FabmError::ParameterTypeMismatch {
                name: name.to_string(),
                expected,
                found: value.kind(),
            }),
        }
    }
}

impl TryFrom<i32> for ParameterType {
    type Error = FabmError;

    fn try_from(code: i32) -> FabmResult<Self> {
        match code {
            1 => Ok(ParameterType::Real),
            2 => Ok(ParameterType::Integer),
            3 => Ok(ParameterType::Logical),
            4 => Ok(ParameterType::String),
            other => Err(FabmError::UnknownParameterType(other)),
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterType::Real => write!(f, "real"),
            ParameterType::Integer => write!(f, "integer"),
            ParameterType::Logical => write!(f, "logical"),
            ParameterType::String => write!(f, "string"),
        }
    }
}

/// Value of a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Real(f64),
    Integer(i32),
    Logical(bool),
    String(String),
}

impl ParameterValue {
    pub fn kind(&self) -> ParameterType {
        match self {
            ParameterValue::Real(_) => ParameterType::Real,
            ParameterValue::Integer(_) => ParameterType::Integer,
            ParameterValue::Logical(_) => ParameterType::Logical,
            ParameterValue::String(_) => ParameterType::String,
        }
    }

    /// Write this value to the parameter called `name` through the matching setter.
    pub fn write(&self, backend: &dyn Backend, model: ModelHandle, name: &str) {
        match self {
            ParameterValue::Real(v) => backend.set_real_parameter(model, name, *v),
            ParameterValue::Integer(v) => backend.set_integer_parameter(model, name, *v),
            ParameterValue::Logical(v) => backend.set_logical_parameter(model, name, *v),
            ParameterValue::String(v) => backend.set_string_parameter(model, name, v),
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            ParameterValue::Real(v) => Some(*v),
            ParameterValue::Integer(v) => Some((*v).into()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i32> {
        match self {
            ParameterValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_logical(&self) -> Option<bool> {
        match self {
            ParameterValue::Logical(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParameterValue::String(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Real(v) => write!(f, "{}", v),
            ParameterValue::Integer(v) => write!(f, "{}", v),
            ParameterValue::Logical(v) => write!(f, "{}", v),
            ParameterValue::String(v) => write!(f, "{}", v),
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        ParameterValue::Real(value)
    }
}

impl From<i32> for ParameterValue {
    fn from(value: i32) -> Self {
        ParameterValue::Integer(value)
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        ParameterValue::Logical(value)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::String(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        ParameterValue::String(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_round_trip() {
        for kind in [
            ParameterType::Real,
            ParameterType::Integer,
            ParameterType::Logical,
            ParameterType::String,
        ] {
            assert_eq!(ParameterType::try_from(kind.code()).unwrap(), kind);
        }
        assert!(matches!(
            ParameterType::try_from(7),
            Err(FabmError::UnknownParameterType(7))
        ));
    }

    #[test]
    fn integers_coerce_to_real() {
        let value = ParameterType::Real
            .coerce("phy/mu", ParameterValue::Integer(2))
            .unwrap();
        assert_eq!(value, ParameterValue::Real(2.0));
    }

    #[test]
    fn mismatched_types_are_rejected() {
        let err = ParameterType::Logical
            .coerce("phy/use_light", ParameterValue::Real(1.0))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Parameter phy/use_light has type logical but a real value was given"
        );
    }

    #[test]
    fn accessors_match_variants() {
        assert_eq!(ParameterValue::from(1.5).as_real(), Some(1.5));
        assert_eq!(ParameterValue::from(3).as_real(), Some(3.0));
        assert_eq!(ParameterValue::from(true).as_logical(), Some(true));
        assert_eq!(ParameterValue::from("monod").as_str(), Some("monod"));
        assert_eq!(ParameterValue::from(true).as_integer(), None);
    }
}
