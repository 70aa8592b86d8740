use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The scalar kinds a resource can be declared with. Once a name is bound to
/// a kind it never changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Integer,
    Float,
    Bool,
    Text
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Text => "text"
        };
        f.write_str(name)
    }
}

/// A typed resource value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Text(String)
}

/// Resource name -> declared kind. The executer derives "local" membership
/// from the key set.
pub type TypeMap = HashMap<String, ResourceKind>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot parse {input:?} as {kind}")]
pub struct ValueParseError {
    pub kind:  ResourceKind,
    pub input: String
}

impl Value {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Integer(_) => ResourceKind::Integer,
            Self::Float(_) => ResourceKind::Float,
            Self::Bool(_) => ResourceKind::Bool,
            Self::Text(_) => ResourceKind::Text
        }
    }

    /// Parses literal text into a value of the given kind.
    ///
    /// Text values may be quoted with double quotes; the quotes are
    /// stripped. Unquoted text is taken verbatim.
    pub fn parse(kind: ResourceKind, input: &str) -> Result<Self, ValueParseError> {
        let raw = input.trim();
        let err = || ValueParseError { kind, input: raw.to_owned() };
        match kind {
            ResourceKind::Integer => raw.parse().map(Self::Integer).map_err(|_| err()),
            ResourceKind::Float => raw.parse().map(Self::Float).map_err(|_| err()),
            ResourceKind::Bool => raw.parse().map(Self::Bool).map_err(|_| err()),
            ResourceKind::Text => {
                let text = raw
                    .strip_prefix('"')
                    .and_then(|t| t.strip_suffix('"'))
                    .unwrap_or(raw);
                Ok(Self::Text(text.to_owned()))
            }
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Text(t) => write!(f, "{t:?}")
        }
    }
}
