//! Declarative plugin surfaces: method maps, argument constraints and errors
//!
//! A plugin describes the routes it adds and the options it accepts as plain
//! data. Both are read before the plugin is constructed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use warp::http::Method;

/// Validated options handed to a plugin constructor
pub type PluginOptions = serde_json::Map<String, Value>;

/// One required payload entry: a single name, or a group where any one
/// member satisfies the requirement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequiredParam {
    Name(String),
    AnyOf(Vec<String>),
}

impl RequiredParam {
    pub fn names(&self) -> &[String] {
        match self {
            Self::Name(name) => std::slice::from_ref(name),
            Self::AnyOf(names) => names,
        }
    }

    /// Value of the first listed name present in `payload`
    pub fn lookup<'a>(&self, payload: &'a serde_json::Map<String, Value>) -> Option<&'a Value> {
        self.names().iter().find_map(|name| payload.get(name))
    }
}

impl From<&str> for RequiredParam {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for RequiredParam {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl PartialEq<&str> for RequiredParam {
    fn eq(&self, other: &&str) -> bool {
        matches!(self, Self::Name(name) if name == other)
    }
}

impl fmt::Display for RequiredParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::AnyOf(names) => write!(f, "one of ({})", names.join(", ")),
        }
    }
}

/// Payload parameters a command route expects in its JSON body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadParams {
    #[serde(default)]
    pub required: Vec<RequiredParam>,

    #[serde(default)]
    pub optional: Vec<String>,
}

impl PayloadParams {
    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.optional.is_empty()
    }
}

/// The command a route binding resolves to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    pub command: String,

    #[serde(default, skip_serializing_if = "PayloadParams::is_empty")]
    pub payload_params: PayloadParams,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            payload_params: PayloadParams::default(),
        }
    }

    pub fn required<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RequiredParam>,
    {
        self.payload_params
            .required
            .extend(params.into_iter().map(Into::into));
        self
    }

    /// Require any one of `names`
    pub fn required_any_of<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.payload_params.required.push(RequiredParam::AnyOf(
            names.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn optional<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.payload_params
            .optional
            .extend(params.into_iter().map(Into::into));
        self
    }
}

/// Route pattern -> HTTP method -> command binding
///
/// ```text
/// /session/:sessionId/new_method
///     GET  -> getNewThing
///     POST -> setNewThing { required: [someParam] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodMap(BTreeMap<String, BTreeMap<String, CommandSpec>>);

impl MethodMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding, builder style
    pub fn route(mut self, path: &str, method: Method, spec: CommandSpec) -> Self {
        self.0
            .entry(path.to_string())
            .or_default()
            .insert(method.as_str().to_uppercase(), spec);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of (path, method) bindings
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    /// Iterate bindings as (path, method name, spec)
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &str, &CommandSpec)> {
        self.0.iter().flat_map(|(path, methods)| {
            methods
                .iter()
                .map(move |(method, spec)| (path.as_str(), method.as_str(), spec))
        })
    }

    /// Command names bound anywhere in this map
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.bindings().map(|(_, _, spec)| spec.command.as_str())
    }
}

/// Validation rule for one plugin option
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintRule {
    #[serde(default)]
    pub presence: bool,
    #[serde(default)]
    pub is_string: bool,
    #[serde(default)]
    pub is_number: bool,
    #[serde(default)]
    pub is_boolean: bool,
    #[serde(default)]
    pub is_array: bool,
    #[serde(default)]
    pub is_object: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inclusion: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl ConstraintRule {
    pub fn string() -> Self {
        Self {
            is_string: true,
            ..Self::default()
        }
    }

    pub fn number() -> Self {
        Self {
            is_number: true,
            ..Self::default()
        }
    }

    pub fn boolean() -> Self {
        Self {
            is_boolean: true,
            ..Self::default()
        }
    }

    pub fn array() -> Self {
        Self {
            is_array: true,
            ..Self::default()
        }
    }

    pub fn object() -> Self {
        Self {
            is_object: true,
            ..Self::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.presence = true;
        self
    }

    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.inclusion = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }
}

/// Option key -> rule
pub type ArgConstraints = BTreeMap<String, ConstraintRule>;

/// Plugin-specific errors
#[derive(Debug, Error)]
pub enum PluginError {
    /// A decision hook the plugin was expected to override was not
    #[error("Plugin '{plugin}' does not implement {capability}")]
    Unimplemented {
        plugin: String,
        capability: &'static str,
    },

    #[error("Plugin '{name}' is already registered")]
    DuplicateName { name: String },

    #[error("Route {method} {path} from '{source_name}' is already bound by '{existing}'")]
    DuplicateRoute {
        method: String,
        path: String,
        existing: String,
        source_name: String,
    },

    #[error("Invalid route '{path}': {reason}")]
    InvalidRoute { path: String, reason: String },

    #[error("Invalid arguments for plugin '{plugin}': {reason}")]
    InvalidArgs { plugin: String, reason: String },

    #[error("Plugin '{name}' not found")]
    NotFound { name: String },

    #[error("Plugin '{plugin}' failed to construct: {reason}")]
    Construction { plugin: String, reason: String },

    #[error("Plugin '{plugin}' failed to extend the server: {reason}")]
    ServerExtension { plugin: String, reason: String },
}
