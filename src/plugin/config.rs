//! Plugin option validation
//!
//! Option bags come from the `pluginArgs` section of the server config and are
//! checked against the plugin's declared constraints before construction.

use crate::plugin::schema::{ArgConstraints, ConstraintRule, PluginError, PluginOptions};
use serde_json::Value;

/// Validate a raw option bag for `plugin` against its constraints.
pub fn validate_plugin_args(
    plugin: &str,
    constraints: &ArgConstraints,
    raw: Option<&Value>,
) -> Result<PluginOptions, PluginError> {
    let invalid = |reason: String| PluginError::InvalidArgs {
        plugin: plugin.to_string(),
        reason,
    };

    let options = match raw {
        None | Some(Value::Null) => PluginOptions::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            return Err(invalid(format!(
                "expected an object of options, got {}",
                type_name(other)
            )))
        }
    };

    for key in options.keys() {
        if !constraints.contains_key(key) {
            return Err(invalid(format!("unknown option '{key}'")));
        }
    }

    for (key, rule) in constraints {
        match options.get(key) {
            None | Some(Value::Null) => {
                if rule.presence {
                    return Err(invalid(format!("option '{key}' is required")));
                }
            }
            Some(value) => check_rule(key, rule, value).map_err(invalid)?,
        }
    }

    Ok(options)
}

fn check_rule(key: &str, rule: &ConstraintRule, value: &Value) -> Result<(), String> {
    let type_checks = [
        (rule.is_string, value.is_string(), "a string"),
        (rule.is_number, value.is_number(), "a number"),
        (rule.is_boolean, value.is_boolean(), "a boolean"),
        (rule.is_array, value.is_array(), "an array"),
        (rule.is_object, value.is_object(), "an object"),
    ];
    for (wanted, ok, expected) in type_checks {
        if wanted && !ok {
            return Err(format!(
                "option '{key}' must be {expected}, got {}",
                type_name(value)
            ));
        }
    }

    if let Some(allowed) = &rule.inclusion {
        if !allowed.contains(value) {
            return Err(format!(
                "option '{key}' must be one of {}",
                Value::Array(allowed.clone())
            ));
        }
    }

    if rule.min.is_some() || rule.max.is_some() {
        let n = value
            .as_f64()
            .ok_or_else(|| format!("option '{key}' must be numeric to apply bounds"))?;
        if let Some(min) = rule.min {
            if n < min {
                return Err(format!("option '{key}' must be at least {min}"));
            }
        }
        if let Some(max) = rule.max {
            if n > max {
                return Err(format!("option '{key}' cannot exceed {max}"));
            }
        }
    }

    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
