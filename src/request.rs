//! Run request parsing and validation
//!
//! Requests arrive as loosely-typed JSON. They are checked here, before any
//! workspace is allocated, so a malformed body never touches the filesystem.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Component, Path};

use crate::common::{Error, Result};
use crate::workspace::RESERVED_FEATURE_NAMES;

/// One submitted script file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptAsset {
    /// File name inside the workspace. A positional default is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Script text
    pub content: String,
}

impl ScriptAsset {
    pub fn new(name: Option<&str>, content: impl Into<String>) -> Self {
        Self {
            name: name.map(str::to_string),
            content: content.into(),
        }
    }
}

/// A validated run request: feature files plus optional step bindings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub features: Vec<ScriptAsset>,
    #[serde(default)]
    pub steps: Vec<ScriptAsset>,
}

impl RunRequest {
    /// Validate a raw JSON body into a request
    pub fn from_value(body: &Value) -> Result<Self> {
        let object = body
            .as_object()
            .ok_or_else(|| Error::validation("Request body must be a JSON object."))?;

        let features = match object.get("features") {
            Some(Value::Array(items)) if !items.is_empty() => items,
            _ => {
                return Err(Error::validation(
                    "Payload requires a non-empty \"features\" array.",
                ))
            }
        };
        let features = features
            .iter()
            .map(|item| parse_asset(item, "Each feature must include string \"content\"."))
            .collect::<Result<Vec<_>>>()?;

        let steps = match object.get("steps") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    parse_asset(item, "Each step definition must include string \"content\".")
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => {
                return Err(Error::validation(
                    "\"steps\" must be an array when provided.",
                ))
            }
        };

        let request = Self { features, steps };
        request.validate()?;
        Ok(request)
    }

    /// Check the invariants of an already-typed request
    pub fn validate(&self) -> Result<()> {
        if self.features.is_empty() {
            return Err(Error::validation(
                "Payload requires a non-empty \"features\" array.",
            ));
        }
        for asset in self.features.iter().chain(&self.steps) {
            if asset.content.is_empty() {
                return Err(Error::validation("Script \"content\" must not be empty."));
            }
            if let Some(name) = &asset.name {
                check_file_name(name)?;
            }
        }
        // Features share a directory with the files the workspace seeds
        for name in self.features.iter().filter_map(|asset| asset.name.as_deref()) {
            if RESERVED_FEATURE_NAMES.contains(&name) {
                return Err(Error::validation(format!(
                    "Script name '{}' is reserved.",
                    name
                )));
            }
        }
        Ok(())
    }
}

fn parse_asset(item: &Value, content_message: &str) -> Result<ScriptAsset> {
    let content = item
        .get("content")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::validation(content_message))?;

    let name = match item.get("name") {
        None | Some(Value::Null) => None,
        Some(Value::String(name)) if name.is_empty() => None,
        Some(Value::String(name)) => Some(name.clone()),
        Some(_) => return Err(Error::validation("Script \"name\" must be a string.")),
    };

    Ok(ScriptAsset {
        name,
        content: content.to_string(),
    })
}

/// Names become file names inside the workspace; they must not escape it.
fn check_file_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(Error::validation(format!(
            "Script name '{}' must be a plain file name.",
            name
        ))),
    }
}
