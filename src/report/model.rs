//! Cucumber JSON report types
//!
//! Only the fields the runner looks at are modelled. Everything is optional
//! and `null` is treated like an absent field, since the report comes from
//! whatever engine version is installed.

use serde::{Deserialize, Deserializer};

/// A feature file's results
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub elements: Vec<Scenario>,
}

/// A scenario's results
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub steps: Vec<Step>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub before: Vec<Hook>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub after: Vec<Hook>,
}

/// A step's result and evidence
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub result: Option<StepResult>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub embeddings: Vec<Embedding>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attachments: Vec<Attachment>,
}

/// A before/after hook's result and evidence
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Hook {
    #[serde(default)]
    pub result: Option<StepResult>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub embeddings: Vec<Embedding>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub text: Option<String>,
}

impl Hook {
    /// Whether the hook carries diagnostics of its own
    pub fn has_evidence(&self) -> bool {
        !self.embeddings.is_empty()
            || !self.attachments.is_empty()
            || self.text.as_deref().is_some_and(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepResult {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Evidence in the JSON formatter shape: `data` with `mime_type` or
/// `mediaType`, or everything nested under `media`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Embedding {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default, rename = "mediaType")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub media: Option<EmbeddedMedia>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmbeddedMedia {
    #[serde(default, rename = "type")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

/// Evidence in the message protocol shape: `data` or `body`, with
/// `mediaType` and `contentEncoding`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default, rename = "mediaType")]
    pub media_type: Option<String>,
    #[serde(default, rename = "contentEncoding")]
    pub content_encoding: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_collections_become_empty() {
        let scenario: Scenario = serde_json::from_value(json!({
            "name": "s",
            "steps": null,
            "after": [{ "embeddings": null, "text": "" }]
        }))
        .unwrap();

        assert!(scenario.steps.is_empty());
        assert!(scenario.before.is_empty());
        assert!(!scenario.after[0].has_evidence());
    }

    #[test]
    fn test_embedding_field_aliases() {
        let embedding: Embedding = serde_json::from_value(json!({
            "mediaType": "image/png",
            "media": { "type": "image/jpeg", "encoding": "base64", "data": "AAAA" }
        }))
        .unwrap();

        assert_eq!(embedding.media_type.as_deref(), Some("image/png"));
        let media = embedding.media.unwrap();
        assert_eq!(media.media_type.as_deref(), Some("image/jpeg"));
        assert_eq!(media.encoding.as_deref(), Some("base64"));
    }
}
