//! Failure evidence extraction
//!
//! Walks a report and collects, for failed scenarios only, the error
//! messages and the attachments worth showing to a person. Output order is
//! document order: feature, scenario, step/hook, item.

use base64::Engine as _;
use serde::Serialize;
use serde_json::Value;

use super::model::{Attachment, Embedding, Feature, Hook, Scenario, StepResult};

/// Step name given to evidence that came from an after hook
const AFTER_HOOK_NAME: &str = "After hook";

/// Messages and attachments extracted from failed scenarios
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureDetails {
    pub messages: Vec<String>,
    pub attachments: Vec<FailureAttachment>,
}

impl FailureDetails {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.attachments.is_empty()
    }

    /// Attachments with an `image/*` MIME type
    pub fn images(&self) -> impl Iterator<Item = &FailureAttachment> {
        self.attachments
            .iter()
            .filter(|a| a.mime_type.starts_with("image/"))
    }

    /// Attachments with a `text/*` MIME type
    pub fn texts(&self) -> impl Iterator<Item = &FailureAttachment> {
        self.attachments
            .iter()
            .filter(|a| a.mime_type.starts_with("text/"))
    }
}

/// One piece of evidence, normalized from whichever shape the report used
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureAttachment {
    /// Stable for identical input; meant as a list key, not a persistent id
    pub id: String,
    pub mime_type: String,
    /// Base64 payload
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
}

impl FailureAttachment {
    /// Decoded payload, or `None` if the data is not valid base64
    pub fn decode(&self) -> Option<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(self.data.trim())
            .ok()
    }

    /// Payload as text. Data that does not decode as base64 is taken to be
    /// the text itself.
    pub fn decode_text(&self) -> String {
        match self.decode() {
            Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            None => self.data.clone(),
        }
    }
}

/// Which step/hook statuses make a scenario count as failed.
///
/// Statuses compare case-insensitively. The default set is just `failed`;
/// `undefined`, `pending` or `skipped` can be added through configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureClassifier {
    statuses: Vec<String>,
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new(["failed"])
    }
}

impl FailureClassifier {
    pub fn new<I, S>(statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            statuses: statuses
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Whether a result's status is in the failing set
    pub fn is_failing(&self, result: Option<&StepResult>) -> bool {
        result
            .and_then(|r| r.status.as_deref())
            .is_some_and(|status| {
                self.statuses
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(status))
            })
    }

    fn scenario_failed(&self, scenario: &Scenario) -> bool {
        scenario
            .steps
            .iter()
            .any(|step| self.is_failing(step.result.as_ref()))
            || scenario
                .before
                .iter()
                .chain(&scenario.after)
                .any(|hook| self.is_failing(hook.result.as_ref()))
            || scenario.after.iter().any(Hook::has_evidence)
    }

    /// Extract failure details from a report value.
    ///
    /// Anything that is not an array yields an empty result. Features that
    /// do not have the expected shape are skipped without shifting the
    /// indices of the ones that do.
    pub fn extract(&self, report: Option<&Value>) -> FailureDetails {
        let mut details = FailureDetails::default();
        let Some(features) = report.and_then(Value::as_array) else {
            return details;
        };

        for (feature_index, raw) in features.iter().enumerate() {
            let feature: Feature = match serde::Deserialize::deserialize(raw) {
                Ok(feature) => feature,
                Err(e) => {
                    tracing::debug!(feature_index, "Skipping malformed feature: {}", e);
                    continue;
                }
            };

            for (scenario_index, scenario) in feature.elements.iter().enumerate() {
                if self.scenario_failed(scenario) {
                    self.collect_scenario(&mut details, feature_index, scenario_index, scenario);
                }
            }
        }

        details
    }

    fn collect_scenario(
        &self,
        details: &mut FailureDetails,
        feature_index: usize,
        scenario_index: usize,
        scenario: &Scenario,
    ) {
        let scenario_name = scenario.name.as_deref();

        for (step_index, step) in scenario.steps.iter().enumerate() {
            if let Some(message) = self.failing_message(step.result.as_ref()) {
                details.messages.push(message.to_string());
            }

            let base_id = format!("{}-{}-{}", feature_index, scenario_index, step_index);
            push_evidence(
                details,
                &base_id,
                &step.embeddings,
                &step.attachments,
                scenario_name,
                step.name.as_deref(),
            );
        }

        for (hook_index, hook) in scenario.after.iter().enumerate() {
            if let Some(message) = self.failing_message(hook.result.as_ref()) {
                details.messages.push(message.to_string());
            }
            if let Some(text) = hook.text.as_deref().filter(|t| !t.is_empty()) {
                details.messages.push(text.to_string());
            }

            let base_id = format!("{}-{}-after-{}", feature_index, scenario_index, hook_index);
            push_evidence(
                details,
                &base_id,
                &hook.embeddings,
                &hook.attachments,
                scenario_name,
                Some(AFTER_HOOK_NAME),
            );
        }
    }

    fn failing_message<'a>(&self, result: Option<&'a StepResult>) -> Option<&'a str> {
        if !self.is_failing(result) {
            return None;
        }
        result
            .and_then(|r| r.error_message.as_deref())
            .filter(|m| !m.is_empty())
    }
}

/// Extract failure details using the default classification (`failed` only)
pub fn extract_failure_details(report: Option<&Value>) -> FailureDetails {
    FailureClassifier::default().extract(report)
}

/// The two evidence shapes a report can use
enum EvidenceSource<'a> {
    Embedding(&'a Embedding),
    Attachment(&'a Attachment),
}

/// Evidence reduced to the fields every shape must provide
struct Evidence<'a> {
    mime_type: &'a str,
    data: &'a str,
}

impl<'a> EvidenceSource<'a> {
    fn kind(&self) -> &'static str {
        match self {
            EvidenceSource::Embedding(_) => "embedding",
            EvidenceSource::Attachment(_) => "attachment",
        }
    }

    /// Resolve data, MIME type and encoding. Items missing data or a MIME
    /// type, or using any encoding other than base64, are rejected.
    fn normalize(&self) -> Option<Evidence<'a>> {
        let (data, mime_type, encoding) = match *self {
            EvidenceSource::Embedding(e) => {
                let media = e.media.as_ref();
                (
                    e.data.as_deref().or_else(|| media?.data.as_deref()),
                    e.mime_type
                        .as_deref()
                        .or(e.media_type.as_deref())
                        .or_else(|| media?.media_type.as_deref()),
                    media.and_then(|m| m.encoding.as_deref()),
                )
            }
            EvidenceSource::Attachment(a) => (
                a.data.as_deref().or(a.body.as_deref()),
                a.media_type.as_deref(),
                a.content_encoding.as_deref(),
            ),
        };

        let data = data.filter(|d| !d.is_empty())?;
        let mime_type = mime_type.filter(|m| !m.is_empty())?;
        if encoding.is_some_and(|enc| !enc.is_empty() && enc != "base64") {
            return None;
        }

        Some(Evidence { mime_type, data })
    }
}

fn push_evidence(
    details: &mut FailureDetails,
    base_id: &str,
    embeddings: &[Embedding],
    attachments: &[Attachment],
    scenario_name: Option<&str>,
    step_name: Option<&str>,
) {
    let embeddings = embeddings
        .iter()
        .enumerate()
        .map(|(i, e)| (i, EvidenceSource::Embedding(e)));
    let attachments = attachments
        .iter()
        .enumerate()
        .map(|(i, a)| (i, EvidenceSource::Attachment(a)));

    for (index, source) in embeddings.chain(attachments) {
        let Some(evidence) = source.normalize() else {
            continue;
        };
        details.attachments.push(FailureAttachment {
            id: format!("{}-{}-{}", base_id, source.kind(), index),
            mime_type: evidence.mime_type.to_string(),
            data: evidence.data.to_string(),
            scenario_name: scenario_name.map(str::to_string),
            step_name: step_name.map(str::to_string),
        });
    }
}
