//! Coarse run status for callers that want one word instead of a report

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::extract::FailureClassifier;
use super::model::{Feature, StepResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Report present, nothing failed or undefined
    Passed,
    /// The run reported an error, or a step/hook failed
    Failed,
    /// Nothing failed but at least one step was undefined or pending
    Undefined,
    /// No error, but no usable report either
    Completed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Passed => "PASSED",
            RunStatus::Failed => "FAILED",
            RunStatus::Undefined => "UNDEFINED",
            RunStatus::Completed => "COMPLETED",
        };
        f.write_str(s)
    }
}

fn is_unimplemented(result: Option<&StepResult>) -> bool {
    result
        .and_then(|r| r.status.as_deref())
        .is_some_and(|s| s.eq_ignore_ascii_case("undefined") || s.eq_ignore_ascii_case("pending"))
}

/// Summarize a finished run.
///
/// A non-blank error always wins. Without an error the report decides; a
/// report that is not an array leaves the run `Completed`.
pub fn resolve_status(
    error: Option<&str>,
    report: Option<&Value>,
    classifier: &FailureClassifier,
) -> RunStatus {
    if error.is_some_and(|e| !e.trim().is_empty()) {
        return RunStatus::Failed;
    }

    let Some(features) = report.and_then(Value::as_array) else {
        return RunStatus::Completed;
    };

    let mut any_undefined = false;
    for raw in features {
        let Ok(feature) = Feature::deserialize(raw) else {
            continue;
        };

        for scenario in &feature.elements {
            let failed = scenario
                .steps
                .iter()
                .map(|s| s.result.as_ref())
                .chain(scenario.before.iter().map(|h| h.result.as_ref()))
                .chain(scenario.after.iter().map(|h| h.result.as_ref()))
                .any(|r| classifier.is_failing(r));
            if failed {
                return RunStatus::Failed;
            }

            any_undefined |= scenario
                .steps
                .iter()
                .any(|s| is_unimplemented(s.result.as_ref()));
        }
    }

    if any_undefined {
        RunStatus::Undefined
    } else {
        RunStatus::Passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolve(error: Option<&str>, report: Option<&Value>) -> RunStatus {
        resolve_status(error, report, &FailureClassifier::default())
    }

    #[test]
    fn test_error_wins() {
        let report = json!([]);
        assert_eq!(resolve(Some("Cucumber run failed"), Some(&report)), RunStatus::Failed);
        assert_eq!(resolve(Some("   "), Some(&report)), RunStatus::Passed);
    }

    #[test]
    fn test_missing_report_is_completed() {
        assert_eq!(resolve(None, None), RunStatus::Completed);
        assert_eq!(resolve(None, Some(&json!({}))), RunStatus::Completed);
    }

    #[test]
    fn test_failed_hook_fails_run() {
        let report = json!([{ "elements": [{
            "steps": [{ "result": { "status": "passed" } }],
            "after": [{ "result": { "status": "Failed" } }]
        }] }]);
        assert_eq!(resolve(None, Some(&report)), RunStatus::Failed);
    }

    #[test]
    fn test_undefined_and_pending() {
        let undefined = json!([{ "elements": [{
            "steps": [{ "result": { "status": "undefined" } }]
        }] }]);
        let pending = json!([{ "elements": [{
            "steps": [{ "result": { "status": "PENDING" } }]
        }] }]);
        assert_eq!(resolve(None, Some(&undefined)), RunStatus::Undefined);
        assert_eq!(resolve(None, Some(&pending)), RunStatus::Undefined);

        let strict = FailureClassifier::new(["failed", "undefined"]);
        assert_eq!(resolve_status(None, Some(&undefined), &strict), RunStatus::Failed);
    }

    #[test]
    fn test_all_passed() {
        let report = json!([
            { "elements": "skip me" },
            { "elements": [{ "steps": [{ "result": { "status": "passed" } }] }] }
        ]);
        assert_eq!(resolve(None, Some(&report)), RunStatus::Passed);
    }

    #[test]
    fn test_display_matches_serialization() {
        assert_eq!(RunStatus::Undefined.to_string(), "UNDEFINED");
        assert_eq!(serde_json::to_value(RunStatus::Passed).unwrap(), json!("PASSED"));
    }
}
