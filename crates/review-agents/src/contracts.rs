//! Typed response contracts.
//!
//! Each backend step has one response struct with explicit required fields.
//! Anything that fails to deserialize or to pass `validate` surfaces as
//! [`DigestError::Validation`], which is what triggers the strict retry.

use batching::records::SummaryBody;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{DigestError, Stage};

pub const HEADLINE_MAX_CHARS: usize = 90;
pub const MAX_HIGHLIGHTS: usize = 7;
pub const MAX_WATCHOUTS: usize = 6;
pub const MAX_BEST_FOR: usize = 5;
pub const MAX_NOT_IDEAL_FOR: usize = 4;
pub const MAX_EVIDENCE_NOTES: usize = 8;

/// Response for one chunk of reviews.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChunkSummaryResponse {
    /// 80-140 words on what these reviews say.
    pub chunk_summary: String,
    pub top_highlights: Vec<String>,
    pub watchouts_or_gaps: Vec<String>,
    pub best_for: Vec<String>,
    pub not_ideal_for: Vec<String>,
    pub evidence_notes: Vec<String>,
}

/// Response consolidating every chunk of a project.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProjectSummaryResponse {
    pub headline: String,
    pub overall_summary: String,
    pub top_highlights: Vec<String>,
    pub watchouts_or_gaps: Vec<String>,
    pub best_for: Vec<String>,
    pub not_ideal_for: Vec<String>,
    pub evidence_notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TagItem {
    pub review_uid: String,
    pub tags: Vec<String>,
}

/// Response for a batch of reviews.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TagBatchResponse {
    pub items: Vec<TagItem>,
}

/// Response for a single-review regeneration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SingleTagResponse {
    pub tags: Vec<String>,
}

/// Strip a Markdown code fence and any prose around the outermost JSON object.
fn json_payload(raw: &str) -> &str {
    let trimmed = raw.trim();
    let unfenced = trimmed
        .strip_prefix("```")
        .map(|rest| rest.split_once('\n').map_or("", |(_, body)| body))
        .map(|body| body.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed);
    match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => &unfenced[start..=end],
        _ => unfenced,
    }
}

/// Deserialize a raw response into `T`.
pub fn parse_response<T: DeserializeOwned>(stage: Stage, raw: &str) -> Result<T, DigestError> {
    serde_json::from_str(json_payload(raw))
        .map_err(|e| DigestError::validation(stage, format!("not the expected JSON shape: {e}")))
}

/// Trim items, drop blanks, keep at most `max`.
fn clean_list(items: Vec<String>, max: usize) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .take(max)
        .collect()
}

fn required_text(stage: Stage, field: &str, value: String) -> Result<String, DigestError> {
    let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if value.is_empty() {
        return Err(DigestError::validation(stage, format!("{field} is empty")));
    }
    Ok(value)
}

/// Cut a headline to [`HEADLINE_MAX_CHARS`] without an ellipsis.
pub fn cap_headline(headline: &str) -> String {
    let cut: String = headline.chars().take(HEADLINE_MAX_CHARS).collect();
    cut.trim_end().to_string()
}

fn body_from_lists(
    top_highlights: Vec<String>,
    watchouts_or_gaps: Vec<String>,
    best_for: Vec<String>,
    not_ideal_for: Vec<String>,
    evidence_notes: Vec<String>,
) -> SummaryBody {
    SummaryBody {
        top_highlights: clean_list(top_highlights, MAX_HIGHLIGHTS),
        watchouts_or_gaps: clean_list(watchouts_or_gaps, MAX_WATCHOUTS),
        best_for: clean_list(best_for, MAX_BEST_FOR),
        not_ideal_for: clean_list(not_ideal_for, MAX_NOT_IDEAL_FOR),
        evidence_notes: clean_list(evidence_notes, MAX_EVIDENCE_NOTES),
    }
}

impl ChunkSummaryResponse {
    /// Validate and normalize into the summary text plus list fields.
    pub fn validate(self) -> Result<(String, SummaryBody), DigestError> {
        let stage = Stage::ChunkSummary;
        let summary = required_text(stage, "chunk_summary", self.chunk_summary)?;
        let body = body_from_lists(
            self.top_highlights,
            self.watchouts_or_gaps,
            self.best_for,
            self.not_ideal_for,
            self.evidence_notes,
        );
        if body.top_highlights.is_empty() && body.watchouts_or_gaps.is_empty() {
            return Err(DigestError::validation(
                stage,
                "neither top_highlights nor watchouts_or_gaps has an entry",
            ));
        }
        Ok((summary, body))
    }
}

/// Validated project-level fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidProjectSummary {
    pub headline: String,
    pub overall_summary: String,
    pub body: SummaryBody,
}

impl ProjectSummaryResponse {
    pub fn validate(self) -> Result<ValidProjectSummary, DigestError> {
        let stage = Stage::ProjectSummary;
        let headline = cap_headline(&required_text(stage, "headline", self.headline)?);
        let overall_summary = required_text(stage, "overall_summary", self.overall_summary)?;
        let body = body_from_lists(
            self.top_highlights,
            self.watchouts_or_gaps,
            self.best_for,
            self.not_ideal_for,
            self.evidence_notes,
        );
        if body.top_highlights.is_empty() {
            return Err(DigestError::validation(stage, "top_highlights is empty"));
        }
        if body.evidence_notes.is_empty() {
            return Err(DigestError::validation(stage, "evidence_notes is empty"));
        }
        Ok(ValidProjectSummary {
            headline,
            overall_summary,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_json(headline: &str, highlights: &[&str]) -> String {
        serde_json::json!({
            "headline": headline,
            "overall_summary": "Residents describe a calm   development.",
            "top_highlights": highlights,
            "watchouts_or_gaps": ["Parking is tight"],
            "best_for": ["Families"],
            "not_ideal_for": ["Night owls"],
            "evidence_notes": ["Several mention the pool"],
        })
        .to_string()
    }

    #[test]
    fn test_parse_tolerates_code_fences() {
        let raw = format!("```json\n{}\n```", project_json("Calm", &["Pool"]));
        let parsed: ProjectSummaryResponse = parse_response(Stage::ProjectSummary, &raw).unwrap();
        assert_eq!(parsed.headline, "Calm");
    }

    #[test]
    fn test_parse_tolerates_leading_prose() {
        let raw = format!("Here you go: {} Thanks!", project_json("Calm", &["Pool"]));
        assert!(parse_response::<ProjectSummaryResponse>(Stage::ProjectSummary, &raw).is_ok());
    }

    #[test]
    fn test_missing_field_is_validation_error() {
        let err = parse_response::<ProjectSummaryResponse>(Stage::ProjectSummary, r#"{"headline":"x"}"#)
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_project_validate_caps_and_normalizes() {
        let long = "H".repeat(120);
        let highlights: Vec<String> = (0..10).map(|i| format!("h{i}")).collect();
        let refs: Vec<&str> = highlights.iter().map(String::as_str).collect();
        let parsed: ProjectSummaryResponse =
            parse_response(Stage::ProjectSummary, &project_json(&long, &refs)).unwrap();
        let valid = parsed.validate().unwrap();
        assert_eq!(valid.headline.chars().count(), HEADLINE_MAX_CHARS);
        assert_eq!(valid.body.top_highlights.len(), MAX_HIGHLIGHTS);
        assert_eq!(valid.overall_summary, "Residents describe a calm development.");
    }

    #[test]
    fn test_project_validate_rejects_empty_highlights() {
        let parsed: ProjectSummaryResponse =
            parse_response(Stage::ProjectSummary, &project_json("Calm", &["  "])).unwrap();
        assert!(parsed.validate().unwrap_err().is_validation());
    }

    #[test]
    fn test_chunk_validate_requires_summary_text() {
        let response = ChunkSummaryResponse {
            chunk_summary: "   ".into(),
            top_highlights: vec!["Views".into()],
            watchouts_or_gaps: vec![],
            best_for: vec![],
            not_ideal_for: vec![],
            evidence_notes: vec![],
        };
        assert!(response.validate().is_err());
    }
}
