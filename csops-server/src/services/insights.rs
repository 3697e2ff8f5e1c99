//! AI insight generation
//!
//! Builds a prompt from diagnostic answers or from a company's current
//! state, asks the model for a JSON object and stores the parsed result.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::fmt::Write;
use tracing::{info, warn};

use csops_common::diagnostic::QuestionKind;
use csops_common::health::HealthBreakdown;

use crate::db::companies::Company;
use crate::db::deliveries::Delivery;
use crate::db::diagnostics::{DiagnosticForm, DiagnosticResponse};
use crate::db::insights::{self, Insight};
use crate::error::{ApiError, ApiResult};

use super::openai_client::OpenAiClient;
use super::IntegrationError;

pub const SYSTEM_PROMPT: &str = "You are a Customer Success analyst. Read the account information \
and reply with a JSON object of the form \
{\"summary\": string, \"opportunities\": [{\"title\": string, \"description\": string, \
\"impact\": \"HIGH\" | \"MEDIUM\" | \"LOW\"}], \"risks\": [string]}. \
Be concrete and brief. Reply with JSON only.";

/// Where an insight came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Diagnostic,
    Company,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Diagnostic => "DIAGNOSTIC",
            Source::Company => "COMPANY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Impact {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub title: String,
    pub description: String,
    pub impact: Impact,
}

/// Expected model output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightContent {
    pub summary: String,
    #[serde(default)]
    pub opportunities: Vec<Opportunity>,
    #[serde(default)]
    pub risks: Vec<String>,
}

/// Parse the model's reply, rejecting anything but the expected shape
pub fn parse_content(raw: &str) -> Result<InsightContent, IntegrationError> {
    let content: InsightContent = serde_json::from_str(raw.trim())
        .map_err(|e| IntegrationError::Parse(format!("Model returned unexpected output: {}", e)))?;
    if content.summary.trim().is_empty() {
        return Err(IntegrationError::Parse("Model returned an empty summary".to_string()));
    }
    Ok(content)
}

pub fn diagnostic_prompt(company: &Company, form: &DiagnosticForm, responses: &[DiagnosticResponse]) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Company: {}", company.name);
    let _ = writeln!(prompt, "Diagnostic: {}", form.title);
    let _ = writeln!(prompt, "Respondents: {}", responses.len());

    for question in &form.questions {
        let _ = writeln!(prompt);
        match question.kind {
            QuestionKind::Scale => {
                let _ = writeln!(prompt, "Q: {} (scale 1-10)", question.text);
            }
            QuestionKind::Choice => {
                let _ = writeln!(prompt, "Q: {} (options: {})", question.text, question.options.join(", "));
            }
            QuestionKind::Text => {
                let _ = writeln!(prompt, "Q: {}", question.text);
            }
        }
        for response in responses {
            let who = response.user_name.as_deref().unwrap_or("respondent");
            match response.answers.get(&question.id) {
                Some(serde_json::Value::String(s)) => {
                    let _ = writeln!(prompt, "- {}: {}", who, s.trim());
                }
                Some(serde_json::Value::Null) | None => {}
                Some(other) => {
                    let _ = writeln!(prompt, "- {}: {}", who, other);
                }
            }
        }
    }
    prompt
}

pub fn company_prompt(
    company: &Company,
    health: &HealthBreakdown,
    open_deliveries: &[Delivery],
    comments: &[(String, i64, String)],
) -> String {
    let fmt_component = |c: Option<f64>| c.map(|v| format!("{:.0}", v)).unwrap_or_else(|| "n/a".to_string());

    let mut prompt = String::new();
    let _ = writeln!(prompt, "Company: {}", company.name);
    let _ = writeln!(prompt, "Onboarding step: {}", company.onboarding_step);
    let _ = writeln!(
        prompt,
        "Health: {} ({}); delivery {}, satisfaction {}, engagement {}, adoption {}",
        health.score,
        health.status.as_str(),
        fmt_component(health.delivery),
        fmt_component(health.satisfaction),
        fmt_component(health.engagement),
        fmt_component(health.adoption),
    );

    let _ = writeln!(prompt, "\nOpen deliveries:");
    if open_deliveries.is_empty() {
        let _ = writeln!(prompt, "- none");
    }
    for d in open_deliveries {
        let _ = write!(prompt, "- {} [{} {}%]", d.title, d.status, d.progress);
        if let Some(due) = &d.due_date {
            let _ = write!(prompt, " due {}", due);
        }
        if let Some(reason) = &d.blocked_reason {
            let _ = write!(prompt, " blocked: {}", reason);
        }
        let _ = writeln!(prompt);
    }

    let _ = writeln!(prompt, "\nRecent survey comments:");
    if comments.is_empty() {
        let _ = writeln!(prompt, "- none");
    }
    for (kind, score, comment) in comments {
        let _ = writeln!(prompt, "- {} {}: {}", kind, score, comment);
    }
    prompt
}

/// Run the model over `prompt` and persist the parsed insight
pub async fn generate(
    db: &SqlitePool,
    client: &OpenAiClient,
    company_id: &str,
    source: Source,
    source_id: Option<&str>,
    prompt: &str,
    created_by: &str,
) -> ApiResult<Insight> {
    let raw = client.complete_json(SYSTEM_PROMPT, prompt).await?;
    let content = parse_content(&raw).map_err(|e| {
        warn!(company_id = %company_id, source = source.as_str(), "Discarding model output: {}", e);
        ApiError::from(e)
    })?;

    let value = serde_json::to_value(&content)
        .map_err(|e| ApiError::Internal(format!("Failed to encode insight: {}", e)))?;
    let insight = insights::insert(
        db,
        company_id,
        source.as_str(),
        source_id,
        client.model(),
        &value,
        created_by,
    )
    .await?;

    info!(
        company_id = %company_id,
        insight_id = %insight.id,
        source = source.as_str(),
        opportunities = content.opportunities.len(),
        "Stored AI insight"
    );
    Ok(insight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use csops_common::diagnostic::{FormStatus, Question};
    use std::collections::HashMap;

    #[test]
    fn test_parse_content() {
        let raw = r#"{
            "summary": "Good start",
            "opportunities": [{"title": "Upsell", "description": "Add seats", "impact": "HIGH"}],
            "risks": ["Champion leaving"]
        }"#;
        let content = parse_content(raw).unwrap();
        assert_eq!(content.opportunities[0].impact, Impact::High);
        assert_eq!(content.risks, vec!["Champion leaving".to_string()]);
    }

    #[test]
    fn test_parse_content_rejects_bad_output() {
        assert!(parse_content("not json").is_err());
        assert!(parse_content(r#"{"summary": "  "}"#).is_err());
        assert!(parse_content(
            r#"{"summary": "x", "opportunities": [{"title": "a", "description": "b", "impact": "HUGE"}]}"#
        )
        .is_err());
        assert!(parse_content(r#"{"opportunities": []}"#).is_err());
    }

    #[test]
    fn test_diagnostic_prompt_includes_answers() {
        let company = Company {
            id: "c1".to_string(),
            name: "Acme".to_string(),
            domain: None,
            cs_owner_id: None,
            health_score: 60,
            health_status: "ATTENTION".to_string(),
            health_updated_at: None,
            onboarding_step: "WELCOME".to_string(),
            created_at: String::new(),
            updated_at: String::new(),
        };
        let form = DiagnosticForm {
            id: "f1".to_string(),
            company_id: "c1".to_string(),
            title: "Kickoff diagnostic".to_string(),
            questions: vec![
                Question {
                    id: "goal".to_string(),
                    text: "Main goal?".to_string(),
                    kind: QuestionKind::Text,
                    options: vec![],
                    required: true,
                },
                Question {
                    id: "maturity".to_string(),
                    text: "Process maturity".to_string(),
                    kind: QuestionKind::Scale,
                    options: vec![],
                    required: true,
                },
            ],
            status: FormStatus::Sent,
            created_by: None,
            sent_at: None,
            created_at: String::new(),
        };
        let mut answers = HashMap::new();
        answers.insert("goal".to_string(), serde_json::json!("Cut churn"));
        answers.insert("maturity".to_string(), serde_json::json!(4));
        let responses = vec![DiagnosticResponse {
            id: "r1".to_string(),
            form_id: "f1".to_string(),
            user_id: "u1".to_string(),
            user_name: Some("Ana".to_string()),
            answers,
            submitted_at: String::new(),
        }];

        let prompt = diagnostic_prompt(&company, &form, &responses);
        assert!(prompt.contains("Company: Acme"));
        assert!(prompt.contains("- Ana: Cut churn"));
        assert!(prompt.contains("Q: Process maturity (scale 1-10)"));
        assert!(prompt.contains("- Ana: 4"));
    }
}
