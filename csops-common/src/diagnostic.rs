//! Diagnostic forms: question definitions and answer validation

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Inclusive range accepted for SCALE answers
pub const SCALE_MIN: i64 = 1;
pub const SCALE_MAX: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionKind {
    Text,
    Scale,
    Choice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub kind: QuestionKind,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FormStatus {
    Draft,
    Sent,
    Closed,
}

impl FormStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormStatus::Draft => "DRAFT",
            FormStatus::Sent => "SENT",
            FormStatus::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for FormStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "DRAFT" => Ok(FormStatus::Draft),
            "SENT" => Ok(FormStatus::Sent),
            "CLOSED" => Ok(FormStatus::Closed),
            other => Err(Error::InvalidInput(format!("Unknown form status: {}", other))),
        }
    }
}

/// Check a form definition before it is stored
pub fn validate_questions(questions: &[Question]) -> Result<()> {
    if questions.is_empty() {
        return Err(Error::InvalidInput(
            "A diagnostic needs at least one question".to_string(),
        ));
    }

    let mut ids = HashSet::new();
    for question in questions {
        if question.id.trim().is_empty() {
            return Err(Error::InvalidInput("Question id must not be blank".to_string()));
        }
        if !ids.insert(question.id.as_str()) {
            return Err(Error::InvalidInput(format!(
                "Duplicate question id: {}",
                question.id
            )));
        }
        if question.text.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "Question {} has no text",
                question.id
            )));
        }
        if question.kind == QuestionKind::Choice && question.options.len() < 2 {
            return Err(Error::InvalidInput(format!(
                "Choice question {} needs at least two options",
                question.id
            )));
        }
    }
    Ok(())
}

/// Validate submitted answers (question id -> value) against the form.
///
/// Answers to unknown question ids are rejected. Null or blank answers count
/// as unanswered.
pub fn validate_answers(questions: &[Question], answers: &HashMap<String, Value>) -> Result<()> {
    let known: HashSet<&str> = questions.iter().map(|q| q.id.as_str()).collect();
    if let Some(unknown) = answers.keys().find(|k| !known.contains(k.as_str())) {
        return Err(Error::InvalidInput(format!("Unknown question id: {}", unknown)));
    }

    for question in questions {
        let answer = answers.get(&question.id).filter(|v| !is_blank(v));
        let Some(answer) = answer else {
            if question.required {
                return Err(Error::InvalidInput(format!(
                    "Question {} is required",
                    question.id
                )));
            }
            continue;
        };

        match question.kind {
            QuestionKind::Text => {
                if !answer.is_string() {
                    return Err(Error::InvalidInput(format!(
                        "Question {} expects text",
                        question.id
                    )));
                }
            }
            QuestionKind::Scale => match answer.as_i64() {
                Some(v) if (SCALE_MIN..=SCALE_MAX).contains(&v) => {}
                _ => {
                    return Err(Error::InvalidInput(format!(
                        "Question {} expects an integer from {} to {}",
                        question.id, SCALE_MIN, SCALE_MAX
                    )))
                }
            },
            QuestionKind::Choice => {
                let valid = answer
                    .as_str()
                    .map(|choice| question.options.iter().any(|o| o == choice))
                    .unwrap_or(false);
                if !valid {
                    return Err(Error::InvalidInput(format!(
                        "Question {} expects one of: {}",
                        question.id,
                        question.options.join(", ")
                    )));
                }
            }
        }
    }
    Ok(())
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}
