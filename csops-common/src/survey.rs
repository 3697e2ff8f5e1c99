//! Survey kinds, answer validation and result aggregation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::health::net_promoter_score;
use crate::{Error, Result};

/// Survey kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SurveyKind {
    /// Likelihood to recommend, 0-10
    Nps,
    /// Satisfaction, 1-5
    Csat,
    /// Whether a completed delivery is in use
    Adoption,
}

impl SurveyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SurveyKind::Nps => "NPS",
            SurveyKind::Csat => "CSAT",
            SurveyKind::Adoption => "ADOPTION",
        }
    }
}

impl fmt::Display for SurveyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SurveyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NPS" => Ok(SurveyKind::Nps),
            "CSAT" => Ok(SurveyKind::Csat),
            "ADOPTION" => Ok(SurveyKind::Adoption),
            other => Err(Error::InvalidInput(format!("Unknown survey kind: {}", other))),
        }
    }
}

/// Survey lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SurveyStatus {
    Scheduled,
    Open,
    Closed,
}

impl SurveyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SurveyStatus::Scheduled => "SCHEDULED",
            SurveyStatus::Open => "OPEN",
            SurveyStatus::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for SurveyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SurveyStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SCHEDULED" => Ok(SurveyStatus::Scheduled),
            "OPEN" => Ok(SurveyStatus::Open),
            "CLOSED" => Ok(SurveyStatus::Closed),
            other => Err(Error::InvalidInput(format!("Unknown survey status: {}", other))),
        }
    }
}

/// Answer to an adoption check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdoptionAnswer {
    Using,
    Partial,
    NotUsing,
}

impl AdoptionAnswer {
    pub fn score(&self) -> i64 {
        match self {
            AdoptionAnswer::Using => 100,
            AdoptionAnswer::Partial => 50,
            AdoptionAnswer::NotUsing => 0,
        }
    }
}

/// Raw answer as submitted
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SurveyAnswer {
    pub score: Option<i64>,
    pub adoption: Option<AdoptionAnswer>,
}

/// Validate an answer for `kind` and return the stored score
pub fn score_answer(kind: SurveyKind, answer: &SurveyAnswer) -> Result<i64> {
    match kind {
        SurveyKind::Nps => match answer.score {
            Some(s) if (0..=10).contains(&s) => Ok(s),
            Some(s) => Err(Error::InvalidInput(format!("NPS score must be 0-10, got {}", s))),
            None => Err(Error::InvalidInput("NPS survey requires a score".to_string())),
        },
        SurveyKind::Csat => match answer.score {
            Some(s) if (1..=5).contains(&s) => Ok(s),
            Some(s) => Err(Error::InvalidInput(format!("CSAT score must be 1-5, got {}", s))),
            None => Err(Error::InvalidInput("CSAT survey requires a score".to_string())),
        },
        SurveyKind::Adoption => answer.adoption.map(|a| a.score()).ok_or_else(|| {
            Error::InvalidInput(
                "Adoption check requires adoption = USING | PARTIAL | NOT_USING".to_string(),
            )
        }),
    }
}

/// Aggregated survey results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurveyResults {
    pub responses: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nps: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promoters: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passives: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detractors: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
}

/// Aggregate stored scores for a survey of `kind`
pub fn aggregate(kind: SurveyKind, scores: &[i64]) -> SurveyResults {
    let responses = scores.len() as i64;
    let average = if scores.is_empty() {
        None
    } else {
        let avg = scores.iter().sum::<i64>() as f64 / scores.len() as f64;
        Some((avg * 100.0).round() / 100.0)
    };

    match kind {
        SurveyKind::Nps => SurveyResults {
            responses,
            nps: net_promoter_score(scores),
            promoters: Some(scores.iter().filter(|s| **s >= 9).count() as i64),
            passives: Some(scores.iter().filter(|s| (7..=8).contains(*s)).count() as i64),
            detractors: Some(scores.iter().filter(|s| **s <= 6).count() as i64),
            average,
        },
        SurveyKind::Csat | SurveyKind::Adoption => SurveyResults {
            responses,
            average,
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(s: i64) -> SurveyAnswer {
        SurveyAnswer {
            score: Some(s),
            adoption: None,
        }
    }

    #[test]
    fn test_nps_bounds() {
        assert_eq!(score_answer(SurveyKind::Nps, &score(0)).unwrap(), 0);
        assert_eq!(score_answer(SurveyKind::Nps, &score(10)).unwrap(), 10);
        assert!(score_answer(SurveyKind::Nps, &score(11)).is_err());
        assert!(score_answer(SurveyKind::Nps, &SurveyAnswer::default()).is_err());
    }

    #[test]
    fn test_csat_bounds() {
        assert!(score_answer(SurveyKind::Csat, &score(0)).is_err());
        assert_eq!(score_answer(SurveyKind::Csat, &score(5)).unwrap(), 5);
        assert!(score_answer(SurveyKind::Csat, &score(6)).is_err());
    }

    #[test]
    fn test_adoption_mapping() {
        let answer = SurveyAnswer {
            score: None,
            adoption: Some(AdoptionAnswer::Partial),
        };
        assert_eq!(score_answer(SurveyKind::Adoption, &answer).unwrap(), 50);
        assert!(score_answer(SurveyKind::Adoption, &score(100)).is_err());

        let parsed: AdoptionAnswer = serde_json::from_str("\"NOT_USING\"").unwrap();
        assert_eq!(parsed.score(), 0);
    }

    #[test]
    fn test_aggregate_nps() {
        let results = aggregate(SurveyKind::Nps, &[10, 9, 8, 6]);
        assert_eq!(results.responses, 4);
        assert_eq!(results.nps, Some(25));
        assert_eq!(results.promoters, Some(2));
        assert_eq!(results.passives, Some(1));
        assert_eq!(results.detractors, Some(1));
        assert_eq!(results.average, Some(8.25));
    }

    #[test]
    fn test_aggregate_empty_csat() {
        let results = aggregate(SurveyKind::Csat, &[]);
        assert_eq!(results.responses, 0);
        assert_eq!(results.average, None);
        assert_eq!(results.nps, None);
    }
}
