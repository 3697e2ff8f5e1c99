//! Fathom meeting recorder client
//!
//! Looks up the recording of a booked meeting so its link and summary can be
//! stored alongside the booking.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::debug;

use csops_common::config::FathomConfig;

use super::{check_status, http_client, join_url, IntegrationError};

/// Slack allowed between booked and recorded times
const MATCH_SLACK_MINUTES: i64 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct Invitee {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub markdown_formatted: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Meeting {
    #[serde(default)]
    pub title: Option<String>,
    pub url: String,
    #[serde(default)]
    pub share_url: Option<String>,
    pub scheduled_start_time: Option<DateTime<Utc>>,
    pub scheduled_end_time: Option<DateTime<Utc>>,
    pub recording_start_time: Option<DateTime<Utc>>,
    pub recording_end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub calendar_invitees: Vec<Invitee>,
    #[serde(default)]
    pub default_summary: Option<Summary>,
}

impl Meeting {
    fn window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.recording_start_time.or(self.scheduled_start_time)?;
        let end = self
            .recording_end_time
            .or(self.scheduled_end_time)
            .unwrap_or(start);
        Some((start, end))
    }

    /// Recording link to store (public share link when available)
    pub fn link(&self) -> &str {
        self.share_url.as_deref().unwrap_or(&self.url)
    }

    pub fn summary(&self) -> Option<&str> {
        self.default_summary
            .as_ref()
            .and_then(|s| s.markdown_formatted.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct MeetingPage {
    #[serde(default)]
    items: Vec<Meeting>,
}

/// Pick the meeting overlapping `[start, end]` that lists `email` as invitee
pub fn find_matching<'a>(
    meetings: &'a [Meeting],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    email: Option<&str>,
) -> Option<&'a Meeting> {
    let slack = Duration::minutes(MATCH_SLACK_MINUTES);
    meetings.iter().find(|m| {
        let overlaps = m
            .window()
            .map(|(m_start, m_end)| m_start <= end + slack && m_end >= start - slack)
            .unwrap_or(false);
        let invited = match email {
            Some(email) => m.calendar_invitees.iter().any(|i| {
                i.email
                    .as_deref()
                    .map(|e| e.eq_ignore_ascii_case(email))
                    .unwrap_or(false)
            }),
            None => true,
        };
        overlaps && invited
    })
}

#[derive(Clone)]
pub struct FathomClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl FathomClient {
    pub fn new(config: &FathomConfig) -> Result<Self, IntegrationError> {
        Ok(Self {
            http: http_client()?,
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
        })
    }

    /// GET /meetings created within a window around the booking
    pub async fn meetings_around(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Meeting>, IntegrationError> {
        let after = csops_common::time::to_db(start - Duration::hours(2));
        let before = csops_common::time::to_db(end + Duration::hours(12));
        debug!(after = %after, before = %before, "Listing Fathom meetings");

        let response = self
            .http
            .get(join_url(&self.base_url, "meetings"))
            .header("X-Api-Key", &self.api_key)
            .query(&[
                ("created_after", after.as_str()),
                ("created_before", before.as_str()),
                ("include_summary", "true"),
            ])
            .send()
            .await?;
        let page: MeetingPage = check_status(response).await?.json().await?;
        Ok(page.items)
    }
}
