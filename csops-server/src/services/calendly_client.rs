//! Calendly API v2 client

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use csops_common::config::CalendlyConfig;

use super::{check_status, http_client, join_url, IntegrationError};

#[derive(Debug, Deserialize)]
struct Resource<T> {
    resource: T,
}

#[derive(Debug, Deserialize)]
struct CurrentUser {
    current_organization: String,
}

#[derive(Debug, Deserialize)]
struct SchedulingLink {
    booking_url: String,
}

#[derive(Clone)]
pub struct CalendlyClient {
    http: reqwest::Client,
    api_token: String,
    organization_uri: Option<String>,
    base_url: String,
}

impl CalendlyClient {
    pub fn new(config: &CalendlyConfig) -> Result<Self, IntegrationError> {
        Ok(Self {
            http: http_client()?,
            api_token: config.api_token.clone(),
            organization_uri: config.organization_uri.clone(),
            base_url: config.base_url.clone(),
        })
    }

    /// Configured organization, or the token owner's current organization
    async fn organization(&self) -> Result<String, IntegrationError> {
        if let Some(uri) = &self.organization_uri {
            return Ok(uri.clone());
        }
        let response = self
            .http
            .get(join_url(&self.base_url, "users/me"))
            .bearer_auth(&self.api_token)
            .send()
            .await?;
        let me: Resource<CurrentUser> = check_status(response).await?.json().await?;
        Ok(me.resource.current_organization)
    }

    /// GET /event_types?organization=...
    pub async fn event_types(&self) -> Result<Value, IntegrationError> {
        let organization = self.organization().await?;
        debug!(organization = %organization, "Fetching Calendly event types");

        let response = self
            .http
            .get(join_url(&self.base_url, "event_types"))
            .bearer_auth(&self.api_token)
            .query(&[("organization", organization.as_str()), ("active", "true")])
            .send()
            .await?;
        let body: Value = check_status(response).await?.json().await?;
        Ok(body.get("collection").cloned().unwrap_or(Value::Array(vec![])))
    }

    /// POST /scheduling_links: single-use booking URL for an event type
    pub async fn create_scheduling_link(&self, event_type_uri: &str) -> Result<String, IntegrationError> {
        let response = self
            .http
            .post(join_url(&self.base_url, "scheduling_links"))
            .bearer_auth(&self.api_token)
            .json(&json!({
                "max_event_count": 1,
                "owner": event_type_uri,
                "owner_type": "EventType",
            }))
            .send()
            .await?;
        let link: Resource<SchedulingLink> = check_status(response).await?.json().await?;
        Ok(link.resource.booking_url)
    }

    /// POST /scheduled_events/{uuid}/cancellation
    pub async fn cancel_event(&self, event_uri: &str, reason: &str) -> Result<(), IntegrationError> {
        let uuid = event_uuid(event_uri)
            .ok_or_else(|| IntegrationError::Parse(format!("Bad event URI: {}", event_uri)))?;
        let response = self
            .http
            .post(join_url(
                &self.base_url,
                &format!("scheduled_events/{}/cancellation", uuid),
            ))
            .bearer_auth(&self.api_token)
            .json(&json!({ "reason": reason }))
            .send()
            .await?;
        check_status(response).await?;

        info!(event = %uuid, "Cancelled Calendly event");
        Ok(())
    }
}

/// Last path segment of a Calendly resource URI
pub fn event_uuid(uri: &str) -> Option<&str> {
    uri.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains(':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_uuid() {
        assert_eq!(
            event_uuid("https://api.calendly.com/scheduled_events/ABC123"),
            Some("ABC123")
        );
        assert_eq!(
            event_uuid("https://api.calendly.com/scheduled_events/ABC123/"),
            Some("ABC123")
        );
        assert_eq!(event_uuid(""), None);
    }
}
