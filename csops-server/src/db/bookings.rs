//! Cal.com and Calendly bookings
//!
//! Each provider keeps its own table keyed by the provider's identifier
//! (Cal.com `uid`, Calendly invitee URI). Reads go through a merged view.

use csops_common::{time, Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, SqlitePool};
use std::fmt;
use std::str::FromStr;

use super::{new_id, Visibility};

/// Booking provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provider {
    Calcom,
    Calendly,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Calcom => "CALCOM",
            Provider::Calendly => "CALENDLY",
        }
    }

    fn table(&self) -> &'static str {
        match self {
            Provider::Calcom => "calcom_bookings",
            Provider::Calendly => "calendly_bookings",
        }
    }

    fn key_column(&self) -> &'static str {
        match self {
            Provider::Calcom => "uid",
            Provider::Calendly => "invitee_uri",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts `calcom` / `CALCOM` / `calendly` / `CALENDLY` (path segments
/// and stored values)
impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "calcom" => Ok(Provider::Calcom),
            "calendly" => Ok(Provider::Calendly),
            other => Err(Error::InvalidInput(format!("Unknown booking provider: {}", other))),
        }
    }
}

/// Merged booking row
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Booking {
    pub id: String,
    pub provider: String,
    /// Cal.com uid or Calendly invitee URI
    pub external_id: String,
    pub company_id: Option<String>,
    pub title: String,
    pub start_time: String,
    pub end_time: String,
    pub status: String,
    pub attendee_email: Option<String>,
    pub attendee_name: Option<String>,
    pub meeting_url: Option<String>,
    pub recording_url: Option<String>,
    pub summary: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

const MERGED: &str = r#"
    SELECT id, 'CALCOM' AS provider, uid AS external_id, company_id, title, start_time, end_time,
           status, attendee_email, attendee_name, meeting_url, recording_url, summary,
           created_at, updated_at
    FROM calcom_bookings
    UNION ALL
    SELECT id, 'CALENDLY' AS provider, invitee_uri AS external_id, company_id, title, start_time,
           end_time, status, attendee_email, attendee_name, meeting_url, recording_url, summary,
           created_at, updated_at
    FROM calendly_bookings
"#;

/// Booking data as received from a provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingUpsert {
    pub external_id: String,
    /// Calendly scheduled-event URI
    pub event_uri: Option<String>,
    pub company_id: Option<String>,
    pub title: String,
    pub start_time: String,
    pub end_time: String,
    pub status: String,
    pub attendee_email: Option<String>,
    pub attendee_name: Option<String>,
    pub meeting_url: Option<String>,
}

/// Insert or update by provider key; returns the stored row
pub async fn upsert(pool: &SqlitePool, provider: Provider, booking: &BookingUpsert) -> Result<Booking> {
    let now = time::now_db();
    match provider {
        Provider::Calcom => {
            sqlx::query(
                r#"
                INSERT INTO calcom_bookings (id, uid, company_id, title, start_time, end_time, status,
                                             attendee_email, attendee_name, meeting_url,
                                             created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(uid) DO UPDATE SET
                    company_id = COALESCE(excluded.company_id, calcom_bookings.company_id),
                    title = excluded.title,
                    start_time = excluded.start_time,
                    end_time = excluded.end_time,
                    status = excluded.status,
                    attendee_email = COALESCE(excluded.attendee_email, calcom_bookings.attendee_email),
                    attendee_name = COALESCE(excluded.attendee_name, calcom_bookings.attendee_name),
                    meeting_url = COALESCE(excluded.meeting_url, calcom_bookings.meeting_url),
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(new_id())
            .bind(&booking.external_id)
            .bind(&booking.company_id)
            .bind(&booking.title)
            .bind(&booking.start_time)
            .bind(&booking.end_time)
            .bind(&booking.status)
            .bind(&booking.attendee_email)
            .bind(&booking.attendee_name)
            .bind(&booking.meeting_url)
            .bind(&now)
            .bind(&now)
            .execute(pool)
            .await?;
        }
        Provider::Calendly => {
            sqlx::query(
                r#"
                INSERT INTO calendly_bookings (id, invitee_uri, event_uri, company_id, title,
                                               start_time, end_time, status, attendee_email,
                                               attendee_name, meeting_url, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(invitee_uri) DO UPDATE SET
                    company_id = COALESCE(excluded.company_id, calendly_bookings.company_id),
                    title = excluded.title,
                    start_time = excluded.start_time,
                    end_time = excluded.end_time,
                    status = excluded.status,
                    attendee_email = COALESCE(excluded.attendee_email, calendly_bookings.attendee_email),
                    attendee_name = COALESCE(excluded.attendee_name, calendly_bookings.attendee_name),
                    meeting_url = COALESCE(excluded.meeting_url, calendly_bookings.meeting_url),
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(new_id())
            .bind(&booking.external_id)
            .bind(booking.event_uri.as_deref().unwrap_or_default())
            .bind(&booking.company_id)
            .bind(&booking.title)
            .bind(&booking.start_time)
            .bind(&booking.end_time)
            .bind(&booking.status)
            .bind(&booking.attendee_email)
            .bind(&booking.attendee_name)
            .bind(&booking.meeting_url)
            .bind(&now)
            .bind(&now)
            .execute(pool)
            .await?;
        }
    }

    find_by_external_id(pool, provider, &booking.external_id)
        .await?
        .ok_or_else(|| Error::Internal("Upserted booking not found".to_string()))
}

/// Set status CANCELLED; returns the row when it exists
pub async fn mark_cancelled(pool: &SqlitePool, provider: Provider, external_id: &str) -> Result<Option<Booking>> {
    sqlx::query(&format!(
        "UPDATE {} SET status = 'CANCELLED', updated_at = ? WHERE {} = ?",
        provider.table(),
        provider.key_column()
    ))
    .bind(time::now_db())
    .bind(external_id)
    .execute(pool)
    .await?;
    find_by_external_id(pool, provider, external_id).await
}

pub async fn find_by_external_id(
    pool: &SqlitePool,
    provider: Provider,
    external_id: &str,
) -> Result<Option<Booking>> {
    let booking = sqlx::query_as::<_, Booking>(&format!(
        "SELECT * FROM ({}) WHERE provider = ? AND external_id = ?",
        MERGED
    ))
    .bind(provider.as_str())
    .bind(external_id)
    .fetch_optional(pool)
    .await?;
    Ok(booking)
}

/// Look up by our row id
pub async fn get(pool: &SqlitePool, provider: Provider, id: &str) -> Result<Option<Booking>> {
    let booking = sqlx::query_as::<_, Booking>(&format!(
        "SELECT * FROM ({}) WHERE provider = ? AND id = ?",
        MERGED
    ))
    .bind(provider.as_str())
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(booking)
}

/// Calendly scheduled-event URI for an invitee booking
pub async fn calendly_event_uri(pool: &SqlitePool, id: &str) -> Result<Option<String>> {
    let uri = sqlx::query_scalar("SELECT event_uri FROM calendly_bookings WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(uri)
}

/// Both providers' bookings for a company, by start time
pub async fn list_for_company(pool: &SqlitePool, company_id: &str) -> Result<Vec<Booking>> {
    let rows = sqlx::query_as::<_, Booking>(&format!(
        "SELECT * FROM ({}) WHERE company_id = ? ORDER BY start_time",
        MERGED
    ))
    .bind(company_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Non-cancelled bookings of visible companies starting in `[from, to)`
pub async fn upcoming(pool: &SqlitePool, visibility: &Visibility, from: &str, to: &str) -> Result<Vec<Booking>> {
    let mut qb = QueryBuilder::new(format!(
        "SELECT * FROM ({}) WHERE status != 'CANCELLED' AND company_id IS NOT NULL AND start_time >= ",
        MERGED
    ));
    qb.push_bind(from.to_string())
        .push(" AND start_time < ")
        .push_bind(to.to_string());
    visibility.push_filter(&mut qb, "company_id");
    qb.push(" ORDER BY start_time");
    let rows = qb.build_query_as::<Booking>().fetch_all(pool).await?;
    Ok(rows)
}

/// Non-cancelled meetings of a company; None when it never booked any
pub async fn recent_meeting_count(pool: &SqlitePool, company_id: &str, since: &str, until: &str) -> Result<Option<i64>> {
    let (ever, recent): (i64, i64) = sqlx::query_as(&format!(
        r#"
        SELECT COUNT(*),
               COALESCE(SUM(start_time >= ? AND start_time <= ? AND status != 'CANCELLED'), 0)
        FROM ({}) WHERE company_id = ?
        "#,
        MERGED
    ))
    .bind(since)
    .bind(until)
    .bind(company_id)
    .fetch_one(pool)
    .await?;
    Ok((ever > 0).then_some(recent))
}

/// Whether a company has any non-cancelled booking (kickoff)
pub async fn has_active_booking(pool: &SqlitePool, company_id: &str) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar(&format!(
        "SELECT 1 FROM ({}) WHERE company_id = ? AND status != 'CANCELLED' LIMIT 1",
        MERGED
    ))
    .bind(company_id)
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

pub async fn set_recording(
    pool: &SqlitePool,
    provider: Provider,
    id: &str,
    recording_url: Option<&str>,
    summary: Option<&str>,
) -> Result<()> {
    sqlx::query(&format!(
        "UPDATE {} SET recording_url = ?, summary = ?, updated_at = ? WHERE id = ?",
        provider.table()
    ))
    .bind(recording_url)
    .bind(summary)
    .bind(time::now_db())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use csops_common::db::init_memory_database;

    fn calcom(uid: &str, company_id: Option<&str>, start: &str) -> BookingUpsert {
        BookingUpsert {
            external_id: uid.to_string(),
            company_id: company_id.map(str::to_string),
            title: "Kickoff".to_string(),
            start_time: start.to_string(),
            end_time: start.to_string(),
            status: "ACCEPTED".to_string(),
            attendee_email: Some("ana@acme.com".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!("calcom".parse::<Provider>().unwrap(), Provider::Calcom);
        assert_eq!("CALENDLY".parse::<Provider>().unwrap(), Provider::Calendly);
        assert!("zoom".parse::<Provider>().is_err());
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_and_keeps_company() {
        let pool = init_memory_database().await.unwrap();
        let company = crate::db::companies::insert(&pool, "Acme", None, None)
            .await
            .unwrap();

        let first = upsert(&pool, Provider::Calcom, &calcom("uid-1", Some(&company.id), "2025-03-01T10:00:00.000Z"))
            .await
            .unwrap();
        let second = upsert(&pool, Provider::Calcom, &calcom("uid-1", None, "2025-03-02T10:00:00.000Z"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.company_id.as_deref(), Some(company.id.as_str()));
        assert_eq!(second.start_time, "2025-03-02T10:00:00.000Z");

        let cancelled = mark_cancelled(&pool, Provider::Calcom, "uid-1").await.unwrap().unwrap();
        assert_eq!(cancelled.status, "CANCELLED");
        assert!(!has_active_booking(&pool, &company.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_recent_meeting_count() {
        let pool = init_memory_database().await.unwrap();
        let company = crate::db::companies::insert(&pool, "Acme", None, None)
            .await
            .unwrap();
        let since = "2025-03-01T00:00:00.000Z";
        let until = "2025-03-31T00:00:00.000Z";

        assert_eq!(recent_meeting_count(&pool, &company.id, since, until).await.unwrap(), None);

        upsert(&pool, Provider::Calcom, &calcom("old", Some(&company.id), "2025-01-01T10:00:00.000Z"))
            .await
            .unwrap();
        assert_eq!(recent_meeting_count(&pool, &company.id, since, until).await.unwrap(), Some(0));

        upsert(&pool, Provider::Calcom, &calcom("new", Some(&company.id), "2025-03-10T10:00:00.000Z"))
            .await
            .unwrap();
        assert_eq!(recent_meeting_count(&pool, &company.id, since, until).await.unwrap(), Some(1));
    }
}
