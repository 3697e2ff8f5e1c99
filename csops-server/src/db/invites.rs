//! Invitations

use csops_common::{time, Result, Role};
use serde::Serialize;
use sqlx::SqlitePool;

use super::new_id;
use super::users::normalize_email;

const COLUMNS: &str =
    "id, email, role, company_id, token, invited_by, expires_at, accepted_at, created_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Invite {
    pub id: String,
    pub email: String,
    pub role: String,
    pub company_id: Option<String>,
    #[serde(skip_serializing)]
    pub token: String,
    pub invited_by: Option<String>,
    pub expires_at: String,
    pub accepted_at: Option<String>,
    pub created_at: String,
}

impl Invite {
    pub fn role(&self) -> Result<Role> {
        self.role.parse()
    }

    /// Expiry is inclusive of the instant itself
    pub fn is_expired(&self, now: &str) -> bool {
        self.expires_at.as_str() <= now
    }
}

pub struct NewInvite<'a> {
    pub email: &'a str,
    pub role: Role,
    pub company_id: Option<&'a str>,
    pub token: &'a str,
    pub invited_by: &'a str,
    pub expires_at: &'a str,
}

pub async fn insert(pool: &SqlitePool, new: &NewInvite<'_>) -> Result<Invite> {
    let invite = Invite {
        id: new_id(),
        email: normalize_email(new.email),
        role: new.role.as_str().to_string(),
        company_id: new.company_id.map(str::to_string),
        token: new.token.to_string(),
        invited_by: Some(new.invited_by.to_string()),
        expires_at: new.expires_at.to_string(),
        accepted_at: None,
        created_at: time::now_db(),
    };

    sqlx::query(&format!(
        "INSERT INTO invites ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        COLUMNS
    ))
    .bind(&invite.id)
    .bind(&invite.email)
    .bind(&invite.role)
    .bind(&invite.company_id)
    .bind(&invite.token)
    .bind(&invite.invited_by)
    .bind(&invite.expires_at)
    .bind(&invite.accepted_at)
    .bind(&invite.created_at)
    .execute(pool)
    .await?;

    Ok(invite)
}

pub async fn find_by_token(pool: &SqlitePool, token: &str) -> Result<Option<Invite>> {
    let invite =
        sqlx::query_as::<_, Invite>(&format!("SELECT {} FROM invites WHERE token = ?", COLUMNS))
            .bind(token)
            .fetch_optional(pool)
            .await?;
    Ok(invite)
}

/// Create the invited account and mark the invite accepted, atomically.
/// Returns the new user id.
pub async fn accept(
    pool: &SqlitePool,
    invite: &Invite,
    name: &str,
    password_hash: &str,
) -> Result<String> {
    let user_id = new_id();
    let now = time::now_db();

    let mut tx = pool.begin().await?;

    let marked = sqlx::query(
        "UPDATE invites SET accepted_at = ? WHERE id = ? AND accepted_at IS NULL",
    )
    .bind(&now)
    .bind(&invite.id)
    .execute(&mut *tx)
    .await?;
    if marked.rows_affected() == 0 {
        return Err(csops_common::Error::Conflict(
            "Invite has already been accepted".to_string(),
        ));
    }

    sqlx::query(
        r#"
        INSERT INTO users (id, email, name, password_hash, role, company_id, active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
        "#,
    )
    .bind(&user_id)
    .bind(&invite.email)
    .bind(name.trim())
    .bind(password_hash)
    .bind(&invite.role)
    .bind(&invite.company_id)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(user_id)
}
