//! User accounts

use csops_common::{time, Principal, Result, Role};
use serde::Serialize;
use sqlx::{QueryBuilder, SqlitePool};

use super::{new_id, Visibility};

const COLUMNS: &str =
    "id, email, name, password_hash, role, company_id, active, created_at, updated_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub company_id: Option<String>,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub fn role(&self) -> Result<Role> {
        self.role.parse()
    }
}

/// Fields for a new account
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub email: &'a str,
    pub name: &'a str,
    pub password_hash: &'a str,
    pub role: Role,
    pub company_id: Option<&'a str>,
}

/// Emails are compared and stored lowercase
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub async fn insert(pool: &SqlitePool, new: &NewUser<'_>) -> Result<User> {
    let id = new_id();
    let now = time::now_db();
    sqlx::query(
        r#"
        INSERT INTO users (id, email, name, password_hash, role, company_id, active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(normalize_email(new.email))
    .bind(new.name.trim())
    .bind(new.password_hash)
    .bind(new.role.as_str())
    .bind(new.company_id)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    get(pool, &id)
        .await?
        .ok_or_else(|| csops_common::Error::Internal("Inserted user not found".to_string()))
}

pub async fn get(pool: &SqlitePool, id: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = ?", COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn find_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    let user =
        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE email = ?", COLUMNS))
            .bind(normalize_email(email))
            .fetch_optional(pool)
            .await?;
    Ok(user)
}

/// Users visible to a principal. CS owners also see their own account.
pub async fn list(pool: &SqlitePool, visibility: &Visibility, self_id: &str) -> Result<Vec<User>> {
    let mut qb = QueryBuilder::new(format!("SELECT {} FROM users WHERE (1 = 1", COLUMNS));
    visibility.push_filter(&mut qb, "company_id");
    qb.push(") OR id = ").push_bind(self_id.to_string());
    qb.push(" ORDER BY name COLLATE NOCASE, id");
    let users = qb.build_query_as::<User>().fetch_all(pool).await?;
    Ok(users)
}

/// Persist name, role and active flag
pub async fn update(pool: &SqlitePool, user: &User) -> Result<()> {
    sqlx::query("UPDATE users SET name = ?, role = ?, active = ?, updated_at = ? WHERE id = ?")
        .bind(&user.name)
        .bind(&user.role)
        .bind(user.active)
        .bind(time::now_db())
        .bind(&user.id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Active client-side users of a company; `approvers_only` keeps CLIENT only
pub async fn client_user_ids(
    pool: &SqlitePool,
    company_id: &str,
    approvers_only: bool,
) -> Result<Vec<String>> {
    let sql = if approvers_only {
        "SELECT id FROM users WHERE company_id = ? AND active = 1 AND role = 'CLIENT'"
    } else {
        "SELECT id FROM users WHERE company_id = ? AND active = 1 \
         AND role IN ('CLIENT', 'CLIENT_MEMBER')"
    };
    let ids = sqlx::query_scalar(sql).bind(company_id).fetch_all(pool).await?;
    Ok(ids)
}

/// User id of the company's CS owner, if assigned and active
pub async fn owner_user_id(pool: &SqlitePool, company_id: &str) -> Result<Option<String>> {
    let id = sqlx::query_scalar(
        r#"
        SELECT u.id FROM companies c
        JOIN cs_owners o ON o.id = c.cs_owner_id
        JOIN users u ON u.id = o.user_id
        WHERE c.id = ? AND u.active = 1
        "#,
    )
    .bind(company_id)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

/// Active admins (fallback recipients when a company has no owner)
pub async fn admin_user_ids(pool: &SqlitePool) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar("SELECT id FROM users WHERE role = 'ADMIN' AND active = 1")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

pub async fn count(pool: &SqlitePool) -> Result<i64> {
    let total = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    Ok(total)
}

/// Build the request principal for a stored user
pub async fn principal_for(pool: &SqlitePool, user: &User) -> Result<Principal> {
    let role = user.role()?;
    let cs_owner_id = if role == Role::CsOwner {
        sqlx::query_scalar("SELECT id FROM cs_owners WHERE user_id = ?")
            .bind(&user.id)
            .fetch_optional(pool)
            .await?
    } else {
        None
    };

    Ok(Principal {
        user_id: user.id.clone(),
        role,
        company_id: if role.is_client() {
            user.company_id.clone()
        } else {
            None
        },
        cs_owner_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use csops_common::db::init_memory_database;

    #[tokio::test]
    async fn test_email_is_normalized_and_unique() {
        let pool = init_memory_database().await.unwrap();
        let new = NewUser {
            email: " Ada@Example.COM ",
            name: "Ada",
            password_hash: "hash",
            role: Role::Admin,
            company_id: None,
        };
        let user = insert(&pool, &new).await.unwrap();
        assert_eq!(user.email, "ada@example.com");
        assert!(user.active);

        assert!(find_by_email(&pool, "ADA@example.com").await.unwrap().is_some());
        assert!(insert(&pool, &new).await.is_err());
    }

    #[tokio::test]
    async fn test_principal_for_admin() {
        let pool = init_memory_database().await.unwrap();
        let user = insert(
            &pool,
            &NewUser {
                email: "root@example.com",
                name: "Root",
                password_hash: "hash",
                role: Role::Admin,
                company_id: None,
            },
        )
        .await
        .unwrap();

        let principal = principal_for(&pool, &user).await.unwrap();
        assert_eq!(principal.role, Role::Admin);
        assert_eq!(principal.company_id, None);
        assert_eq!(principal.cs_owner_id, None);
    }
}
