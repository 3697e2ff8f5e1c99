//! Test server wrapper for integration tests
//!
//! Builds the full router over an in-memory (or caller-supplied) database with Cal.com and
//! Calendly webhook secrets configured. Outbound API clients point at an
//! unroutable address; tests never call them.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use sqlx::SqlitePool;
use tower::util::ServiceExt; // for `oneshot` method

use csops_common::config::{CalComConfig, CalendlyConfig, Config};
use csops_common::db::init_memory_database;
use csops_common::{auth, Role};
use csops_server::db::companies::{self, Company};
use csops_server::db::cs_owners;
use csops_server::db::users::{self, NewUser, User};
use csops_server::{build_router, AppState};

pub const CALCOM_SECRET: &str = "calcom-test-secret";
pub const CALENDLY_KEY: &str = "calendly-test-key";
pub const PASSWORD: &str = "correct horse battery";

pub struct TestServer {
    router: Router,
    pub state: AppState,
}

/// One company with its CS owner and client users
pub struct Seed {
    pub admin: User,
    pub admin_token: String,
    pub owner: User,
    pub owner_token: String,
    pub company: Company,
    pub client: User,
    pub client_token: String,
    pub member: User,
    pub member_token: String,
}

fn test_config() -> Config {
    Config {
        jwt_secret: "test-secret".to_string(),
        calcom: Some(CalComConfig {
            api_key: "cal_test".to_string(),
            webhook_secret: CALCOM_SECRET.to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
        }),
        calendly: Some(CalendlyConfig {
            api_token: "calendly_test".to_string(),
            webhook_signing_key: CALENDLY_KEY.to_string(),
            organization_uri: None,
            base_url: "http://127.0.0.1:9".to_string(),
        }),
        ..Default::default()
    }
}

impl TestServer {
    pub async fn start() -> Self {
        let db = init_memory_database().await.expect("Should create in-memory database");
        Self::with_database(db)
    }

    /// Router over an existing pool (e.g. a file-backed database)
    pub fn with_database(db: SqlitePool) -> Self {
        let state = AppState::new(db, test_config()).expect("Should build app state");
        TestServer {
            router: build_router(state.clone()),
            state,
        }
    }

    pub async fn create_user(&self, email: &str, role: Role, company_id: Option<&str>) -> User {
        let password_hash = auth::hash_password(PASSWORD).expect("Should hash password");
        users::insert(
            &self.state.db,
            &NewUser {
                email,
                name: email.split('@').next().unwrap_or("user"),
                password_hash: &password_hash,
                role,
                company_id,
            },
        )
        .await
        .expect("Should insert user")
    }

    /// Session token without going through /api/auth/login
    pub async fn token_for(&self, user: &User) -> String {
        let principal = users::principal_for(&self.state.db, user)
            .await
            .expect("Should build principal");
        self.state.tokens.issue(&principal).expect("Should issue token")
    }

    /// Admin, CS owner, company `acme.com` and two client users
    pub async fn seed(&self) -> Seed {
        self.seed_company("acme", "acme.com").await
    }

    pub async fn seed_company(&self, prefix: &str, domain: &str) -> Seed {
        let admin = self
            .create_user(&format!("admin@{}-ops.test", prefix), Role::Admin, None)
            .await;
        let owner = self
            .create_user(&format!("owner@{}-ops.test", prefix), Role::CsOwner, None)
            .await;
        let cs_owner = cs_owners::insert(&self.state.db, &owner.id, Some("CSM"))
            .await
            .expect("Should insert CS owner");
        let company = companies::insert(
            &self.state.db,
            &format!("{} Inc", prefix),
            Some(domain),
            Some(&cs_owner.id),
        )
        .await
        .expect("Should insert company");
        let client = self
            .create_user(&format!("lead@{}", domain), Role::Client, Some(&company.id))
            .await;
        let member = self
            .create_user(&format!("member@{}", domain), Role::ClientMember, Some(&company.id))
            .await;

        Seed {
            admin_token: self.token_for(&admin).await,
            owner_token: self.token_for(&owner).await,
            client_token: self.token_for(&client).await,
            member_token: self.token_for(&member).await,
            admin,
            owner,
            company,
            client,
            member,
        }
    }

    /// JSON request; returns status and parsed body (Null when empty)
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("Should build request");

        self.send(request).await
    }

    pub async fn get(&self, path: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::GET, path, Some(token), None).await
    }

    pub async fn post(&self, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, path, Some(token), Some(body)).await
    }

    pub async fn patch(&self, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PATCH, path, Some(token), Some(body)).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Router should respond");
        let status = response.status();
        (status, extract_json(response.into_body()).await)
    }

    /// Raw response, for non-JSON bodies
    pub async fn send_raw(&self, request: Request<Body>) -> axum::response::Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Router should respond")
    }
}

/// Extract JSON body from response (Null for an empty body)
pub async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}
