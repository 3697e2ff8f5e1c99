//! Delivery endpoints
//!
//! Status changes and approvals go through `csops_common::delivery`; this
//! module loads rows, applies the resulting state and fans out the side
//! effects (comments, notifications, adoption checks, health refresh).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use csops_common::access::Principal;
use csops_common::delivery::{self, DeliveryStatus, StatusChange, WorkflowState};
use csops_common::events::CsEvent;
use csops_common::time;

use crate::db::bookings::{self, Provider};
use crate::db::companies::Company;
use crate::db::deliveries::{self, Comment, Delivery, Dependency, MeetingLink, NewDelivery};
use crate::db::surveys;
use crate::error::{ApiError, ApiResult};
use crate::services::notifier::{self, Kind, Message};
use crate::services::{self, scheduler};
use crate::AppState;

use super::{double_option, managed_company, parse_opt, required_text, visible_company, AuthUser};

// ============================================================================
// Helpers
// ============================================================================

/// Load a delivery and its company, both visible to the caller
pub(crate) async fn visible_delivery(
    state: &AppState,
    principal: &Principal,
    id: &str,
) -> ApiResult<(Delivery, Company)> {
    let delivery = deliveries::get(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Delivery {}", id)))?;
    let company = visible_company(state, principal, &delivery.company_id)
        .await
        .map_err(|_| ApiError::NotFound(format!("Delivery {}", id)))?;
    Ok((delivery, company))
}

/// Like `visible_delivery`, plus internal write access
pub(crate) async fn managed_delivery(
    state: &AppState,
    principal: &Principal,
    id: &str,
) -> ApiResult<(Delivery, Company)> {
    let (delivery, company) = visible_delivery(state, principal, id).await?;
    principal.require(principal.can_manage_company(company.scope()), "manage this delivery")?;
    Ok((delivery, company))
}

fn validate_due_date(value: Option<&str>) -> ApiResult<Option<String>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => time::parse_date(v)
            .map(|d| Some(d.format("%Y-%m-%d").to_string()))
            .ok_or_else(|| ApiError::BadRequest(format!("due_date must be YYYY-MM-DD, got {}", v))),
    }
}

/// Persist a new workflow state and broadcast a status change
async fn persist(state: &AppState, delivery: &mut Delivery, next: &WorkflowState) -> ApiResult<bool> {
    let old = delivery.status()?;
    delivery.apply(next);
    deliveries::save(&state.db, delivery).await?;

    let changed = old != next.status;
    if changed {
        info!(
            delivery_id = %delivery.id,
            from = old.as_str(),
            to = next.status.as_str(),
            "Delivery status changed"
        );
        state.event_bus.emit_lossy(CsEvent::DeliveryStatusChanged {
            delivery_id: delivery.id.clone(),
            company_id: delivery.company_id.clone(),
            old_status: old,
            new_status: next.status,
            timestamp: time::now_db(),
        });
    }
    Ok(changed)
}

fn delivery_link(delivery: &Delivery) -> String {
    format!("/deliveries/{}", delivery.id)
}

#[derive(Debug, Serialize)]
pub struct DeliveryView {
    #[serde(flatten)]
    pub delivery: Delivery,
    pub overdue: bool,
    pub dependencies: Vec<Dependency>,
}

async fn view(state: &AppState, delivery: Delivery) -> ApiResult<DeliveryView> {
    let dependencies = deliveries::dependencies_of(&state.db, &delivery.id).await?;
    Ok(DeliveryView {
        overdue: delivery.is_overdue(time::today()),
        delivery,
        dependencies,
    })
}

// ============================================================================
// CRUD
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

/// GET /api/companies/:id/deliveries
pub async fn list_deliveries(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(company_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Delivery>>> {
    let company = visible_company(&state, &auth.principal, &company_id).await?;
    let status = parse_opt::<DeliveryStatus>(query.status.as_deref())?;
    Ok(Json(deliveries::list_for_company(&state.db, &company.id, status).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateDeliveryRequest {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<String>,
}

/// POST /api/companies/:id/deliveries
pub async fn create_delivery(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(company_id): Path<String>,
    Json(req): Json<CreateDeliveryRequest>,
) -> ApiResult<(StatusCode, Json<Delivery>)> {
    let company = managed_company(&state, &auth.principal, &company_id).await?;
    let title = required_text(&req.title, "title")?;
    let due_date = validate_due_date(req.due_date.as_deref())?;
    let description = super::optional_text(req.description.as_deref());

    let delivery = deliveries::insert(
        &state.db,
        &NewDelivery {
            company_id: &company.id,
            title: &title,
            description: description.as_deref(),
            due_date: due_date.as_deref(),
            created_by: Some(&auth.principal.user_id),
        },
    )
    .await?;

    info!(delivery_id = %delivery.id, company_id = %company.id, "Created delivery");
    services::health::refresh(&state.db, &state.event_bus, &company.id).await;
    Ok((StatusCode::CREATED, Json(delivery)))
}

/// GET /api/deliveries/:id
pub async fn get_delivery(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<DeliveryView>> {
    let (delivery, _) = visible_delivery(&state, &auth.principal, &id).await?;
    Ok(Json(view(&state, delivery).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateDeliveryRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<String>>,
    pub progress: Option<i64>,
    pub status: Option<DeliveryStatus>,
    pub blocked_reason: Option<String>,
}

/// PATCH /api/deliveries/:id
pub async fn update_delivery(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateDeliveryRequest>,
) -> ApiResult<Json<DeliveryView>> {
    let (mut delivery, company) = managed_delivery(&state, &auth.principal, &id).await?;

    if let Some(title) = &req.title {
        delivery.title = required_text(title, "title")?;
    }
    if let Some(description) = &req.description {
        delivery.description = super::optional_text(description.as_deref());
    }
    if let Some(due_date) = &req.due_date {
        delivery.due_date = validate_due_date(due_date.as_deref())?;
    }

    let current = delivery.workflow()?;
    let mut next = current.clone();
    if let Some(to) = req.status {
        let dependencies_satisfied = to != DeliveryStatus::InProgress
            || deliveries::dependencies_satisfied(&state.db, &delivery.id).await?;
        next = delivery::change_status(
            &next,
            StatusChange {
                to: Some(to),
                blocked_reason: req.blocked_reason.clone(),
                actor_is_admin: auth.principal.is_admin(),
                dependencies_satisfied,
            },
        )?;
    } else if req.blocked_reason.is_some() && current.status == DeliveryStatus::Blocked {
        next = delivery::change_status(
            &next,
            StatusChange {
                to: Some(DeliveryStatus::Blocked),
                blocked_reason: req.blocked_reason.clone(),
                ..Default::default()
            },
        )?;
    }
    if let Some(progress) = req.progress {
        next = delivery::change_progress(&next, progress)?;
    }

    let reopened = current.status == DeliveryStatus::Completed && next.status != DeliveryStatus::Completed;
    let changed = persist(&state, &mut delivery, &next).await?;

    if reopened {
        let removed = surveys::delete_scheduled_for_delivery(&state.db, &delivery.id).await?;
        info!(delivery_id = %delivery.id, removed, "Delivery reopened, pending adoption check dropped");
    }
    if changed {
        services::health::refresh(&state.db, &state.event_bus, &company.id).await;
    }

    Ok(Json(view(&state, delivery).await?))
}

/// DELETE /api/deliveries/:id
pub async fn delete_delivery(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let (delivery, company) = managed_delivery(&state, &auth.principal, &id).await?;
    deliveries::delete(&state.db, &delivery.id).await?;
    info!(delivery_id = %delivery.id, "Deleted delivery");
    services::health::refresh(&state.db, &state.event_bus, &company.id).await;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Approvals
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub approved: bool,
    pub comment: Option<String>,
}

async fn record_decision_comment(
    state: &AppState,
    delivery: &Delivery,
    author_id: &str,
    label: &str,
    comment: Option<&str>,
) -> ApiResult<()> {
    if let Some(comment) = super::optional_text(comment) {
        deliveries::insert_comment(&state.db, &delivery.id, author_id, &format!("[{}] {}", label, comment))
            .await?;
    }
    Ok(())
}

/// POST /api/deliveries/:id/request-approval
pub async fn request_approval(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<DeliveryView>> {
    let (mut delivery, company) = managed_delivery(&state, &auth.principal, &id).await?;
    let next = delivery::request_approval(&delivery.workflow()?)?;
    persist(&state, &mut delivery, &next).await?;

    let message = Message::new(
        Kind::ApprovalRequested,
        "Delivery ready for review",
        format!("\"{}\" ({}) is waiting for internal approval", delivery.title, company.name),
    )
    .link(delivery_link(&delivery));
    notifier::notify_internal(&state.db, &state.event_bus, &company.id, &message).await;

    Ok(Json(view(&state, delivery).await?))
}

/// POST /api/deliveries/:id/admin-approval
pub async fn admin_approval(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<DecisionRequest>,
) -> ApiResult<Json<DeliveryView>> {
    let (mut delivery, company) = managed_delivery(&state, &auth.principal, &id).await?;
    let next = delivery::admin_decision(&delivery.workflow()?, req.approved)?;
    persist(&state, &mut delivery, &next).await?;

    let label = if req.approved { "Approved internally" } else { "Rejected internally" };
    record_decision_comment(&state, &delivery, &auth.principal.user_id, label, req.comment.as_deref()).await?;
    info!(delivery_id = %delivery.id, approved = req.approved, "Admin approval decision");

    if req.approved {
        let message = Message::new(
            Kind::ApprovalRequested,
            "Delivery awaiting your approval",
            format!("Please review \"{}\"", delivery.title),
        )
        .link(delivery_link(&delivery));
        notifier::notify_clients(&state.db, &state.event_bus, &company.id, true, &message).await;
    }

    Ok(Json(view(&state, delivery).await?))
}

/// POST /api/deliveries/:id/client-approval
pub async fn client_approval(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<DecisionRequest>,
) -> ApiResult<Json<DeliveryView>> {
    let (mut delivery, company) = visible_delivery(&state, &auth.principal, &id).await?;
    auth.principal.require(
        auth.principal.can_approve_as_client(company.scope()),
        "approve deliveries for this company",
    )?;

    let now = time::now();
    let next = delivery::client_decision(
        &delivery.workflow()?,
        req.approved,
        req.comment.as_deref(),
        &time::to_db(now),
    )?;
    persist(&state, &mut delivery, &next).await?;

    let label = if req.approved { "Approved by client" } else { "Rejected by client" };
    record_decision_comment(&state, &delivery, &auth.principal.user_id, label, req.comment.as_deref()).await?;
    info!(delivery_id = %delivery.id, approved = req.approved, "Client approval decision");

    let message = (if req.approved {
        scheduler::schedule_adoption_check(
            &state.db,
            &delivery,
            now,
            state.config.adoption_check_delay_days,
        )
        .await?;
        Message::new(
            Kind::DeliveryCompleted,
            "Delivery approved by client",
            format!("{} approved \"{}\"", company.name, delivery.title),
        )
    } else {
        Message::new(
            Kind::DeliveryRejected,
            "Delivery rejected by client",
            format!(
                "{} rejected \"{}\": {}",
                company.name,
                delivery.title,
                req.comment.as_deref().unwrap_or_default().trim()
            ),
        )
    })
    .link(delivery_link(&delivery));
    notifier::notify_internal(&state.db, &state.event_bus, &company.id, &message).await;

    if req.approved {
        services::onboarding::refresh(&state.db, &company.id).await;
        services::health::refresh(&state.db, &state.event_bus, &company.id).await;
    }

    Ok(Json(view(&state, delivery).await?))
}

// ============================================================================
// Dependencies
// ============================================================================

/// GET /api/deliveries/:id/dependencies
pub async fn list_dependencies(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Dependency>>> {
    let (delivery, _) = visible_delivery(&state, &auth.principal, &id).await?;
    Ok(Json(deliveries::dependencies_of(&state.db, &delivery.id).await?))
}

#[derive(Debug, Deserialize)]
pub struct AddDependencyRequest {
    pub depends_on_id: String,
}

/// POST /api/deliveries/:id/dependencies
pub async fn add_dependency(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<AddDependencyRequest>,
) -> ApiResult<(StatusCode, Json<Vec<Dependency>>)> {
    let (delivery, company) = managed_delivery(&state, &auth.principal, &id).await?;
    if req.depends_on_id == delivery.id {
        return Err(ApiError::BadRequest("A delivery cannot depend on itself".to_string()));
    }

    let target = deliveries::get(&state.db, &req.depends_on_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Delivery {}", req.depends_on_id)))?;
    if target.company_id != company.id {
        return Err(ApiError::BadRequest(
            "Dependencies must belong to the same company".to_string(),
        ));
    }

    let edges = deliveries::dependency_edges(&state.db, &company.id).await?;
    if edges
        .iter()
        .any(|(from, to)| *from == delivery.id && *to == target.id)
    {
        return Err(ApiError::Conflict("Dependency already exists".to_string()));
    }
    if delivery::would_create_cycle(&edges, &delivery.id, &target.id) {
        return Err(ApiError::Conflict(format!(
            "\"{}\" already depends on \"{}\"",
            target.title, delivery.title
        )));
    }

    deliveries::add_dependency(&state.db, &delivery.id, &target.id).await?;
    info!(delivery_id = %delivery.id, depends_on = %target.id, "Added dependency");
    Ok((
        StatusCode::CREATED,
        Json(deliveries::dependencies_of(&state.db, &delivery.id).await?),
    ))
}

/// DELETE /api/deliveries/:id/dependencies/:depends_on_id
pub async fn remove_dependency(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((id, depends_on_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let (delivery, _) = managed_delivery(&state, &auth.principal, &id).await?;
    if !deliveries::remove_dependency(&state.db, &delivery.id, &depends_on_id).await? {
        return Err(ApiError::NotFound("Dependency not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Comments
// ============================================================================

/// GET /api/deliveries/:id/comments
pub async fn list_comments(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Comment>>> {
    let (delivery, _) = visible_delivery(&state, &auth.principal, &id).await?;
    Ok(Json(deliveries::list_comments(&state.db, &delivery.id).await?))
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub body: String,
}

/// POST /api/deliveries/:id/comments
pub async fn add_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<CommentRequest>,
) -> ApiResult<(StatusCode, Json<Comment>)> {
    let (delivery, company) = visible_delivery(&state, &auth.principal, &id).await?;
    let body = required_text(&req.body, "body")?;
    let comment = deliveries::insert_comment(&state.db, &delivery.id, &auth.principal.user_id, &body).await?;

    let message = Message::new(
        Kind::CommentAdded,
        format!("New comment on \"{}\"", delivery.title),
        format!("{}: {}", auth.user.name, body),
    )
    .link(delivery_link(&delivery));
    if auth.principal.role.is_client() {
        notifier::notify_internal(&state.db, &state.event_bus, &company.id, &message).await;
    } else {
        notifier::notify_clients(&state.db, &state.event_bus, &company.id, false, &message).await;
    }

    Ok((StatusCode::CREATED, Json(comment)))
}

// ============================================================================
// Meetings
// ============================================================================

/// GET /api/deliveries/:id/meetings
pub async fn list_meetings(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<MeetingLink>>> {
    let (delivery, _) = visible_delivery(&state, &auth.principal, &id).await?;
    Ok(Json(deliveries::list_meetings(&state.db, &delivery.id).await?))
}

#[derive(Debug, Deserialize)]
pub struct LinkMeetingRequest {
    pub provider: String,
    pub booking_id: String,
}

/// POST /api/deliveries/:id/meetings
pub async fn link_meeting(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<LinkMeetingRequest>,
) -> ApiResult<(StatusCode, Json<MeetingLink>)> {
    let (delivery, company) = managed_delivery(&state, &auth.principal, &id).await?;
    let provider: Provider = req.provider.parse()?;
    let booking = bookings::get(&state.db, provider, &req.booking_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Booking {}", req.booking_id)))?;
    if booking.company_id.as_deref() != Some(company.id.as_str()) {
        return Err(ApiError::BadRequest(
            "Booking does not belong to the delivery's company".to_string(),
        ));
    }

    let link = deliveries::link_meeting(&state.db, &delivery.id, provider.as_str(), &booking.id)
        .await
        .map_err(|e| match ApiError::from(e) {
            ApiError::Conflict(_) => ApiError::Conflict("Meeting is already linked".to_string()),
            other => other,
        })?;
    Ok((StatusCode::CREATED, Json(link)))
}

pub fn delivery_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/companies/:id/deliveries",
            get(list_deliveries).post(create_delivery),
        )
        .route(
            "/api/deliveries/:id",
            get(get_delivery).patch(update_delivery).delete(delete_delivery),
        )
        .route("/api/deliveries/:id/request-approval", post(request_approval))
        .route("/api/deliveries/:id/admin-approval", post(admin_approval))
        .route("/api/deliveries/:id/client-approval", post(client_approval))
        .route(
            "/api/deliveries/:id/dependencies",
            get(list_dependencies).post(add_dependency),
        )
        .route(
            "/api/deliveries/:id/dependencies/:depends_on_id",
            delete(remove_dependency),
        )
        .route("/api/deliveries/:id/comments", get(list_comments).post(add_comment))
        .route("/api/deliveries/:id/meetings", get(list_meetings).post(link_meeting))
}
