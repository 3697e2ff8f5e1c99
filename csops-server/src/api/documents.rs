//! Delivery documents
//!
//! Two upload paths: a presigned PUT straight to the bucket (followed by
//! `confirm`), or a buffered upload through the service capped at
//! `max_upload_bytes`.

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use csops_common::access::Principal;

use crate::db::deliveries::{self, Delivery, Document, NewDocument};
use crate::db::new_id;
use crate::error::{ApiError, ApiResult};
use crate::services::storage::{document_key, sanitize_file_name};
use crate::AppState;

use super::deliveries::{managed_delivery, visible_delivery};
use super::{optional_text, AuthUser};

const PENDING: &str = "PENDING";
const UPLOADED: &str = "UPLOADED";

/// Load a document together with its (visible) delivery
async fn visible_document(
    state: &AppState,
    principal: &Principal,
    id: &str,
) -> ApiResult<(Document, Delivery)> {
    let document = deliveries::get_document(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Document {}", id)))?;
    let (delivery, _) = visible_delivery(state, principal, &document.delivery_id)
        .await
        .map_err(|_| ApiError::NotFound(format!("Document {}", id)))?;
    Ok((document, delivery))
}

fn clean_file_name(name: &str) -> ApiResult<String> {
    if name.trim().is_empty() {
        return Err(ApiError::BadRequest("file_name is required".to_string()));
    }
    Ok(sanitize_file_name(name))
}

/// GET /api/deliveries/:id/documents
pub async fn list_documents(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Document>>> {
    let (delivery, _) = visible_delivery(&state, &auth.principal, &id).await?;
    Ok(Json(deliveries::list_documents(&state.db, &delivery.id).await?))
}

#[derive(Debug, Deserialize)]
pub struct PresignRequest {
    pub file_name: String,
    pub content_type: Option<String>,
    pub size_bytes: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PresignResponse {
    pub document: Document,
    pub storage_key: String,
    /// None when the backend cannot sign; use the upload route instead
    pub upload_url: Option<String>,
}

/// POST /api/deliveries/:id/documents/presign
pub async fn presign_upload(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<PresignRequest>,
) -> ApiResult<(StatusCode, Json<PresignResponse>)> {
    let (delivery, _) = managed_delivery(&state, &auth.principal, &id).await?;
    let file_name = clean_file_name(&req.file_name)?;
    if let Some(size) = req.size_bytes {
        if size < 0 || size as u64 > state.config.max_upload_bytes as u64 {
            return Err(ApiError::PayloadTooLarge(format!(
                "Documents are limited to {} bytes",
                state.config.max_upload_bytes
            )));
        }
    }

    let document_id = new_id();
    let storage_key = document_key(&delivery.company_id, &delivery.id, &document_id, &file_name);
    let upload_url = state.storage.presign_put(&storage_key).await?;
    let content_type = optional_text(req.content_type.as_deref());

    let document = deliveries::insert_document(
        &state.db,
        &NewDocument {
            id: &document_id,
            delivery_id: &delivery.id,
            file_name: &file_name,
            storage_key: &storage_key,
            content_type: content_type.as_deref(),
            size_bytes: req.size_bytes,
            status: PENDING,
            uploaded_by: &auth.principal.user_id,
        },
    )
    .await?;

    info!(document_id = %document.id, delivery_id = %delivery.id, signed = upload_url.is_some(), "Presigned document upload");
    Ok((
        StatusCode::CREATED,
        Json(PresignResponse {
            document,
            storage_key,
            upload_url,
        }),
    ))
}

/// POST /api/documents/:id/confirm
///
/// Marks a presigned upload as UPLOADED once the object exists.
pub async fn confirm_upload(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    let (document, delivery) = visible_document(&state, &auth.principal, &id).await?;
    managed_delivery(&state, &auth.principal, &delivery.id).await?;

    if document.status != UPLOADED {
        if !state.storage.exists(&document.storage_key).await? {
            return Err(ApiError::Conflict("Upload has not completed yet".to_string()));
        }
        deliveries::mark_document_uploaded(&state.db, &document.id).await?;
    }

    let document = deliveries::get_document(&state.db, &document.id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Document {}", id)))?;
    Ok(Json(document))
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub file_name: String,
}

/// PUT /api/deliveries/:id/documents/upload?file_name=
pub async fn upload_document(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<(StatusCode, Json<Document>)> {
    let (delivery, _) = managed_delivery(&state, &auth.principal, &id).await?;
    let file_name = clean_file_name(&query.file_name)?;
    let limit = state.config.max_upload_bytes;

    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.map(|len| len > limit).unwrap_or(false) {
        return Err(ApiError::PayloadTooLarge(format!("Documents are limited to {} bytes", limit)));
    }

    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| ApiError::PayloadTooLarge(format!("Documents are limited to {} bytes ({})", limit, e)))?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Upload body is empty".to_string()));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let document_id = new_id();
    let storage_key = document_key(&delivery.company_id, &delivery.id, &document_id, &file_name);
    let size = bytes.len() as i64;

    state.storage.put(&storage_key, bytes).await?;
    let document = deliveries::insert_document(
        &state.db,
        &NewDocument {
            id: &document_id,
            delivery_id: &delivery.id,
            file_name: &file_name,
            storage_key: &storage_key,
            content_type: content_type.as_deref(),
            size_bytes: Some(size),
            status: UPLOADED,
            uploaded_by: &auth.principal.user_id,
        },
    )
    .await?;

    info!(document_id = %document.id, delivery_id = %delivery.id, size, "Uploaded document");
    Ok((StatusCode::CREATED, Json(document)))
}

/// GET /api/documents/:id/download
///
/// Signed URL as JSON when the backend can sign, otherwise the bytes.
pub async fn download_document(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let (document, _) = visible_document(&state, &auth.principal, &id).await?;
    if document.status != UPLOADED {
        return Err(ApiError::Conflict("Document upload has not been confirmed".to_string()));
    }

    if let Some(url) = state.storage.presign_get(&document.storage_key).await? {
        return Ok(Json(json!({ "download_url": url })).into_response());
    }

    let bytes = state.storage.get(&document.storage_key).await?;
    let content_type = document
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let disposition = format!("attachment; filename=\"{}\"", document.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// DELETE /api/documents/:id
pub async fn delete_document(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let (document, delivery) = visible_document(&state, &auth.principal, &id).await?;
    managed_delivery(&state, &auth.principal, &delivery.id).await?;

    if let Err(e) = state.storage.delete(&document.storage_key).await {
        warn!(document_id = %document.id, error = %e, "Failed to delete stored object");
        return Err(e.into());
    }
    deliveries::delete_document(&state.db, &document.id).await?;
    info!(document_id = %document.id, "Deleted document");
    Ok(StatusCode::NO_CONTENT)
}

pub fn document_routes() -> Router<AppState> {
    Router::new()
        .route("/api/deliveries/:id/documents", get(list_documents))
        .route("/api/deliveries/:id/documents/presign", post(presign_upload))
        .route(
            "/api/deliveries/:id/documents/upload",
            put(upload_document).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/documents/:id/confirm", post(confirm_upload))
        .route("/api/documents/:id/download", get(download_document))
        .route("/api/documents/:id", delete(delete_document))
}
