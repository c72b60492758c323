use axum::extract::{Json, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::consultations::files::{self, FileDownload, FileUpload};
use crate::consultations::lifecycle::{self, NewConsultationInput};
use crate::consultations::listing::{self, ConsultationPage, ConsultationStatistics, ListFilter};
use crate::consultations::types::{FileCategory, Priority, Topic};
use crate::consultations::{assignment, status_log, ConsultationDetail};
use crate::error::{AppError, AppResult};
use crate::models::{ConsultationFile, ConsultationStatusLog};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    #[serde(alias = "topic_type")]
    pub topic: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct WithdrawRequest {
    pub reason: String,
}

#[derive(Deserialize)]
pub struct EscalateRequest {
    pub priority: String,
    #[serde(default)]
    pub reason: String,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
pub struct AssignLawyersRequest {
    pub lawyer_ids: Vec<Uuid>,
    #[serde(default = "default_true")]
    pub set_primary: bool,
}

#[derive(Deserialize)]
pub struct AssignOperatorsRequest {
    pub operator_ids: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct FileResponse {
    pub file: ConsultationFile,
}

#[derive(Serialize)]
pub struct FileVersionsResponse {
    pub versions: Vec<ConsultationFile>,
}

#[derive(Serialize)]
pub struct StatusLogResponse {
    pub status_logs: Vec<ConsultationStatusLog>,
}

fn multipart_error(context: &'static str) -> impl Fn(axum::extract::multipart::MultipartError) -> AppError {
    move |err| {
        warn!(error = %err, context, "rejected malformed multipart data");
        AppError::validation(format!("{context}: {err}"))
    }
}

fn optional_text(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub async fn list_consultations(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ConsultationPage>> {
    let filter = ListFilter {
        status: query.status,
        topic: query.topic,
        page: query.page,
        per_page: query.per_page,
    };
    Ok(Json(
        listing::list_consultations(&state, user.user_id, filter).await?,
    ))
}

pub async fn consultation_statistics(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<ConsultationStatistics>> {
    Ok(Json(listing::statistics(&state, user.user_id).await?))
}

/// Multipart form: `description` (required), optional `title`, `topic`,
/// `priority`, and any number of `files` parts.
pub async fn create_consultation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<ConsultationDetail>)> {
    let mut input = NewConsultationInput::default();
    let mut uploads = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_error("invalid multipart data"))?
    {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("files") | Some("files[]") | Some("file") => {
                let file_name = field.file_name().map(|n| n.to_string()).unwrap_or_default();
                let content_type = field.content_type().map(|mime| mime.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(multipart_error("failed to read file bytes"))?;
                uploads.push(FileUpload {
                    file_name,
                    bytes: bytes.to_vec(),
                    content_type,
                    category: FileCategory::Attachment,
                    version_notes: None,
                });
            }
            Some("title") => {
                input.title = optional_text(
                    field.text().await.map_err(multipart_error("invalid title"))?,
                );
            }
            Some("description") => {
                input.description = field
                    .text()
                    .await
                    .map_err(multipart_error("invalid description"))?;
            }
            Some("topic") | Some("topic_type") => {
                let value = field.text().await.map_err(multipart_error("invalid topic"))?;
                if let Some(value) = optional_text(value) {
                    input.topic = value.parse::<Topic>()?;
                }
            }
            Some("priority") => {
                let value = field
                    .text()
                    .await
                    .map_err(multipart_error("invalid priority"))?;
                if let Some(value) = optional_text(value) {
                    input.priority = value.parse::<Priority>()?;
                }
            }
            Some(other) => {
                warn!(field = other, "ignoring unknown consultation form field");
            }
            None => {}
        }
    }

    let detail = lifecycle::create(&state, user.user_id, input, uploads).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn get_consultation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(consultation_id): Path<Uuid>,
) -> AppResult<Json<ConsultationDetail>> {
    Ok(Json(
        listing::get_consultation(&state, user.user_id, consultation_id).await?,
    ))
}

pub async fn update_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(consultation_id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> AppResult<Json<ConsultationDetail>> {
    let detail = lifecycle::update_status(
        &state,
        user.user_id,
        consultation_id,
        &payload.status,
        payload.reason,
    )
    .await?;
    Ok(Json(detail))
}

pub async fn withdraw_consultation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(consultation_id): Path<Uuid>,
    Json(payload): Json<WithdrawRequest>,
) -> AppResult<Json<ConsultationDetail>> {
    Ok(Json(
        lifecycle::withdraw(&state, user.user_id, consultation_id, &payload.reason).await?,
    ))
}

pub async fn escalate_priority(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(consultation_id): Path<Uuid>,
    Json(payload): Json<EscalateRequest>,
) -> AppResult<Json<ConsultationDetail>> {
    Ok(Json(
        lifecycle::escalate_priority(
            &state,
            user.user_id,
            consultation_id,
            &payload.priority,
            &payload.reason,
        )
        .await?,
    ))
}

pub async fn archive_consultation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(consultation_id): Path<Uuid>,
) -> AppResult<Json<ConsultationDetail>> {
    Ok(Json(
        lifecycle::archive(&state, user.user_id, consultation_id).await?,
    ))
}

pub async fn unarchive_consultation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(consultation_id): Path<Uuid>,
) -> AppResult<Json<ConsultationDetail>> {
    Ok(Json(
        lifecycle::unarchive(&state, user.user_id, consultation_id).await?,
    ))
}

pub async fn confirm_delivery(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(consultation_id): Path<Uuid>,
) -> AppResult<Json<ConsultationDetail>> {
    Ok(Json(
        lifecycle::confirm_delivery(&state, user.user_id, consultation_id).await?,
    ))
}

pub async fn assign_lawyers(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(consultation_id): Path<Uuid>,
    Json(payload): Json<AssignLawyersRequest>,
) -> AppResult<Json<ConsultationDetail>> {
    Ok(Json(
        assignment::assign_lawyers(
            &state,
            user.user_id,
            consultation_id,
            &payload.lawyer_ids,
            payload.set_primary,
        )
        .await?,
    ))
}

pub async fn remove_lawyer(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((consultation_id, lawyer_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ConsultationDetail>> {
    Ok(Json(
        assignment::remove_lawyer(&state, user.user_id, consultation_id, lawyer_id).await?,
    ))
}

pub async fn assign_operators(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(consultation_id): Path<Uuid>,
    Json(payload): Json<AssignOperatorsRequest>,
) -> AppResult<Json<ConsultationDetail>> {
    Ok(Json(
        assignment::assign_operators(&state, user.user_id, consultation_id, &payload.operator_ids)
            .await?,
    ))
}

pub async fn list_status_logs(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(consultation_id): Path<Uuid>,
) -> AppResult<Json<StatusLogResponse>> {
    let status_logs = status_log::list_status_logs(&state, user.user_id, consultation_id).await?;
    Ok(Json(StatusLogResponse { status_logs }))
}

/// Multipart form: one `file` part plus optional `category` and
/// `version_notes`.
pub async fn upload_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(consultation_id): Path<Uuid>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<FileResponse>)> {
    let mut upload: Option<FileUpload> = None;
    let mut category = FileCategory::default();
    let mut version_notes = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_error("invalid multipart data"))?
    {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().map(|n| n.to_string()).unwrap_or_default();
                let content_type = field.content_type().map(|mime| mime.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(multipart_error("failed to read file bytes"))?;
                upload = Some(FileUpload {
                    file_name,
                    bytes: bytes.to_vec(),
                    content_type,
                    category: FileCategory::default(),
                    version_notes: None,
                });
            }
            Some("category") | Some("file_category") => {
                let value = field
                    .text()
                    .await
                    .map_err(multipart_error("invalid category"))?;
                if let Some(value) = optional_text(value) {
                    category = value.parse()?;
                }
            }
            Some("version_notes") => {
                version_notes = optional_text(
                    field
                        .text()
                        .await
                        .map_err(multipart_error("invalid version notes"))?,
                );
            }
            _ => {}
        }
    }

    let mut upload = upload.ok_or_else(|| AppError::validation("file field is required"))?;
    upload.category = category;
    upload.version_notes = version_notes;

    let file = files::upload_file(&state, user.user_id, consultation_id, upload).await?;
    Ok((StatusCode::CREATED, Json(FileResponse { file })))
}

pub async fn file_versions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((consultation_id, file_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<FileVersionsResponse>> {
    let versions =
        files::get_file_versions(&state, user.user_id, consultation_id, file_id).await?;
    Ok(Json(FileVersionsResponse { versions }))
}

pub async fn latest_file_version(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((consultation_id, file_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<FileResponse>> {
    let file = files::get_latest_version(&state, user.user_id, consultation_id, file_id).await?;
    Ok(Json(FileResponse { file }))
}

pub async fn download_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((consultation_id, file_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<FileDownload>> {
    Ok(Json(
        files::download_file(&state, user.user_id, consultation_id, file_id).await?,
    ))
}

pub async fn deliver_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((consultation_id, file_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<FileResponse>> {
    let file = files::deliver_file(&state, user.user_id, consultation_id, file_id).await?;
    Ok(Json(FileResponse { file }))
}

pub async fn delete_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((consultation_id, file_id)): Path<(Uuid, Uuid)>,
) -> AppResult<impl IntoResponse> {
    files::delete_file(&state, user.user_id, consultation_id, file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
