//! File ledger: blobs per consultation with version chains and
//! deliverable access flags.
//!
//! Blobs are written before the database transaction opens and removed
//! again if it fails. Row deletions remove their blob only after commit.

use std::path::Path as FsPath;
use std::time::Duration;

use chrono::Utc;
use diesel::dsl::max;
use diesel::prelude::*;
use diesel::PgConnection;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use super::types::{parse_stored, ConsultationStatus, FileCategory};
use super::{ensure_can_view, is_assigned_lawyer, lock, status_log, status_of, touch_activity};
use crate::directory::{self, Actor, Role};
use crate::error::{AppError, AppResult};
use crate::models::{Consultation, ConsultationFile, NewConsultationFile, Notification};
use crate::notifications::{self, NotificationEvent};
use crate::schema::{consultation_files, consultations};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct FileLimits {
    pub max_size: u64,
    pub allowed_types: Vec<String>,
}

/// An incoming file as received by the request layer.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub category: FileCategory,
    pub version_notes: Option<String>,
}

/// A blob already written to storage, waiting for its ledger row.
#[derive(Debug, Clone)]
pub(crate) struct StagedFile {
    pub id: Uuid,
    pub key: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_type: String,
    pub content_type: Option<String>,
    pub checksum: String,
    pub category: FileCategory,
    pub version_notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FileDownload {
    pub url: String,
    pub expires_in: u64,
    pub file_name: String,
    pub content_type: Option<String>,
    pub file_size: i64,
    pub version: i32,
}

pub fn object_key(consultation_id: Uuid, file_id: Uuid) -> String {
    format!("consultations/{consultation_id}/{file_id}")
}

pub fn extension_of(file_name: &str) -> Option<String> {
    FsPath::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Checks name, size and extension; returns the normalized extension.
pub fn validate_upload(limits: &FileLimits, file_name: &str, size: usize) -> AppResult<String> {
    if file_name.trim().is_empty() {
        return Err(AppError::validation("file name is required"));
    }
    if size == 0 {
        return Err(AppError::validation(format!("{file_name} is empty")));
    }
    if size as u64 > limits.max_size {
        return Err(AppError::validation(format!(
            "{file_name} exceeds the maximum size of {} bytes",
            limits.max_size
        )));
    }
    let extension = extension_of(file_name).ok_or_else(|| {
        AppError::validation(format!("{file_name} has no file extension"))
    })?;
    if !limits.allowed_types.iter().any(|allowed| *allowed == extension) {
        return Err(AppError::validation(format!(
            "file type .{extension} is not allowed; allowed types: {}",
            limits.allowed_types.join(", ")
        )));
    }
    Ok(extension)
}

pub fn inline_content_disposition(file_name: &str) -> Option<String> {
    if file_name.is_empty() {
        return None;
    }

    let sanitized: String = file_name
        .chars()
        .map(|ch| match ch {
            '"' | '\\' | '\r' | '\n' => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    Some(format!(
        "inline; filename=\"{sanitized}\"; filename*=UTF-8''{encoded}"
    ))
}

/// Staff always may download; client-side viewers only see deliverables
/// once they have been delivered.
pub fn can_download(role: Role, file: &ConsultationFile) -> bool {
    if role.is_staff() {
        return true;
    }
    !file.is_deliverable || (file.can_client_access && file.delivered_at.is_some())
}

/// Validates every upload, then writes the blobs. Nothing is written unless
/// all files pass validation; a storage failure removes what was written.
pub(crate) async fn stage(
    state: &AppState,
    consultation_id: Uuid,
    uploads: Vec<FileUpload>,
) -> AppResult<Vec<StagedFile>> {
    let limits = state.file_limits();
    let extensions = uploads
        .iter()
        .map(|upload| validate_upload(&limits, &upload.file_name, upload.bytes.len()))
        .collect::<AppResult<Vec<_>>>()?;

    let mut staged = Vec::with_capacity(uploads.len());
    for (upload, file_type) in uploads.into_iter().zip(extensions) {
        let id = Uuid::new_v4();
        let key = object_key(consultation_id, id);
        let checksum = hex::encode(Sha256::digest(&upload.bytes));
        let file_size = upload.bytes.len() as i64;
        let content_type = upload.content_type.clone().or_else(|| {
            mime_guess::from_path(&upload.file_name)
                .first()
                .map(|mime| mime.essence_str().to_string())
        });

        if let Err(err) = state
            .storage
            .put_object(
                &key,
                upload.bytes,
                content_type.clone(),
                inline_content_disposition(&upload.file_name),
            )
            .await
        {
            warn!(%consultation_id, key = %key, error = %err, "failed to store consultation file");
            discard(state, &staged).await;
            return Err(AppError::dependency(format!("failed to store file: {err}")));
        }

        staged.push(StagedFile {
            id,
            key,
            file_name: upload.file_name,
            file_size,
            file_type,
            content_type,
            checksum,
            category: upload.category,
            version_notes: upload
                .version_notes
                .map(|notes| notes.trim().to_string())
                .filter(|notes| !notes.is_empty()),
        });
    }
    Ok(staged)
}

/// Best-effort removal of blobs whose ledger rows never committed.
pub(crate) async fn discard(state: &AppState, staged: &[StagedFile]) {
    for file in staged {
        if let Err(err) = state.storage.delete_object(&file.key).await {
            warn!(key = %file.key, error = %err, "failed to remove orphaned blob");
        }
    }
}

/// Inserts the ledger row, appending to the version chain of an existing
/// root file with the same name. Callers hold the consultation lock.
pub(crate) fn record(
    conn: &mut PgConnection,
    consultation_id: Uuid,
    staged: &StagedFile,
    uploaded_by: Uuid,
) -> AppResult<ConsultationFile> {
    let root: Option<ConsultationFile> = consultation_files::table
        .filter(consultation_files::consultation_id.eq(consultation_id))
        .filter(consultation_files::file_name.eq(&staged.file_name))
        .filter(consultation_files::parent_file_id.is_null())
        .order(consultation_files::created_at.asc())
        .first(conn)
        .optional()?;

    let (version, parent_file_id) = match &root {
        Some(root) => {
            let latest: Option<i32> = consultation_files::table
                .filter(
                    consultation_files::id
                        .eq(root.id)
                        .or(consultation_files::parent_file_id.eq(root.id)),
                )
                .select(max(consultation_files::version))
                .first(conn)?;
            (latest.unwrap_or(root.version) + 1, Some(root.id))
        }
        None => (1, None),
    };

    let deliverable = staged.category.is_deliverable();
    let row = NewConsultationFile {
        id: staged.id,
        consultation_id,
        file_path: staged.key.clone(),
        file_name: staged.file_name.clone(),
        file_size: staged.file_size,
        file_type: staged.file_type.clone(),
        content_type: staged.content_type.clone(),
        checksum: staged.checksum.clone(),
        file_category: staged.category.as_str().to_string(),
        is_deliverable: deliverable,
        delivered_at: (!deliverable).then(|| Utc::now().naive_utc()),
        can_client_access: !deliverable,
        version,
        parent_file_id,
        uploaded_by,
        version_notes: staged.version_notes.clone(),
    };

    Ok(diesel::insert_into(consultation_files::table)
        .values(&row)
        .get_result(conn)?)
}

pub async fn upload_file(
    state: &AppState,
    actor_id: Uuid,
    consultation_id: Uuid,
    upload: FileUpload,
) -> AppResult<ConsultationFile> {
    {
        let mut conn = state.db()?;
        let actor = directory::resolve(&mut conn, actor_id)?;
        let consultation = super::find(&mut conn, consultation_id)?;
        ensure_can_upload(&mut conn, &actor, &consultation, upload.category)?;
    }

    let staged = stage(state, consultation_id, vec![upload]).await?;

    let mut conn = state.db()?;
    let result = conn.transaction::<_, AppError, _>(|conn| {
        let consultation = lock(conn, consultation_id)?;
        ensure_open_for_files(status_of(&consultation)?)?;
        let mut recorded = Vec::with_capacity(staged.len());
        for file in &staged {
            recorded.push(record(conn, consultation_id, file, actor_id)?);
        }
        touch_activity(conn, consultation_id)?;
        recorded
            .pop()
            .ok_or_else(|| AppError::internal("upload produced no ledger row"))
    });
    drop(conn);

    match result {
        Ok(file) => {
            info!(
                %consultation_id,
                file_id = %file.id,
                version = file.version,
                category = %file.file_category,
                "consultation file uploaded"
            );
            Ok(file)
        }
        Err(err) => {
            discard(state, &staged).await;
            Err(err)
        }
    }
}

fn ensure_can_upload(
    conn: &mut PgConnection,
    actor: &Actor,
    consultation: &Consultation,
    category: FileCategory,
) -> AppResult<()> {
    ensure_can_view(conn, actor, consultation)?;
    if category.is_deliverable() && !actor.role.is_staff() {
        return Err(AppError::forbidden(
            "only lawyers, operators and admins may upload deliverables",
        ));
    }
    ensure_open_for_files(status_of(consultation)?)
}

fn ensure_open_for_files(status: ConsultationStatus) -> AppResult<()> {
    if status.is_closed() {
        return Err(AppError::conflict(format!(
            "files cannot be added to a {status} consultation"
        )));
    }
    Ok(())
}

fn find_file(
    conn: &mut PgConnection,
    consultation_id: Uuid,
    file_id: Uuid,
) -> AppResult<ConsultationFile> {
    Ok(consultation_files::table
        .filter(consultation_files::id.eq(file_id))
        .filter(consultation_files::consultation_id.eq(consultation_id))
        .first(conn)?)
}

/// The root plus every re-upload, ordered by version.
pub fn versions_of(
    conn: &mut PgConnection,
    file: &ConsultationFile,
) -> AppResult<Vec<ConsultationFile>> {
    let root_id = file.parent_file_id.unwrap_or(file.id);
    Ok(consultation_files::table
        .filter(
            consultation_files::id
                .eq(root_id)
                .or(consultation_files::parent_file_id.eq(root_id)),
        )
        .order(consultation_files::version.asc())
        .load(conn)?)
}

pub async fn get_file_versions(
    state: &AppState,
    actor_id: Uuid,
    consultation_id: Uuid,
    file_id: Uuid,
) -> AppResult<Vec<ConsultationFile>> {
    let mut conn = state.db()?;
    let actor = directory::resolve(&mut conn, actor_id)?;
    let consultation = super::find(&mut conn, consultation_id)?;
    ensure_can_view(&mut conn, &actor, &consultation)?;
    let file = find_file(&mut conn, consultation_id, file_id)?;
    let versions = versions_of(&mut conn, &file)?;
    Ok(versions
        .into_iter()
        .filter(|version| can_download(actor.role, version))
        .collect())
}

pub async fn get_latest_version(
    state: &AppState,
    actor_id: Uuid,
    consultation_id: Uuid,
    file_id: Uuid,
) -> AppResult<ConsultationFile> {
    let mut conn = state.db()?;
    let actor = directory::resolve(&mut conn, actor_id)?;
    let consultation = super::find(&mut conn, consultation_id)?;
    ensure_can_view(&mut conn, &actor, &consultation)?;
    let file = find_file(&mut conn, consultation_id, file_id)?;
    // Clients only see the newest version they are allowed to download.
    versions_of(&mut conn, &file)?
        .into_iter()
        .filter(|version| can_download(actor.role, version))
        .last()
        .ok_or_else(AppError::not_found)
}

/// Deletes one ledger row. Removing a root promotes its lowest remaining
/// version to be the new root of the chain.
pub async fn delete_file(
    state: &AppState,
    actor_id: Uuid,
    consultation_id: Uuid,
    file_id: Uuid,
) -> AppResult<()> {
    let mut conn = state.db()?;
    let removed = conn.transaction::<_, AppError, _>(|conn| {
        let actor = directory::resolve(conn, actor_id)?;
        let consultation = lock(conn, consultation_id)?;
        let file = find_file(conn, consultation_id, file_id)?;

        if consultation.created_by != actor.id && file.uploaded_by != actor.id {
            return Err(AppError::forbidden(
                "only the consultation creator or the uploader may delete this file",
            ));
        }

        if file.parent_file_id.is_none() {
            let children: Vec<ConsultationFile> = consultation_files::table
                .filter(consultation_files::parent_file_id.eq(file.id))
                .order(consultation_files::version.asc())
                .load(conn)?;
            if let Some((new_root, rest)) = children.split_first() {
                diesel::update(consultation_files::table.find(new_root.id))
                    .set(consultation_files::parent_file_id.eq(None::<Uuid>))
                    .execute(conn)?;
                let rest_ids: Vec<Uuid> = rest.iter().map(|child| child.id).collect();
                if !rest_ids.is_empty() {
                    diesel::update(
                        consultation_files::table.filter(consultation_files::id.eq_any(rest_ids)),
                    )
                    .set(consultation_files::parent_file_id.eq(Some(new_root.id)))
                    .execute(conn)?;
                }
            }
        }

        diesel::delete(consultation_files::table.find(file.id)).execute(conn)?;
        touch_activity(conn, consultation_id)?;
        Ok(file)
    })?;
    drop(conn);

    if let Err(err) = state.storage.delete_object(&removed.file_path).await {
        warn!(file_id = %removed.id, error = %err, "failed to delete consultation file blob");
    }
    info!(%consultation_id, file_id = %removed.id, %actor_id, "consultation file deleted");
    Ok(())
}

/// The explicit delivery step that unlocks a deliverable for the client.
pub async fn deliver_file(
    state: &AppState,
    actor_id: Uuid,
    consultation_id: Uuid,
    file_id: Uuid,
) -> AppResult<ConsultationFile> {
    let mut conn = state.db()?;
    let (file, notifications) =
        conn.transaction::<(ConsultationFile, Vec<Notification>), AppError, _>(|conn| {
            let actor = directory::resolve(conn, actor_id)?;
            let consultation = lock(conn, consultation_id)?;
            let permitted = match actor.role {
                Role::Admin | Role::Operator => true,
                Role::Lawyer => is_assigned_lawyer(conn, consultation_id, actor.id)?,
                _ => false,
            };
            if !permitted {
                return Err(AppError::forbidden(
                    "only assigned lawyers, operators and admins may deliver files",
                ));
            }

            let status = status_of(&consultation)?;
            if status != ConsultationStatus::InProgress {
                return Err(AppError::conflict(
                    "files can only be delivered while the consultation is in progress",
                ));
            }

            let file = find_file(conn, consultation_id, file_id)?;
            let category: FileCategory = parse_stored(&file.file_category)?;
            if !category.is_deliverable() {
                return Err(AppError::validation("only deliverable files can be delivered"));
            }
            if file.can_client_access && file.delivered_at.is_some() {
                return Err(AppError::conflict("this file has already been delivered"));
            }

            let now = Utc::now().naive_utc();
            let delivered: ConsultationFile =
                diesel::update(consultation_files::table.find(file.id))
                    .set((
                        consultation_files::can_client_access.eq(true),
                        consultation_files::delivered_at.eq(Some(now)),
                    ))
                    .get_result(conn)?;

            diesel::update(consultations::table.find(consultation_id))
                .set((
                    consultations::lawyer_delivered_at.eq(Some(now)),
                    consultations::delivered_at.eq(Some(now)),
                    consultations::last_activity_at.eq(now),
                    consultations::updated_at.eq(now),
                ))
                .execute(conn)?;

            status_log::narrate(
                conn,
                consultation_id,
                status,
                actor.id,
                format!("Delivered file: {}", delivered.file_name),
            )?;

            let notification = notifications::record(
                conn,
                consultation.created_by,
                &NotificationEvent::Delivered {
                    consultation_id,
                    consultation_title: consultation.title.clone(),
                    file_id: delivered.id,
                    file_name: delivered.file_name.clone(),
                },
            )?;

            Ok((delivered, vec![notification]))
        })?;
    drop(conn);

    info!(%consultation_id, file_id = %file.id, %actor_id, "deliverable released to client");
    state.dispatch(notifications).await;
    Ok(file)
}

pub async fn download_file(
    state: &AppState,
    actor_id: Uuid,
    consultation_id: Uuid,
    file_id: Uuid,
) -> AppResult<FileDownload> {
    let file = {
        let mut conn = state.db()?;
        let actor = directory::resolve(&mut conn, actor_id)?;
        let consultation = super::find(&mut conn, consultation_id)?;
        ensure_can_view(&mut conn, &actor, &consultation)?;
        let file = find_file(&mut conn, consultation_id, file_id)?;
        if !can_download(actor.role, &file) {
            return Err(AppError::forbidden("this deliverable has not been delivered yet"));
        }
        file
    };

    let expires_in = state.config.download_url_expiry_seconds;
    let url = state
        .storage
        .presign_get_object(&file.file_path, Duration::from_secs(expires_in))
        .await
        .map_err(|err| AppError::dependency(format!("failed to generate download URL: {err}")))?;

    Ok(FileDownload {
        url,
        expires_in,
        file_name: file.file_name,
        content_type: file.content_type,
        file_size: file.file_size,
        version: file.version,
    })
}
