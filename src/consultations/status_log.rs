//! Append-only audit trail. Rows are never updated or deleted.

use diesel::prelude::*;
use diesel::PgConnection;
use uuid::Uuid;

use super::types::ConsultationStatus;
use crate::error::AppResult;
use crate::models::{ConsultationStatusLog, NewConsultationStatusLog};
use crate::schema::consultation_status_logs;
use crate::state::AppState;
use crate::{consultations, directory};

pub fn append(
    conn: &mut PgConnection,
    consultation_id: Uuid,
    old_status: Option<ConsultationStatus>,
    new_status: ConsultationStatus,
    changed_by: Uuid,
    reason: Option<String>,
) -> AppResult<ConsultationStatusLog> {
    let row = NewConsultationStatusLog {
        consultation_id,
        old_status: old_status.map(|status| status.as_str().to_string()),
        new_status: new_status.as_str().to_string(),
        changed_by,
        reason,
    };
    Ok(diesel::insert_into(consultation_status_logs::table)
        .values(&row)
        .get_result(conn)?)
}

/// Narrative entry for changes that leave the status untouched.
pub fn narrate(
    conn: &mut PgConnection,
    consultation_id: Uuid,
    status: ConsultationStatus,
    changed_by: Uuid,
    reason: impl Into<String>,
) -> AppResult<ConsultationStatusLog> {
    append(
        conn,
        consultation_id,
        Some(status),
        status,
        changed_by,
        Some(reason.into()),
    )
}

pub fn list(conn: &mut PgConnection, consultation_id: Uuid) -> AppResult<Vec<ConsultationStatusLog>> {
    Ok(consultation_status_logs::table
        .filter(consultation_status_logs::consultation_id.eq(consultation_id))
        .order(consultation_status_logs::id.desc())
        .load(conn)?)
}

pub async fn list_status_logs(
    state: &AppState,
    actor_id: Uuid,
    consultation_id: Uuid,
) -> AppResult<Vec<ConsultationStatusLog>> {
    let mut conn = state.db()?;
    let actor = directory::resolve(&mut conn, actor_id)?;
    let consultation = consultations::find(&mut conn, consultation_id)?;
    consultations::ensure_can_view(&mut conn, &actor, &consultation)?;
    list(&mut conn, consultation_id)
}
