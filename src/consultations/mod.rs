//! The consultation lifecycle engine.
//!
//! Every mutating operation runs in one transaction that starts by locking
//! the consultation row, so decisions that depend on the current status,
//! assignment set or version chain are serialized per consultation.
//! Notifications are written as inbox rows inside that transaction and
//! pushed only after it commits.

pub mod assignment;
pub mod files;
pub mod lifecycle;
pub mod listing;
pub mod status_log;
pub mod types;

use chrono::{NaiveDateTime, Utc};
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::{select, PgConnection};
use serde::Serialize;
use uuid::Uuid;

use crate::directory::{self, Actor, Role};
use crate::error::{AppError, AppResult};
use crate::models::{
    Consultation, ConsultationFile, ConsultationLawyer, ConsultationOperator,
    ConsultationStatusLog, User,
};
use crate::schema::{
    consultation_files, consultation_lawyers, consultation_operators, consultation_status_logs,
    consultations, users,
};

use self::types::{parse_stored, ConsultationStatus};

#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub role: String,
}

impl From<User> for UserSummary {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            full_name: user.full_name,
            email: user.email,
            role: user.role,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignedLawyer {
    #[serde(flatten)]
    pub lawyer: UserSummary,
    pub is_primary: bool,
    pub assigned_by: Uuid,
    pub assigned_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignedOperator {
    #[serde(flatten)]
    pub operator: UserSummary,
    pub assigned_by: Uuid,
    pub assigned_at: NaiveDateTime,
}

/// A consultation with everything a participant screen needs.
#[derive(Debug, Clone, Serialize)]
pub struct ConsultationDetail {
    pub consultation: Consultation,
    pub creator: UserSummary,
    /// Primary lawyer first, then assignment order.
    pub lawyers: Vec<AssignedLawyer>,
    pub operators: Vec<AssignedOperator>,
    pub files: Vec<ConsultationFile>,
    /// Newest entry first.
    pub status_logs: Vec<ConsultationStatusLog>,
}

pub fn load_detail(conn: &mut PgConnection, consultation_id: Uuid) -> AppResult<ConsultationDetail> {
    let consultation: Consultation = consultations::table.find(consultation_id).first(conn)?;
    let creator: User = users::table.find(consultation.created_by).first(conn)?;

    let lawyers = consultation_lawyers::table
        .inner_join(users::table.on(users::id.eq(consultation_lawyers::lawyer_id)))
        .filter(consultation_lawyers::consultation_id.eq(consultation_id))
        .order((
            consultation_lawyers::is_primary.desc(),
            consultation_lawyers::id.asc(),
        ))
        .load::<(ConsultationLawyer, User)>(conn)?
        .into_iter()
        .map(|(row, user)| AssignedLawyer {
            lawyer: user.into(),
            is_primary: row.is_primary,
            assigned_by: row.assigned_by,
            assigned_at: row.assigned_at,
        })
        .collect();

    let operators = consultation_operators::table
        .inner_join(users::table.on(users::id.eq(consultation_operators::operator_id)))
        .filter(consultation_operators::consultation_id.eq(consultation_id))
        .order(consultation_operators::id.asc())
        .load::<(ConsultationOperator, User)>(conn)?
        .into_iter()
        .map(|(row, user)| AssignedOperator {
            operator: user.into(),
            assigned_by: row.assigned_by,
            assigned_at: row.assigned_at,
        })
        .collect();

    let files = consultation_files::table
        .filter(consultation_files::consultation_id.eq(consultation_id))
        .order((
            consultation_files::file_name.asc(),
            consultation_files::version.asc(),
        ))
        .load::<ConsultationFile>(conn)?;

    let status_logs = consultation_status_logs::table
        .filter(consultation_status_logs::consultation_id.eq(consultation_id))
        .order(consultation_status_logs::id.desc())
        .load::<ConsultationStatusLog>(conn)?;

    Ok(ConsultationDetail {
        consultation,
        creator: creator.into(),
        lawyers,
        operators,
        files,
        status_logs,
    })
}

pub(crate) fn find(conn: &mut PgConnection, consultation_id: Uuid) -> AppResult<Consultation> {
    Ok(consultations::table
        .find(consultation_id)
        .first::<Consultation>(conn)?)
}

/// Loads the consultation with `FOR UPDATE`. Must be called inside a
/// transaction; the lock is released at commit or rollback.
pub(crate) fn lock(conn: &mut PgConnection, consultation_id: Uuid) -> AppResult<Consultation> {
    Ok(consultations::table
        .find(consultation_id)
        .for_update()
        .first::<Consultation>(conn)?)
}

pub(crate) fn status_of(consultation: &Consultation) -> AppResult<ConsultationStatus> {
    parse_stored(&consultation.status)
}

/// Bumps the staleness timestamp used for ordering.
pub(crate) fn touch_activity(conn: &mut PgConnection, consultation_id: Uuid) -> AppResult<()> {
    let now = Utc::now().naive_utc();
    diesel::update(consultations::table.find(consultation_id))
        .set((
            consultations::last_activity_at.eq(now),
            consultations::updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(())
}

/// Records that the row was looked at by a write that changed nothing else.
pub(crate) fn touch_updated(conn: &mut PgConnection, consultation_id: Uuid) -> AppResult<()> {
    diesel::update(consultations::table.find(consultation_id))
        .set(consultations::updated_at.eq(Utc::now().naive_utc()))
        .execute(conn)?;
    Ok(())
}

pub(crate) fn is_assigned_lawyer(
    conn: &mut PgConnection,
    consultation_id: Uuid,
    user_id: Uuid,
) -> AppResult<bool> {
    Ok(select(exists(
        consultation_lawyers::table
            .filter(consultation_lawyers::consultation_id.eq(consultation_id))
            .filter(consultation_lawyers::lawyer_id.eq(user_id)),
    ))
    .get_result(conn)?)
}

pub(crate) fn is_assigned_operator(
    conn: &mut PgConnection,
    consultation_id: Uuid,
    user_id: Uuid,
) -> AppResult<bool> {
    Ok(select(exists(
        consultation_operators::table
            .filter(consultation_operators::consultation_id.eq(consultation_id))
            .filter(consultation_operators::operator_id.eq(user_id)),
    ))
    .get_result(conn)?)
}

/// Creator, same-company admins, assigned staff and admins may see a
/// consultation.
pub(crate) fn can_view(
    conn: &mut PgConnection,
    actor: &Actor,
    consultation: &Consultation,
) -> AppResult<bool> {
    if consultation.created_by == actor.id {
        return Ok(true);
    }
    match actor.role {
        Role::Admin => Ok(true),
        Role::Lawyer => is_assigned_lawyer(conn, consultation.id, actor.id),
        Role::Operator => is_assigned_operator(conn, consultation.id, actor.id),
        Role::CompanyAdmin => {
            let creator_orgs = directory::organization_ids(conn, consultation.created_by)?;
            Ok(actor.shares_organization(&creator_orgs))
        }
        Role::Client | Role::Expert => Ok(false),
    }
}

pub(crate) fn ensure_can_view(
    conn: &mut PgConnection,
    actor: &Actor,
    consultation: &Consultation,
) -> AppResult<()> {
    if can_view(conn, actor, consultation)? {
        Ok(())
    } else {
        Err(AppError::forbidden(
            "you do not have access to this consultation",
        ))
    }
}

/// Only the creator drives the client-side affordances.
pub(crate) fn ensure_creator(actor: &Actor, consultation: &Consultation, action: &str) -> AppResult<()> {
    if consultation.created_by == actor.id {
        Ok(())
    } else {
        Err(AppError::forbidden(format!(
            "only the creator may {action} this consultation"
        )))
    }
}

pub(crate) fn names_of(users: &[User]) -> String {
    users
        .iter()
        .map(|user| user.full_name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
