//! Lawyer and operator assignment.
//!
//! The join table's `is_primary` flag is the single source of truth for the
//! responsible lawyer; `consultations.assigned_lawyer_id` is a projection
//! recomputed by [`refresh_primary`] after every change.

use chrono::Utc;
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel::PgConnection;
use tracing::info;
use uuid::Uuid;

use super::types::ConsultationStatus;
use super::{
    load_detail, lock, names_of, status_log, status_of, touch_activity, touch_updated,
    ConsultationDetail,
};
use crate::chat::{self, ParticipantRole, SystemEvent};
use crate::directory::{self, Actor, Role};
use crate::error::{AppError, AppResult};
use crate::models::{
    Consultation, ConsultationLawyer, NewConsultationLawyer, NewConsultationOperator,
    Notification, User,
};
use crate::notifications::{self, NotificationEvent};
use crate::schema::{consultation_lawyers, consultation_operators, consultations, users};
use crate::state::AppState;

/// Removes repeated ids while keeping the first occurrence's position.
pub fn dedupe_ids(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = Vec::with_capacity(ids.len());
    for id in ids {
        if !seen.contains(id) {
            seen.push(*id);
        }
    }
    seen
}

fn ensure_can_manage(actor: &Actor) -> AppResult<()> {
    if actor.role.can_manage_assignments() {
        Ok(())
    } else {
        Err(AppError::forbidden(
            "only admins and operators may manage assignments",
        ))
    }
}

fn ensure_open(consultation: &Consultation) -> AppResult<ConsultationStatus> {
    let status = status_of(consultation)?;
    if status.is_closed() {
        return Err(AppError::conflict(format!(
            "assignments cannot change on a {status} consultation"
        )));
    }
    Ok(status)
}

/// Resolves every id to a user holding `role`, in input order.
fn resolve_with_role(conn: &mut PgConnection, ids: &[Uuid], role: Role) -> AppResult<Vec<User>> {
    let found = directory::resolve_many(conn, ids)?;
    if found.len() != ids.len() {
        return Err(AppError::validation(format!(
            "some {role} ids do not match any user"
        )));
    }
    if let Some(user) = found.iter().find(|user| user.role != role.as_str()) {
        return Err(AppError::validation(format!(
            "{} is not a {role}",
            user.full_name
        )));
    }
    Ok(found)
}

/// Points `assigned_lawyer_id` at the row flagged primary, or clears it.
pub(crate) fn refresh_primary(conn: &mut PgConnection, consultation_id: Uuid) -> AppResult<Option<Uuid>> {
    let primary: Option<Uuid> = consultation_lawyers::table
        .filter(consultation_lawyers::consultation_id.eq(consultation_id))
        .filter(consultation_lawyers::is_primary.eq(true))
        .select(consultation_lawyers::lawyer_id)
        .first(conn)
        .optional()?;
    diesel::update(consultations::table.find(consultation_id))
        .set(consultations::assigned_lawyer_id.eq(primary))
        .execute(conn)?;
    Ok(primary)
}

pub async fn assign_lawyers(
    state: &AppState,
    actor_id: Uuid,
    consultation_id: Uuid,
    lawyer_ids: &[Uuid],
    set_primary: bool,
) -> AppResult<ConsultationDetail> {
    let lawyer_ids = dedupe_ids(lawyer_ids);
    if lawyer_ids.is_empty() {
        return Err(AppError::validation("at least one lawyer is required"));
    }

    let mut conn = state.db()?;
    let (detail, notifications, added) =
        conn.transaction::<(ConsultationDetail, Vec<Notification>, usize), AppError, _>(|conn| {
            let actor = directory::resolve(conn, actor_id)?;
            ensure_can_manage(&actor)?;
            let consultation = lock(conn, consultation_id)?;
            let status = ensure_open(&consultation)?;
            let lawyers = resolve_with_role(conn, &lawyer_ids, Role::Lawyer)?;

            let already: Vec<Uuid> = consultation_lawyers::table
                .filter(consultation_lawyers::consultation_id.eq(consultation_id))
                .select(consultation_lawyers::lawyer_id)
                .load(conn)?;
            let newcomers: Vec<User> = lawyers
                .into_iter()
                .filter(|lawyer| !already.contains(&lawyer.id))
                .collect();

            // Primacy is decided once, on the call that starts the consultation.
            let first_assignment = status == ConsultationStatus::Pending;
            let chat_id = chat::ensure_chat_room(conn, &consultation)?;
            let now = Utc::now().naive_utc();
            let mut notifications = Vec::new();

            for (index, lawyer) in newcomers.iter().enumerate() {
                diesel::insert_into(consultation_lawyers::table)
                    .values(&NewConsultationLawyer {
                        consultation_id,
                        lawyer_id: lawyer.id,
                        is_primary: first_assignment && set_primary && index == 0,
                        assigned_by: actor.id,
                        assigned_at: now,
                    })
                    .execute(conn)?;

                if chat::add_participant(conn, chat_id, lawyer.id, ParticipantRole::Lawyer)? {
                    chat::post_system_message(
                        conn,
                        chat_id,
                        &SystemEvent::LawyerJoined {
                            lawyer_id: lawyer.id,
                            lawyer_name: lawyer.full_name.clone(),
                        },
                    )?;
                }

                notifications.push(notifications::record(
                    conn,
                    lawyer.id,
                    &NotificationEvent::Assigned {
                        consultation_id,
                        consultation_title: consultation.title.clone(),
                    },
                )?);
            }

            if newcomers.is_empty() {
                touch_updated(conn, consultation_id)?;
            } else if first_assignment {
                refresh_primary(conn, consultation_id)?;
                diesel::update(consultations::table.find(consultation_id))
                    .set((
                        consultations::status.eq(ConsultationStatus::InProgress.as_str()),
                        consultations::assigned_at.eq(Some(now)),
                        consultations::started_at.eq(Some(now)),
                        consultations::last_activity_at.eq(now),
                        consultations::updated_at.eq(now),
                    ))
                    .execute(conn)?;
                status_log::append(
                    conn,
                    consultation_id,
                    Some(ConsultationStatus::Pending),
                    ConsultationStatus::InProgress,
                    actor.id,
                    Some(format!("Assigned lawyers: {}", names_of(&newcomers))),
                )?;
                notifications.push(notifications::record(
                    conn,
                    consultation.created_by,
                    &NotificationEvent::StatusChanged {
                        consultation_id,
                        old_status: ConsultationStatus::Pending,
                        new_status: ConsultationStatus::InProgress,
                    },
                )?);
            } else {
                refresh_primary(conn, consultation_id)?;
                status_log::narrate(
                    conn,
                    consultation_id,
                    status,
                    actor.id,
                    format!("Added lawyers: {}", names_of(&newcomers)),
                )?;
                touch_activity(conn, consultation_id)?;
            }

            Ok((
                load_detail(conn, consultation_id)?,
                notifications,
                newcomers.len(),
            ))
        })?;
    drop(conn);

    info!(%consultation_id, %actor_id, added, "lawyers assigned");
    state.dispatch(notifications).await;
    Ok(detail)
}

/// Operators have no primary and never move the status. Re-assigning an
/// operator refreshes who assigned them and when.
pub async fn assign_operators(
    state: &AppState,
    actor_id: Uuid,
    consultation_id: Uuid,
    operator_ids: &[Uuid],
) -> AppResult<ConsultationDetail> {
    let operator_ids = dedupe_ids(operator_ids);
    if operator_ids.is_empty() {
        return Err(AppError::validation("at least one operator is required"));
    }

    let mut conn = state.db()?;
    let detail = conn.transaction::<_, AppError, _>(|conn| {
        let actor = directory::resolve(conn, actor_id)?;
        ensure_can_manage(&actor)?;
        let consultation = lock(conn, consultation_id)?;
        ensure_open(&consultation)?;
        let operators = resolve_with_role(conn, &operator_ids, Role::Operator)?;

        let chat_id = chat::ensure_chat_room(conn, &consultation)?;
        let now = Utc::now().naive_utc();
        let mut joined = false;

        for operator in &operators {
            diesel::insert_into(consultation_operators::table)
                .values(&NewConsultationOperator {
                    consultation_id,
                    operator_id: operator.id,
                    assigned_by: actor.id,
                    assigned_at: now,
                })
                .on_conflict((
                    consultation_operators::consultation_id,
                    consultation_operators::operator_id,
                ))
                .do_update()
                .set((
                    consultation_operators::assigned_by
                        .eq(excluded(consultation_operators::assigned_by)),
                    consultation_operators::assigned_at
                        .eq(excluded(consultation_operators::assigned_at)),
                ))
                .execute(conn)?;

            if chat::add_participant(conn, chat_id, operator.id, ParticipantRole::Operator)? {
                chat::post_system_message(
                    conn,
                    chat_id,
                    &SystemEvent::OperatorJoined {
                        operator_id: operator.id,
                        operator_name: operator.full_name.clone(),
                    },
                )?;
                joined = true;
            }
        }

        if joined {
            touch_activity(conn, consultation_id)?;
        } else {
            touch_updated(conn, consultation_id)?;
        }

        load_detail(conn, consultation_id)
    })?;
    drop(conn);

    info!(%consultation_id, %actor_id, operators = operator_ids.len(), "operators assigned");
    Ok(detail)
}

/// Removes one lawyer. At least one lawyer always stays; losing the primary
/// promotes the remaining lawyer with the lowest assignment row id.
pub async fn remove_lawyer(
    state: &AppState,
    actor_id: Uuid,
    consultation_id: Uuid,
    lawyer_id: Uuid,
) -> AppResult<ConsultationDetail> {
    let mut conn = state.db()?;
    let detail = conn.transaction::<_, AppError, _>(|conn| {
        let actor = directory::resolve(conn, actor_id)?;
        ensure_can_manage(&actor)?;
        let consultation = lock(conn, consultation_id)?;
        let status = ensure_open(&consultation)?;

        let assigned: Vec<ConsultationLawyer> = consultation_lawyers::table
            .filter(consultation_lawyers::consultation_id.eq(consultation_id))
            .order(consultation_lawyers::id.asc())
            .load(conn)?;
        let removed = assigned
            .iter()
            .find(|row| row.lawyer_id == lawyer_id)
            .cloned()
            .ok_or_else(|| {
                AppError::conflict("this lawyer is not assigned to the consultation")
            })?;
        if assigned.len() <= 1 {
            return Err(AppError::conflict(
                "at least one lawyer must remain assigned",
            ));
        }

        diesel::delete(consultation_lawyers::table.find(removed.id)).execute(conn)?;

        if removed.is_primary {
            diesel::update(
                consultation_lawyers::table
                    .filter(consultation_lawyers::consultation_id.eq(consultation_id)),
            )
            .set(consultation_lawyers::is_primary.eq(false))
            .execute(conn)?;
            if let Some(successor) = assigned.iter().find(|row| row.id != removed.id) {
                diesel::update(consultation_lawyers::table.find(successor.id))
                    .set(consultation_lawyers::is_primary.eq(true))
                    .execute(conn)?;
            }
        }
        refresh_primary(conn, consultation_id)?;

        let lawyer: User = users::table.find(lawyer_id).first(conn)?;
        if let Some(chat_id) = consultation.chat_id {
            chat::remove_participant(conn, chat_id, lawyer_id)?;
            chat::post_system_message(
                conn,
                chat_id,
                &SystemEvent::LawyerRemoved {
                    lawyer_id,
                    lawyer_name: lawyer.full_name.clone(),
                },
            )?;
        }

        status_log::narrate(
            conn,
            consultation_id,
            status,
            actor.id,
            format!("Removed lawyer: {}", lawyer.full_name),
        )?;
        touch_activity(conn, consultation_id)?;

        load_detail(conn, consultation_id)
    })?;
    drop(conn);

    info!(%consultation_id, %actor_id, %lawyer_id, "lawyer removed");
    Ok(detail)
}
