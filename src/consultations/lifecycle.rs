use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::info;
use uuid::Uuid;

use super::files::{self, FileUpload};
use super::types::{ConsultationStatus, Priority, Topic};
use super::{
    ensure_creator, is_assigned_lawyer, load_detail, lock, status_log, status_of,
    ConsultationDetail,
};
use crate::chat::{self, SystemEvent};
use crate::directory::{self, Role};
use crate::error::{AppError, AppResult};
use crate::models::{Consultation, NewConsultation, Notification};
use crate::notifications::{self, NotificationEvent};
use crate::schema::consultations;
use crate::state::AppState;

const MAX_TITLE_LENGTH: usize = 255;
const MIN_REASON_LENGTH: usize = 5;
const MAX_REASON_LENGTH: usize = 500;

#[derive(Debug, Clone, Default)]
pub struct NewConsultationInput {
    pub title: Option<String>,
    pub description: String,
    pub topic: Topic,
    pub priority: Priority,
}

/// `CNS-YYYYMMDD-XXXXXX`, unique per consultation.
pub fn generate_reference_number(now: NaiveDateTime) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|byte| char::from(byte).to_ascii_uppercase())
        .collect();
    format!("CNS-{}-{suffix}", now.format("%Y%m%d"))
}

fn resolve_title(title: Option<String>, topic: Topic) -> AppResult<String> {
    let title = title
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| topic.label().to_string());
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(AppError::validation(format!(
            "title must be at most {MAX_TITLE_LENGTH} characters"
        )));
    }
    Ok(title)
}

/// Withdrawal and escalation reasons are trimmed and must be 5 to 500
/// characters long.
fn validate_reason(reason: &str, what: &str) -> AppResult<String> {
    let reason = reason.trim();
    let length = reason.chars().count();
    if !(MIN_REASON_LENGTH..=MAX_REASON_LENGTH).contains(&length) {
        return Err(AppError::validation(format!(
            "{what} reason must be between {MIN_REASON_LENGTH} and {MAX_REASON_LENGTH} characters"
        )));
    }
    Ok(reason.to_string())
}

pub async fn create(
    state: &AppState,
    creator_id: Uuid,
    input: NewConsultationInput,
    uploads: Vec<FileUpload>,
) -> AppResult<ConsultationDetail> {
    {
        let mut conn = state.db()?;
        let creator = directory::resolve(&mut conn, creator_id)?;
        if creator.role == Role::Lawyer {
            return Err(AppError::forbidden("lawyers cannot create consultations"));
        }
        if !creator.can_create_consultations() {
            return Err(AppError::forbidden(
                "you do not have permission to create consultations",
            ));
        }
    }

    let description = input.description.trim().to_string();
    if description.is_empty() {
        return Err(AppError::validation("description is required"));
    }
    let title = resolve_title(input.title, input.topic)?;

    let consultation_id = Uuid::new_v4();
    let staged = files::stage(state, consultation_id, uploads).await?;

    let mut conn = state.db()?;
    let result = conn.transaction::<_, AppError, _>(|conn| {
        let now = Utc::now().naive_utc();
        let row = NewConsultation {
            id: consultation_id,
            reference_number: Some(generate_reference_number(now)),
            title: title.clone(),
            description: description.clone(),
            topic: input.topic.as_str().to_string(),
            status: ConsultationStatus::Pending.as_str().to_string(),
            priority: input.priority.as_str().to_string(),
            created_by: creator_id,
            last_activity_at: now,
        };
        diesel::insert_into(consultations::table)
            .values(&row)
            .execute(conn)?;

        status_log::append(
            conn,
            consultation_id,
            None,
            ConsultationStatus::Pending,
            creator_id,
            Some("Consultation created".to_string()),
        )?;

        for file in &staged {
            files::record(conn, consultation_id, file, creator_id)?;
        }

        load_detail(conn, consultation_id)
    });
    drop(conn);

    match result {
        Ok(detail) => {
            info!(
                %consultation_id,
                creator_id = %creator_id,
                topic = %input.topic.as_str(),
                files = staged.len(),
                "consultation created"
            );
            Ok(detail)
        }
        Err(err) => {
            files::discard(state, &staged).await;
            Err(err)
        }
    }
}

/// Generic status change used by staff. Client-side affordances go through
/// [`withdraw`], [`archive`] and [`unarchive`].
pub async fn update_status(
    state: &AppState,
    actor_id: Uuid,
    consultation_id: Uuid,
    new_status: &str,
    reason: Option<String>,
) -> AppResult<ConsultationDetail> {
    let new_status: ConsultationStatus = new_status.parse()?;
    let reason = reason
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    let mut conn = state.db()?;
    let (detail, notifications) =
        conn.transaction::<(ConsultationDetail, Vec<Notification>), AppError, _>(|conn| {
            let actor = directory::resolve(conn, actor_id)?;
            let consultation = lock(conn, consultation_id)?;
            let permitted = match actor.role {
                Role::Admin | Role::Operator => true,
                Role::Lawyer => is_assigned_lawyer(conn, consultation_id, actor.id)?,
                _ => false,
            };
            if !permitted {
                return Err(AppError::forbidden(
                    "only admins, operators and assigned lawyers may change the status",
                ));
            }

            let current = status_of(&consultation)?;
            if current == new_status {
                return Err(AppError::conflict(format!(
                    "consultation is already {new_status}"
                )));
            }
            if !current.can_transition_to(new_status) {
                return Err(AppError::conflict(format!(
                    "cannot change status from {current} to {new_status}"
                )));
            }
            if current == ConsultationStatus::Pending
                && new_status == ConsultationStatus::InProgress
                && consultation.assigned_lawyer_id.is_none()
            {
                return Err(AppError::conflict(
                    "assign a lawyer before starting the consultation",
                ));
            }

            apply_status(
                conn,
                &consultation,
                current,
                new_status,
                actor.id,
                reason.clone(),
            )?;

            if let Some(chat_id) = consultation.chat_id {
                chat::post_system_message(
                    conn,
                    chat_id,
                    &SystemEvent::StatusChanged {
                        old_status: current,
                        new_status,
                    },
                )?;
            }

            let event = NotificationEvent::StatusChanged {
                consultation_id,
                old_status: current,
                new_status,
            };
            let mut notifications = vec![notifications::record(
                conn,
                consultation.created_by,
                &event,
            )?];
            if let Some(lawyer_id) = consultation.assigned_lawyer_id {
                if lawyer_id != actor.id && lawyer_id != consultation.created_by {
                    notifications.push(notifications::record(conn, lawyer_id, &event)?);
                }
            }

            Ok((load_detail(conn, consultation_id)?, notifications))
        })?;
    drop(conn);

    info!(%consultation_id, %actor_id, status = %new_status, "consultation status updated");
    state.dispatch(notifications).await;
    Ok(detail)
}

/// Writes the status column and the timestamps tied to it, then the log row.
/// Archiving stamps `archived_at`/`archived_by` and deactivates the room;
/// every other target clears them, and leaving archived reactivates the room.
fn apply_status(
    conn: &mut PgConnection,
    consultation: &Consultation,
    current: ConsultationStatus,
    new_status: ConsultationStatus,
    actor_id: Uuid,
    reason: Option<String>,
) -> AppResult<()> {
    let now = Utc::now().naive_utc();
    let archiving = new_status == ConsultationStatus::Archived;
    let cancelling = new_status == ConsultationStatus::Cancelled;
    let starting = new_status == ConsultationStatus::InProgress;

    diesel::update(consultations::table.find(consultation.id))
        .set((
            consultations::status.eq(new_status.as_str()),
            consultations::archived_at.eq(archiving.then_some(now)),
            consultations::archived_by.eq(archiving.then_some(actor_id)),
            consultations::completed_at.eq(if archiving {
                consultation.completed_at.or(Some(now))
            } else {
                consultation.completed_at
            }),
            consultations::started_at.eq(if starting {
                consultation.started_at.or(Some(now))
            } else {
                consultation.started_at
            }),
            consultations::cancelled_by.eq(if cancelling {
                Some(actor_id)
            } else {
                consultation.cancelled_by
            }),
            consultations::cancellation_reason.eq(if cancelling {
                reason.clone()
            } else {
                consultation.cancellation_reason.clone()
            }),
            consultations::last_activity_at.eq(now),
            consultations::updated_at.eq(now),
        ))
        .execute(conn)?;

    status_log::append(
        conn,
        consultation.id,
        Some(current),
        new_status,
        actor_id,
        reason,
    )?;

    if let Some(chat_id) = consultation.chat_id {
        if archiving {
            chat::set_active(conn, chat_id, false)?;
        } else if current == ConsultationStatus::Archived {
            chat::set_active(conn, chat_id, true)?;
        }
    }
    Ok(())
}

pub async fn withdraw(
    state: &AppState,
    actor_id: Uuid,
    consultation_id: Uuid,
    reason: &str,
) -> AppResult<ConsultationDetail> {
    let reason = validate_reason(reason, "withdrawal")?;

    let mut conn = state.db()?;
    let detail = conn.transaction::<_, AppError, _>(|conn| {
        let actor = directory::resolve(conn, actor_id)?;
        let consultation = lock(conn, consultation_id)?;
        ensure_creator(&actor, &consultation, "withdraw")?;
        if status_of(&consultation)? != ConsultationStatus::Pending {
            return Err(AppError::conflict(
                "only unassigned consultations may be withdrawn",
            ));
        }

        apply_status(
            conn,
            &consultation,
            ConsultationStatus::Pending,
            ConsultationStatus::Cancelled,
            actor.id,
            Some(format!("Client withdrew: {reason}")),
        )?;
        diesel::update(consultations::table.find(consultation_id))
            .set(consultations::cancellation_reason.eq(Some(reason.clone())))
            .execute(conn)?;

        load_detail(conn, consultation_id)
    })?;

    info!(%consultation_id, %actor_id, "consultation withdrawn by client");
    Ok(detail)
}

pub async fn escalate_priority(
    state: &AppState,
    actor_id: Uuid,
    consultation_id: Uuid,
    new_priority: &str,
    reason: &str,
) -> AppResult<ConsultationDetail> {
    let new_priority: Priority = new_priority.parse()?;
    let reason = validate_reason(reason, "escalation")?;

    let mut conn = state.db()?;
    let (detail, notifications) =
        conn.transaction::<(ConsultationDetail, Vec<Notification>), AppError, _>(|conn| {
            let actor = directory::resolve(conn, actor_id)?;
            let consultation = lock(conn, consultation_id)?;
            ensure_creator(&actor, &consultation, "escalate")?;

            let status = status_of(&consultation)?;
            if !matches!(
                status,
                ConsultationStatus::Pending | ConsultationStatus::InProgress
            ) {
                return Err(AppError::conflict(format!(
                    "priority cannot be escalated on a {status} consultation"
                )));
            }

            let current: Priority = super::types::parse_stored(&consultation.priority)?;
            if new_priority.level() <= current.level() {
                return Err(AppError::conflict(format!(
                    "priority can only be raised; it is already {current}"
                )));
            }

            let now = Utc::now().naive_utc();
            diesel::update(consultations::table.find(consultation_id))
                .set((
                    consultations::priority.eq(new_priority.as_str()),
                    consultations::priority_escalated_at.eq(Some(now)),
                    consultations::last_activity_at.eq(now),
                    consultations::updated_at.eq(now),
                ))
                .execute(conn)?;

            let narrative = format!("Priority escalated from {current} to {new_priority}: {reason}");
            status_log::narrate(conn, consultation_id, status, actor.id, narrative)?;

            let mut notifications = Vec::new();
            if let Some(lawyer_id) = consultation.assigned_lawyer_id {
                notifications.push(notifications::record(
                    conn,
                    lawyer_id,
                    &NotificationEvent::PriorityEscalated {
                        consultation_id,
                        old_priority: current,
                        new_priority,
                    },
                )?);
            }

            Ok((load_detail(conn, consultation_id)?, notifications))
        })?;
    drop(conn);

    info!(%consultation_id, %actor_id, priority = %new_priority, "consultation priority escalated");
    state.dispatch(notifications).await;
    Ok(detail)
}

pub async fn archive(
    state: &AppState,
    actor_id: Uuid,
    consultation_id: Uuid,
) -> AppResult<ConsultationDetail> {
    toggle_archive(state, actor_id, consultation_id, true).await
}

pub async fn unarchive(
    state: &AppState,
    actor_id: Uuid,
    consultation_id: Uuid,
) -> AppResult<ConsultationDetail> {
    toggle_archive(state, actor_id, consultation_id, false).await
}

async fn toggle_archive(
    state: &AppState,
    actor_id: Uuid,
    consultation_id: Uuid,
    archiving: bool,
) -> AppResult<ConsultationDetail> {
    let (from, to, event, action, reason) = if archiving {
        (
            ConsultationStatus::InProgress,
            ConsultationStatus::Archived,
            SystemEvent::ConsultationArchived { by: actor_id },
            "archive",
            "Archived by client",
        )
    } else {
        (
            ConsultationStatus::Archived,
            ConsultationStatus::InProgress,
            SystemEvent::ConsultationUnarchived { by: actor_id },
            "unarchive",
            "Reopened by client",
        )
    };

    let mut conn = state.db()?;
    let (detail, notifications) =
        conn.transaction::<(ConsultationDetail, Vec<Notification>), AppError, _>(|conn| {
            let actor = directory::resolve(conn, actor_id)?;
            let consultation = lock(conn, consultation_id)?;
            ensure_creator(&actor, &consultation, action)?;
            if status_of(&consultation)? != from {
                return Err(AppError::conflict(format!(
                    "only {from} consultations can be {action}d"
                )));
            }

            apply_status(
                conn,
                &consultation,
                from,
                to,
                actor.id,
                Some(reason.to_string()),
            )?;
            if let Some(chat_id) = consultation.chat_id {
                chat::post_system_message(conn, chat_id, &event)?;
            }

            let mut notifications = Vec::new();
            if let Some(lawyer_id) = consultation.assigned_lawyer_id {
                notifications.push(notifications::record(
                    conn,
                    lawyer_id,
                    &NotificationEvent::StatusChanged {
                        consultation_id,
                        old_status: from,
                        new_status: to,
                    },
                )?);
            }

            Ok((load_detail(conn, consultation_id)?, notifications))
        })?;
    drop(conn);

    info!(%consultation_id, %actor_id, status = %to, "consultation archive state changed");
    state.dispatch(notifications).await;
    Ok(detail)
}

/// The creator acknowledges a delivered result.
pub async fn confirm_delivery(
    state: &AppState,
    actor_id: Uuid,
    consultation_id: Uuid,
) -> AppResult<ConsultationDetail> {
    let mut conn = state.db()?;
    let detail = conn.transaction::<_, AppError, _>(|conn| {
        let actor = directory::resolve(conn, actor_id)?;
        let consultation = lock(conn, consultation_id)?;
        ensure_creator(&actor, &consultation, "confirm delivery for")?;
        if consultation.lawyer_delivered_at.is_none() {
            return Err(AppError::conflict("nothing has been delivered yet"));
        }
        if consultation.client_confirmed_at.is_some() {
            return Err(AppError::conflict("delivery has already been confirmed"));
        }

        let now = Utc::now().naive_utc();
        diesel::update(consultations::table.find(consultation_id))
            .set((
                consultations::client_confirmed_at.eq(Some(now)),
                consultations::last_activity_at.eq(now),
                consultations::updated_at.eq(now),
            ))
            .execute(conn)?;
        status_log::narrate(
            conn,
            consultation_id,
            status_of(&consultation)?,
            actor.id,
            "Client confirmed delivery",
        )?;

        load_detail(conn, consultation_id)
    })?;

    info!(%consultation_id, %actor_id, "delivery confirmed by client");
    Ok(detail)
}
