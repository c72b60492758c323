//! Companion chat rooms for consultations.
//!
//! Rooms, participants and messages are written inside the caller's
//! transaction so a failed operation leaves no stray membership behind.

use chrono::Utc;
use diesel::prelude::*;
use diesel::PgConnection;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::consultations::types::ConsultationStatus;
use crate::error::AppResult;
use crate::models::{Consultation, NewChat, NewChatParticipant, NewMessage};
use crate::schema::{chat_participants, chats, consultations, messages};

pub const CHAT_TYPE_PRIVATE: &str = "private";
pub const MESSAGE_TYPE_SYSTEM: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantRole {
    Client,
    Lawyer,
    Operator,
    Admin,
}

impl ParticipantRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ParticipantRole::Client => "client",
            ParticipantRole::Lawyer => "lawyer",
            ParticipantRole::Operator => "operator",
            ParticipantRole::Admin => "admin",
        }
    }
}

/// Workflow events narrated into the room. The set is closed; clients switch
/// on `type` and may fall back to the rendered `message`.
#[derive(Debug, Clone, PartialEq)]
pub enum SystemEvent {
    LawyerJoined { lawyer_id: Uuid, lawyer_name: String },
    LawyerRemoved { lawyer_id: Uuid, lawyer_name: String },
    OperatorJoined { operator_id: Uuid, operator_name: String },
    StatusChanged {
        old_status: ConsultationStatus,
        new_status: ConsultationStatus,
    },
    ConsultationArchived { by: Uuid },
    ConsultationUnarchived { by: Uuid },
}

impl SystemEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SystemEvent::LawyerJoined { .. } => "lawyer_joined",
            SystemEvent::LawyerRemoved { .. } => "lawyer_removed",
            SystemEvent::OperatorJoined { .. } => "operator_joined",
            SystemEvent::StatusChanged { .. } => "status_changed",
            SystemEvent::ConsultationArchived { .. } => "consultation_archived",
            SystemEvent::ConsultationUnarchived { .. } => "consultation_unarchived",
        }
    }

    fn data(&self) -> Value {
        match self {
            SystemEvent::LawyerJoined {
                lawyer_id,
                lawyer_name,
            }
            | SystemEvent::LawyerRemoved {
                lawyer_id,
                lawyer_name,
            } => json!({ "lawyer_id": lawyer_id, "lawyer_name": lawyer_name }),
            SystemEvent::OperatorJoined {
                operator_id,
                operator_name,
            } => json!({ "operator_id": operator_id, "operator_name": operator_name }),
            SystemEvent::StatusChanged {
                old_status,
                new_status,
            } => json!({ "old_status": old_status, "new_status": new_status }),
            SystemEvent::ConsultationArchived { by } | SystemEvent::ConsultationUnarchived { by } => {
                json!({ "by": by })
            }
        }
    }

    pub fn render(&self) -> String {
        match self {
            SystemEvent::LawyerJoined { lawyer_name, .. } => {
                format!("Lawyer {lawyer_name} joined the consultation")
            }
            SystemEvent::LawyerRemoved { lawyer_name, .. } => {
                format!("Lawyer {lawyer_name} was removed from the consultation")
            }
            SystemEvent::OperatorJoined { operator_name, .. } => {
                format!("Operator {operator_name} joined the consultation")
            }
            SystemEvent::StatusChanged { new_status, .. } => {
                format!("Consultation status changed to {}", new_status.label())
            }
            SystemEvent::ConsultationArchived { .. } => {
                "The consultation has been archived and the chat is now read-only".to_string()
            }
            SystemEvent::ConsultationUnarchived { .. } => {
                "The consultation has been reopened".to_string()
            }
        }
    }

    pub fn envelope(&self) -> Value {
        json!({
            "type": self.kind(),
            "data": self.data(),
            "message": self.render(),
        })
    }
}

/// Returns the consultation's room, creating it with the creator as the
/// client participant on first use.
pub fn ensure_chat_room(conn: &mut PgConnection, consultation: &Consultation) -> AppResult<Uuid> {
    if let Some(chat_id) = consultation.chat_id {
        return Ok(chat_id);
    }

    let chat = NewChat {
        id: Uuid::new_v4(),
        title: consultation.title.clone(),
        chat_type: CHAT_TYPE_PRIVATE.to_string(),
        is_active: true,
        created_by: consultation.created_by,
    };
    diesel::insert_into(chats::table)
        .values(&chat)
        .execute(conn)?;

    add_participant(conn, chat.id, consultation.created_by, ParticipantRole::Client)?;

    diesel::update(consultations::table.find(consultation.id))
        .set(consultations::chat_id.eq(Some(chat.id)))
        .execute(conn)?;

    tracing::debug!(consultation_id = %consultation.id, chat_id = %chat.id, "created consultation chat");
    Ok(chat.id)
}

/// Adds a member; returns `false` when the user was already in the room.
pub fn add_participant(
    conn: &mut PgConnection,
    chat_id: Uuid,
    user_id: Uuid,
    role: ParticipantRole,
) -> AppResult<bool> {
    let inserted = diesel::insert_into(chat_participants::table)
        .values(&NewChatParticipant {
            chat_id,
            user_id,
            role: role.as_str().to_string(),
            joined_at: Utc::now().naive_utc(),
        })
        .on_conflict((chat_participants::chat_id, chat_participants::user_id))
        .do_nothing()
        .execute(conn)?;
    Ok(inserted > 0)
}

pub fn remove_participant(conn: &mut PgConnection, chat_id: Uuid, user_id: Uuid) -> AppResult<bool> {
    let removed = diesel::delete(
        chat_participants::table
            .filter(chat_participants::chat_id.eq(chat_id))
            .filter(chat_participants::user_id.eq(user_id)),
    )
    .execute(conn)?;
    Ok(removed > 0)
}

pub fn post_system_message(
    conn: &mut PgConnection,
    chat_id: Uuid,
    event: &SystemEvent,
) -> AppResult<()> {
    let content = serde_json::to_string(&event.envelope())?;
    diesel::insert_into(messages::table)
        .values(&NewMessage {
            chat_id,
            sender_id: None,
            message_type: MESSAGE_TYPE_SYSTEM.to_string(),
            content,
        })
        .execute(conn)?;
    Ok(())
}

/// Inactive rooms are read-only for every participant.
pub fn set_active(conn: &mut PgConnection, chat_id: Uuid, active: bool) -> AppResult<()> {
    diesel::update(chats::table.find(chat_id))
        .set((
            chats::is_active.eq(active),
            chats::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_type_data_and_message() {
        let lawyer_id = Uuid::new_v4();
        let event = SystemEvent::LawyerJoined {
            lawyer_id,
            lawyer_name: "Dana Reyes".to_string(),
        };
        let envelope = event.envelope();
        assert_eq!(envelope["type"], "lawyer_joined");
        assert_eq!(envelope["data"]["lawyer_id"], lawyer_id.to_string());
        assert_eq!(envelope["data"]["lawyer_name"], "Dana Reyes");
        assert_eq!(envelope["message"], "Lawyer Dana Reyes joined the consultation");
    }

    #[test]
    fn status_change_renders_target_label() {
        let event = SystemEvent::StatusChanged {
            old_status: ConsultationStatus::Pending,
            new_status: ConsultationStatus::InProgress,
        };
        let envelope = event.envelope();
        assert_eq!(envelope["data"]["old_status"], "pending");
        assert_eq!(envelope["data"]["new_status"], "in_progress");
        assert_eq!(envelope["message"], "Consultation status changed to In Progress");
    }

    #[test]
    fn archive_events_name_the_actor() {
        let admin = Uuid::new_v4();
        for event in [
            SystemEvent::ConsultationArchived { by: admin },
            SystemEvent::ConsultationUnarchived { by: admin },
        ] {
            let envelope = event.envelope();
            assert_eq!(envelope["data"]["by"], admin.to_string());
            assert!(!envelope["message"].as_str().unwrap_or_default().is_empty());
        }
    }
}
