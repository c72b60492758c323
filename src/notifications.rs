//! Turns lifecycle events into inbox rows.
//!
//! Rows are written inside the triggering transaction; pushing them to
//! devices happens after commit through [`crate::notifier`].

use std::collections::BTreeMap;

use diesel::prelude::*;
use diesel::PgConnection;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::consultations::types::{ConsultationStatus, Priority};
use crate::error::AppResult;
use crate::models::{NewNotification, Notification};
use crate::schema::notifications;

pub const TYPE_CONSULTATION_STATUS: &str = "consultation_status";
pub const TYPE_CONSULTATION_ASSIGNMENT: &str = "consultation_assignment";
pub const TYPE_CONSULTATION_PRIORITY: &str = "consultation_priority";
pub const TYPE_CONSULTATION_DELIVERY: &str = "consultation_delivery";

#[derive(Debug, Clone)]
pub enum NotificationEvent {
    StatusChanged {
        consultation_id: Uuid,
        old_status: ConsultationStatus,
        new_status: ConsultationStatus,
    },
    Assigned {
        consultation_id: Uuid,
        consultation_title: String,
    },
    PriorityEscalated {
        consultation_id: Uuid,
        old_priority: Priority,
        new_priority: Priority,
    },
    Delivered {
        consultation_id: Uuid,
        consultation_title: String,
        file_id: Uuid,
        file_name: String,
    },
}

impl NotificationEvent {
    pub fn notification_type(&self) -> &'static str {
        match self {
            NotificationEvent::StatusChanged { .. } => TYPE_CONSULTATION_STATUS,
            NotificationEvent::Assigned { .. } => TYPE_CONSULTATION_ASSIGNMENT,
            NotificationEvent::PriorityEscalated { .. } => TYPE_CONSULTATION_PRIORITY,
            NotificationEvent::Delivered { .. } => TYPE_CONSULTATION_DELIVERY,
        }
    }

    pub fn title(&self) -> String {
        match self {
            NotificationEvent::StatusChanged { .. } => "Consultation status changed".to_string(),
            NotificationEvent::Assigned { .. } => "New consultation assigned".to_string(),
            NotificationEvent::PriorityEscalated { .. } => {
                "Consultation priority escalated".to_string()
            }
            NotificationEvent::Delivered { .. } => "Consultation result delivered".to_string(),
        }
    }

    pub fn body(&self) -> String {
        match self {
            NotificationEvent::StatusChanged {
                old_status,
                new_status,
                ..
            } => format!(
                "Your consultation status changed from \"{}\" to \"{}\"",
                old_status.label(),
                new_status.label()
            ),
            NotificationEvent::Assigned {
                consultation_title, ..
            } => format!("You have been assigned a new consultation: {consultation_title}"),
            NotificationEvent::PriorityEscalated {
                old_priority,
                new_priority,
                ..
            } => format!(
                "Consultation priority raised from \"{}\" to \"{}\"",
                old_priority.label(),
                new_priority.label()
            ),
            NotificationEvent::Delivered {
                consultation_title,
                file_name,
                ..
            } => format!("{file_name} is now available for {consultation_title}"),
        }
    }

    /// Structured payload plus the translation block clients localize from.
    pub fn data(&self) -> Value {
        let (mut data, params) = match self {
            NotificationEvent::StatusChanged {
                consultation_id,
                old_status,
                new_status,
            } => (
                json!({
                    "consultation_id": consultation_id,
                    "old_status": old_status,
                    "new_status": new_status,
                }),
                json!({ "oldStatus": old_status, "newStatus": new_status }),
            ),
            NotificationEvent::Assigned {
                consultation_id,
                consultation_title,
            } => (
                json!({
                    "consultation_id": consultation_id,
                    "consultation_title": consultation_title,
                }),
                json!({ "consultationTitle": consultation_title }),
            ),
            NotificationEvent::PriorityEscalated {
                consultation_id,
                old_priority,
                new_priority,
            } => (
                json!({
                    "consultation_id": consultation_id,
                    "old_priority": old_priority,
                    "new_priority": new_priority,
                }),
                json!({ "oldPriority": old_priority, "newPriority": new_priority }),
            ),
            NotificationEvent::Delivered {
                consultation_id,
                consultation_title,
                file_id,
                file_name,
            } => (
                json!({
                    "consultation_id": consultation_id,
                    "consultation_title": consultation_title,
                    "file_id": file_id,
                    "file_name": file_name,
                }),
                json!({ "consultationTitle": consultation_title, "fileName": file_name }),
            ),
        };

        let prefix = format!("notifications.templates.{}", self.notification_type());
        if let Value::Object(map) = &mut data {
            map.insert(
                "translation".to_string(),
                json!({
                    "title_key": format!("{prefix}.title"),
                    "body_key": format!("{prefix}.body"),
                    "params": params,
                }),
            );
        }
        data
    }
}

/// Writes one inbox row for `user_id` and returns it for post-commit dispatch.
pub fn record(
    conn: &mut PgConnection,
    user_id: Uuid,
    event: &NotificationEvent,
) -> AppResult<Notification> {
    let row = NewNotification {
        id: Uuid::new_v4(),
        user_id,
        notification_type: event.notification_type().to_string(),
        title: event.title(),
        content: event.body(),
        data: event.data(),
    };
    let notification = diesel::insert_into(notifications::table)
        .values(&row)
        .get_result::<Notification>(conn)?;
    Ok(notification)
}

/// Push transports only carry flat string maps: the translation block is
/// dropped and every other value is stringified.
pub fn push_data(data: &Value) -> BTreeMap<String, String> {
    let empty = Map::new();
    let map = data.as_object().unwrap_or(&empty);
    map.iter()
        .filter(|(key, _)| key.as_str() != "translation")
        .map(|(key, value)| {
            let flattened = match value {
                Value::Null => String::new(),
                Value::Bool(flag) => (if *flag { "1" } else { "0" }).to_string(),
                Value::String(text) => text.clone(),
                Value::Number(number) => number.to_string(),
                Value::Array(_) | Value::Object(_) => value.to_string(),
            };
            (key.clone(), flattened)
        })
        .collect()
}
