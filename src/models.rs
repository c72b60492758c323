use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub role: String,
    pub can_create_consultations: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub role: String,
    pub can_create_consultations: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = organizations)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = organizations)]
pub struct NewOrganization {
    pub id: Uuid,
    pub name: String,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Queryable, Associations)]
#[diesel(table_name = organization_members)]
#[diesel(belongs_to(Organization))]
#[diesel(belongs_to(User))]
#[diesel(primary_key(organization_id, user_id))]
pub struct OrganizationMember {
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub joined_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = organization_members)]
pub struct NewOrganizationMember {
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = chats)]
pub struct Chat {
    pub id: Uuid,
    pub title: String,
    pub chat_type: String,
    pub is_active: bool,
    pub created_by: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chats)]
pub struct NewChat {
    pub id: Uuid,
    pub title: String,
    pub chat_type: String,
    pub is_active: bool,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(table_name = chat_participants)]
#[diesel(belongs_to(Chat))]
pub struct ChatParticipant {
    pub id: i64,
    pub chat_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub joined_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chat_participants)]
pub struct NewChatParticipant {
    pub chat_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub joined_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(table_name = messages)]
#[diesel(belongs_to(Chat))]
pub struct Message {
    pub id: i64,
    pub chat_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub message_type: String,
    pub content: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub chat_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub message_type: String,
    pub content: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = consultations)]
pub struct Consultation {
    pub id: Uuid,
    pub reference_number: Option<String>,
    pub title: String,
    pub description: String,
    pub topic: String,
    pub status: String,
    pub priority: String,
    pub created_by: Uuid,
    pub assigned_lawyer_id: Option<Uuid>,
    pub chat_id: Option<Uuid>,
    pub cancelled_by: Option<Uuid>,
    pub cancellation_reason: Option<String>,
    pub archived_by: Option<Uuid>,
    pub assigned_at: Option<NaiveDateTime>,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub delivered_at: Option<NaiveDateTime>,
    pub lawyer_delivered_at: Option<NaiveDateTime>,
    pub client_confirmed_at: Option<NaiveDateTime>,
    pub archived_at: Option<NaiveDateTime>,
    pub priority_escalated_at: Option<NaiveDateTime>,
    pub last_activity_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = consultations)]
pub struct NewConsultation {
    pub id: Uuid,
    pub reference_number: Option<String>,
    pub title: String,
    pub description: String,
    pub topic: String,
    pub status: String,
    pub priority: String,
    pub created_by: Uuid,
    pub last_activity_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(table_name = consultation_lawyers)]
#[diesel(belongs_to(Consultation))]
pub struct ConsultationLawyer {
    pub id: i64,
    pub consultation_id: Uuid,
    pub lawyer_id: Uuid,
    pub is_primary: bool,
    pub assigned_by: Uuid,
    pub assigned_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = consultation_lawyers)]
pub struct NewConsultationLawyer {
    pub consultation_id: Uuid,
    pub lawyer_id: Uuid,
    pub is_primary: bool,
    pub assigned_by: Uuid,
    pub assigned_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(table_name = consultation_operators)]
#[diesel(belongs_to(Consultation))]
pub struct ConsultationOperator {
    pub id: i64,
    pub consultation_id: Uuid,
    pub operator_id: Uuid,
    pub assigned_by: Uuid,
    pub assigned_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = consultation_operators)]
pub struct NewConsultationOperator {
    pub consultation_id: Uuid,
    pub operator_id: Uuid,
    pub assigned_by: Uuid,
    pub assigned_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(table_name = consultation_status_logs)]
#[diesel(belongs_to(Consultation))]
pub struct ConsultationStatusLog {
    pub id: i64,
    pub consultation_id: Uuid,
    pub old_status: Option<String>,
    pub new_status: String,
    pub changed_by: Uuid,
    pub reason: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = consultation_status_logs)]
pub struct NewConsultationStatusLog {
    pub consultation_id: Uuid,
    pub old_status: Option<String>,
    pub new_status: String,
    pub changed_by: Uuid,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(table_name = consultation_files)]
#[diesel(belongs_to(Consultation))]
pub struct ConsultationFile {
    pub id: Uuid,
    pub consultation_id: Uuid,
    #[serde(skip_serializing)]
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_type: String,
    pub content_type: Option<String>,
    pub checksum: String,
    pub file_category: String,
    pub is_deliverable: bool,
    pub delivered_at: Option<NaiveDateTime>,
    pub can_client_access: bool,
    pub version: i32,
    pub parent_file_id: Option<Uuid>,
    pub uploaded_by: Uuid,
    pub version_notes: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = consultation_files)]
pub struct NewConsultationFile {
    pub id: Uuid,
    pub consultation_id: Uuid,
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_type: String,
    pub content_type: Option<String>,
    pub checksum: String,
    pub file_category: String,
    pub is_deliverable: bool,
    pub delivered_at: Option<NaiveDateTime>,
    pub can_client_access: bool,
    pub version: i32,
    pub parent_file_id: Option<Uuid>,
    pub uploaded_by: Uuid,
    pub version_notes: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub notification_type: String,
    pub title: String,
    pub content: String,
    pub data: serde_json::Value,
    pub is_read: bool,
    pub read_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub notification_type: String,
    pub title: String,
    pub content: String,
    pub data: serde_json::Value,
}
