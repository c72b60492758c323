use std::fmt;
use std::str::FromStr;

use diesel::prelude::*;
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::User;
use crate::schema::{organization_members, users};

pub const ORGANIZATION_OWNER: &str = "owner";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Expert,
    CompanyAdmin,
    Lawyer,
    Operator,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Expert => "expert",
            Role::CompanyAdmin => "company_admin",
            Role::Lawyer => "lawyer",
            Role::Operator => "operator",
            Role::Admin => "admin",
        }
    }

    /// Lawyers, operators and admins work on consultations rather than open them.
    pub fn is_staff(self) -> bool {
        matches!(self, Role::Lawyer | Role::Operator | Role::Admin)
    }

    pub fn can_manage_assignments(self) -> bool {
        matches!(self, Role::Operator | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "client" => Ok(Role::Client),
            "expert" => Ok(Role::Expert),
            "company_admin" => Ok(Role::CompanyAdmin),
            "lawyer" => Ok(Role::Lawyer),
            "operator" => Ok(Role::Operator),
            "admin" => Ok(Role::Admin),
            other => Err(AppError::validation(format!("unknown role: {other}"))),
        }
    }
}

/// A resolved caller: directory role plus organization memberships.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: Uuid,
    pub full_name: String,
    pub role: Role,
    pub can_create_flag: bool,
    pub organization_ids: Vec<Uuid>,
    pub owns_organization: bool,
}

impl Actor {
    pub fn from_user(user: &User, memberships: &[(Uuid, String)]) -> AppResult<Self> {
        let role = user.role.parse::<Role>().map_err(|_| {
            AppError::internal(format!("user {} has unknown role {}", user.id, user.role))
        })?;
        Ok(Self {
            id: user.id,
            full_name: user.full_name.clone(),
            role,
            can_create_flag: user.can_create_consultations,
            organization_ids: memberships.iter().map(|(org, _)| *org).collect(),
            owns_organization: memberships
                .iter()
                .any(|(_, member_role)| member_role == ORGANIZATION_OWNER),
        })
    }

    /// Lawyers never open consultations; company admins and organization
    /// owners always may; everyone else needs the granted flag.
    pub fn can_create_consultations(&self) -> bool {
        match self.role {
            Role::Lawyer => false,
            Role::CompanyAdmin => true,
            _ => self.owns_organization || self.can_create_flag,
        }
    }

    pub fn shares_organization(&self, other: &[Uuid]) -> bool {
        self.organization_ids.iter().any(|org| other.contains(org))
    }
}

pub fn resolve(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Actor> {
    let user: User = users::table
        .find(user_id)
        .first(conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;
    let memberships = memberships_of(conn, user_id)?;
    Actor::from_user(&user, &memberships)
}

/// Loads users by id, preserving the order of `ids`. Unknown ids are dropped.
pub fn resolve_many(conn: &mut PgConnection, ids: &[Uuid]) -> AppResult<Vec<User>> {
    let rows: Vec<User> = users::table.filter(users::id.eq_any(ids)).load(conn)?;
    Ok(ids
        .iter()
        .filter_map(|id| rows.iter().find(|user| user.id == *id).cloned())
        .collect())
}

pub fn organization_ids(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Vec<Uuid>> {
    Ok(organization_members::table
        .filter(organization_members::user_id.eq(user_id))
        .select(organization_members::organization_id)
        .load(conn)?)
}

/// Users who share at least one organization with the given ones.
pub fn organization_peers(conn: &mut PgConnection, org_ids: &[Uuid]) -> AppResult<Vec<Uuid>> {
    Ok(organization_members::table
        .filter(organization_members::organization_id.eq_any(org_ids))
        .select(organization_members::user_id)
        .distinct()
        .load(conn)?)
}

fn memberships_of(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Vec<(Uuid, String)>> {
    Ok(organization_members::table
        .filter(organization_members::user_id.eq(user_id))
        .select((organization_members::organization_id, organization_members::role))
        .load(conn)?)
}
