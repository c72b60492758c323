use diesel::dsl::count_star;
use diesel::pg::Pg;
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use super::types::{parse_stored, ConsultationStatus, Topic};
use super::{ensure_can_view, load_detail, ConsultationDetail};
use crate::directory::{self, Actor, Role};
use crate::error::AppResult;
use crate::models::Consultation;
use crate::schema::{consultation_lawyers, consultation_operators, consultations};
use crate::state::AppState;

pub const DEFAULT_PER_PAGE: i64 = 15;
pub const MAX_PER_PAGE: i64 = 100;

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<String>,
    pub topic: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ConsultationPage {
    pub consultations: Vec<Consultation>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct ConsultationStatistics {
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub archived: i64,
    pub cancelled: i64,
}

impl ConsultationStatistics {
    fn add(&mut self, status: ConsultationStatus, count: i64) {
        self.total += count;
        match status {
            ConsultationStatus::Pending => self.pending += count,
            ConsultationStatus::InProgress => self.in_progress += count,
            ConsultationStatus::Archived => self.archived += count,
            ConsultationStatus::Cancelled => self.cancelled += count,
        }
    }
}

/// Normalizes the requested page; `per_page` is capped at `MAX_PER_PAGE`.
fn page_window(page: Option<i64>, per_page: Option<i64>) -> (i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
    (page, per_page)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

pub async fn get_consultation(
    state: &AppState,
    actor_id: Uuid,
    consultation_id: Uuid,
) -> AppResult<ConsultationDetail> {
    let mut conn = state.db()?;
    let actor = directory::resolve(&mut conn, actor_id)?;
    let consultation = super::find(&mut conn, consultation_id)?;
    ensure_can_view(&mut conn, &actor, &consultation)?;
    load_detail(&mut conn, consultation_id)
}

/// One page of the consultations visible to the caller, most recently
/// active first.
pub async fn list_consultations(
    state: &AppState,
    actor_id: Uuid,
    filter: ListFilter,
) -> AppResult<ConsultationPage> {
    let status = non_blank(filter.status.as_deref())
        .map(str::parse::<ConsultationStatus>)
        .transpose()?;
    let topic = non_blank(filter.topic.as_deref())
        .map(str::parse::<Topic>)
        .transpose()?;
    let (page, per_page) = page_window(filter.page, filter.per_page);

    let mut conn = state.db()?;
    let actor = directory::resolve(&mut conn, actor_id)?;

    let filtered = |conn: &mut PgConnection| -> AppResult<consultations::BoxedQuery<'static, Pg>> {
        let mut query = scoped(conn, &actor)?;
        if let Some(status) = status {
            query = query.filter(consultations::status.eq(status.as_str()));
        }
        if let Some(topic) = topic {
            query = query.filter(consultations::topic.eq(topic.as_str()));
        }
        Ok(query)
    };

    let total: i64 = filtered(&mut *conn)?.count().get_result(&mut conn)?;
    let consultations = filtered(&mut *conn)?
        .order((
            consultations::last_activity_at.desc(),
            consultations::created_at.desc(),
        ))
        .limit(per_page)
        .offset((page - 1) * per_page)
        .load(&mut conn)?;

    Ok(ConsultationPage {
        consultations,
        page,
        per_page,
        total,
    })
}

pub async fn statistics(state: &AppState, actor_id: Uuid) -> AppResult<ConsultationStatistics> {
    let mut conn = state.db()?;
    let actor = directory::resolve(&mut conn, actor_id)?;
    let visible = scoped(&mut conn, &actor)?.select(consultations::id);

    let counts: Vec<(String, i64)> = consultations::table
        .filter(consultations::id.eq_any(visible))
        .group_by(consultations::status)
        .select((consultations::status, count_star()))
        .load(&mut conn)?;

    let mut stats = ConsultationStatistics::default();
    for (status, count) in counts {
        stats.add(parse_stored(&status)?, count);
    }
    Ok(stats)
}

fn scoped<'a>(
    conn: &mut PgConnection,
    actor: &Actor,
) -> AppResult<consultations::BoxedQuery<'a, Pg>> {
    let query = consultations::table.into_boxed();
    Ok(match actor.role {
        Role::Admin => query,
        Role::Lawyer => query.filter(
            consultations::id.eq_any(
                consultation_lawyers::table
                    .filter(consultation_lawyers::lawyer_id.eq(actor.id))
                    .select(consultation_lawyers::consultation_id),
            ),
        ),
        Role::Operator => query.filter(
            consultations::id.eq_any(
                consultation_operators::table
                    .filter(consultation_operators::operator_id.eq(actor.id))
                    .select(consultation_operators::consultation_id),
            ),
        ),
        Role::CompanyAdmin => {
            let mut creators = directory::organization_peers(conn, &actor.organization_ids)?;
            creators.push(actor.id);
            query.filter(consultations::created_by.eq_any(creators))
        }
        Role::Client | Role::Expert => query.filter(consultations::created_by.eq(actor.id)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_sum_grouped_counts() {
        let mut stats = ConsultationStatistics::default();
        stats.add(ConsultationStatus::Pending, 2);
        stats.add(ConsultationStatus::InProgress, 1);
        stats.add(ConsultationStatus::Cancelled, 1);
        assert_eq!(
            stats,
            ConsultationStatistics {
                total: 4,
                pending: 2,
                in_progress: 1,
                archived: 0,
                cancelled: 1,
            }
        );
    }

    #[test]
    fn page_window_defaults_and_caps() {
        assert_eq!(page_window(None, None), (1, DEFAULT_PER_PAGE));
        assert_eq!(page_window(Some(3), Some(20)), (3, 20));
        assert_eq!(page_window(Some(0), Some(500)), (1, MAX_PER_PAGE));
        assert_eq!(page_window(Some(-4), Some(0)), (1, 1));
    }
}
