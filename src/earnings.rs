use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgExecutor, PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::activity;
use crate::config::Config;
use crate::db;
use crate::error::EarningsError;
use crate::models::{Course, EarningsPeriod, EarningsStatus, Period};
use crate::summary;

const EARNINGS_COLUMNS: &str = "id, teacher_id, course_id, period_key, period_start, period_end, \
     active_user_count, rate_per_user, amount, status, calculated_at, paid_at";

pub fn earnings_amount(active_users: i64, rate: Decimal) -> Decimal {
    Decimal::from(active_users) * rate
}

/// Enrolled users whose active days reach `threshold`; activity from anyone
/// else is ignored.
pub fn count_qualifying(
    enrolled: &[Uuid],
    days_by_user: &HashMap<Uuid, usize>,
    threshold: usize,
) -> i64 {
    enrolled
        .iter()
        .filter(|user_id| {
            let days = days_by_user.get(user_id).copied().unwrap_or(0);
            activity::is_active(days, threshold)
        })
        .count() as i64
}

pub fn build_period(
    teacher_id: Uuid,
    course_id: Uuid,
    period: &Period,
    active_user_count: i64,
    rate_per_user: Decimal,
    status: EarningsStatus,
    now: DateTime<Utc>,
) -> EarningsPeriod {
    EarningsPeriod {
        id: Uuid::new_v4(),
        teacher_id,
        course_id,
        period_key: period.key(),
        period_start: period.start,
        period_end: period.end,
        active_user_count,
        rate_per_user,
        amount: earnings_amount(active_user_count, rate_per_user),
        status,
        calculated_at: now,
        paid_at: None,
    }
}

/// AVAILABLE and PAID rows are final; only a PENDING or missing row is recomputed.
pub fn stored_if_settled(existing: Option<EarningsPeriod>) -> Option<EarningsPeriod> {
    existing.filter(|row| row.status.is_settled())
}

pub fn status_for(period: &Period, today: NaiveDate) -> EarningsStatus {
    if period.is_closed(today) {
        EarningsStatus::Available
    } else {
        EarningsStatus::Pending
    }
}

fn earnings_from_row(row: &sqlx::postgres::PgRow) -> Result<EarningsPeriod, EarningsError> {
    let status: String = row.get("status");
    Ok(EarningsPeriod {
        id: row.get("id"),
        teacher_id: row.get("teacher_id"),
        course_id: row.get("course_id"),
        period_key: row.get("period_key"),
        period_start: row.get("period_start"),
        period_end: row.get("period_end"),
        active_user_count: row.get("active_user_count"),
        rate_per_user: row.get("rate_per_user"),
        amount: row.get("amount"),
        status: status.parse()?,
        calculated_at: row.get("calculated_at"),
        paid_at: row.get("paid_at"),
    })
}

pub(crate) fn earnings_from_rows(
    rows: &[sqlx::postgres::PgRow],
) -> Result<Vec<EarningsPeriod>, EarningsError> {
    rows.iter().map(earnings_from_row).collect()
}

pub async fn fetch_teacher_earnings<'e, E: PgExecutor<'e>>(
    executor: E,
    teacher_id: Uuid,
) -> Result<Vec<EarningsPeriod>, EarningsError> {
    let query = format!(
        "SELECT {EARNINGS_COLUMNS} FROM teacher_earnings.earnings_periods \
         WHERE teacher_id = $1 ORDER BY period_start DESC, course_id"
    );
    let rows = sqlx::query(&query).bind(teacher_id).fetch_all(executor).await?;
    earnings_from_rows(&rows)
}

async fn fetch_course_period<'e, E: PgExecutor<'e>>(
    executor: E,
    teacher_id: Uuid,
    course_id: Uuid,
    period_key: &str,
) -> Result<Option<EarningsPeriod>, EarningsError> {
    let query = format!(
        "SELECT {EARNINGS_COLUMNS} FROM teacher_earnings.earnings_periods \
         WHERE teacher_id = $1 AND course_id = $2 AND period_key = $3"
    );
    sqlx::query(&query)
        .bind(teacher_id)
        .bind(course_id)
        .bind(period_key)
        .fetch_optional(executor)
        .await?
        .as_ref()
        .map(earnings_from_row)
        .transpose()
}

/// Computes and stores one course's earnings for `period`. Rows that are
/// already AVAILABLE or PAID come back as stored.
pub async fn calculate_course_period(
    pool: &PgPool,
    config: &Config,
    course: &Course,
    period: &Period,
    today: NaiveDate,
) -> Result<EarningsPeriod, EarningsError> {
    if period.start > today {
        return Err(EarningsError::FuturePeriod(period.key()));
    }

    let period_key = period.key();
    let existing = fetch_course_period(pool, course.teacher_id, course.id, &period_key).await?;
    if let Some(stored) = stored_if_settled(existing) {
        info!(
            course = %course.slug,
            period = %period_key,
            status = stored.status.as_str(),
            amount = %stored.amount,
            "earnings already settled, returning stored amount"
        );
        return Ok(stored);
    }

    let enrolled = db::fetch_enrolled_users(pool, course.id, period).await?;
    let events = db::fetch_activity(pool, course.id, period, None).await?;
    let days_by_user = activity::active_days_by_user(&events, period);
    let active_users = count_qualifying(&enrolled, &days_by_user, config.active_day_threshold);

    let candidate = build_period(
        course.teacher_id,
        course.id,
        period,
        active_users,
        config.rate_per_user,
        status_for(period, today),
        Utc::now(),
    );

    let mut tx = pool.begin().await?;

    let query = format!(
        r#"
        INSERT INTO teacher_earnings.earnings_periods AS ep
        (id, teacher_id, course_id, period_key, period_start, period_end,
         active_user_count, rate_per_user, amount, status, calculated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (teacher_id, course_id, period_key) DO UPDATE
        SET active_user_count = EXCLUDED.active_user_count,
            rate_per_user = EXCLUDED.rate_per_user,
            amount = EXCLUDED.amount,
            status = EXCLUDED.status,
            calculated_at = EXCLUDED.calculated_at
        WHERE ep.status = 'PENDING'
        RETURNING {EARNINGS_COLUMNS}
        "#
    );
    let upserted = sqlx::query(&query)
        .bind(candidate.id)
        .bind(candidate.teacher_id)
        .bind(candidate.course_id)
        .bind(&candidate.period_key)
        .bind(candidate.period_start)
        .bind(candidate.period_end)
        .bind(candidate.active_user_count)
        .bind(candidate.rate_per_user)
        .bind(candidate.amount)
        .bind(candidate.status.as_str())
        .bind(candidate.calculated_at)
        .fetch_optional(&mut *tx)
        .await?;

    let stored = match upserted {
        Some(row) => earnings_from_row(&row)?,
        // Settled by a concurrent run between the read above and this write.
        None => fetch_course_period(&mut *tx, course.teacher_id, course.id, &period_key)
            .await?
            .ok_or_else(|| {
                EarningsError::NotFound(format!("earnings {} {}", course.slug, period_key))
            })?,
    };

    summary::refresh_summary(&mut *tx, course.teacher_id).await?;
    tx.commit().await?;

    info!(
        course = %course.slug,
        period = %period_key,
        enrolled = enrolled.len(),
        active_users = stored.active_user_count,
        amount = %stored.amount,
        status = stored.status.as_str(),
        "calculated earnings"
    );
    Ok(stored)
}

pub async fn calculate_teacher_period(
    pool: &PgPool,
    config: &Config,
    teacher_id: Uuid,
    period: &Period,
    today: NaiveDate,
) -> Result<Vec<EarningsPeriod>, EarningsError> {
    let courses = db::teacher_courses(pool, teacher_id).await?;
    let mut results = Vec::with_capacity(courses.len());

    for course in courses.iter() {
        results.push(calculate_course_period(pool, config, course, period, today).await?);
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate() -> Decimal {
        Decimal::new(2, 2)
    }

    #[test]
    fn amount_is_count_times_rate() {
        assert_eq!(earnings_amount(0, rate()), Decimal::ZERO);
        assert_eq!(earnings_amount(1, rate()), Decimal::new(2, 2));
        assert_eq!(earnings_amount(137, rate()), Decimal::new(274, 2));
    }

    #[test]
    fn amount_is_exact_multiple_of_rate() {
        for count in [0i64, 1, 7, 49, 1_000, 123_456] {
            let amount = earnings_amount(count, rate());
            assert_eq!(amount % rate(), Decimal::ZERO);
            assert_eq!(amount / rate(), Decimal::from(count));
        }
    }

    #[test]
    fn counts_only_enrolled_users_over_threshold() {
        let enrolled: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let outsider = Uuid::new_v4();
        let mut days = HashMap::new();
        days.insert(enrolled[0], 20);
        days.insert(enrolled[1], 15);
        days.insert(enrolled[2], 14);
        days.insert(outsider, 30);

        assert_eq!(count_qualifying(&enrolled, &days, 15), 2);
        assert_eq!(count_qualifying(&enrolled, &days, 1), 3);
        assert_eq!(count_qualifying(&[], &days, 15), 0);
    }

    #[test]
    fn built_period_holds_amount_invariant() {
        let period = Period::parse("2026-09").unwrap();
        let row = build_period(
            Uuid::new_v4(),
            Uuid::new_v4(),
            &period,
            12,
            rate(),
            EarningsStatus::Available,
            Utc::now(),
        );
        assert_eq!(row.amount, Decimal::from(row.active_user_count) * row.rate_per_user);
        assert_eq!(row.period_key, "2026-09");
        assert_eq!(row.period_end, NaiveDate::from_ymd_opt(2026, 10, 1).unwrap());
        assert!(row.paid_at.is_none());
    }

    #[test]
    fn settled_rows_are_returned_as_stored() {
        let period = Period::parse("2026-08").unwrap();
        let teacher = Uuid::new_v4();
        let course = Uuid::new_v4();
        let calculated_at = Utc::now();

        let available = build_period(
            teacher,
            course,
            &period,
            30,
            rate(),
            EarningsStatus::Available,
            calculated_at,
        );
        let stored = stored_if_settled(Some(available.clone())).unwrap();
        assert_eq!(stored.id, available.id);
        assert_eq!(stored.amount, Decimal::new(60, 2));
        assert_eq!(stored.calculated_at, calculated_at);

        let mut paid = available.clone();
        paid.status = EarningsStatus::Paid;
        paid.rate_per_user = Decimal::new(5, 2);
        let stored = stored_if_settled(Some(paid)).unwrap();
        assert_eq!(stored.status, EarningsStatus::Paid);
        assert_eq!(stored.rate_per_user, Decimal::new(5, 2));
    }

    #[test]
    fn pending_or_missing_rows_are_recomputed() {
        let period = Period::parse("2026-10").unwrap();
        let pending = build_period(
            Uuid::new_v4(),
            Uuid::new_v4(),
            &period,
            4,
            rate(),
            EarningsStatus::Pending,
            Utc::now(),
        );
        assert!(stored_if_settled(Some(pending)).is_none());
        assert!(stored_if_settled(None).is_none());
    }

    #[test]
    fn open_periods_stay_pending() {
        let period = Period::parse("2026-10").unwrap();
        let mid_month = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let next_month = NaiveDate::from_ymd_opt(2026, 11, 2).unwrap();
        assert_eq!(status_for(&period, mid_month), EarningsStatus::Pending);
        assert_eq!(status_for(&period, next_month), EarningsStatus::Available);
    }
}
