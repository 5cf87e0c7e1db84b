use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::earnings;
use crate::error::EarningsError;
use crate::models::{EarningsPeriod, EarningsStatus, TeacherSummary};

fn cents_zero() -> Decimal {
    Decimal::new(0, 2)
}

pub fn summarize(teacher_id: Uuid, rows: &[EarningsPeriod], now: DateTime<Utc>) -> TeacherSummary {
    let mut summary = TeacherSummary {
        teacher_id,
        total_earned: cents_zero(),
        available: cents_zero(),
        pending: cents_zero(),
        paid_out: cents_zero(),
        course_count: 0,
        updated_at: now,
    };
    let mut courses = HashSet::new();

    for row in rows.iter().filter(|row| row.teacher_id == teacher_id) {
        summary.total_earned += row.amount;
        match row.status {
            EarningsStatus::Pending => summary.pending += row.amount,
            EarningsStatus::Available => summary.available += row.amount,
            EarningsStatus::Paid => summary.paid_out += row.amount,
        }
        courses.insert(row.course_id);
    }

    summary.course_count = courses.len() as i64;
    summary
}

/// Recomputes the stored totals from the teacher's earnings rows. Inside a
/// transaction the per-teacher advisory lock is held until commit, so
/// overlapping refreshes read each other's committed rows.
pub async fn refresh_summary(
    conn: &mut PgConnection,
    teacher_id: Uuid,
) -> Result<TeacherSummary, EarningsError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::uuid::text))")
        .bind(teacher_id)
        .execute(&mut *conn)
        .await?;

    let rows = earnings::fetch_teacher_earnings(&mut *conn, teacher_id).await?;
    let summary = summarize(teacher_id, &rows, Utc::now());

    sqlx::query(
        r#"
        INSERT INTO teacher_earnings.teacher_summaries
        (teacher_id, total_earned, available, pending, paid_out, course_count, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (teacher_id) DO UPDATE
        SET total_earned = EXCLUDED.total_earned,
            available = EXCLUDED.available,
            pending = EXCLUDED.pending,
            paid_out = EXCLUDED.paid_out,
            course_count = EXCLUDED.course_count,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(summary.teacher_id)
    .bind(summary.total_earned)
    .bind(summary.available)
    .bind(summary.pending)
    .bind(summary.paid_out)
    .bind(summary.course_count)
    .bind(summary.updated_at)
    .execute(&mut *conn)
    .await?;

    tracing::debug!(%teacher_id, available = %summary.available, "refreshed teacher summary");
    Ok(summary)
}

pub async fn fetch_summary(
    pool: &PgPool,
    teacher_id: Uuid,
) -> Result<Option<TeacherSummary>, EarningsError> {
    let row = sqlx::query(
        "SELECT teacher_id, total_earned, available, pending, paid_out, course_count, updated_at \
         FROM teacher_earnings.teacher_summaries WHERE teacher_id = $1",
    )
    .bind(teacher_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| TeacherSummary {
        teacher_id: row.get("teacher_id"),
        total_earned: row.get("total_earned"),
        available: row.get("available"),
        pending: row.get("pending"),
        paid_out: row.get("paid_out"),
        course_count: row.get("course_count"),
        updated_at: row.get("updated_at"),
    }))
}
