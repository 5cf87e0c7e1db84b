use anyhow::Context;
use chrono::{DateTime, Duration, Months, NaiveTime, Utc};
use sqlx::{PgExecutor, PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::EarningsError;
use crate::models::{ActivityEvent, Course, Period, SourceKind};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<Period> {
    let teacher_id = upsert_user(
        pool,
        Uuid::parse_str("5b8e1c7a-3f4d-4a8e-9c61-1f2d3e4a5b6c")?,
        "Morgan Reyes",
        "morgan.reyes@coursehub.dev",
        "TEACHER",
    )
    .await?;

    let courses = vec![
        (
            Uuid::parse_str("a1f0c7d2-6b1e-4c3a-8d5f-2e9b7c4a1d60")?,
            "rust-foundations",
            "Rust Foundations",
            "SUBSCRIPTION",
        ),
        (
            Uuid::parse_str("b7e2d4c1-9a3f-4e6b-8c2d-5f1a7e3b9c42")?,
            "async-in-practice",
            "Async in Practice",
            "PREMIUM",
        ),
    ];

    let mut course_ids = Vec::new();
    for (id, slug, title, monetization) in courses {
        let course_id: Uuid = sqlx::query(
            r#"
            INSERT INTO teacher_earnings.courses (id, slug, title, teacher_id, monetization_type)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (slug) DO UPDATE
            SET title = EXCLUDED.title, monetization_type = EXCLUDED.monetization_type
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(slug)
        .bind(title)
        .bind(teacher_id)
        .bind(monetization)
        .fetch_one(pool)
        .await?
        .get("id");
        course_ids.push(course_id);
    }

    // (name, email, active days in the seeded month)
    let students = vec![
        ("Avery Lee", "avery.lee@coursehub.dev", 22i64),
        ("Jules Moreno", "jules.moreno@coursehub.dev", 15),
        ("Kiara Patel", "kiara.patel@coursehub.dev", 6),
        ("Noor Haddad", "noor.haddad@coursehub.dev", 0),
    ];

    let today = Utc::now().date_naive();
    let last_month = today
        .checked_sub_months(Months::new(1))
        .context("seed date out of range")?;
    let period = Period::containing(last_month);

    for (name, email, days) in students {
        let user_id = upsert_user(pool, Uuid::new_v4(), name, email, "STUDENT").await?;

        for course_id in course_ids.iter().copied() {
            let enrolled = sqlx::query(
                r#"
                INSERT INTO teacher_earnings.enrollments (id, user_id, course_id, enrolled_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (user_id, course_id) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(course_id)
            .bind(period.start_at() - Duration::days(7))
            .execute(pool)
            .await?;

            if enrolled.rows_affected() > 0 {
                sqlx::query(
                    "UPDATE teacher_earnings.courses SET enrollment_count = enrollment_count + 1 WHERE id = $1",
                )
                .bind(course_id)
                .execute(pool)
                .await?;
            }

            for day in 0..days {
                let source = SourceKind::ALL[(day as usize) % SourceKind::ALL.len()];
                let at = NaiveTime::from_hms_opt(9 + (day % 10) as u32, 30, 0)
                    .unwrap_or(NaiveTime::MIN);
                let occurred_at = (period.start + Duration::days(day)).and_time(at).and_utc();
                let source_key = format!("seed-{}-{}-{}-{}", email, course_id, period.key(), day);
                insert_event(pool, source, user_id, course_id, occurred_at, &source_key).await?;
            }
        }
    }

    Ok(period)
}

async fn upsert_user(
    pool: &PgPool,
    id: Uuid,
    full_name: &str,
    email: &str,
    role: &str,
) -> anyhow::Result<Uuid> {
    let user_id: Uuid = sqlx::query(
        r#"
        INSERT INTO teacher_earnings.users (id, full_name, email, role)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO UPDATE
        SET full_name = EXCLUDED.full_name
        RETURNING id
        "#,
    )
    .bind(id)
    .bind(full_name)
    .bind(email)
    .bind(role)
    .fetch_one(pool)
    .await?
    .get("id");

    Ok(user_id)
}

/// Returns whether a new row was written; duplicate `source_key`s are skipped.
async fn insert_event<'e, E: PgExecutor<'e>>(
    executor: E,
    source: SourceKind,
    user_id: Uuid,
    course_id: Uuid,
    occurred_at: DateTime<Utc>,
    source_key: &str,
) -> Result<bool, sqlx::Error> {
    let query = format!(
        "INSERT INTO {} (id, user_id, course_id, occurred_at, source_key) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (source_key) DO NOTHING",
        source.table()
    );

    let result = sqlx::query(&query)
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(course_id)
        .bind(occurred_at)
        .bind(source_key)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        full_name: String,
        email: String,
        course_slug: String,
        source: String,
        occurred_at: DateTime<Utc>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("malformed row {}", line + 1))?;
        let source: SourceKind = row
            .source
            .parse()
            .with_context(|| format!("row {}", line + 1))?;
        let course = course_by_slug(pool, &row.course_slug)
            .await
            .with_context(|| format!("row {}", line + 1))?;
        let user_id = upsert_user(pool, Uuid::new_v4(), &row.full_name, &row.email, "STUDENT").await?;

        let source_key = row
            .source_key
            .filter(|key| !key.trim().is_empty())
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        if insert_event(pool, source, user_id, course.id, row.occurred_at, &source_key).await? {
            inserted += 1;
        } else {
            debug!(source_key = %source_key, "skipping duplicate activity event");
        }
    }

    Ok(inserted)
}

/// Every activity event for a course inside `period`, across all six sources.
pub async fn fetch_activity(
    pool: &PgPool,
    course_id: Uuid,
    period: &Period,
    user_id: Option<Uuid>,
) -> Result<Vec<ActivityEvent>, EarningsError> {
    let user_filter = if user_id.is_some() { " AND user_id = $4" } else { "" };
    let query = SourceKind::ALL
        .iter()
        .map(|kind| {
            format!(
                "SELECT user_id, course_id, occurred_at, '{}' AS source FROM {} \
                 WHERE course_id = $1 AND occurred_at >= $2 AND occurred_at < $3{}",
                kind.as_str(),
                kind.table(),
                user_filter
            )
        })
        .collect::<Vec<_>>()
        .join(" UNION ALL ");

    let mut rows = sqlx::query(&query)
        .bind(course_id)
        .bind(period.start_at())
        .bind(period.end_at());
    if let Some(value) = user_id {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    let mut events = Vec::with_capacity(records.len());

    for row in records {
        let source: String = row.get("source");
        events.push(ActivityEvent {
            user_id: row.get("user_id"),
            course_id: row.get("course_id"),
            occurred_at: row.get("occurred_at"),
            source: source.parse()?,
        });
    }

    debug!(%course_id, period = %period, events = events.len(), "fetched activity");
    Ok(events)
}

/// Users enrolled in the course before the period ended.
pub async fn fetch_enrolled_users(
    pool: &PgPool,
    course_id: Uuid,
    period: &Period,
) -> Result<Vec<Uuid>, EarningsError> {
    let users = sqlx::query(
        "SELECT user_id FROM teacher_earnings.enrollments WHERE course_id = $1 AND enrolled_at < $2",
    )
    .bind(course_id)
    .bind(period.end_at())
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|row| row.get("user_id"))
    .collect();

    Ok(users)
}

pub async fn user_by_email(pool: &PgPool, email: &str) -> Result<Uuid, EarningsError> {
    sqlx::query("SELECT id FROM teacher_earnings.users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await?
        .map(|row| row.get("id"))
        .ok_or_else(|| EarningsError::NotFound(format!("user {email}")))
}

fn course_from_row(row: &sqlx::postgres::PgRow) -> Result<Course, EarningsError> {
    let monetization: String = row.get("monetization_type");
    Ok(Course {
        id: row.get("id"),
        slug: row.get("slug"),
        title: row.get("title"),
        teacher_id: row.get("teacher_id"),
        monetization_type: monetization.parse()?,
    })
}

pub async fn course_by_slug(pool: &PgPool, slug: &str) -> Result<Course, EarningsError> {
    let row = sqlx::query(
        "SELECT id, slug, title, teacher_id, monetization_type FROM teacher_earnings.courses WHERE slug = $1",
    )
    .bind(slug)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| EarningsError::NotFound(format!("course {slug}")))?;

    course_from_row(&row)
}

pub async fn teacher_courses(
    pool: &PgPool,
    teacher_id: Uuid,
) -> Result<Vec<Course>, EarningsError> {
    sqlx::query(
        "SELECT id, slug, title, teacher_id, monetization_type FROM teacher_earnings.courses \
         WHERE teacher_id = $1 ORDER BY slug",
    )
    .bind(teacher_id)
    .fetch_all(pool)
    .await?
    .iter()
    .map(course_from_row)
    .collect()
}

/// Enrollment and the course counter move together; a duplicate leaves both untouched.
pub async fn enroll(pool: &PgPool, user_id: Uuid, course_id: Uuid) -> Result<Uuid, EarningsError> {
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO teacher_earnings.enrollments (id, user_id, course_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, course_id) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(course_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = inserted else {
        return Err(EarningsError::AlreadyEnrolled { user_id, course_id });
    };

    sqlx::query(
        "UPDATE teacher_earnings.courses SET enrollment_count = enrollment_count + 1 WHERE id = $1",
    )
    .bind(course_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let enrollment_id: Uuid = row.get("id");
    info!(%user_id, %course_id, %enrollment_id, "enrolled user");
    Ok(enrollment_id)
}
