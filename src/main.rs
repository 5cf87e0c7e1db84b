use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{ArgGroup, Parser, Subcommand};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod activity;
mod config;
mod db;
mod earnings;
mod error;
mod models;
mod payout;
mod report;
mod summary;

use crate::config::Config;
use crate::models::{PayoutStatus, Period};
use crate::payout::PayoutRequest;

#[derive(Parser)]
#[command(name = "teacher-earnings")]
#[command(about = "Active-learner earnings and payouts for course teachers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a teacher, courses, enrollments and last month's activity
    Seed,
    /// Import activity events from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Enroll a user in a course
    Enroll {
        #[arg(long)]
        email: String,
        #[arg(long)]
        course: String,
    },
    /// Count a learner's active days in a course
    ActiveDays {
        #[arg(long)]
        email: String,
        #[arg(long)]
        course: String,
        /// Billing month as YYYY-MM, defaults to the current month
        #[arg(long)]
        period: Option<String>,
    },
    /// Calculate earnings for a teacher's courses
    Compute {
        #[arg(long)]
        teacher: String,
        /// Billing month as YYYY-MM, defaults to the current month
        #[arg(long)]
        period: Option<String>,
        /// Limit the calculation to one course slug
        #[arg(long)]
        course: Option<String>,
    },
    /// Pay out available earnings
    #[command(group(
        ArgGroup::new("request")
            .args(["amount", "all"])
            .required(true)
            .multiple(false)
    ))]
    Payout {
        #[arg(long)]
        teacher: String,
        #[arg(long)]
        amount: Option<Decimal>,
        #[arg(long)]
        all: bool,
    },
    /// Mark a pending payout completed or failed
    SettlePayout {
        #[arg(long)]
        id: Uuid,
        #[arg(long, value_parser = ["completed", "failed"])]
        status: String,
    },
    /// Show a teacher's balance
    Summary {
        #[arg(long)]
        teacher: String,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown earnings statement
    Report {
        #[arg(long)]
        teacher: String,
        #[arg(long, default_value = "earnings.md")]
        out: PathBuf,
    },
}

fn parse_period(raw: Option<&str>) -> anyhow::Result<Period> {
    match raw {
        Some(value) => Ok(Period::parse(value)?),
        None => Ok(Period::containing(Utc::now().date_naive())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let period = db::seed(&pool).await?;
            println!("Seed data inserted with activity for {period}.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} activity events from {}.", csv.display());
        }
        Commands::Enroll { email, course } => {
            let user_id = db::user_by_email(&pool, &email).await?;
            let course = db::course_by_slug(&pool, &course).await?;
            let enrollment_id = db::enroll(&pool, user_id, course.id).await?;
            println!("Enrolled {email} in {} ({enrollment_id}).", course.title);
        }
        Commands::ActiveDays {
            email,
            course,
            period,
        } => {
            let period = parse_period(period.as_deref())?;
            let user_id = db::user_by_email(&pool, &email).await?;
            let course = db::course_by_slug(&pool, &course).await?;
            let events = db::fetch_activity(&pool, course.id, &period, Some(user_id)).await?;
            let days = activity::count_active_days(&events, user_id, course.id, &period);
            let status = if activity::is_active(days, config.active_day_threshold) {
                "active"
            } else {
                "not active"
            };
            println!(
                "{email} has {days} of {} days in {} for {period} ({status}, threshold {}).",
                period.days(),
                course.slug,
                config.active_day_threshold
            );
            for (source, count) in activity::events_by_source(&events) {
                println!("- {source}: {count} events");
            }
        }
        Commands::Compute {
            teacher,
            period,
            course,
        } => {
            let period = parse_period(period.as_deref())?;
            let teacher_id = db::user_by_email(&pool, &teacher).await?;
            let today = Utc::now().date_naive();

            let rows = match course {
                Some(slug) => {
                    let course = db::course_by_slug(&pool, &slug).await?;
                    if course.teacher_id != teacher_id {
                        anyhow::bail!("course {slug} is not taught by {teacher}");
                    }
                    let row =
                        earnings::calculate_course_period(&pool, &config, &course, &period, today)
                            .await?;
                    vec![row]
                }
                None => {
                    earnings::calculate_teacher_period(&pool, &config, teacher_id, &period, today)
                        .await?
                }
            };

            if rows.is_empty() {
                println!("{teacher} has no courses.");
                return Ok(());
            }

            let slugs: HashMap<Uuid, String> = db::teacher_courses(&pool, teacher_id)
                .await?
                .into_iter()
                .map(|course| (course.id, course.slug))
                .collect();

            println!("Earnings for {period}:");
            for row in rows.iter() {
                let slug = slugs.get(&row.course_id).map(String::as_str).unwrap_or("unknown");
                println!(
                    "- {}: {} active users x ${} = ${} ({})",
                    slug,
                    row.active_user_count,
                    row.rate_per_user,
                    row.amount,
                    row.status.as_str()
                );
            }
        }
        Commands::Payout {
            teacher,
            amount,
            all,
        } => {
            let teacher_id = db::user_by_email(&pool, &teacher).await?;
            let request = match (amount, all) {
                (Some(amount), _) => PayoutRequest::Amount(amount),
                (None, true) => PayoutRequest::AllAvailable,
                (None, false) => anyhow::bail!("either --amount or --all is required"),
            };
            let payout = payout::request_payout(&pool, teacher_id, request).await?;
            println!(
                "Payout {} created for ${} (requested ${}) covering {} earnings periods.",
                payout.id,
                payout.amount,
                payout.requested_amount,
                payout.earnings_included.len()
            );
        }
        Commands::SettlePayout { id, status } => {
            let status: PayoutStatus = status.parse()?;
            let payout = payout::set_payout_status(&pool, id, status).await?;
            println!("Payout {} is now {}.", payout.id, payout.status.as_str());
        }
        Commands::Summary { teacher, json } => {
            let teacher_id = db::user_by_email(&pool, &teacher).await?;
            let mut conn = pool.acquire().await?;
            let summary = summary::refresh_summary(&mut *conn, teacher_id).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Balance for {teacher}:");
                println!("- Total earned: ${}", summary.total_earned);
                println!("- Available: ${}", summary.available);
                println!("- Pending: ${}", summary.pending);
                println!("- Paid out: ${}", summary.paid_out);
            }
        }
        Commands::Report { teacher, out } => {
            let teacher_id = db::user_by_email(&pool, &teacher).await?;
            let stored = summary::fetch_summary(&pool, teacher_id).await?;
            let summary = match stored {
                Some(summary) => summary,
                None => {
                    let mut conn = pool.acquire().await?;
                    summary::refresh_summary(&mut *conn, teacher_id).await?
                }
            };
            let courses = db::teacher_courses(&pool, teacher_id).await?;
            let earnings = earnings::fetch_teacher_earnings(&pool, teacher_id).await?;
            let payouts = payout::fetch_payouts(&pool, teacher_id).await?;
            let report = report::build_statement(&teacher, &summary, &courses, &earnings, &payouts);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
