use std::collections::HashMap;
use std::fmt::Write;

use uuid::Uuid;

use crate::models::{Course, EarningsPeriod, Payout, TeacherSummary};

pub fn build_statement(
    teacher_email: &str,
    summary: &TeacherSummary,
    courses: &[Course],
    earnings: &[EarningsPeriod],
    payouts: &[Payout],
) -> String {
    let titles: HashMap<Uuid, &str> = courses
        .iter()
        .map(|course| (course.id, course.title.as_str()))
        .collect();

    let mut output = String::new();

    let _ = writeln!(output, "# Teacher Earnings Statement");
    let _ = writeln!(
        output,
        "Generated for {} (as of {})",
        teacher_email,
        summary.updated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Balance");
    let _ = writeln!(output, "- Total earned: ${}", summary.total_earned);
    let _ = writeln!(output, "- Available: ${}", summary.available);
    let _ = writeln!(output, "- Pending: ${}", summary.pending);
    let _ = writeln!(output, "- Paid out: ${}", summary.paid_out);
    let _ = writeln!(output, "- Courses earning: {}", summary.course_count);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Courses");

    if courses.is_empty() {
        let _ = writeln!(output, "No courses found.");
    } else {
        for course in courses.iter() {
            let _ = writeln!(
                output,
                "- {} ({}, {})",
                course.title,
                course.slug,
                course.monetization_type.as_str()
            );
        }
    }

    let mut periods = earnings.to_vec();
    periods.sort_by(|a, b| {
        b.period_start
            .cmp(&a.period_start)
            .then_with(|| a.course_id.cmp(&b.course_id))
    });
    let _ = writeln!(output);
    let _ = writeln!(output, "## Earnings Periods");

    if periods.is_empty() {
        let _ = writeln!(output, "No earnings calculated yet.");
    } else {
        for row in periods.iter() {
            let title = titles.get(&row.course_id).copied().unwrap_or("unknown course");
            let _ = writeln!(
                output,
                "- {} {}: {} active users x ${} = ${} ({})",
                row.period_key,
                title,
                row.active_user_count,
                row.rate_per_user,
                row.amount,
                row.status.as_str()
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Payouts");

    if payouts.is_empty() {
        let _ = writeln!(output, "No payouts requested.");
    } else {
        for payout in payouts.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} on {}: ${} for {} periods ({})",
                payout.id,
                payout.created_at.date_naive(),
                payout.amount,
                payout.earnings_included.len(),
                payout.status.as_str()
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::earnings::build_period;
    use crate::models::{EarningsStatus, MonetizationType, PayoutStatus, Period};
    use crate::summary::summarize;
    use chrono::Utc;
    use rust_decimal::Decimal;

    #[test]
    fn statement_lists_periods_newest_first() {
        let teacher = Uuid::new_v4();
        let course = Course {
            id: Uuid::new_v4(),
            slug: "rust-foundations".to_string(),
            title: "Rust Foundations".to_string(),
            teacher_id: teacher,
            monetization_type: MonetizationType::Subscription,
        };
        let rate = Decimal::new(2, 2);
        let now = Utc::now();
        let earnings = vec![
            build_period(
                teacher,
                course.id,
                &Period::parse("2026-07").unwrap(),
                10,
                rate,
                EarningsStatus::Paid,
                now,
            ),
            build_period(
                teacher,
                course.id,
                &Period::parse("2026-08").unwrap(),
                12,
                rate,
                EarningsStatus::Available,
                now,
            ),
        ];
        let payouts = vec![Payout {
            id: Uuid::new_v4(),
            teacher_id: teacher,
            amount: Decimal::new(20, 2),
            requested_amount: Decimal::new(15, 2),
            status: PayoutStatus::Pending,
            earnings_included: vec![earnings[0].id],
            created_at: now,
        }];
        let summary = summarize(teacher, &earnings, now);

        let report =
            build_statement("morgan@example.com", &summary, &[course], &earnings, &payouts);

        assert!(report.contains("Generated for morgan@example.com"));
        assert!(report.contains("- Available: $0.24"));
        assert!(report.contains("- Paid out: $0.20"));
        let august = report.find("2026-08 Rust Foundations: 12 active users").unwrap();
        let july = report.find("2026-07 Rust Foundations: 10 active users").unwrap();
        assert!(august < july);
        assert!(report.contains("$0.20 for 1 periods (PENDING)"));
        assert!(report.contains("- Rust Foundations (rust-foundations, SUBSCRIPTION)"));
    }

    #[test]
    fn empty_statement_has_placeholders() {
        let summary = summarize(Uuid::new_v4(), &[], Utc::now());
        let report = build_statement("nobody@example.com", &summary, &[], &[], &[]);
        assert!(report.contains("No earnings calculated yet."));
        assert!(report.contains("No payouts requested."));
        assert!(report.contains("No courses found."));
        assert!(report.contains("- Available: $0.00"));
    }
}
