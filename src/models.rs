use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EarningsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Progress,
    ActivityLog,
    Interaction,
    ForumPost,
    ForumReply,
    VideoAnalytics,
}

impl SourceKind {
    pub const ALL: [SourceKind; 6] = [
        SourceKind::Progress,
        SourceKind::ActivityLog,
        SourceKind::Interaction,
        SourceKind::ForumPost,
        SourceKind::ForumReply,
        SourceKind::VideoAnalytics,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Progress => "progress",
            SourceKind::ActivityLog => "activity_log",
            SourceKind::Interaction => "interaction",
            SourceKind::ForumPost => "forum_post",
            SourceKind::ForumReply => "forum_reply",
            SourceKind::VideoAnalytics => "video_analytics",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            SourceKind::Progress => "teacher_earnings.progress_events",
            SourceKind::ActivityLog => "teacher_earnings.activity_logs",
            SourceKind::Interaction => "teacher_earnings.interactions",
            SourceKind::ForumPost => "teacher_earnings.forum_posts",
            SourceKind::ForumReply => "teacher_earnings.forum_replies",
            SourceKind::VideoAnalytics => "teacher_earnings.video_analytics",
        }
    }
}

impl FromStr for SourceKind {
    type Err = EarningsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        SourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| EarningsError::unknown("activity source", value))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityEvent {
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub source: SourceKind,
}

/// Half-open `[start, end)` window of calendar days, keyed as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    pub fn month(year: i32, month: u32) -> Result<Self, EarningsError> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| EarningsError::InvalidPeriod(format!("{year:04}-{month:02}")))?;
        let end = start
            .checked_add_months(Months::new(1))
            .ok_or_else(|| EarningsError::InvalidPeriod(format!("{year:04}-{month:02}")))?;
        Ok(Self { start, end })
    }

    pub fn parse(value: &str) -> Result<Self, EarningsError> {
        let invalid = || EarningsError::InvalidPeriod(value.to_string());
        let (year, month) = value.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::month(year, month).map_err(|_| invalid())
    }

    pub fn containing(date: NaiveDate) -> Self {
        // The first of any representable month always has a successor month here.
        let start = date.with_day(1).unwrap_or(date);
        let end = start
            .checked_add_months(Months::new(1))
            .unwrap_or(NaiveDate::MAX);
        Self { start, end }
    }

    pub fn key(&self) -> String {
        format!("{:04}-{:02}", self.start.year(), self.start.month())
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }

    pub fn is_closed(&self, today: NaiveDate) -> bool {
        today >= self.end
    }

    pub fn start_at(&self) -> DateTime<Utc> {
        self.start.and_time(NaiveTime::MIN).and_utc()
    }

    pub fn end_at(&self) -> DateTime<Utc> {
        self.end.and_time(NaiveTime::MIN).and_utc()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EarningsStatus {
    Pending,
    Available,
    Paid,
}

impl EarningsStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EarningsStatus::Pending => "PENDING",
            EarningsStatus::Available => "AVAILABLE",
            EarningsStatus::Paid => "PAID",
        }
    }

    /// Settled rows keep their stored amount.
    pub fn is_settled(self) -> bool {
        matches!(self, EarningsStatus::Available | EarningsStatus::Paid)
    }
}

impl FromStr for EarningsStatus {
    type Err = EarningsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PENDING" => Ok(EarningsStatus::Pending),
            "AVAILABLE" => Ok(EarningsStatus::Available),
            "PAID" => Ok(EarningsStatus::Paid),
            other => Err(EarningsError::unknown("earnings status", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EarningsPeriod {
    pub id: Uuid,
    pub teacher_id: Uuid,
    pub course_id: Uuid,
    pub period_key: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub active_user_count: i64,
    pub rate_per_user: Decimal,
    pub amount: Decimal,
    pub status: EarningsStatus,
    pub calculated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutStatus {
    Pending,
    Completed,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PayoutStatus::Pending => "PENDING",
            PayoutStatus::Completed => "COMPLETED",
            PayoutStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for PayoutStatus {
    type Err = EarningsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(PayoutStatus::Pending),
            "COMPLETED" => Ok(PayoutStatus::Completed),
            "FAILED" => Ok(PayoutStatus::Failed),
            _ => Err(EarningsError::unknown("payout status", value)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Payout {
    pub id: Uuid,
    pub teacher_id: Uuid,
    pub amount: Decimal,
    pub requested_amount: Decimal,
    pub status: PayoutStatus,
    pub earnings_included: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonetizationType {
    Free,
    Subscription,
    Premium,
}

impl MonetizationType {
    pub fn as_str(self) -> &'static str {
        match self {
            MonetizationType::Free => "FREE",
            MonetizationType::Subscription => "SUBSCRIPTION",
            MonetizationType::Premium => "PREMIUM",
        }
    }
}

impl FromStr for MonetizationType {
    type Err = EarningsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "FREE" => Ok(MonetizationType::Free),
            "SUBSCRIPTION" => Ok(MonetizationType::Subscription),
            "PREMIUM" => Ok(MonetizationType::Premium),
            other => Err(EarningsError::unknown("monetization type", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Course {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub teacher_id: Uuid,
    pub monetization_type: MonetizationType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeacherSummary {
    pub teacher_id: Uuid,
    pub total_earned: Decimal,
    pub available: Decimal,
    pub pending: Decimal,
    pub paid_out: Decimal,
    pub course_count: i64,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_month_periods() {
        let period = Period::parse("2026-02").unwrap();
        assert_eq!(period.start, NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
        assert_eq!(period.end, NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        assert_eq!(period.days(), 28);
        assert_eq!(period.key(), "2026-02");

        let december = Period::parse("2025-12").unwrap();
        assert_eq!(december.end, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        assert_eq!(december.days(), 31);
    }

    #[test]
    fn rejects_malformed_periods() {
        for raw in ["2026", "2026-13", "26-01", "2026-1", "2026/01", "abcd-ef", ""] {
            assert!(
                matches!(Period::parse(raw), Err(EarningsError::InvalidPeriod(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn period_bounds_are_half_open() {
        let period = Period::parse("2026-04").unwrap();
        assert!(period.contains(NaiveDate::from_ymd_opt(2026, 4, 1).unwrap()));
        assert!(period.contains(NaiveDate::from_ymd_opt(2026, 4, 30).unwrap()));
        assert!(!period.contains(NaiveDate::from_ymd_opt(2026, 5, 1).unwrap()));
        assert!(!period.is_closed(NaiveDate::from_ymd_opt(2026, 4, 30).unwrap()));
        assert!(period.is_closed(NaiveDate::from_ymd_opt(2026, 5, 1).unwrap()));
    }

    #[test]
    fn containing_snaps_to_month() {
        let period = Period::containing(NaiveDate::from_ymd_opt(2026, 10, 18).unwrap());
        assert_eq!(period.key(), "2026-10");
        assert_eq!(period.days(), 31);
    }

    #[test]
    fn source_kinds_round_trip_names() {
        for kind in SourceKind::ALL {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
        assert!("quiz".parse::<SourceKind>().is_err());
    }

    #[test]
    fn settled_statuses() {
        assert!(!EarningsStatus::Pending.is_settled());
        assert!(EarningsStatus::Available.is_settled());
        assert!(EarningsStatus::Paid.is_settled());
        assert_eq!("completed".parse::<PayoutStatus>().unwrap(), PayoutStatus::Completed);
    }
}
