use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::earnings;
use crate::error::EarningsError;
use crate::models::{EarningsPeriod, EarningsStatus, Payout, PayoutStatus};
use crate::summary;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PayoutRequest {
    Amount(Decimal),
    AllAvailable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub included: Vec<Uuid>,
    pub total: Decimal,
    pub requested: Decimal,
}

impl Allocation {
    /// Part of the last included record beyond what was asked for. Records are
    /// paid whole, so this is paid out along with the request.
    pub fn overage(&self) -> Decimal {
        self.total - self.requested
    }
}

/// Picks AVAILABLE records oldest period first until `request` is covered.
/// Zero-amount records are always swept in so they settle with the payout.
pub fn allocate(
    available: &[EarningsPeriod],
    request: PayoutRequest,
) -> Result<Allocation, EarningsError> {
    if let PayoutRequest::Amount(amount) = request {
        // Payout columns hold whole cents.
        if amount <= Decimal::ZERO || amount.normalize().scale() > 2 {
            return Err(EarningsError::InvalidAmount(amount));
        }
    }

    let mut candidates: Vec<&EarningsPeriod> = available
        .iter()
        .filter(|row| row.status == EarningsStatus::Available)
        .collect();
    candidates.sort_by(|a, b| {
        a.period_start
            .cmp(&b.period_start)
            .then(a.calculated_at.cmp(&b.calculated_at))
    });

    let balance: Decimal = candidates.iter().map(|row| row.amount).sum();
    if balance <= Decimal::ZERO {
        return Err(EarningsError::NoAvailableEarnings);
    }

    let requested = match request {
        PayoutRequest::Amount(amount) => amount,
        PayoutRequest::AllAvailable => balance,
    };
    if requested > balance {
        return Err(EarningsError::InsufficientBalance {
            requested,
            available: balance,
            shortfall: requested - balance,
        });
    }

    let mut allocation = Allocation {
        included: Vec::new(),
        total: Decimal::ZERO,
        requested,
    };
    for row in candidates {
        if allocation.total >= requested && !row.amount.is_zero() {
            continue;
        }
        allocation.included.push(row.id);
        allocation.total += row.amount;
    }

    Ok(allocation)
}

fn payout_from_row(row: &sqlx::postgres::PgRow) -> Result<Payout, EarningsError> {
    let status: String = row.get("status");
    Ok(Payout {
        id: row.get("id"),
        teacher_id: row.get("teacher_id"),
        amount: row.get("amount"),
        requested_amount: row.get("requested_amount"),
        status: status.parse()?,
        earnings_included: row.get("earnings_included"),
        created_at: row.get("created_at"),
    })
}

/// Creates a payout from the teacher's AVAILABLE earnings. Allocation, the
/// payout row, the PAID flips and the summary refresh commit together.
pub async fn request_payout(
    pool: &PgPool,
    teacher_id: Uuid,
    request: PayoutRequest,
) -> Result<Payout, EarningsError> {
    let mut tx = pool.begin().await?;

    let rows = sqlx::query(
        "SELECT id, teacher_id, course_id, period_key, period_start, period_end, \
         active_user_count, rate_per_user, amount, status, calculated_at, paid_at \
         FROM teacher_earnings.earnings_periods \
         WHERE teacher_id = $1 AND status = 'AVAILABLE' \
         ORDER BY period_start, calculated_at \
         FOR UPDATE",
    )
    .bind(teacher_id)
    .fetch_all(&mut *tx)
    .await?;
    let available = earnings::earnings_from_rows(&rows)?;

    let allocation = match allocate(&available, request) {
        Ok(allocation) => allocation,
        Err(err) => {
            warn!(%teacher_id, error = %err, "payout rejected");
            return Err(err);
        }
    };

    let payout_row = sqlx::query(
        r#"
        INSERT INTO teacher_earnings.payouts
        (id, teacher_id, amount, requested_amount, status, earnings_included)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, teacher_id, amount, requested_amount, status, earnings_included, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(teacher_id)
    .bind(allocation.total)
    .bind(allocation.requested)
    .bind(PayoutStatus::Pending.as_str())
    .bind(&allocation.included)
    .fetch_one(&mut *tx)
    .await?;
    let payout = payout_from_row(&payout_row)?;

    let flipped = sqlx::query(
        r#"
        UPDATE teacher_earnings.earnings_periods
        SET status = 'PAID', paid_at = now()
        WHERE id = ANY($1) AND status = 'AVAILABLE'
        "#,
    )
    .bind(&allocation.included)
    .execute(&mut *tx)
    .await?;

    if flipped.rows_affected() != allocation.included.len() as u64 {
        // Rows were locked above; a mismatch means the ledger moved under us.
        return Err(EarningsError::NotFound(format!(
            "{} of {} earnings records for payout",
            flipped.rows_affected(),
            allocation.included.len()
        )));
    }

    summary::refresh_summary(&mut *tx, teacher_id).await?;
    tx.commit().await?;

    info!(
        %teacher_id,
        payout_id = %payout.id,
        requested = %allocation.requested,
        amount = %payout.amount,
        overage = %allocation.overage(),
        records = allocation.included.len(),
        "created payout"
    );
    Ok(payout)
}

/// Moves a PENDING payout to its final status. Nothing else on a payout changes.
pub async fn set_payout_status(
    pool: &PgPool,
    payout_id: Uuid,
    status: PayoutStatus,
) -> Result<Payout, EarningsError> {
    let updated = sqlx::query(
        r#"
        UPDATE teacher_earnings.payouts
        SET status = $2
        WHERE id = $1 AND status = 'PENDING'
        RETURNING id, teacher_id, amount, requested_amount, status, earnings_included, created_at
        "#,
    )
    .bind(payout_id)
    .bind(status.as_str())
    .fetch_optional(pool)
    .await?;

    if let Some(row) = updated {
        let payout = payout_from_row(&row)?;
        info!(payout_id = %payout.id, status = payout.status.as_str(), "updated payout status");
        return Ok(payout);
    }

    let current = sqlx::query("SELECT status FROM teacher_earnings.payouts WHERE id = $1")
        .bind(payout_id)
        .fetch_optional(pool)
        .await?;

    match current {
        Some(row) => Err(EarningsError::PayoutAlreadySettled {
            id: payout_id,
            status: row.get("status"),
        }),
        None => Err(EarningsError::NotFound(format!("payout {payout_id}"))),
    }
}

pub async fn fetch_payouts(pool: &PgPool, teacher_id: Uuid) -> Result<Vec<Payout>, EarningsError> {
    sqlx::query(
        "SELECT id, teacher_id, amount, requested_amount, status, earnings_included, created_at \
         FROM teacher_earnings.payouts WHERE teacher_id = $1 ORDER BY created_at DESC",
    )
    .bind(teacher_id)
    .fetch_all(pool)
    .await?
    .iter()
    .map(payout_from_row)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::earnings::build_period;
    use crate::models::Period;
    use chrono::Utc;

    fn available(teacher: Uuid, period: &str, users: i64) -> EarningsPeriod {
        build_period(
            teacher,
            Uuid::new_v4(),
            &Period::parse(period).unwrap(),
            users,
            Decimal::new(2, 2),
            EarningsStatus::Available,
            Utc::now(),
        )
    }

    fn dollars(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    #[test]
    fn takes_oldest_periods_first() {
        let teacher = Uuid::new_v4();
        // $0.50, $1.00, $2.00 listed out of period order
        let rows = vec![
            available(teacher, "2026-08", 25),
            available(teacher, "2026-06", 50),
            available(teacher, "2026-09", 100),
        ];

        let allocation = allocate(&rows, PayoutRequest::Amount(dollars(120))).unwrap();
        assert_eq!(allocation.included, vec![rows[1].id, rows[0].id]);
        assert_eq!(allocation.total, dollars(150));
        assert_eq!(allocation.requested, dollars(120));
        assert_eq!(allocation.overage(), dollars(30));
    }

    #[test]
    fn exact_cover_stops_at_boundary() {
        let teacher = Uuid::new_v4();
        let rows = vec![available(teacher, "2026-06", 50), available(teacher, "2026-07", 50)];

        let allocation = allocate(&rows, PayoutRequest::Amount(dollars(100))).unwrap();
        assert_eq!(allocation.included, vec![rows[0].id]);
        assert_eq!(allocation.overage(), Decimal::ZERO);
    }

    #[test]
    fn all_available_takes_everything() {
        let teacher = Uuid::new_v4();
        let rows = vec![
            available(teacher, "2026-06", 50),
            available(teacher, "2026-07", 10),
            available(teacher, "2026-08", 5),
        ];

        let allocation = allocate(&rows, PayoutRequest::AllAvailable).unwrap();
        assert_eq!(allocation.included.len(), 3);
        assert_eq!(allocation.total, dollars(130));
        assert_eq!(allocation.overage(), Decimal::ZERO);
    }

    #[test]
    fn reports_shortfall() {
        let teacher = Uuid::new_v4();
        let rows = vec![available(teacher, "2026-06", 50)];

        match allocate(&rows, PayoutRequest::Amount(dollars(250))) {
            Err(EarningsError::InsufficientBalance {
                requested,
                available,
                shortfall,
            }) => {
                assert_eq!(requested, dollars(250));
                assert_eq!(available, dollars(100));
                assert_eq!(shortfall, dollars(150));
            }
            other => panic!("expected insufficient balance, got {other:?}"),
        }
    }

    #[test]
    fn skips_records_that_are_not_available() {
        let teacher = Uuid::new_v4();
        let mut paid = available(teacher, "2026-05", 500);
        paid.status = EarningsStatus::Paid;
        let mut pending = available(teacher, "2026-10", 500);
        pending.status = EarningsStatus::Pending;
        let rows = vec![paid, pending, available(teacher, "2026-06", 10)];

        let allocation = allocate(&rows, PayoutRequest::AllAvailable).unwrap();
        assert_eq!(allocation.included, vec![rows[2].id]);
        assert_eq!(allocation.total, dollars(20));
    }

    #[test]
    fn rejects_empty_ledger_and_bad_amounts() {
        assert!(matches!(
            allocate(&[], PayoutRequest::AllAvailable),
            Err(EarningsError::NoAvailableEarnings)
        ));
        let zero_rows = vec![available(Uuid::new_v4(), "2026-06", 0)];
        assert!(matches!(
            allocate(&zero_rows, PayoutRequest::Amount(dollars(1))),
            Err(EarningsError::NoAvailableEarnings)
        ));
        assert!(matches!(
            allocate(&zero_rows, PayoutRequest::Amount(Decimal::ZERO)),
            Err(EarningsError::InvalidAmount(_))
        ));
        assert!(matches!(
            allocate(&zero_rows, PayoutRequest::Amount(dollars(-5))),
            Err(EarningsError::InvalidAmount(_))
        ));

        let funded = vec![available(Uuid::new_v4(), "2026-06", 10)];
        assert!(matches!(
            allocate(&funded, PayoutRequest::Amount(Decimal::new(4, 3))),
            Err(EarningsError::InvalidAmount(_))
        ));
        assert!(matches!(
            allocate(&funded, PayoutRequest::Amount(Decimal::new(105, 3))),
            Err(EarningsError::InvalidAmount(_))
        ));
        // Trailing zeros are still whole cents.
        let allocation = allocate(&funded, PayoutRequest::Amount(Decimal::new(1000, 4))).unwrap();
        assert_eq!(allocation.included, vec![funded[0].id]);
    }

    #[test]
    fn sweeps_zero_amount_records() {
        let teacher = Uuid::new_v4();
        let rows = vec![
            available(teacher, "2026-06", 10),
            available(teacher, "2026-07", 0),
            available(teacher, "2026-08", 5),
            available(teacher, "2026-09", 0),
        ];

        let all = allocate(&rows, PayoutRequest::AllAvailable).unwrap();
        assert_eq!(all.included.len(), 4);
        assert_eq!(all.total, dollars(30));

        let partial = allocate(&rows, PayoutRequest::Amount(dollars(20))).unwrap();
        assert_eq!(partial.included, vec![rows[0].id, rows[1].id, rows[3].id]);
        assert_eq!(partial.total, dollars(20));
    }

    #[test]
    fn rejected_request_leaves_records_available() {
        let teacher = Uuid::new_v4();
        let rows = vec![available(teacher, "2026-06", 10), available(teacher, "2026-07", 15)];

        assert!(matches!(
            allocate(&rows, PayoutRequest::Amount(dollars(100))),
            Err(EarningsError::InsufficientBalance { .. })
        ));
        assert!(rows.iter().all(|row| row.status == EarningsStatus::Available));

        let retry = allocate(&rows, PayoutRequest::AllAvailable).unwrap();
        assert_eq!(retry.included, vec![rows[0].id, rows[1].id]);
        assert_eq!(retry.total, dollars(50));
    }
}
