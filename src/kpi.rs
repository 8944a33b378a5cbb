use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregation::{aggregate_scalar, sum_on_date, StatusPartition, WindowRule};
use crate::error::{ReportError, ReportResult};
use crate::period::{weekday_aligned_date, Period};
use crate::query_executor::QueryExecutor;

/// Today's orders next to the same "Nth weekday" of the previous month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WeekdayComparison {
    pub today: NaiveDate,
    pub aligned_date: NaiveDate,
    pub today_value: i64,
    pub aligned_value: i64,
}

impl WeekdayComparison {
    pub fn difference(&self) -> i64 {
        self.today_value - self.aligned_value
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiMetrics {
    pub period: Period,
    pub previous_period: Period,
    pub last_year_period: Period,
    pub total: i64,
    pub prev_total: i64,
    pub ly_total: i64,
    pub market_total: i64,
    pub paid_curr: i64,
    pub paid_prev: i64,
    pub unpaid_curr: i64,
    pub unpaid_prev: i64,
    pub weekday_comparison: Option<WeekdayComparison>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KpiRatios {
    pub mom: f64,
    pub yoy: f64,
    pub share: f64,
    pub paid_mom: f64,
    pub unpaid_mom: f64,
}

/// `(curr - prev) / prev * 100`, and 0 when `prev` is 0.
pub fn percent_change(curr: i64, prev: i64) -> f64 {
    if prev == 0 {
        return 0.0;
    }
    (curr - prev) as f64 / prev as f64 * 100.0
}

/// `part / whole * 100`, and 0 when `whole` is 0.
pub fn share_percent(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

impl KpiMetrics {
    /// All zeros for a period; what the dashboard shows when the store is
    /// unreachable.
    pub fn empty(period: Period, today: NaiveDate) -> Self {
        KpiMetrics {
            previous_period: period.previous_month(today),
            last_year_period: period.same_month_last_year(today),
            period,
            total: 0,
            prev_total: 0,
            ly_total: 0,
            market_total: 0,
            paid_curr: 0,
            paid_prev: 0,
            unpaid_curr: 0,
            unpaid_prev: 0,
            weekday_comparison: None,
        }
    }

    pub fn ratios(&self) -> KpiRatios {
        KpiRatios {
            mom: percent_change(self.total, self.prev_total),
            yoy: percent_change(self.total, self.ly_total),
            share: share_percent(self.total, self.market_total),
            paid_mom: percent_change(self.paid_curr, self.paid_prev),
            unpaid_mom: percent_change(self.unpaid_curr, self.unpaid_prev),
        }
    }
}

fn weekday_comparison(
    executor: &dyn QueryExecutor,
    vehicle: &str,
    period: &Period,
    today: NaiveDate,
) -> ReportResult<Option<WeekdayComparison>> {
    if !period.is_current_reference_period {
        return Ok(None);
    }
    let aligned_date = match weekday_aligned_date(today) {
        Ok(date) => date,
        Err(ReportError::AlignmentUndefined(reason)) => {
            info!(vehicle, %today, %reason, "weekday comparison omitted");
            return Ok(None);
        }
        Err(err) => return Err(err),
    };
    Ok(Some(WeekdayComparison {
        today,
        aligned_date,
        today_value: sum_on_date(executor, vehicle, today, None)?,
        aligned_value: sum_on_date(
            executor,
            vehicle,
            aligned_date,
            Some(StatusPartition::Total),
        )?,
    }))
}

/// Composite of the single-number queries behind the KPI strip.
pub fn kpi_metrics(
    executor: &dyn QueryExecutor,
    vehicle: &str,
    period: &Period,
    today: NaiveDate,
) -> ReportResult<KpiMetrics> {
    let previous = period.previous_month(today);
    let last_year = period.same_month_last_year(today);
    let scalar = |vehicle: Option<&str>, window: &Period, partition, rule| {
        aggregate_scalar(executor, vehicle, window, partition, rule)
    };
    let vehicle_filter = Some(vehicle);

    Ok(KpiMetrics {
        total: scalar(vehicle_filter, period, StatusPartition::Total, WindowRule::Uniform)?,
        prev_total: scalar(vehicle_filter, &previous, StatusPartition::Total, WindowRule::Uniform)?,
        ly_total: scalar(vehicle_filter, &last_year, StatusPartition::Total, WindowRule::Uniform)?,
        market_total: scalar(None, period, StatusPartition::Total, WindowRule::Uniform)?,
        paid_curr: scalar(vehicle_filter, period, StatusPartition::Paid, WindowRule::Historical)?,
        paid_prev: scalar(vehicle_filter, &previous, StatusPartition::Paid, WindowRule::Historical)?,
        unpaid_curr: scalar(vehicle_filter, period, StatusPartition::Unpaid, WindowRule::Historical)?,
        unpaid_prev: scalar(
            vehicle_filter,
            &previous,
            StatusPartition::Unpaid,
            WindowRule::Historical,
        )?,
        weekday_comparison: weekday_comparison(executor, vehicle, period, today)
            .unwrap_or_else(|err| {
                warn!(vehicle, %today, error = %err, "weekday comparison unavailable");
                None
            }),
        period: period.clone(),
        previous_period: previous,
        last_year_period: last_year,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact_store::tests::{fact, seeded_store};
    use crate::fact_store::FactRow;
    use crate::fact_store::OrderStatus::{Invoiced, NotInvoiced, Open};
    use crate::period::resolve;
    use crate::error::ExecutorError;
    use crate::query_executor::{QueryParams, QueryRow, SqliteExecutor};
    use std::time::Duration;

    struct SingleDayOffline {
        inner: SqliteExecutor,
    }

    impl QueryExecutor for SingleDayOffline {
        fn query(&self, sql: &str, params: &QueryParams) -> Result<Vec<QueryRow>, ExecutorError> {
            if sql.contains(":on_date") {
                return Err(ExecutorError::Timeout("single-day lookup timed out".into()));
            }
            self.inner.query(sql, params)
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
    }

    fn approx_eq(a: f64, b: f64, eps: f64) {
        assert!(
            (a - b).abs() <= eps,
            "approx not equal: left={a} right={b} eps={eps}"
        );
    }

    fn march_2024_fixture() -> Vec<FactRow> {
        let mut ora = fact("ORA 03", "2024-03-05", Invoiced, 20);
        ora.vehicle = "ORA".to_string();
        vec![
            fact("H6 GT", "2024-03-05", Invoiced, 10),
            fact("H6 GT", "2024-03-06", Open, 4),
            fact("H6 GT", "2024-03-19", Open, 2),
            fact("H6 GT", "2024-03-20", Invoiced, 3),
            fact("H6 GT", "2024-02-10", Invoiced, 6),
            fact("H6 GT", "2024-02-14", NotInvoiced, 2),
            fact("H6 GT", "2024-02-21", Open, 8),
            fact("H6 GT", "2024-02-25", Open, 100),
            fact("H6 GT", "2023-03-15", Invoiced, 7),
            fact("H6 GT", "2023-03-28", Invoiced, 50),
            ora,
        ]
    }

    #[test]
    fn kpis_for_a_partial_current_month_are_day_limited() {
        let today = d(2024, 3, 20);
        let db_path = seeded_store("kpi_current", &march_2024_fixture());
        let executor = SqliteExecutor::new(&db_path, Duration::from_secs(1));
        let period = resolve("Mar/24", today).expect("period");

        let kpi = kpi_metrics(&executor, "H6", &period, today).expect("kpi");
        assert_eq!(kpi.total, 19);
        assert_eq!(kpi.prev_total, 8);
        assert_eq!(kpi.ly_total, 7);
        assert_eq!(kpi.market_total, 39);
        assert_eq!(kpi.paid_curr, 10);
        assert_eq!(kpi.paid_prev, 6);
        assert_eq!(kpi.unpaid_curr, 4);
        assert_eq!(kpi.unpaid_prev, 2);
        assert_eq!(kpi.previous_period.day_limit, Some(20));

        let weekday = kpi.weekday_comparison.expect("3rd Wednesday exists in February");
        assert_eq!(weekday.aligned_date, d(2024, 2, 21));
        assert_eq!(weekday.today_value, 3);
        assert_eq!(weekday.aligned_value, 8);
        assert_eq!(weekday.difference(), -5);

        let ratios = kpi.ratios();
        approx_eq(ratios.mom, 137.5, 1e-9);
        approx_eq(ratios.yoy, 12.0 / 7.0 * 100.0, 1e-9);
        approx_eq(ratios.share, 19.0 / 39.0 * 100.0, 1e-9);
        approx_eq(ratios.paid_mom, 4.0 / 6.0 * 100.0, 1e-9);
        approx_eq(ratios.unpaid_mom, 100.0, 1e-9);

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn past_month_kpis_use_full_months_and_skip_weekday() {
        let today = d(2026, 10, 19);
        let db_path = seeded_store("kpi_past", &march_2024_fixture());
        let executor = SqliteExecutor::new(&db_path, Duration::from_secs(1));
        let period = resolve("Mar/24", today).expect("period");

        let kpi = kpi_metrics(&executor, "H6", &period, today).expect("kpi");
        assert_eq!(kpi.total, 19);
        assert_eq!(kpi.prev_total, 116);
        assert_eq!(kpi.ly_total, 57);
        assert_eq!(kpi.paid_curr, 13);
        assert_eq!(kpi.unpaid_curr, 6);
        assert!(kpi.weekday_comparison.is_none());

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn missing_nth_weekday_omits_only_the_weekday_indicator() {
        // 2024-05-29 is the 5th Wednesday; April 2024 has four.
        let today = d(2024, 5, 29);
        let db_path = seeded_store("kpi_no_align", &[fact("H6 GT", "2024-05-02", Invoiced, 4)]);
        let executor = SqliteExecutor::new(&db_path, Duration::from_secs(1));
        let period = resolve("May/24", today).expect("period");

        let kpi = kpi_metrics(&executor, "H6", &period, today).expect("kpi");
        assert!(kpi.weekday_comparison.is_none());
        assert_eq!(kpi.total, 4);
        assert_eq!(kpi.prev_total, 0);
        assert_eq!(kpi.ratios().mom, 0.0);

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn failed_single_day_lookup_drops_only_the_weekday_indicator() {
        let today = d(2024, 3, 20);
        let db_path = seeded_store("kpi_weekday_offline", &march_2024_fixture());
        let executor = SingleDayOffline {
            inner: SqliteExecutor::new(&db_path, Duration::from_secs(1)),
        };
        let period = resolve("Mar/24", today).expect("period");

        let kpi = kpi_metrics(&executor, "H6", &period, today).expect("kpi");
        assert!(kpi.weekday_comparison.is_none());
        assert_eq!(kpi.total, 19);
        assert_eq!(kpi.prev_total, 8);
        assert_eq!(kpi.market_total, 39);
        assert_eq!(kpi.paid_curr, 10);

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn zero_denominators_yield_zero() {
        assert_eq!(percent_change(5, 0), 0.0);
        assert_eq!(percent_change(0, 0), 0.0);
        assert_eq!(share_percent(5, 0), 0.0);
        assert_eq!(percent_change(5, 10), -50.0);
    }
}
