use chrono::NaiveDate;
use std::time::Duration;

use crate::error::{ReportError, ReportResult};
use crate::fact_store::FACT_TABLE;
use crate::period::{first_of_month, month_label};
use crate::query_executor::{CachedExecutor, QueryExecutor, QueryParams, SqlValue};

pub const REPORT_SUFFIX: &str = " Pocket Report";

/// `"H6 Pocket Report"` -> `"H6"`. Plain vehicle names pass through.
pub fn raw_vehicle(option: &str) -> String {
    let text = option.trim();
    text.strip_suffix(REPORT_SUFFIX).unwrap_or(text).trim().to_string()
}

pub fn report_option(vehicle: &str) -> String {
    format!("{}{REPORT_SUFFIX}", vehicle.trim())
}

fn text_column(rows: Vec<Vec<SqlValue>>) -> Vec<String> {
    rows.into_iter()
        .filter_map(|row| {
            row.first()
                .and_then(SqlValue::as_text)
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string)
        })
        .collect()
}

/// Distinct vehicles as report options. Values that look like timestamps
/// (containing `:`) are upstream noise and skipped.
pub fn vehicle_options(executor: &dyn QueryExecutor) -> ReportResult<Vec<String>> {
    let sql = format!(
        "SELECT DISTINCT vehicle FROM {FACT_TABLE} WHERE vehicle NOT LIKE '%:%' ORDER BY vehicle"
    );
    let rows = executor.query(&sql, &QueryParams::new())?;
    Ok(text_column(rows).iter().map(|v| report_option(v)).collect())
}

/// Month labels present in the store, most recent first.
pub fn month_options(executor: &dyn QueryExecutor) -> ReportResult<Vec<String>> {
    let sql = format!(
        "SELECT DISTINCT substr(order_date, 1, 7) || '-01' AS month_start FROM {FACT_TABLE} ORDER BY month_start DESC"
    );
    let rows = executor.query(&sql, &QueryParams::new())?;
    let mut labels = Vec::with_capacity(rows.len());
    for row in rows {
        let start = row.first().and_then(SqlValue::as_date).ok_or_else(|| {
            ReportError::MalformedRow(format!("expected a month start, got {:?}", row.first()))
        })?;
        labels.push(month_label(first_of_month(start)));
    }
    Ok(labels)
}

pub fn vehicle_families(executor: &dyn QueryExecutor, vehicle: &str) -> ReportResult<Vec<String>> {
    let sql = format!(
        "SELECT DISTINCT vehicle_family FROM {FACT_TABLE} WHERE vehicle = :vehicle ORDER BY vehicle_family"
    );
    let mut params = QueryParams::new();
    params.insert("vehicle".to_string(), vehicle.into());
    let rows = executor.query(&sql, &params)?;
    Ok(text_column(rows))
}

/// Latest order date in the store, `None` for an empty store. Cached for
/// `ttl` rather than the executor's default.
pub fn last_updated_date<E: QueryExecutor>(
    executor: &CachedExecutor<E>,
    ttl: Duration,
) -> ReportResult<Option<NaiveDate>> {
    let sql = format!("SELECT MAX(order_date) FROM {FACT_TABLE}");
    let rows = executor.query_with_ttl(&sql, &QueryParams::new(), ttl)?;
    Ok(rows
        .first()
        .and_then(|row| row.first())
        .and_then(SqlValue::as_date))
}
