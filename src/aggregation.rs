use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{ReportError, ReportResult};
use crate::fact_store::{OrderStatus, FACT_TABLE};
use crate::period::Period;
use crate::query_executor::{QueryExecutor, QueryParams, QueryRow, SqlParam, SqlValue};

pub const UNKNOWN_KEY: &str = "Unknown";

/// Which funnel statuses count toward a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPartition {
    Paid,
    Unpaid,
    Total,
}

impl StatusPartition {
    pub fn statuses(self) -> &'static [OrderStatus] {
        match self {
            StatusPartition::Paid => &[OrderStatus::Invoiced],
            StatusPartition::Unpaid => &[OrderStatus::NotInvoiced, OrderStatus::Open],
            StatusPartition::Total => &OrderStatus::ALL,
        }
    }

    pub fn contains(self, status: OrderStatus) -> bool {
        self.statuses().contains(&status)
    }

    /// Literal IN-list; built only from the closed status enum.
    fn sql_in_list(self) -> String {
        self.statuses()
            .iter()
            .map(|status| format!("'{}'", status.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn filter_label(self) -> &'static str {
        match self {
            StatusPartition::Paid => "9k form with payment",
            StatusPartition::Unpaid => "9k form without payment",
            StatusPartition::Total => "Total",
        }
    }

    /// Accepts the dashboard filter labels as well as the bare names.
    pub fn from_filter_label(raw: &str) -> Option<StatusPartition> {
        let text = raw.trim().to_lowercase();
        match text.as_str() {
            "9k form with payment" | "paid" => Some(StatusPartition::Paid),
            "9k form without payment" | "unpaid" => Some(StatusPartition::Unpaid),
            "total" | "" => Some(StatusPartition::Total),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Family,
    Color,
    Date,
    State,
    DealerGroup,
}

impl Dimension {
    fn column(self) -> &'static str {
        match self {
            Dimension::Family => "vehicle_family",
            Dimension::Color => "exterior_color",
            Dimension::Date => "order_date",
            Dimension::State => "dealer_state",
            Dimension::DealerGroup => "dealer_group_name",
        }
    }
}

/// How a period's cutoff applies to a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowRule {
    /// Settled rows matching month and status, plus every row from the
    /// cutoff on regardless of status.
    Uniform,
    /// Settled rows matching month and status only.
    Historical,
    /// Rows from the cutoff on regardless of status; nothing when the
    /// period is not current.
    Recent,
    /// Rows matching month and status, ignoring the cutoff.
    Calendar,
}

/// Statement under construction against the fact table. Clauses and the
/// parameters they reference are added together so no unused name is
/// ever bound.
#[derive(Debug, Clone)]
pub(crate) struct FactQuery {
    select: String,
    filters: Vec<String>,
    group_by: Option<String>,
    order_by: Option<String>,
    params: QueryParams,
}

impl FactQuery {
    pub(crate) fn new(select: impl Into<String>) -> Self {
        FactQuery {
            select: select.into(),
            filters: Vec::new(),
            group_by: None,
            order_by: None,
            params: QueryParams::new(),
        }
    }

    fn bind(&mut self, name: &str, value: impl Into<SqlParam>) {
        self.params.insert(name.to_string(), value.into());
    }

    pub(crate) fn vehicle(mut self, vehicle: Option<&str>) -> Self {
        if let Some(vehicle) = vehicle {
            self.filters.push("vehicle = :vehicle".to_string());
            self.bind("vehicle", vehicle);
        }
        self
    }

    pub(crate) fn family(mut self, family: Option<&str>) -> Self {
        if let Some(family) = family {
            self.filters
                .push("vehicle_family = :family COLLATE NOCASE".to_string());
            self.bind("family", family);
        }
        self
    }

    pub(crate) fn on_date(mut self, date: NaiveDate) -> Self {
        self.filters.push("order_date = :on_date".to_string());
        self.bind("on_date", date);
        self
    }

    pub(crate) fn statuses(mut self, partition: StatusPartition) -> Self {
        self.filters
            .push(format!("status IN ({})", partition.sql_in_list()));
        self
    }

    /// The single place the current-period cutoff rule is expressed.
    pub(crate) fn window(
        mut self,
        period: &Period,
        partition: StatusPartition,
        rule: WindowRule,
    ) -> Self {
        let settled = format!(
            "(order_date >= :window_start AND order_date < :window_end AND status IN ({}))",
            partition.sql_in_list()
        );
        let clause = match (rule, period.cutoff_date) {
            (WindowRule::Recent, Some(cutoff)) => {
                self.bind("cutoff", cutoff);
                "order_date >= :cutoff".to_string()
            }
            (WindowRule::Recent, None) => "1 = 0".to_string(),
            (WindowRule::Uniform, Some(cutoff)) => {
                self.bind("cutoff", cutoff);
                format!("(({settled} AND order_date < :cutoff) OR order_date >= :cutoff)")
            }
            (WindowRule::Historical, Some(cutoff)) => {
                self.bind("cutoff", cutoff);
                format!("({settled} AND order_date < :cutoff)")
            }
            (WindowRule::Calendar, _) | (WindowRule::Uniform | WindowRule::Historical, None) => {
                settled
            }
        };
        if rule != WindowRule::Recent {
            self.bind("window_start", period.start_of_month);
            self.bind("window_end", period.window_end());
        }
        self.filters.push(clause);
        self
    }

    pub(crate) fn group_by(mut self, columns: &str) -> Self {
        self.group_by = Some(columns.to_string());
        self
    }

    pub(crate) fn order_by(mut self, columns: &str) -> Self {
        self.order_by = Some(columns.to_string());
        self
    }

    pub(crate) fn sql(&self) -> String {
        let mut sql = format!("SELECT {} FROM {FACT_TABLE}", self.select);
        if !self.filters.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.filters.join(" AND "));
        }
        if let Some(group_by) = &self.group_by {
            sql.push_str(" GROUP BY ");
            sql.push_str(group_by);
        }
        if let Some(order_by) = &self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order_by);
        }
        sql
    }

    #[cfg(test)]
    pub(crate) fn params(&self) -> &QueryParams {
        &self.params
    }

    pub(crate) fn run(&self, executor: &dyn QueryExecutor) -> ReportResult<Vec<QueryRow>> {
        Ok(executor.query(&self.sql(), &self.params)?)
    }
}

/// Grouping key -> total orders for one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MetricBucket<K: Ord> {
    totals: BTreeMap<K, i64>,
}

impl<K: Ord> Default for MetricBucket<K> {
    fn default() -> Self {
        MetricBucket {
            totals: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone> MetricBucket<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every key starts at 0 so the key set stays stable across calls.
    pub fn seeded<I: IntoIterator<Item = K>>(keys: I) -> Self {
        MetricBucket {
            totals: keys.into_iter().map(|key| (key, 0)).collect(),
        }
    }

    pub fn add(&mut self, key: K, amount: i64) {
        *self.totals.entry(key).or_insert(0) += amount;
    }

    pub fn get(&self, key: &K) -> Option<i64> {
        self.totals.get(key).copied()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.totals.contains_key(key)
    }

    pub fn total(&self) -> i64 {
        self.totals.values().sum()
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, i64)> {
        self.totals.iter().map(|(key, total)| (key, *total))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.totals.keys()
    }

    /// Highest total first, ties by key.
    pub fn ranked(&self) -> Vec<(K, i64)> {
        let mut out = self
            .totals
            .iter()
            .map(|(key, total)| (key.clone(), *total))
            .collect::<Vec<_>>();
        out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        out
    }
}

impl<K: Ord> FromIterator<(K, i64)> for MetricBucket<K> {
    fn from_iter<I: IntoIterator<Item = (K, i64)>>(iter: I) -> Self {
        let mut totals = BTreeMap::new();
        for (key, amount) in iter {
            *totals.entry(key).or_insert(0) += amount;
        }
        MetricBucket { totals }
    }
}

/// Exact key first, then a case-insensitive scan.
pub fn lookup_case_insensitive<'a, V>(map: &'a BTreeMap<String, V>, key: &str) -> Option<&'a V> {
    if let Some(value) = map.get(key) {
        return Some(value);
    }
    let wanted = key.trim().to_lowercase();
    map.iter()
        .find(|(candidate, _)| candidate.trim().to_lowercase() == wanted)
        .map(|(_, value)| value)
}

impl MetricBucket<String> {
    pub fn lookup_case_insensitive(&self, key: &str) -> Option<i64> {
        lookup_case_insensitive(&self.totals, key).copied()
    }
}

/// Family -> breakdown bucket, pre-seeded with the requested families.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FamilyBreakdown<K: Ord> {
    families: BTreeMap<String, MetricBucket<K>>,
}

impl<K: Ord + Clone> FamilyBreakdown<K> {
    pub fn seeded(families: &[String]) -> Self {
        FamilyBreakdown {
            families: families
                .iter()
                .map(|family| (family.clone(), MetricBucket::new()))
                .collect(),
        }
    }

    pub fn get(&self, family: &str) -> Option<&MetricBucket<K>> {
        lookup_case_insensitive(&self.families, family)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetricBucket<K>)> {
        self.families.iter()
    }

    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    fn add(&mut self, family: String, key: K, amount: i64) {
        self.families.entry(family).or_default().add(key, amount);
    }
}

/// Maps a raw family from the store onto the caller's entity list. With no
/// list every family is accepted.
fn canonical_family(families: &[String], raw: &str) -> Option<String> {
    if families.is_empty() {
        return Some(raw.to_string());
    }
    if families.iter().any(|family| family == raw) {
        return Some(raw.to_string());
    }
    let wanted = raw.trim().to_lowercase();
    families
        .iter()
        .find(|family| family.trim().to_lowercase() == wanted)
        .cloned()
}

fn key_or_unknown(cell: Option<&SqlValue>) -> String {
    cell.and_then(SqlValue::as_text)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .unwrap_or(UNKNOWN_KEY)
        .to_string()
}

fn total_cell(cell: Option<&SqlValue>) -> i64 {
    cell.and_then(SqlValue::as_i64).unwrap_or(0)
}

/// Orders per family for the requested partition and window rule.
pub fn aggregate_family_totals(
    executor: &dyn QueryExecutor,
    vehicle: &str,
    period: &Period,
    partition: StatusPartition,
    rule: WindowRule,
    families: &[String],
) -> ReportResult<MetricBucket<String>> {
    let mut bucket = MetricBucket::seeded(families.iter().cloned());
    if rule == WindowRule::Recent && !period.is_current_reference_period {
        return Ok(bucket);
    }

    let rows = FactQuery::new("vehicle_family, SUM(orders) AS total")
        .vehicle(Some(vehicle))
        .window(period, partition, rule)
        .group_by("vehicle_family")
        .run(executor)?;

    for row in rows {
        let raw_family = key_or_unknown(row.first());
        match canonical_family(families, &raw_family) {
            Some(family) => bucket.add(family, total_cell(row.get(1))),
            None => debug!(family = %raw_family, "dropping family outside entity list"),
        }
    }
    Ok(bucket)
}

fn aggregate_breakdown<K, F>(
    executor: &dyn QueryExecutor,
    vehicle: &str,
    period: &Period,
    partition: StatusPartition,
    dimension: Dimension,
    families: &[String],
    parse_key: F,
) -> ReportResult<FamilyBreakdown<K>>
where
    K: Ord + Clone,
    F: Fn(Option<&SqlValue>) -> ReportResult<K>,
{
    let column = dimension.column();
    let order = if dimension == Dimension::Date {
        "group_key ASC"
    } else {
        "total DESC"
    };
    let rows = FactQuery::new(format!(
        "vehicle_family, {column} AS group_key, SUM(orders) AS total"
    ))
    .vehicle(Some(vehicle))
    .window(period, partition, WindowRule::Uniform)
    .group_by("vehicle_family, group_key")
    .order_by(order)
    .run(executor)?;

    let mut breakdown = FamilyBreakdown::seeded(families);
    for row in rows {
        let raw_family = key_or_unknown(row.first());
        let Some(family) = canonical_family(families, &raw_family) else {
            debug!(family = %raw_family, ?dimension, "dropping family outside entity list");
            continue;
        };
        let key = parse_key(row.get(1))?;
        breakdown.add(family, key, total_cell(row.get(2)));
    }
    Ok(breakdown)
}

fn text_key(cell: Option<&SqlValue>) -> ReportResult<String> {
    Ok(key_or_unknown(cell))
}

fn date_key(cell: Option<&SqlValue>) -> ReportResult<NaiveDate> {
    cell.and_then(SqlValue::as_date)
        .ok_or_else(|| ReportError::MalformedRow(format!("expected a date, got {cell:?}")))
}

pub fn aggregate_colors(
    executor: &dyn QueryExecutor,
    vehicle: &str,
    period: &Period,
    partition: StatusPartition,
    families: &[String],
) -> ReportResult<FamilyBreakdown<String>> {
    aggregate_breakdown(
        executor,
        vehicle,
        period,
        partition,
        Dimension::Color,
        families,
        text_key,
    )
}

pub fn aggregate_daily(
    executor: &dyn QueryExecutor,
    vehicle: &str,
    period: &Period,
    partition: StatusPartition,
    families: &[String],
) -> ReportResult<FamilyBreakdown<NaiveDate>> {
    aggregate_breakdown(
        executor,
        vehicle,
        period,
        partition,
        Dimension::Date,
        families,
        date_key,
    )
}

pub fn aggregate_states(
    executor: &dyn QueryExecutor,
    vehicle: &str,
    period: &Period,
    partition: StatusPartition,
    families: &[String],
) -> ReportResult<FamilyBreakdown<String>> {
    aggregate_breakdown(
        executor,
        vehicle,
        period,
        partition,
        Dimension::State,
        families,
        text_key,
    )
}

pub fn aggregate_dealer_groups(
    executor: &dyn QueryExecutor,
    vehicle: &str,
    period: &Period,
    partition: StatusPartition,
    families: &[String],
) -> ReportResult<FamilyBreakdown<String>> {
    aggregate_breakdown(
        executor,
        vehicle,
        period,
        partition,
        Dimension::DealerGroup,
        families,
        text_key,
    )
}

/// Ungrouped sum. `vehicle: None` is the market-wide figure.
pub fn aggregate_scalar(
    executor: &dyn QueryExecutor,
    vehicle: Option<&str>,
    period: &Period,
    partition: StatusPartition,
    rule: WindowRule,
) -> ReportResult<i64> {
    if rule == WindowRule::Recent && !period.is_current_reference_period {
        return Ok(0);
    }
    let rows = FactQuery::new("COALESCE(SUM(orders), 0) AS total")
        .vehicle(vehicle)
        .window(period, partition, rule)
        .run(executor)?;
    Ok(rows.first().map(|row| total_cell(row.first())).unwrap_or(0))
}

/// Orders on a single calendar day; `partition: None` ignores status.
pub fn sum_on_date(
    executor: &dyn QueryExecutor,
    vehicle: &str,
    date: NaiveDate,
    partition: Option<StatusPartition>,
) -> ReportResult<i64> {
    let mut query = FactQuery::new("COALESCE(SUM(orders), 0) AS total")
        .vehicle(Some(vehicle))
        .on_date(date);
    if let Some(partition) = partition {
        query = query.statuses(partition);
    }
    let rows = query.run(executor)?;
    Ok(rows.first().map(|row| total_cell(row.first())).unwrap_or(0))
}

/// Per-family KPI card: settled unpaid, settled paid, and the still-settling
/// recent window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FamilySummary {
    pub unpaid_total: i64,
    pub paid_total: i64,
    pub recent_total: i64,
}

impl FamilySummary {
    pub fn total(&self) -> i64 {
        self.unpaid_total + self.paid_total + self.recent_total
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FamilySummaryTable {
    pub families: BTreeMap<String, FamilySummary>,
}

impl FamilySummaryTable {
    pub fn seeded(families: &[String]) -> Self {
        FamilySummaryTable {
            families: families
                .iter()
                .map(|family| (family.clone(), FamilySummary::default()))
                .collect(),
        }
    }

    pub fn get(&self, family: &str) -> Option<&FamilySummary> {
        lookup_case_insensitive(&self.families, family)
    }

    pub fn grand_total(&self) -> i64 {
        self.families.values().map(FamilySummary::total).sum()
    }
}

pub fn family_summary(
    executor: &dyn QueryExecutor,
    vehicle: &str,
    period: &Period,
    families: &[String],
) -> ReportResult<FamilySummaryTable> {
    let unpaid = aggregate_family_totals(
        executor,
        vehicle,
        period,
        StatusPartition::Unpaid,
        WindowRule::Historical,
        families,
    )?;
    let paid = aggregate_family_totals(
        executor,
        vehicle,
        period,
        StatusPartition::Paid,
        WindowRule::Historical,
        families,
    )?;
    let recent = aggregate_family_totals(
        executor,
        vehicle,
        period,
        StatusPartition::Total,
        WindowRule::Recent,
        families,
    )?;

    let mut table = FamilySummaryTable::seeded(families);
    for (family, total) in unpaid.iter() {
        table.families.entry(family.clone()).or_default().unpaid_total = total;
    }
    for (family, total) in paid.iter() {
        table.families.entry(family.clone()).or_default().paid_total = total;
    }
    for (family, total) in recent.iter() {
        table.families.entry(family.clone()).or_default().recent_total = total;
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact_store::tests::{fact, fact_with, seeded_store};
    use crate::fact_store::OrderStatus::{Invoiced, NotInvoiced, Open};
    use crate::period::resolve;
    use crate::query_executor::SqliteExecutor;
    use rusqlite::Connection;
    use std::time::Duration;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
    }

    fn families(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn paid_and_unpaid_split_for_a_past_month() {
        let db_path = seeded_store(
            "agg_split",
            &[
                fact("H6 GT", "2024-01-10", Invoiced, 5),
                fact("H6 GT", "2024-01-10", Open, 3),
            ],
        );
        let executor = SqliteExecutor::new(&db_path, Duration::from_secs(1));
        let period = resolve("Jan/24", d(2026, 10, 19)).expect("period");
        let list = families(&["H6 GT"]);

        let paid = aggregate_family_totals(
            &executor,
            "H6",
            &period,
            StatusPartition::Paid,
            WindowRule::Uniform,
            &list,
        )
        .expect("paid");
        let unpaid = aggregate_family_totals(
            &executor,
            "H6",
            &period,
            StatusPartition::Unpaid,
            WindowRule::Uniform,
            &list,
        )
        .expect("unpaid");

        assert_eq!(paid, MetricBucket::from_iter([("H6 GT".to_string(), 5)]));
        assert_eq!(unpaid, MetricBucket::from_iter([("H6 GT".to_string(), 3)]));

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn bucket_keys_cover_the_entity_list_even_without_rows() {
        let db_path = seeded_store("agg_seed", &[fact("H6 GT", "2024-01-10", Invoiced, 5)]);
        let executor = SqliteExecutor::new(&db_path, Duration::from_secs(1));
        let period = resolve("Jan/24", d(2026, 10, 19)).expect("period");
        let list = families(&["H6 GT", "H6 Hev2", "H6 PHev19"]);

        let totals = aggregate_family_totals(
            &executor,
            "H6",
            &period,
            StatusPartition::Total,
            WindowRule::Uniform,
            &list,
        )
        .expect("totals");
        for family in &list {
            assert!(totals.contains_key(family), "missing {family}");
        }
        assert_eq!(totals.get(&"H6 Hev2".to_string()), Some(0));

        let colors =
            aggregate_colors(&executor, "H6", &period, StatusPartition::Total, &list).expect("colors");
        assert_eq!(colors.len(), 3);
        assert!(colors.get("H6 PHev19").expect("seeded").is_empty());

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn current_period_rides_recent_rows_along_without_status_filter() {
        let today = d(2024, 1, 20);
        let db_path = seeded_store(
            "agg_current",
            &[
                fact("H6 GT", "2024-01-10", Invoiced, 5),
                fact("H6 GT", "2024-01-10", Open, 3),
                fact("H6 GT", "2024-01-19", Open, 2),
                fact("H6 GT", "2024-01-20", Invoiced, 1),
            ],
        );
        let executor = SqliteExecutor::new(&db_path, Duration::from_secs(1));
        let period = resolve("Jan/24", today).expect("period");
        assert!(period.is_current_reference_period);
        let list = families(&["H6 GT"]);

        let paid_uniform = aggregate_family_totals(
            &executor,
            "H6",
            &period,
            StatusPartition::Paid,
            WindowRule::Uniform,
            &list,
        )
        .expect("uniform");
        assert_eq!(paid_uniform.get(&"H6 GT".to_string()), Some(8));

        let summary = family_summary(&executor, "H6", &period, &list).expect("summary");
        let gt = summary.get("H6 GT").expect("seeded family");
        assert_eq!(gt.paid_total, 5);
        assert_eq!(gt.unpaid_total, 3);
        assert_eq!(gt.recent_total, 3);
        assert_eq!(summary.grand_total(), 11);

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn recent_window_is_never_populated_for_past_periods() {
        let db_path = seeded_store(
            "agg_past_recent",
            &[
                fact("H6 GT", "2024-01-10", Invoiced, 5),
                fact("H6 GT", "2026-10-18", Open, 9),
            ],
        );
        let executor = SqliteExecutor::new(&db_path, Duration::from_secs(1));
        let period = resolve("Jan/24", d(2026, 10, 19)).expect("period");
        let summary =
            family_summary(&executor, "H6", &period, &families(&["H6 GT"])).expect("summary");
        let gt = summary.get("h6 gt").expect("case-insensitive lookup");
        assert_eq!(gt.recent_total, 0);
        assert_eq!(gt.paid_total, 5);

        let recent = aggregate_scalar(
            &executor,
            Some("H6"),
            &period,
            StatusPartition::Total,
            WindowRule::Recent,
        )
        .expect("recent");
        assert_eq!(recent, 0);

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn breakdowns_default_missing_attributes_to_unknown_and_rank_by_total() {
        let db_path = seeded_store(
            "agg_breakdown",
            &[
                fact_with("H6 GT", "2024-01-03", Invoiced, 2, Some("Black"), Some("SP"), Some("Alpha")),
                fact_with("H6 GT", "2024-01-04", NotInvoiced, 6, Some("White"), None, Some("Alpha")),
                fact_with("h6 gt", "2024-01-04", Open, 1, Some(""), Some("RJ"), None),
                fact_with("H6 GT", "2024-01-05", Invoiced, 4, None, Some("SP"), Some("Beta")),
            ],
        );
        let executor = SqliteExecutor::new(&db_path, Duration::from_secs(1));
        let period = resolve("Jan/24", d(2026, 10, 19)).expect("period");
        let list = families(&["H6 GT"]);

        let colors =
            aggregate_colors(&executor, "H6", &period, StatusPartition::Total, &list).expect("colors");
        let gt = colors.get("H6 GT").expect("family");
        assert_eq!(
            gt.ranked(),
            vec![
                ("White".to_string(), 6),
                (UNKNOWN_KEY.to_string(), 5),
                ("Black".to_string(), 2),
            ]
        );

        let states =
            aggregate_states(&executor, "H6", &period, StatusPartition::Total, &list).expect("states");
        let gt = states.get("H6 GT").expect("family");
        assert_eq!(gt.get(&"SP".to_string()), Some(6));
        assert_eq!(gt.get(&UNKNOWN_KEY.to_string()), Some(6));
        assert_eq!(gt.get(&"RJ".to_string()), Some(1));

        let dealers = aggregate_dealer_groups(&executor, "H6", &period, StatusPartition::Paid, &list)
            .expect("dealers");
        let gt = dealers.get("H6 GT").expect("family");
        assert_eq!(gt.ranked(), vec![("Beta".to_string(), 4), ("Alpha".to_string(), 2)]);

        let daily =
            aggregate_daily(&executor, "H6", &period, StatusPartition::Total, &list).expect("daily");
        let gt = daily.get("H6 GT").expect("family");
        assert_eq!(
            gt.iter().map(|(day, total)| (*day, total)).collect::<Vec<_>>(),
            vec![(d(2024, 1, 3), 2), (d(2024, 1, 4), 7), (d(2024, 1, 5), 4)]
        );

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn statuses_outside_the_funnel_never_count() {
        let db_path = seeded_store("agg_other_status", &[fact("H6 GT", "2024-01-10", Invoiced, 5)]);
        {
            let conn = Connection::open(&db_path).expect("open");
            conn.execute(
                "INSERT INTO pocket_report_facts(vehicle, vehicle_family, order_date, status, orders)
                 VALUES ('H6', 'H6 GT', '2024-01-11', 'Cancelled', 50)",
                [],
            )
            .expect("insert cancelled");
        }
        let executor = SqliteExecutor::new(&db_path, Duration::from_secs(1));
        let period = resolve("Jan/24", d(2026, 10, 19)).expect("period");
        let total = aggregate_scalar(
            &executor,
            Some("H6"),
            &period,
            StatusPartition::Total,
            WindowRule::Uniform,
        )
        .expect("total");
        assert_eq!(total, 5);

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn case_insensitive_lookup_falls_back_after_exact_match() {
        let bucket = MetricBucket::from_iter([("H6 GT".to_string(), 7), ("h6 gt ".to_string(), 1)]);
        assert_eq!(bucket.lookup_case_insensitive("H6 GT"), Some(7));
        assert_eq!(bucket.lookup_case_insensitive("h6 gt "), Some(1));
        assert_eq!(bucket.lookup_case_insensitive("h6 GT"), Some(7));
        assert_eq!(bucket.lookup_case_insensitive("H9"), None);
    }

    #[test]
    fn window_clause_binds_only_the_params_it_uses() {
        let today = d(2024, 1, 20);
        let current = resolve("Jan/24", today).expect("current");
        let recent = FactQuery::new("1")
            .window(&current, StatusPartition::Total, WindowRule::Recent);
        assert_eq!(recent.params().len(), 1);
        assert!(recent.sql().contains("order_date >= :cutoff"));

        let past = resolve("Dec/23", today).expect("past");
        let settled = FactQuery::new("1")
            .vehicle(Some("H6"))
            .window(&past, StatusPartition::Unpaid, WindowRule::Uniform);
        assert_eq!(settled.params().len(), 3);
        assert!(settled.sql().contains("status IN ('Not Invoiced', 'Open')"));
        assert!(!settled.sql().contains(":cutoff"));
    }

    #[test]
    fn filter_labels_map_to_partitions() {
        assert_eq!(
            StatusPartition::from_filter_label("9k form without payment"),
            Some(StatusPartition::Unpaid)
        );
        assert_eq!(
            StatusPartition::from_filter_label("9K Form With Payment"),
            Some(StatusPartition::Paid)
        );
        assert_eq!(StatusPartition::from_filter_label("Total"), Some(StatusPartition::Total));
        assert_eq!(StatusPartition::from_filter_label("refunded"), None);
        assert!(StatusPartition::Unpaid.contains(OrderStatus::Open));
        assert!(!StatusPartition::Paid.contains(OrderStatus::Open));
    }
}
