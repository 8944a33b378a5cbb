use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::aggregation::{FactQuery, MetricBucket, StatusPartition, WindowRule};
use crate::error::{ReportError, ReportResult};
use crate::period::{NthWeekday, Period};
use crate::query_executor::{QueryExecutor, SqlValue};

pub const ALL_FAMILIES: &str = "All";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonMode {
    /// Day of month against day of month.
    #[serde(rename = "MoM")]
    MoM,
    /// Nth weekday against Nth weekday.
    Normalized,
}

impl ComparisonMode {
    pub fn from_label(raw: &str) -> Option<ComparisonMode> {
        match raw.trim().to_lowercase().as_str() {
            "mom" => Some(ComparisonMode::MoM),
            "normalized" | "" => Some(ComparisonMode::Normalized),
            _ => None,
        }
    }

    pub fn axis_label(self) -> &'static str {
        match self {
            ComparisonMode::MoM => "Day of Month",
            ComparisonMode::Normalized => "Normalized Weekday",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FamilyFilter {
    All,
    Family(String),
}

impl FamilyFilter {
    pub fn from_label(raw: &str) -> FamilyFilter {
        let text = raw.trim();
        if text.is_empty() || text.eq_ignore_ascii_case(ALL_FAMILIES) {
            FamilyFilter::All
        } else {
            FamilyFilter::Family(text.to_string())
        }
    }

    fn as_family(&self) -> Option<&str> {
        match self {
            FamilyFilter::All => None,
            FamilyFilter::Family(name) => Some(name.as_str()),
        }
    }
}

impl fmt::Display for FamilyFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_family().unwrap_or(ALL_FAMILIES))
    }
}

/// Shared x-axis position for two monthly series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AlignmentKey {
    DayOfMonth(u32),
    NthWeekday(NthWeekday),
}

impl AlignmentKey {
    pub fn for_date(date: NaiveDate, mode: ComparisonMode) -> AlignmentKey {
        match mode {
            ComparisonMode::MoM => AlignmentKey::DayOfMonth(date.day()),
            ComparisonMode::Normalized => AlignmentKey::NthWeekday(NthWeekday::of(date)),
        }
    }
}

impl fmt::Display for AlignmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlignmentKey::DayOfMonth(day) => write!(f, "{day}"),
            AlignmentKey::NthWeekday(position) => write!(f, "{position}"),
        }
    }
}

impl Serialize for AlignmentKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AlignmentKey::DayOfMonth(day) => serializer.serialize_u32(*day),
            AlignmentKey::NthWeekday(position) => position.serialize(serializer),
        }
    }
}

/// `None` means the series has no observation at this key, which is not
/// the same as an observed zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComparisonPoint {
    pub key: AlignmentKey,
    pub value_a: Option<i64>,
    pub value_b: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComparisonSeries {
    pub mode: ComparisonMode,
    pub points: Vec<ComparisonPoint>,
}

fn accumulate(slot: &mut Option<i64>, value: i64) {
    *slot = Some(slot.unwrap_or(0) + value);
}

/// Reshapes two daily series onto the union of their alignment keys.
pub fn align(
    series_a: &MetricBucket<NaiveDate>,
    series_b: &MetricBucket<NaiveDate>,
    mode: ComparisonMode,
) -> ReportResult<ComparisonSeries> {
    if series_a.is_empty() && series_b.is_empty() {
        return Err(ReportError::NoComparisonData);
    }

    let mut axis = BTreeMap::<AlignmentKey, (Option<i64>, Option<i64>)>::new();
    for (date, value) in series_a.iter() {
        accumulate(&mut axis.entry(AlignmentKey::for_date(*date, mode)).or_default().0, value);
    }
    for (date, value) in series_b.iter() {
        accumulate(&mut axis.entry(AlignmentKey::for_date(*date, mode)).or_default().1, value);
    }

    Ok(ComparisonSeries {
        mode,
        points: axis
            .into_iter()
            .map(|(key, (value_a, value_b))| ComparisonPoint {
                key,
                value_a,
                value_b,
            })
            .collect(),
    })
}

/// Orders per day of one calendar month, settled or not.
pub fn daily_series(
    executor: &dyn QueryExecutor,
    vehicle: &str,
    period: &Period,
    family: &FamilyFilter,
    partition: StatusPartition,
) -> ReportResult<MetricBucket<NaiveDate>> {
    let rows = FactQuery::new("order_date AS day, SUM(orders) AS total")
        .vehicle(Some(vehicle))
        .family(family.as_family())
        .window(period, partition, WindowRule::Calendar)
        .group_by("day")
        .order_by("day ASC")
        .run(executor)?;

    let mut series = MetricBucket::new();
    for row in rows {
        let day = row.first().and_then(SqlValue::as_date).ok_or_else(|| {
            ReportError::MalformedRow(format!("expected a date, got {:?}", row.first()))
        })?;
        series.add(day, row.get(1).and_then(SqlValue::as_i64).unwrap_or(0));
    }
    Ok(series)
}

pub fn comparison_series(
    executor: &dyn QueryExecutor,
    vehicle: &str,
    period_a: &Period,
    period_b: &Period,
    family: &FamilyFilter,
    partition: StatusPartition,
    mode: ComparisonMode,
) -> ReportResult<ComparisonSeries> {
    let series_a = daily_series(executor, vehicle, period_a, family, partition)?;
    let series_b = daily_series(executor, vehicle, period_b, family, partition)?;
    align(&series_a, &series_b, mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact_store::tests::{fact, seeded_store};
    use crate::fact_store::OrderStatus::{Invoiced, NotInvoiced, Open};
    use crate::period::resolve;
    use crate::query_executor::SqliteExecutor;
    use std::time::Duration;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
    }

    fn series(points: &[(NaiveDate, i64)]) -> MetricBucket<NaiveDate> {
        points.iter().copied().collect()
    }

    fn keys(series: &ComparisonSeries) -> Vec<String> {
        series.points.iter().map(|p| p.key.to_string()).collect()
    }

    #[test]
    fn mom_mode_aligns_on_day_of_month() {
        let a = series(&[(d(2024, 1, 5), 10), (d(2024, 1, 31), 2)]);
        let b = series(&[(d(2024, 2, 5), 7)]);
        let aligned = align(&a, &b, ComparisonMode::MoM).expect("aligned");

        assert_eq!(
            aligned.points,
            vec![
                ComparisonPoint {
                    key: AlignmentKey::DayOfMonth(5),
                    value_a: Some(10),
                    value_b: Some(7),
                },
                ComparisonPoint {
                    key: AlignmentKey::DayOfMonth(31),
                    value_a: Some(2),
                    value_b: None,
                },
            ]
        );
    }

    #[test]
    fn normalized_mode_orders_by_position_then_weekday() {
        // 2024-01-01 is a Monday, 2024-01-07 a Sunday.
        let a = series(&[(d(2024, 1, 1), 3), (d(2024, 1, 8), 4), (d(2024, 1, 7), 1)]);
        // 2024-02-05 is February's 1st Monday.
        let b = series(&[(d(2024, 2, 5), 6)]);
        let aligned = align(&a, &b, ComparisonMode::Normalized).expect("aligned");

        assert_eq!(keys(&aligned), vec!["1st Monday", "1st Sunday", "2nd Monday"]);
        assert_eq!(aligned.points[0].value_a, Some(3));
        assert_eq!(aligned.points[0].value_b, Some(6));
        assert_eq!(aligned.points[2].value_b, None);
    }

    #[test]
    fn observed_zero_is_not_absence() {
        let a = series(&[(d(2024, 1, 2), 0)]);
        let b = series(&[(d(2024, 2, 3), 5)]);
        let aligned = align(&a, &b, ComparisonMode::MoM).expect("aligned");
        assert_eq!(aligned.points[0].value_a, Some(0));
        assert_eq!(aligned.points[0].value_b, None);
        assert_eq!(aligned.points[1].value_a, None);
        assert_eq!(aligned.points[1].value_b, Some(5));
    }

    #[test]
    fn keys_colliding_within_one_series_are_summed() {
        let a = series(&[(d(2024, 1, 5), 10), (d(2023, 12, 5), 1)]);
        let aligned = align(&a, &MetricBucket::new(), ComparisonMode::MoM).expect("aligned");
        assert_eq!(aligned.points.len(), 1);
        assert_eq!(aligned.points[0].value_a, Some(11));
    }

    #[test]
    fn both_empty_is_no_comparison_data() {
        let err = align(&MetricBucket::new(), &MetricBucket::new(), ComparisonMode::MoM)
            .expect_err("no data");
        assert!(matches!(err, ReportError::NoComparisonData));
    }

    #[test]
    fn keys_serialize_as_number_or_label() {
        let day = serde_json::to_value(AlignmentKey::DayOfMonth(5)).expect("day");
        assert_eq!(day, serde_json::json!(5));
        let weekday = serde_json::to_value(AlignmentKey::for_date(
            d(2024, 1, 8),
            ComparisonMode::Normalized,
        ))
        .expect("weekday");
        assert_eq!(weekday, serde_json::json!("2nd Monday"));
    }

    #[test]
    fn comparison_series_filters_family_and_status_per_month() {
        let db_path = seeded_store(
            "comparison",
            &[
                fact("H6 GT", "2024-01-05", Invoiced, 10),
                fact("H6 GT", "2024-01-05", Open, 4),
                fact("H6 Hev2", "2024-01-05", Invoiced, 100),
                fact("H6 GT", "2024-02-05", Invoiced, 7),
                fact("H6 GT", "2024-02-06", NotInvoiced, 2),
            ],
        );
        let executor = SqliteExecutor::new(&db_path, Duration::from_secs(1));
        let today = d(2026, 10, 19);
        let jan = resolve("Jan/24", today).expect("jan");
        let feb = resolve("Feb/24", today).expect("feb");

        let paid_gt = comparison_series(
            &executor,
            "H6",
            &jan,
            &feb,
            &FamilyFilter::from_label("H6 GT"),
            StatusPartition::Paid,
            ComparisonMode::MoM,
        )
        .expect("paid");
        assert_eq!(
            paid_gt.points,
            vec![ComparisonPoint {
                key: AlignmentKey::DayOfMonth(5),
                value_a: Some(10),
                value_b: Some(7),
            }]
        );

        let total_all = comparison_series(
            &executor,
            "H6",
            &jan,
            &feb,
            &FamilyFilter::from_label("All"),
            StatusPartition::Total,
            ComparisonMode::MoM,
        )
        .expect("total");
        assert_eq!(total_all.points[0].value_a, Some(114));
        assert_eq!(total_all.points[1].key, AlignmentKey::DayOfMonth(6));
        assert_eq!(total_all.points[1].value_a, None);
        assert_eq!(total_all.points[1].value_b, Some(2));

        let empty = comparison_series(
            &executor,
            "H9",
            &jan,
            &feb,
            &FamilyFilter::All,
            StatusPartition::Total,
            ComparisonMode::Normalized,
        );
        assert!(matches!(empty, Err(ReportError::NoComparisonData)));

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn family_filter_matches_regardless_of_case() {
        let db_path = seeded_store(
            "comparison_family_case",
            &[fact("H6 GT", "2024-01-05", Invoiced, 10)],
        );
        let executor = SqliteExecutor::new(&db_path, Duration::from_secs(1));
        let today = d(2026, 10, 19);
        let jan = resolve("Jan/24", today).expect("jan");
        let feb = resolve("Feb/24", today).expect("feb");

        let expected = vec![ComparisonPoint {
            key: AlignmentKey::DayOfMonth(5),
            value_a: Some(10),
            value_b: None,
        }];
        for label in ["H6 GT", "h6 gt", "H6 gt"] {
            let aligned = comparison_series(
                &executor,
                "H6",
                &jan,
                &feb,
                &FamilyFilter::from_label(label),
                StatusPartition::Total,
                ComparisonMode::MoM,
            )
            .unwrap_or_else(|e| panic!("{label}: {e}"));
            assert_eq!(aligned.points, expected, "{label}");
        }

        let _ = std::fs::remove_file(&db_path);
    }
}
