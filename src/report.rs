use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, warn};

use crate::aggregation::{
    aggregate_colors, aggregate_daily, aggregate_dealer_groups, aggregate_family_totals,
    aggregate_states, family_summary, FamilyBreakdown, FamilySummaryTable, MetricBucket,
    StatusPartition, WindowRule,
};
use crate::comparison::{align, daily_series, ComparisonMode, ComparisonSeries, FamilyFilter};
use crate::config::ReportConfig;
use crate::error::ReportResult;
use crate::kpi::{kpi_metrics, KpiMetrics, KpiRatios};
use crate::options;
use crate::period::{resolve_or_default, Period};
use crate::query_executor::{CachedExecutor, QueryExecutor, SqliteExecutor};
use crate::session::RequestContext;

/// Presentation-facing calls over one cached executor. Every call isolates
/// its own failure: the error is logged and a safe default returned, so a
/// broken dimension never takes its siblings down with it.
pub struct PocketReport<E> {
    config: ReportConfig,
    executor: CachedExecutor<E>,
}

impl PocketReport<SqliteExecutor> {
    pub fn open(config: ReportConfig) -> Self {
        let executor = SqliteExecutor::from_config(&config);
        Self::new(config, executor)
    }
}

fn isolate<T>(
    operation: &'static str,
    vehicle: &str,
    result: ReportResult<T>,
    fallback: impl FnOnce() -> T,
) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!(operation, vehicle, error = %err, "degraded to default");
            fallback()
        }
    }
}

/// Everything the dashboard page renders for one (vehicle, month) choice.
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub request_id: String,
    pub vehicle: String,
    pub report_option: String,
    pub period: Period,
    pub last_updated: Option<NaiveDate>,
    pub families: Vec<String>,
    pub summary: FamilySummaryTable,
    pub grand_total: i64,
    pub kpi: KpiMetrics,
    pub kpi_ratios: KpiRatios,
    pub colors: FamilyBreakdown<String>,
    pub daily: FamilyBreakdown<NaiveDate>,
    pub states: FamilyBreakdown<String>,
    pub dealer_groups: FamilyBreakdown<String>,
}

impl<E: QueryExecutor> PocketReport<E> {
    pub fn new(config: ReportConfig, executor: E) -> Self {
        let executor = CachedExecutor::new(executor, config.cache_ttl());
        PocketReport { config, executor }
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    pub fn executor(&self) -> &CachedExecutor<E> {
        &self.executor
    }

    /// Falls back to the configured default label when `label` is
    /// unparsable.
    pub fn period(&self, label: &str, today: NaiveDate) -> Period {
        resolve_or_default(label, today, &self.config.default_period_label)
    }

    pub fn vehicle_options(&self) -> Vec<String> {
        let found = isolate(
            "vehicle_options",
            "",
            options::vehicle_options(&self.executor),
            Vec::new,
        );
        if found.is_empty() {
            debug!("using fallback vehicle options");
            return self.config.fallback_vehicles.clone();
        }
        found
    }

    pub fn month_options(&self) -> Vec<String> {
        let found = isolate(
            "month_options",
            "",
            options::month_options(&self.executor),
            Vec::new,
        );
        if found.is_empty() {
            debug!("using fallback month options");
            return self.config.fallback_months.clone();
        }
        found
    }

    pub fn families(&self, vehicle: &str) -> Vec<String> {
        let found = isolate(
            "families",
            vehicle,
            options::vehicle_families(&self.executor, vehicle),
            Vec::new,
        );
        if found.is_empty() {
            return self.config.fallback_families_for(vehicle);
        }
        found
    }

    pub fn last_updated_date(&self) -> Option<NaiveDate> {
        isolate(
            "last_updated_date",
            "",
            options::last_updated_date(&self.executor, self.config.last_updated_ttl()),
            || None,
        )
    }

    /// Month A is the newest month option, Month B the one before it.
    pub fn comparison_defaults(&self) -> (String, String) {
        let months = self.month_options();
        let first = months
            .first()
            .cloned()
            .unwrap_or_else(|| self.config.default_period_label.clone());
        let second = months.get(1).cloned().unwrap_or_else(|| first.clone());
        (first, second)
    }

    pub fn family_totals(
        &self,
        vehicle: &str,
        period: &Period,
        partition: StatusPartition,
        families: &[String],
    ) -> MetricBucket<String> {
        isolate(
            "family_totals",
            vehicle,
            aggregate_family_totals(
                &self.executor,
                vehicle,
                period,
                partition,
                WindowRule::Uniform,
                families,
            ),
            || MetricBucket::seeded(families.iter().cloned()),
        )
    }

    pub fn family_summary(
        &self,
        vehicle: &str,
        period: &Period,
        families: &[String],
    ) -> FamilySummaryTable {
        isolate(
            "family_summary",
            vehicle,
            family_summary(&self.executor, vehicle, period, families),
            || FamilySummaryTable::seeded(families),
        )
    }

    pub fn colors(
        &self,
        vehicle: &str,
        period: &Period,
        partition: StatusPartition,
        families: &[String],
    ) -> FamilyBreakdown<String> {
        isolate(
            "colors",
            vehicle,
            aggregate_colors(&self.executor, vehicle, period, partition, families),
            || FamilyBreakdown::seeded(families),
        )
    }

    pub fn daily(
        &self,
        vehicle: &str,
        period: &Period,
        partition: StatusPartition,
        families: &[String],
    ) -> FamilyBreakdown<NaiveDate> {
        isolate(
            "daily",
            vehicle,
            aggregate_daily(&self.executor, vehicle, period, partition, families),
            || FamilyBreakdown::seeded(families),
        )
    }

    pub fn states(
        &self,
        vehicle: &str,
        period: &Period,
        partition: StatusPartition,
        families: &[String],
    ) -> FamilyBreakdown<String> {
        isolate(
            "states",
            vehicle,
            aggregate_states(&self.executor, vehicle, period, partition, families),
            || FamilyBreakdown::seeded(families),
        )
    }

    pub fn dealer_groups(
        &self,
        vehicle: &str,
        period: &Period,
        partition: StatusPartition,
        families: &[String],
    ) -> FamilyBreakdown<String> {
        isolate(
            "dealer_groups",
            vehicle,
            aggregate_dealer_groups(&self.executor, vehicle, period, partition, families),
            || FamilyBreakdown::seeded(families),
        )
    }

    pub fn kpi_metrics(&self, vehicle: &str, period: &Period, today: NaiveDate) -> KpiMetrics {
        isolate(
            "kpi_metrics",
            vehicle,
            kpi_metrics(&self.executor, vehicle, period, today),
            || KpiMetrics::empty(period.clone(), today),
        )
    }

    /// A month that fails to load counts as empty; only when neither month
    /// has data is `NoComparisonData` returned.
    pub fn comparison_series(
        &self,
        vehicle: &str,
        period_a: &Period,
        period_b: &Period,
        family: &FamilyFilter,
        partition: StatusPartition,
        mode: ComparisonMode,
    ) -> ReportResult<ComparisonSeries> {
        let fetch = |period: &Period| {
            isolate(
                "comparison_series",
                vehicle,
                daily_series(&self.executor, vehicle, period, family, partition),
                MetricBucket::new,
            )
        };
        align(&fetch(period_a), &fetch(period_b), mode)
    }

    pub fn dashboard(
        &self,
        context: &RequestContext,
        report_option: &str,
        month_label: &str,
    ) -> Dashboard {
        let vehicle = options::raw_vehicle(report_option);
        let period = self.period(month_label, context.today);
        let families = self.families(&vehicle);
        let partition = StatusPartition::Total;

        debug!(
            request_id = %context.request_id,
            vehicle = %vehicle,
            period = %period.label,
            families = families.len(),
            "building dashboard"
        );

        let summary = self.family_summary(&vehicle, &period, &families);
        let kpi = self.kpi_metrics(&vehicle, &period, context.today);
        Dashboard {
            request_id: context.request_id.to_string(),
            report_option: options::report_option(&vehicle),
            last_updated: self.last_updated_date(),
            grand_total: summary.grand_total(),
            kpi_ratios: kpi.ratios(),
            colors: self.colors(&vehicle, &period, partition, &families),
            daily: self.daily(&vehicle, &period, partition, &families),
            states: self.states(&vehicle, &period, partition, &families),
            dealer_groups: self.dealer_groups(&vehicle, &period, partition, &families),
            summary,
            kpi,
            families,
            period,
            vehicle,
        }
    }
}
