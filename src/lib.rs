pub mod aggregation;
pub mod comparison;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod fact_store;
pub mod format;
pub mod kpi;
pub mod options;
pub mod period;
pub mod query_executor;
pub mod report;
pub mod session;

pub use aggregation::{
    Dimension, FamilyBreakdown, FamilySummary, FamilySummaryTable, MetricBucket, StatusPartition,
    WindowRule,
};
pub use comparison::{
    AlignmentKey, ComparisonMode, ComparisonPoint, ComparisonSeries, FamilyFilter,
};
pub use config::ReportConfig;
pub use endpoints::{
    breakdown_query_at_db_path, comparison_query_at_db_path, dashboard_query_at_db_path,
    fact_import_at_db_path, families_query_at_db_path, family_summary_query_at_db_path,
    kpi_query_at_db_path, login_request, login_with_config, report_options_at_db_path,
    BreakdownQueryRequest, ComparisonQueryRequest, DashboardQueryRequest, FactImportRequest,
    FamiliesQueryRequest, KpiQueryRequest, LoginRequest,
};
pub use error::{ExecutorError, ReportError, ReportResult};
pub use fact_store::{FactRow, OrderStatus};
pub use kpi::{KpiMetrics, KpiRatios, WeekdayComparison};
pub use period::{resolve, NthWeekday, Period};
pub use query_executor::{
    CachedExecutor, QueryExecutor, QueryParams, SqlParam, SqlValue, SqliteExecutor,
};
pub use report::{Dashboard, PocketReport};
pub use session::{authenticate, RequestContext};
