use chrono::{Local, NaiveDate};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;

use crate::aggregation::{Dimension, FamilyBreakdown, MetricBucket, StatusPartition};
use crate::comparison::{ComparisonMode, FamilyFilter};
use crate::config::ReportConfig;
use crate::fact_store::{import_fact_rows_at_db_path, FactRow};
use crate::format::{format_change, format_display_date, format_number, format_share};
use crate::kpi::KpiMetrics;
use crate::options::raw_vehicle;
use crate::period::Period;
use crate::query_executor::SqliteExecutor;
use crate::report::PocketReport;
use crate::session::{authenticate, RequestContext};

#[derive(Debug, Default, Deserialize)]
pub struct FamiliesQueryRequest {
    pub vehicle: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BreakdownQueryRequest {
    pub vehicle: Option<String>,
    pub month: Option<String>,
    pub status: Option<String>,
    pub families: Option<Vec<String>>,
    pub today: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct KpiQueryRequest {
    pub vehicle: Option<String>,
    pub month: Option<String>,
    pub today: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ComparisonQueryRequest {
    pub vehicle: Option<String>,
    pub month_a: Option<String>,
    pub month_b: Option<String>,
    pub family: Option<String>,
    pub status: Option<String>,
    pub mode: Option<String>,
    pub today: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DashboardQueryRequest {
    #[serde(alias = "report")]
    pub vehicle: Option<String>,
    pub month: Option<String>,
    pub today: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub today: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FactImportRequest {
    pub rows: Vec<FactRow>,
}

fn report_at_db_path(db_path: &Path) -> Result<PocketReport<SqliteExecutor>, String> {
    let config = ReportConfig::from_env().map_err(|e| e.to_string())?;
    Ok(PocketReport::open(ReportConfig {
        db_path: db_path.to_path_buf(),
        ..config
    }))
}

fn parse_iso_date(raw: &str, field_name: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| format!("{field_name} must be a YYYY-MM-DD date: {raw}"))
}

fn parse_today(raw: Option<&str>) -> Result<NaiveDate, String> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(text) => parse_iso_date(text, "today"),
        None => Ok(Local::now().date_naive()),
    }
}

fn required_vehicle(raw: Option<&str>) -> Result<String, String> {
    raw.map(raw_vehicle)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "vehicle is required".to_string())
}

fn parse_status(raw: Option<&str>) -> Result<StatusPartition, String> {
    let text = raw.unwrap_or("");
    StatusPartition::from_filter_label(text).ok_or_else(|| {
        format!("status must be one of Total, 9k form with payment, 9k form without payment: {text}")
    })
}

fn parse_mode(raw: Option<&str>) -> Result<ComparisonMode, String> {
    let text = raw.unwrap_or("");
    ComparisonMode::from_label(text)
        .ok_or_else(|| format!("mode must be MoM or Normalized: {text}"))
}

fn counted(value: i64) -> Value {
    json!({ "value": value, "display": format_number(value) })
}

fn period_json(period: &Period) -> Value {
    json!({
        "label": period.label,
        "start_of_month": period.start_of_month.format("%Y-%m-%d").to_string(),
        "is_current": period.is_current_reference_period,
        "cutoff_date": period.cutoff_date.map(|d| d.format("%Y-%m-%d").to_string()),
        "day_limit": period.day_limit,
    })
}

fn ranked_json(bucket: &MetricBucket<String>) -> Value {
    Value::Array(
        bucket
            .ranked()
            .into_iter()
            .map(|(key, total)| json!({ "key": key, "total": total }))
            .collect(),
    )
}

fn breakdown_json(breakdown: &FamilyBreakdown<String>) -> Value {
    let mut out = serde_json::Map::new();
    for (family, bucket) in breakdown.iter() {
        out.insert(family.clone(), ranked_json(bucket));
    }
    Value::Object(out)
}

fn daily_json(breakdown: &FamilyBreakdown<NaiveDate>) -> Value {
    let mut out = serde_json::Map::new();
    for (family, bucket) in breakdown.iter() {
        let days = bucket
            .iter()
            .map(|(day, total)| {
                json!({ "date": day.format("%Y-%m-%d").to_string(), "total": total })
            })
            .collect::<Vec<_>>();
        out.insert(family.clone(), Value::Array(days));
    }
    Value::Object(out)
}

fn kpi_json(kpi: &KpiMetrics) -> Value {
    let ratios = kpi.ratios();
    let weekday = kpi.weekday_comparison.map(|w| {
        json!({
            "today": format_display_date(w.today),
            "aligned_date": format_display_date(w.aligned_date),
            "today_value": w.today_value,
            "aligned_value": w.aligned_value,
            "difference": w.difference(),
        })
    });
    json!({
        "period": period_json(&kpi.period),
        "previous_period": period_json(&kpi.previous_period),
        "last_year_period": period_json(&kpi.last_year_period),
        "total": counted(kpi.total),
        "prev_total": counted(kpi.prev_total),
        "ly_total": counted(kpi.ly_total),
        "market_total": counted(kpi.market_total),
        "paid_curr": counted(kpi.paid_curr),
        "paid_prev": counted(kpi.paid_prev),
        "unpaid_curr": counted(kpi.unpaid_curr),
        "unpaid_prev": counted(kpi.unpaid_prev),
        "mom": format_change(ratios.mom, false),
        "yoy": format_change(ratios.yoy, false),
        "share": { "value": ratios.share, "display": format_share(ratios.share) },
        "paid_mom": format_change(ratios.paid_mom, false),
        "unpaid_mom": format_change(ratios.unpaid_mom, true),
        "weekday_comparison": weekday,
    })
}

pub fn report_options_at_db_path(db_path: &Path) -> Result<Value, String> {
    let report = report_at_db_path(db_path)?;
    let (month_a, month_b) = report.comparison_defaults();
    Ok(json!({
        "vehicles": report.vehicle_options(),
        "months": report.month_options(),
        "comparison_defaults": { "month_a": month_a, "month_b": month_b },
        "last_updated": report.last_updated_date().map(format_display_date),
    }))
}

pub fn families_query_at_db_path(
    db_path: &Path,
    req: FamiliesQueryRequest,
) -> Result<Value, String> {
    let vehicle = required_vehicle(req.vehicle.as_deref())?;
    let report = report_at_db_path(db_path)?;
    Ok(json!({
        "vehicle": vehicle,
        "families": report.families(&vehicle),
    }))
}

pub fn family_summary_query_at_db_path(
    db_path: &Path,
    req: BreakdownQueryRequest,
) -> Result<Value, String> {
    let vehicle = required_vehicle(req.vehicle.as_deref())?;
    let today = parse_today(req.today.as_deref())?;
    let report = report_at_db_path(db_path)?;
    let period = report.period(req.month.as_deref().unwrap_or(""), today);
    let families = req.families.unwrap_or_else(|| report.families(&vehicle));

    let summary = report.family_summary(&vehicle, &period, &families);
    let rows = families
        .iter()
        .map(|family| {
            let card = summary.get(family).copied().unwrap_or_default();
            json!({
                "family": family,
                "unpaid_total": counted(card.unpaid_total),
                "paid_total": counted(card.paid_total),
                "recent_total": counted(card.recent_total),
                "total": counted(card.total()),
            })
        })
        .collect::<Vec<_>>();

    Ok(json!({
        "vehicle": vehicle,
        "period": period_json(&period),
        "families": rows,
        "grand_total": counted(summary.grand_total()),
    }))
}

/// One grouped-sum dimension for every family of a vehicle.
pub fn breakdown_query_at_db_path(
    db_path: &Path,
    dimension: Dimension,
    req: BreakdownQueryRequest,
) -> Result<Value, String> {
    let vehicle = required_vehicle(req.vehicle.as_deref())?;
    let partition = parse_status(req.status.as_deref())?;
    let today = parse_today(req.today.as_deref())?;
    let report = report_at_db_path(db_path)?;
    let period = report.period(req.month.as_deref().unwrap_or(""), today);
    let families = req.families.unwrap_or_else(|| report.families(&vehicle));

    let data = match dimension {
        Dimension::Family => {
            ranked_json(&report.family_totals(&vehicle, &period, partition, &families))
        }
        Dimension::Color => breakdown_json(&report.colors(&vehicle, &period, partition, &families)),
        Dimension::Date => daily_json(&report.daily(&vehicle, &period, partition, &families)),
        Dimension::State => breakdown_json(&report.states(&vehicle, &period, partition, &families)),
        Dimension::DealerGroup => {
            breakdown_json(&report.dealer_groups(&vehicle, &period, partition, &families))
        }
    };

    Ok(json!({
        "vehicle": vehicle,
        "period": period_json(&period),
        "dimension": dimension,
        "status": partition.filter_label(),
        "data": data,
    }))
}

pub fn kpi_query_at_db_path(db_path: &Path, req: KpiQueryRequest) -> Result<Value, String> {
    let vehicle = required_vehicle(req.vehicle.as_deref())?;
    let today = parse_today(req.today.as_deref())?;
    let report = report_at_db_path(db_path)?;
    let period = report.period(req.month.as_deref().unwrap_or(""), today);
    let kpi = report.kpi_metrics(&vehicle, &period, today);
    let mut out = kpi_json(&kpi);
    out["vehicle"] = json!(vehicle);
    Ok(out)
}

pub fn comparison_query_at_db_path(
    db_path: &Path,
    req: ComparisonQueryRequest,
) -> Result<Value, String> {
    let vehicle = required_vehicle(req.vehicle.as_deref())?;
    let partition = parse_status(req.status.as_deref())?;
    let mode = parse_mode(req.mode.as_deref())?;
    let family = FamilyFilter::from_label(req.family.as_deref().unwrap_or(""));
    let today = parse_today(req.today.as_deref())?;
    let report = report_at_db_path(db_path)?;

    let (default_a, default_b) = report.comparison_defaults();
    let month_a = req.month_a.filter(|s| !s.trim().is_empty()).unwrap_or(default_a);
    let month_b = req.month_b.filter(|s| !s.trim().is_empty()).unwrap_or(default_b);
    let period_a = report.period(&month_a, today);
    let period_b = report.period(&month_b, today);

    let series = report
        .comparison_series(&vehicle, &period_a, &period_b, &family, partition, mode)
        .map_err(|e| e.to_string())?;

    Ok(json!({
        "vehicle": vehicle,
        "family": family.to_string(),
        "status": partition.filter_label(),
        "mode": mode,
        "axis_label": mode.axis_label(),
        "month_a": period_a.label,
        "month_b": period_b.label,
        "points": series.points,
    }))
}

pub fn dashboard_query_at_db_path(
    db_path: &Path,
    req: DashboardQueryRequest,
) -> Result<Value, String> {
    let today = parse_today(req.today.as_deref())?;
    let report = report_at_db_path(db_path)?;
    let report_option = match req.vehicle.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(option) => option.to_string(),
        None => report
            .vehicle_options()
            .into_iter()
            .next()
            .ok_or_else(|| "vehicle is required".to_string())?,
    };
    let context = RequestContext::anonymous(today);
    let dashboard = report.dashboard(&context, &report_option, req.month.as_deref().unwrap_or(""));

    Ok(json!({
        "request_id": dashboard.request_id,
        "vehicle": dashboard.vehicle,
        "report": dashboard.report_option,
        "period": period_json(&dashboard.period),
        "last_updated": dashboard.last_updated.map(format_display_date),
        "families": dashboard.families,
        "summary": dashboard.summary,
        "grand_total": counted(dashboard.grand_total),
        "kpi": kpi_json(&dashboard.kpi),
        "colors": breakdown_json(&dashboard.colors),
        "daily": daily_json(&dashboard.daily),
        "states": breakdown_json(&dashboard.states),
        "dealer_groups": breakdown_json(&dashboard.dealer_groups),
    }))
}

pub fn login_with_config(config: &ReportConfig, req: LoginRequest) -> Result<Value, String> {
    let today = parse_today(req.today.as_deref())?;
    let username = req
        .username
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| "username is required".to_string())?;
    let context = authenticate(
        config,
        &username,
        req.password.as_deref().unwrap_or(""),
        today,
    )
    .map_err(|e| e.to_string())?;
    Ok(json!({
        "request_id": context.request_id.to_string(),
        "username": context.username,
        "today": context.today.format("%Y-%m-%d").to_string(),
    }))
}

pub fn login_request(req: LoginRequest) -> Result<Value, String> {
    let config = ReportConfig::from_env().map_err(|e| e.to_string())?;
    login_with_config(&config, req)
}

pub fn fact_import_at_db_path(db_path: &Path, req: FactImportRequest) -> Result<Value, String> {
    let result = import_fact_rows_at_db_path(db_path, &req.rows)?;
    serde_json::to_value(result).map_err(|e| format!("serialize import result failed: {e}"))
}
