use pocket_report::{
    breakdown_query_at_db_path, comparison_query_at_db_path, dashboard_query_at_db_path,
    fact_import_at_db_path, families_query_at_db_path, family_summary_query_at_db_path,
    kpi_query_at_db_path, login_request, report_options_at_db_path, BreakdownQueryRequest,
    ComparisonQueryRequest, DashboardQueryRequest, Dimension, FactImportRequest,
    FamiliesQueryRequest, KpiQueryRequest, LoginRequest,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::env;
use std::io::{self, Read};
use std::path::Path;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct AdapterRequest {
    schema_version: u64,
    case: Option<AdapterCaseMeta>,
    endpoint: AdapterEndpoint,
    #[serde(default)]
    query: Value,
    #[serde(default)]
    dataset: AdapterDataset,
}

#[derive(Debug, Deserialize)]
struct AdapterCaseMeta {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdapterEndpoint {
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AdapterDataset {
    db_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct AdapterErrorBody {
    category: String,
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status")]
enum AdapterResponse {
    #[serde(rename = "success")]
    Success { payload: Value },
    #[serde(rename = "error")]
    Error { error: AdapterErrorBody },
}

fn classify_error_message(message: &str) -> String {
    let validation_keywords = ["is required", "must be", "missing field"];
    if validation_keywords.iter().any(|k| message.contains(k)) {
        return "VALIDATION_ERROR".to_string();
    }
    if message.starts_with("invalid username or password") {
        return "AUTH_ERROR".to_string();
    }
    if message.starts_with("no comparison data") {
        return "NO_DATA_ERROR".to_string();
    }
    if message.starts_with("config error") {
        return "CONFIG_ERROR".to_string();
    }
    "UNKNOWN_ERROR".to_string()
}

fn error_response(
    category: impl Into<String>,
    message: impl Into<String>,
    error_type: impl Into<String>,
) -> AdapterResponse {
    AdapterResponse::Error {
        error: AdapterErrorBody {
            category: category.into(),
            message: message.into(),
            error_type: error_type.into(),
        },
    }
}

fn parse_bool_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|arg| arg == flag)
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose {
        "pocket_report=debug,pocket_report_adapter=debug"
    } else {
        "pocket_report=info,pocket_report_adapter=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn read_stdin_json() -> Result<Value, String> {
    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .map_err(|e| format!("failed to read stdin: {e}"))?;
    if raw.trim().is_empty() {
        return Err("empty stdin request".to_string());
    }
    serde_json::from_str::<Value>(&raw).map_err(|e| format!("invalid JSON request: {e}"))
}

fn parse_query<T: DeserializeOwned>(query: Value, endpoint: &str) -> Result<T, String> {
    let query = if query.is_null() { json!({}) } else { query };
    serde_json::from_value(query).map_err(|e| format!("request.query invalid for {endpoint}: {e}"))
}

fn breakdown(
    db_path: &Path,
    dimension: Dimension,
    query: Value,
    endpoint: &str,
) -> Result<Value, String> {
    let query_req: BreakdownQueryRequest = parse_query(query, endpoint)?;
    breakdown_query_at_db_path(db_path, dimension, query_req)
}

fn dispatch(req: AdapterRequest) -> Result<Value, String> {
    if req.schema_version != 1 {
        return Err(format!(
            "unsupported schema_version: {}",
            req.schema_version
        ));
    }

    let path = req
        .endpoint
        .path
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "request.endpoint.path missing".to_string())?;

    if path == "/api/session/login" {
        return login_request(parse_query::<LoginRequest>(req.query, "login")?);
    }

    let db_path = req
        .dataset
        .db_path
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "request.dataset.db_path missing".to_string())?;
    let db_path = Path::new(db_path);

    match path {
        "/api/report/options" => report_options_at_db_path(db_path),
        "/api/report/families" => families_query_at_db_path(
            db_path,
            parse_query::<FamiliesQueryRequest>(req.query, "families")?,
        ),
        "/api/report/summary" => family_summary_query_at_db_path(
            db_path,
            parse_query::<BreakdownQueryRequest>(req.query, "summary")?,
        ),
        "/api/report/family-totals" => {
            breakdown(db_path, Dimension::Family, req.query, "family-totals")
        }
        "/api/report/colors" => breakdown(db_path, Dimension::Color, req.query, "colors"),
        "/api/report/daily" => breakdown(db_path, Dimension::Date, req.query, "daily"),
        "/api/report/states" => breakdown(db_path, Dimension::State, req.query, "states"),
        "/api/report/dealer-groups" => {
            breakdown(db_path, Dimension::DealerGroup, req.query, "dealer-groups")
        }
        "/api/report/kpi" => {
            kpi_query_at_db_path(db_path, parse_query::<KpiQueryRequest>(req.query, "kpi")?)
        }
        "/api/report/comparison" => comparison_query_at_db_path(
            db_path,
            parse_query::<ComparisonQueryRequest>(req.query, "comparison")?,
        ),
        "/api/report/dashboard" => dashboard_query_at_db_path(
            db_path,
            parse_query::<DashboardQueryRequest>(req.query, "dashboard")?,
        ),
        "/api/facts/import" => fact_import_at_db_path(
            db_path,
            parse_query::<FactImportRequest>(req.query, "facts-import")?,
        ),
        _ => Err(format!("unsupported endpoint path: {path}")),
    }
}

fn main() {
    let args = env::args().skip(1).collect::<Vec<_>>();
    let pretty = parse_bool_flag(&args, "--pretty");
    let verbose = parse_bool_flag(&args, "--verbose");
    init_tracing(verbose);

    let resp = match read_stdin_json()
        .and_then(|v| {
            serde_json::from_value::<AdapterRequest>(v)
                .map_err(|e| format!("request root invalid: {e}"))
        })
        .and_then(|req| {
            let case_id = req.case.as_ref().and_then(|c| c.id.as_deref()).unwrap_or("-");
            info!(
                case = case_id,
                endpoint = req.endpoint.path.as_deref().unwrap_or("-"),
                db = req.dataset.db_path.as_deref().unwrap_or("-"),
                "dispatching request"
            );
            dispatch(req)
        }) {
        Ok(payload) => AdapterResponse::Success { payload },
        Err(message) => {
            debug!(%message, "request failed");
            let category = if message.starts_with("unsupported endpoint path:") {
                "UNSUPPORTED_ENDPOINT".to_string()
            } else if message.starts_with("unsupported schema_version:")
                || message.starts_with("request.")
                || message.starts_with("invalid JSON request:")
                || message == "empty stdin request"
            {
                "ADAPTER_PROTOCOL_ERROR".to_string()
            } else {
                classify_error_message(&message)
            };
            error_response(category, message, "AdapterError")
        }
    };

    let out = if pretty {
        serde_json::to_string_pretty(&resp)
    } else {
        serde_json::to_string(&resp)
    }
    .unwrap_or_else(|e| {
        json!({
            "status": "error",
            "error": {
                "category": "ADAPTER_PROTOCOL_ERROR",
                "message": format!("serialize response failed: {e}"),
                "type": "SerializeError",
            }
        })
        .to_string()
    });

    print!("{out}");
}
