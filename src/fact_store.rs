use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tracing::info;

pub const FACT_TABLE: &str = "pocket_report_facts";

const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_pocket_report_facts.sql",
    include_str!("../migrations/0001_pocket_report_facts.sql"),
)];

/// Funnel status of a fact row as written by the upstream batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    #[serde(rename = "Invoiced")]
    Invoiced,
    #[serde(rename = "Not Invoiced")]
    NotInvoiced,
    #[serde(rename = "Open")]
    Open,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 3] = [
        OrderStatus::Invoiced,
        OrderStatus::NotInvoiced,
        OrderStatus::Open,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Invoiced => "Invoiced",
            OrderStatus::NotInvoiced => "Not Invoiced",
            OrderStatus::Open => "Open",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable row of the pocket-report fact table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactRow {
    pub vehicle: String,
    pub family: String,
    pub date: NaiveDate,
    pub status: OrderStatus,
    #[serde(default)]
    pub exterior_color: Option<String>,
    #[serde(default)]
    pub dealer_state: Option<String>,
    #[serde(default)]
    pub dealer_group: Option<String>,
    pub order_count: i64,
}

#[derive(Debug, Serialize)]
pub struct FactStoreMigrateResult {
    pub db_path: String,
    pub created: bool,
    pub applied_now: Vec<String>,
    pub skipped: Vec<String>,
    pub applied_total: usize,
}

#[derive(Debug, Serialize)]
pub struct FactImportResult {
    pub db_path: String,
    pub imported_count: usize,
    pub migrate_result: FactStoreMigrateResult,
}

fn ensure_schema_migrations_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )
}

fn load_applied_versions(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version ASC")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut versions = Vec::new();
    for row in rows {
        versions.push(row?);
    }
    Ok(versions)
}

/// Applies the embedded migrations that are not yet recorded.
pub fn ensure_schema(conn: &mut Connection) -> rusqlite::Result<(Vec<String>, Vec<String>)> {
    ensure_schema_migrations_table(conn)?;
    let already = load_applied_versions(conn)?
        .into_iter()
        .collect::<HashSet<_>>();

    let mut applied_now = Vec::new();
    let mut skipped = Vec::new();
    for (version, sql) in MIGRATIONS {
        if already.contains(*version) {
            skipped.push((*version).to_string());
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_migrations(version) VALUES (?1)",
            [*version],
        )?;
        tx.commit()?;
        applied_now.push((*version).to_string());
    }
    Ok((applied_now, skipped))
}

pub fn apply_embedded_migrations(db_path: &Path) -> Result<FactStoreMigrateResult, String> {
    let created = !db_path.exists();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| format!("failed to create store dir: {e}"))?;
        }
    }

    let mut conn = Connection::open(db_path).map_err(|e| format!("failed to open store: {e}"))?;
    let (applied_now, skipped) =
        ensure_schema(&mut conn).map_err(|e| format!("failed to apply migrations: {e}"))?;
    let applied_total = load_applied_versions(&conn)
        .map_err(|e| format!("failed to read applied migrations: {e}"))?
        .len();

    if !applied_now.is_empty() {
        info!(db_path = %db_path.to_string_lossy(), applied = ?applied_now, "fact store migrated");
    }

    Ok(FactStoreMigrateResult {
        db_path: db_path.to_string_lossy().to_string(),
        created,
        applied_now,
        skipped,
        applied_total,
    })
}

/// Inserts rows in a single transaction. Blank optional attributes are
/// stored as NULL.
pub fn insert_fact_rows(conn: &mut Connection, rows: &[FactRow]) -> rusqlite::Result<usize> {
    fn blank_to_null(value: &Option<String>) -> Option<&str> {
        value.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            r#"
            INSERT INTO pocket_report_facts(
                vehicle, vehicle_family, order_date, status,
                exterior_color, dealer_state, dealer_group_name, orders
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )?;
        for row in rows {
            stmt.execute(params![
                row.vehicle,
                row.family,
                row.date.format("%Y-%m-%d").to_string(),
                row.status.as_str(),
                blank_to_null(&row.exterior_color),
                blank_to_null(&row.dealer_state),
                blank_to_null(&row.dealer_group),
                row.order_count,
            ])?;
        }
    }
    tx.commit()?;
    Ok(rows.len())
}

pub fn import_fact_rows_at_db_path(
    db_path: &Path,
    rows: &[FactRow],
) -> Result<FactImportResult, String> {
    let migrate_result = apply_embedded_migrations(db_path)?;
    let mut conn = Connection::open(db_path).map_err(|e| format!("failed to open store: {e}"))?;
    let imported_count =
        insert_fact_rows(&mut conn, rows).map_err(|e| format!("failed to insert fact rows: {e}"))?;
    info!(db_path = %db_path.to_string_lossy(), imported_count, "fact rows imported");

    Ok(FactImportResult {
        db_path: db_path.to_string_lossy().to_string(),
        imported_count,
        migrate_result,
    })
}
