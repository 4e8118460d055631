use std::path::Path;

use anyhow::{Context, anyhow};
use duckdb::Connection;
use serde::Serialize;

/// One emergency facility row from the Parquet cache. Loaded once at startup
/// and treated as read-only for the lifetime of the process; per-request
/// derived fields live in `rank::RankedFacility`.
#[derive(Debug, Clone, Serialize)]
pub struct FacilityRecord {
    pub hospital_name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub avg_ed_minutes: Option<f64>,
    pub patient_rating: Option<f64>,
    pub mortality_text: Option<String>,
    pub total_quality_points: Option<f64>,
    pub adj_total_heartattack: Option<f64>,
    pub adj_total_stroke: Option<f64>,
    pub adj_total_pneu: Option<f64>,
}

/// Load the facility table from the Parquet cache. Rows still missing
/// coordinates after the build step are dropped here, so every record
/// handed to the ranking engine has a usable lat/lon.
pub fn load_facilities(parquet_path: &Path) -> anyhow::Result<Vec<FacilityRecord>> {
    let conn = Connection::open_in_memory().context("open in-memory duckdb")?;

    let quoted = sql_quote_path(parquet_path);
    let sql = format!(
        r#"
        SELECT
          hospital_name,
          address,
          city,
          state,
          zip,
          lat,
          lon,
          avg_ed_minutes,
          patient_rating,
          mortality_text,
          total_quality_points,
          adj_total_heartattack,
          adj_total_stroke,
          adj_total_pneu
        FROM read_parquet('{quoted}')
    "#
    );

    let mut stmt = stmt_for(&conn, &sql, parquet_path)?;
    let rows = stmt.query_map([], |row| {
        Ok(RawRow {
            hospital_name: row.get(0)?,
            address: row.get(1)?,
            city: row.get(2)?,
            state: row.get(3)?,
            zip: row.get(4)?,
            lat: row.get(5)?,
            lon: row.get(6)?,
            avg_ed_minutes: row.get(7)?,
            patient_rating: row.get(8)?,
            mortality_text: row.get(9)?,
            total_quality_points: row.get(10)?,
            adj_total_heartattack: row.get(11)?,
            adj_total_stroke: row.get(12)?,
            adj_total_pneu: row.get(13)?,
        })
    })?;

    let mut out = Vec::new();
    let mut dropped = 0usize;
    for r in rows {
        let r = r?;
        let (Some(lat), Some(lon)) = (r.lat, r.lon) else {
            dropped += 1;
            continue;
        };
        out.push(FacilityRecord {
            hospital_name: r.hospital_name.unwrap_or_default(),
            address: r.address,
            city: r.city,
            state: r.state,
            zip: r.zip,
            lat,
            lon,
            avg_ed_minutes: r.avg_ed_minutes,
            patient_rating: r.patient_rating,
            mortality_text: r.mortality_text,
            total_quality_points: r.total_quality_points,
            adj_total_heartattack: r.adj_total_heartattack,
            adj_total_stroke: r.adj_total_stroke,
            adj_total_pneu: r.adj_total_pneu,
        });
    }

    if dropped > 0 {
        tracing::warn!("Dropped {} facility rows without coordinates", dropped);
    }
    if out.is_empty() {
        return Err(anyhow!(
            "Facility cache at {} contains no usable rows",
            parquet_path.display()
        ));
    }
    Ok(out)
}

struct RawRow {
    hospital_name: Option<String>,
    address: Option<String>,
    city: Option<String>,
    state: Option<String>,
    zip: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    avg_ed_minutes: Option<f64>,
    patient_rating: Option<f64>,
    mortality_text: Option<String>,
    total_quality_points: Option<f64>,
    adj_total_heartattack: Option<f64>,
    adj_total_stroke: Option<f64>,
    adj_total_pneu: Option<f64>,
}

fn stmt_for<'a>(
    conn: &'a Connection,
    sql: &str,
    parquet_path: &Path,
) -> anyhow::Result<duckdb::Statement<'a>> {
    conn.prepare(sql)
        .with_context(|| format!("read facility cache at {}", parquet_path.display()))
}

fn sql_quote_path(path: &Path) -> String {
    // DuckDB expects single-quoted string literals; escape embedded single quotes.
    path.display().to_string().replace('\'', "''")
}
