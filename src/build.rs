use std::path::Path;

use anyhow::{Context, anyhow};
use duckdb::{Connection, params};
use serde::Serialize;

use crate::cli::BuildArgs;
use crate::download;
use crate::geo;
use crate::storage::{StoragePaths, file_present_nonempty};

#[derive(Debug, Serialize)]
struct BuildMeta {
    built_at_utc: String,
    source_csv: String,
    cache_parquet: String,
    facility_count: u64,
    facilities_with_coords: u64,
}

pub async fn run(opts: BuildArgs) -> anyhow::Result<()> {
    tracing::info!("hospitrack build");
    tracing::info!("data_dir={}", opts.data_dir);
    if opts.offline {
        tracing::info!("offline=true (will not download missing inputs)");
    }
    if opts.force_download {
        tracing::info!("force_download=true (will re-download inputs)");
    }
    if opts.rebuild {
        tracing::info!("rebuild=true (will rebuild the Parquet cache)");
    }

    let paths = StoragePaths::new(&opts.data_dir);
    paths
        .ensure_dirs()
        .context("create backend data directories")?;

    if !opts.rebuild && file_present_nonempty(&paths.cache_parquet) {
        tracing::info!(
            "Facility cache already exists at {}; pass --rebuild to regenerate",
            paths.cache_parquet.display()
        );
        return Ok(());
    }

    tracing::info!("Step 1/4: ensure inputs (ER CSV + zip centroids)");
    let t0 = std::time::Instant::now();
    let (source_csv, geonames_txt) = download::ensure_inputs(&paths, &opts).await?;
    tracing::info!(
        "Inputs ready in {:.1}s: csv={} zip_centroids={}",
        t0.elapsed().as_secs_f64(),
        source_csv.display(),
        geonames_txt.display()
    );

    tracing::info!("Step 2/4: open DuckDB + load zip centroids");
    let mut conn = Connection::open_in_memory().context("open duckdb")?;
    let _ = conn.execute("PRAGMA threads=4", []);

    create_er_view(&mut conn, &source_csv).context("create ER csv view")?;
    build_zip_centroids(&mut conn, &geonames_txt).context("build zip_centroids")?;

    tracing::info!("Step 3/4: build the facilities table");
    build_facilities(&mut conn).context("build facilities")?;

    let facility_count = one_u64(&mut conn, "SELECT COUNT(*) FROM facilities")?;
    let with_coords = one_u64(
        &mut conn,
        "SELECT COUNT(*) FROM facilities WHERE lat IS NOT NULL AND lon IS NOT NULL",
    )?;
    if with_coords == 0 {
        return Err(anyhow!(
            "No facility rows have coordinates; check the source CSV and ZIP centroid inputs"
        ));
    }
    tracing::info!(
        "facilities: {} rows ({} with coordinates)",
        facility_count,
        with_coords
    );

    tracing::info!("Step 4/4: write Parquet cache");
    write_parquet_cache(&mut conn, &paths.cache_parquet).context("write parquet cache")?;

    let meta = BuildMeta {
        built_at_utc: now_utc_rfc3339(),
        source_csv: source_csv.display().to_string(),
        cache_parquet: paths.cache_parquet.display().to_string(),
        facility_count,
        facilities_with_coords: with_coords,
    };
    write_json(&paths.meta_path, &meta).context("write meta.json")?;

    tracing::info!("Build complete.");
    tracing::info!("Cache: {}", paths.cache_parquet.display());
    Ok(())
}

fn create_er_view(conn: &mut Connection, csv: &Path) -> anyhow::Result<()> {
    let csv = sql_quote_path(csv);
    conn.execute(
        &format!(
            "CREATE OR REPLACE VIEW er_raw AS \
             SELECT * FROM read_csv('{csv}', header = true, all_varchar = true)"
        ),
        [],
    )?;
    Ok(())
}

fn build_zip_centroids(conn: &mut Connection, geonames_txt: &Path) -> anyhow::Result<()> {
    tracing::info!("Building zip_centroids from {}...", geonames_txt.display());
    conn.execute("DROP TABLE IF EXISTS zip_centroids", [])?;
    conn.execute(
        "CREATE TABLE zip_centroids (zip5 TEXT PRIMARY KEY, lat DOUBLE, lon DOUBLE)",
        [],
    )?;

    let centroids = geo::parse_geonames_us_txt(geonames_txt)?;

    let tx = conn.transaction().context("begin tx")?;
    {
        let mut stmt = tx
            .prepare("INSERT OR REPLACE INTO zip_centroids (zip5, lat, lon) VALUES (?, ?, ?)")
            .context("prepare insert zip_centroids")?;
        for c in centroids {
            stmt.execute(params![c.zip5, c.lat, c.lon])?;
        }
    }
    tx.commit().context("commit zip_centroids")?;
    Ok(())
}

/// Trim the raw CSV down to the API schema: repeated header rows removed,
/// numerics downcast with TRY_CAST, zero ED minutes treated as unknown, and
/// missing coordinates backfilled from the ZIP centroid table.
fn build_facilities(conn: &mut Connection) -> anyhow::Result<()> {
    conn.execute("DROP TABLE IF EXISTS facilities", [])?;

    let has_latlon = has_column(conn, "er_raw", "lat") && has_column(conn, "er_raw", "lon");
    let (lat_expr, lon_expr) = if has_latlon {
        ("TRY_CAST(er.lat AS DOUBLE)", "TRY_CAST(er.lon AS DOUBLE)")
    } else {
        ("NULL", "NULL")
    };

    let sql = format!(
        r#"
        CREATE TABLE facilities AS
        WITH cleaned AS (
          SELECT
            TRIM(hospital_name) AS hospital_name,
            NULLIF(TRIM(detail_address), '') AS address,
            NULLIF(TRIM(detail_city), '') AS city,
            NULLIF(UPPER(TRIM(detail_state)), '') AS state,
            NULLIF(regexp_extract(TRIM(detail_zip), '\d{{5}}'), '') AS zip,
            {lat_expr} AS lat,
            {lon_expr} AS lon,
            NULLIF(TRY_CAST(detail_avg_time_in_ed_minutes AS DOUBLE), 0) AS avg_ed_minutes,
            TRY_CAST(detail_overall_patient_rating AS DOUBLE) AS patient_rating,
            NULLIF(TRIM(detail_mortality_overall_text), '') AS mortality_text,
            TRY_CAST(total_quality_points AS DOUBLE) AS total_quality_points,
            TRY_CAST(adj_total_heartattack AS DOUBLE) AS adj_total_heartattack,
            TRY_CAST(adj_total_stroke AS DOUBLE) AS adj_total_stroke,
            TRY_CAST(adj_total_pneu AS DOUBLE) AS adj_total_pneu
          FROM er_raw er
          WHERE hospital_name IS NOT NULL
            AND TRIM(hospital_name) <> ''
            AND TRIM(hospital_name) <> 'hospital_name'
        )
        SELECT
          cleaned.hospital_name,
          cleaned.address,
          cleaned.city,
          cleaned.state,
          cleaned.zip,
          COALESCE(cleaned.lat, z.lat) AS lat,
          COALESCE(cleaned.lon, z.lon) AS lon,
          cleaned.avg_ed_minutes,
          cleaned.patient_rating,
          cleaned.mortality_text,
          cleaned.total_quality_points,
          cleaned.adj_total_heartattack,
          cleaned.adj_total_stroke,
          cleaned.adj_total_pneu
        FROM cleaned
        LEFT JOIN zip_centroids z ON z.zip5 = cleaned.zip
    "#
    );
    conn.execute(&sql, [])?;
    Ok(())
}

fn write_parquet_cache(conn: &mut Connection, dest: &Path) -> anyhow::Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dest = sql_quote_path(dest);
    conn.execute(
        &format!("COPY facilities TO '{dest}' (FORMAT PARQUET, COMPRESSION ZSTD)"),
        [],
    )?;
    Ok(())
}

fn has_column(conn: &Connection, view: &str, col: &str) -> bool {
    conn.prepare(&format!("SELECT {col} FROM {view} LIMIT 1"))
        .is_ok()
}

fn one_u64(conn: &mut Connection, sql: &str) -> anyhow::Result<u64> {
    let mut stmt = conn.prepare(sql)?;
    let v: i64 = stmt.query_row([], |row| row.get(0))?;
    Ok(v.max(0) as u64)
}

fn write_json(path: &Path, v: &impl Serialize) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let s = serde_json::to_string_pretty(v)?;
    std::fs::write(path, s)?;
    Ok(())
}

fn now_utc_rfc3339() -> String {
    // Avoid extra chrono/time dependency; use a simple ISO-like timestamp.
    let now = std::time::SystemTime::now();
    let dur = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}s_since_epoch", dur.as_secs())
}

fn sql_quote_path(path: &Path) -> String {
    // DuckDB expects single-quoted string literals; escape embedded single quotes.
    path.display().to_string().replace('\'', "''")
}
