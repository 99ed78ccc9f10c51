use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::report::{round2, Report};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS runs (
            id               INTEGER PRIMARY KEY,
            stamp            TEXT NOT NULL,
            keywords_file    TEXT NOT NULL,
            brand            TEXT NOT NULL,
            competitor       TEXT NOT NULL,
            model            TEXT NOT NULL,
            keyword_count    INTEGER NOT NULL,
            classified_count INTEGER NOT NULL,
            target_cpc       REAL NOT NULL,
            search_budget    REAL NOT NULL,
            shopping_budget  REAL NOT NULL,
            created_at       TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS search_rows (
            id            INTEGER PRIMARY KEY,
            run_id        INTEGER NOT NULL REFERENCES runs(id),
            ad_group      TEXT NOT NULL,
            keyword       TEXT NOT NULL,
            search_volume INTEGER NOT NULL,
            match_type    TEXT NOT NULL,
            suggested_cpc REAL NOT NULL,
            competition   TEXT NOT NULL CHECK(competition IN ('Low','Medium','High')),
            intent        TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_search_run ON search_rows(run_id);

        CREATE TABLE IF NOT EXISTS theme_rows (
            id        INTEGER PRIMARY KEY,
            run_id    INTEGER NOT NULL REFERENCES runs(id),
            category  TEXT NOT NULL,
            theme     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_theme_run ON theme_rows(run_id);

        CREATE TABLE IF NOT EXISTS shopping_rows (
            id            INTEGER PRIMARY KEY,
            run_id        INTEGER NOT NULL REFERENCES runs(id),
            keyword       TEXT NOT NULL,
            search_volume INTEGER NOT NULL,
            avg_bid       REAL NOT NULL,
            suggested_cpc REAL NOT NULL,
            competition   TEXT NOT NULL CHECK(competition IN ('Low','Medium','High')),
            target_cpa    REAL NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_shopping_run ON shopping_rows(run_id);
        ",
    )?;
    Ok(())
}

// ── Runs ──

pub struct RunSummary<'a> {
    pub stamp: &'a str,
    pub keywords_file: &'a str,
    pub brand: &'a str,
    pub competitor: &'a str,
    pub model: &'a str,
    pub keyword_count: usize,
    pub classified_count: usize,
    pub target_cpc: f64,
    pub search_budget: f64,
    pub shopping_budget: f64,
}

/// Store one finished run and its report rows. Returns the run id.
pub fn record_run(conn: &Connection, run: &RunSummary<'_>, report: &Report<'_>) -> Result<i64> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO runs
         (stamp, keywords_file, brand, competitor, model, keyword_count, classified_count,
          target_cpc, search_budget, shopping_budget)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            run.stamp,
            run.keywords_file,
            run.brand,
            run.competitor,
            run.model,
            run.keyword_count as i64,
            run.classified_count as i64,
            round2(run.target_cpc),
            run.search_budget,
            run.shopping_budget,
        ],
    )?;
    let run_id = tx.last_insert_rowid();

    {
        let mut s_stmt = tx.prepare(
            "INSERT INTO search_rows
             (run_id, ad_group, keyword, search_volume, match_type, suggested_cpc, competition, intent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for b in report.search {
            s_stmt.execute(rusqlite::params![
                run_id,
                b.ad_group,
                b.keyword,
                b.search_volume as i64,
                b.match_type.as_str(),
                round2(b.suggested_cpc),
                b.competition.as_str(),
                b.intent,
            ])?;
        }

        let mut t_stmt =
            tx.prepare("INSERT INTO theme_rows (run_id, category, theme) VALUES (?1, ?2, ?3)")?;
        for (category, theme) in report.themes.iter() {
            t_stmt.execute(rusqlite::params![run_id, category.label(), theme])?;
        }

        let mut p_stmt = tx.prepare(
            "INSERT INTO shopping_rows
             (run_id, keyword, search_volume, avg_bid, suggested_cpc, competition, target_cpa)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for b in report.shopping {
            p_stmt.execute(rusqlite::params![
                run_id,
                b.keyword,
                b.search_volume as i64,
                round2(b.avg_bid),
                round2(b.suggested_cpc),
                b.competition.as_str(),
                round2(b.target_cpa),
            ])?;
        }
    }
    tx.commit()?;
    Ok(run_id)
}

// ── History ──

pub struct RunRow {
    pub id: i64,
    pub stamp: String,
    pub keywords_file: String,
    pub brand: String,
    pub model: String,
    pub keyword_count: i64,
    pub classified_count: i64,
    pub ad_groups: i64,
    pub target_cpc: f64,
    pub created_at: String,
}

/// Newest runs first.
pub fn recent_runs(conn: &Connection, limit: usize) -> Result<Vec<RunRow>> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.stamp, r.keywords_file, r.brand, r.model, r.keyword_count,
                r.classified_count,
                (SELECT COUNT(DISTINCT s.ad_group) FROM search_rows s WHERE s.run_id = r.id),
                r.target_cpc, r.created_at
         FROM runs r
         ORDER BY r.id DESC
         LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit as i64], |row| {
            Ok(RunRow {
                id: row.get(0)?,
                stamp: row.get(1)?,
                keywords_file: row.get(2)?,
                brand: row.get(3)?,
                model: row.get(4)?,
                keyword_count: row.get(5)?,
                classified_count: row.get(6)?,
                ad_groups: row.get(7)?,
                target_cpc: row.get(8)?,
                created_at: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
