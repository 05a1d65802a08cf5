use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::audit::{AuditAction, AuditQuery, AuditRecord};
use crate::models::cluster::{Cluster, StabilityTrend};
use crate::models::dossier::{Dossier, DossierType, Watchlist, WatchlistPriority};
use crate::models::event::{Category, EntityBag, Enrichment, Event, RawEvent, Sentiment};
use crate::models::feedback::{EventFeedback, FeedbackStats, FeedbackType};
use crate::models::org::{Membership, Organization, Role, User};
use crate::models::query::EventFilters;
use crate::models::settings::OrgSettings;
use crate::models::source::{Source, SourceType};

/// Storage timestamp format. Lexicographic order equals chronological order,
/// so SQL string comparisons work on these columns.
const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn fmt_ts(t: DateTime<Utc>) -> String {
    t.format(TS_FORMAT).to_string()
}

pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

pub fn title_hash(raw_title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_title.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn ts_col(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_ts(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("bad timestamp: {s}").into(),
        )
    })
}

fn opt_ts_col(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    Ok(s.as_deref().and_then(parse_ts))
}

fn json_col<T: serde::de::DeserializeOwned + Default>(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    Ok(serde_json::from_str(&s).unwrap_or_default())
}

const EVENT_COLS: &str = "event_id, source_id, source_url, raw_title, raw_text, fetched_at, \
     published_at, timestamp, location_name, admin_region, location_lat, location_lon, \
     summary, category, sentiment, entities, confidence_score, relevance_score, \
     priority_score, cluster_id, source_count, multi_source_boost, row_version, \
     enriched_at, deleted_at, metadata";

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
    let category: Option<String> = row.get(13)?;
    let sentiment: Option<String> = row.get(14)?;
    Ok(Event {
        event_id: row.get(0)?,
        source_id: row.get(1)?,
        source_url: row.get(2)?,
        raw_title: row.get(3)?,
        raw_text: row.get(4)?,
        fetched_at: ts_col(row, 5)?,
        published_at: ts_col(row, 6)?,
        timestamp: ts_col(row, 7)?,
        location_name: row.get(8)?,
        admin_region: row.get(9)?,
        location_lat: row.get(10)?,
        location_lon: row.get(11)?,
        summary: row.get(12)?,
        category: category.as_deref().and_then(Category::parse),
        sentiment: sentiment.as_deref().and_then(Sentiment::parse),
        entities: json_col::<EntityBag>(row, 15)?,
        confidence_score: row.get(16)?,
        relevance_score: row.get(17)?,
        priority_score: row.get(18)?,
        cluster_id: row.get(19)?,
        source_count: row.get(20)?,
        multi_source_boost: row.get::<_, i64>(21)? != 0,
        row_version: row.get(22)?,
        enriched_at: opt_ts_col(row, 23)?,
        deleted_at: opt_ts_col(row, 24)?,
        metadata: json_col::<serde_json::Value>(row, 25)?,
    })
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// In-memory store for tests and one-shot tooling.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS organizations (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );

            CREATE TABLE IF NOT EXISTS users (
                id            TEXT PRIMARY KEY,
                email         TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );

            CREATE TABLE IF NOT EXISTS memberships (
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                org_id  TEXT NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
                role    TEXT NOT NULL CHECK(role IN ('viewer','analyst','admin')),
                PRIMARY KEY (user_id, org_id)
            );

            CREATE TABLE IF NOT EXISTS sources (
                id                  TEXT PRIMARY KEY,
                url                 TEXT NOT NULL,
                name                TEXT NOT NULL,
                source_type         TEXT NOT NULL CHECK(source_type IN
                    ('rss','news_api','gov_feed','crisis_feed','ngo_feed','social_public')),
                is_active           INTEGER NOT NULL DEFAULT 1,
                trust               REAL NOT NULL DEFAULT 0.5,
                fetch_interval_mins INTEGER NOT NULL DEFAULT 30,
                last_fetched_at     TEXT,
                last_error          TEXT,
                dead_letter         TEXT NOT NULL DEFAULT '[]',
                created_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );

            CREATE TABLE IF NOT EXISTS events (
                event_id           TEXT PRIMARY KEY,
                source_id          TEXT NOT NULL,
                source_url         TEXT NOT NULL,
                title_hash         TEXT NOT NULL,
                raw_title          TEXT NOT NULL,
                raw_text           TEXT NOT NULL DEFAULT '',
                fetched_at         TEXT NOT NULL,
                published_at       TEXT NOT NULL,
                timestamp          TEXT NOT NULL,
                location_name      TEXT,
                admin_region       TEXT,
                location_lat       REAL,
                location_lon       REAL,
                summary            TEXT,
                category           TEXT,
                sentiment          TEXT,
                entities           TEXT NOT NULL DEFAULT '{}',
                confidence_score   REAL NOT NULL DEFAULT 0,
                relevance_score    REAL NOT NULL DEFAULT 0,
                priority_score     REAL NOT NULL DEFAULT 0,
                cluster_id         TEXT,
                source_count       INTEGER NOT NULL DEFAULT 1,
                multi_source_boost INTEGER NOT NULL DEFAULT 0,
                row_version        INTEGER NOT NULL DEFAULT 0,
                enriched_at        TEXT,
                deleted_at         TEXT,
                metadata           TEXT NOT NULL DEFAULT '{}'
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_events_dedup
                ON events(source_url, published_at);
            CREATE INDEX IF NOT EXISTS idx_events_title_hash ON events(source_url, title_hash);
            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_events_category ON events(category);
            CREATE INDEX IF NOT EXISTS idx_events_cluster ON events(cluster_id);
            CREATE INDEX IF NOT EXISTS idx_events_geo ON events(location_lat, location_lon);

            CREATE TABLE IF NOT EXISTS clusters (
                cluster_id          TEXT PRIMARY KEY,
                canonical_event_id  TEXT NOT NULL,
                member_count        INTEGER NOT NULL,
                merged_summary      TEXT NOT NULL DEFAULT '',
                merged_entities     TEXT NOT NULL DEFAULT '{}',
                earliest_timestamp  TEXT NOT NULL,
                latest_timestamp    TEXT NOT NULL,
                avg_confidence      REAL NOT NULL DEFAULT 0,
                avg_relevance       REAL NOT NULL DEFAULT 0,
                avg_priority       REAL NOT NULL DEFAULT 0,
                stability_trend     TEXT NOT NULL DEFAULT 'unknown',
                updated_at          TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS dossiers (
                id                  TEXT PRIMARY KEY,
                org_id              TEXT NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
                name                TEXT NOT NULL,
                dossier_type        TEXT NOT NULL CHECK(dossier_type IN
                    ('location','organization','group','topic','person')),
                description         TEXT NOT NULL DEFAULT '',
                aliases             TEXT NOT NULL DEFAULT '[]',
                tags                TEXT NOT NULL DEFAULT '[]',
                notes               TEXT NOT NULL DEFAULT '',
                known_lat           REAL,
                known_lon           REAL,
                event_count         INTEGER NOT NULL DEFAULT 0,
                last_event_at       TEXT,
                count_7d            INTEGER NOT NULL DEFAULT 0,
                count_30d           INTEGER NOT NULL DEFAULT 0,
                category_breakdown  TEXT NOT NULL DEFAULT '{}',
                sentiment_breakdown TEXT NOT NULL DEFAULT '{}',
                stats_dirty         INTEGER NOT NULL DEFAULT 0,
                created_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                updated_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_dossiers_org ON dossiers(org_id, dossier_type);

            CREATE TABLE IF NOT EXISTS watchlists (
                id         TEXT PRIMARY KEY,
                org_id     TEXT NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
                user_id    TEXT,
                name       TEXT NOT NULL,
                priority   TEXT NOT NULL CHECK(priority IN ('low','medium','high','critical')),
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );

            CREATE TABLE IF NOT EXISTS watchlist_dossiers (
                watchlist_id TEXT NOT NULL REFERENCES watchlists(id) ON DELETE CASCADE,
                dossier_id   TEXT NOT NULL REFERENCES dossiers(id) ON DELETE CASCADE,
                PRIMARY KEY (watchlist_id, dossier_id)
            );

            CREATE TABLE IF NOT EXISTS event_feedback (
                id                 TEXT PRIMARY KEY,
                event_id           TEXT NOT NULL,
                user_id            TEXT NOT NULL,
                org_id             TEXT NOT NULL,
                feedback_type      TEXT NOT NULL CHECK(feedback_type IN
                    ('relevant','irrelevant','important','misclassified')),
                accuracy_rating    INTEGER,
                relevance_rating   INTEGER,
                is_false_positive  INTEGER NOT NULL DEFAULT 0,
                suggested_category TEXT,
                comment            TEXT NOT NULL DEFAULT '',
                created_at         TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_feedback_org ON event_feedback(org_id, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_feedback_event ON event_feedback(event_id);

            CREATE TABLE IF NOT EXISTS audit_log (
                id          TEXT PRIMARY KEY,
                org_id      TEXT NOT NULL,
                user_id     TEXT,
                user_email  TEXT,
                action      TEXT NOT NULL CHECK(action IN
                    ('create','update','delete','view','export','login','logout','access_denied')),
                object_type TEXT NOT NULL,
                object_id   TEXT,
                description TEXT NOT NULL DEFAULT '',
                metadata    TEXT NOT NULL DEFAULT '{}',
                ip_address  TEXT,
                user_agent  TEXT,
                timestamp   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_audit_org_ts ON audit_log(org_id, timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_audit_user ON audit_log(user_id);
            CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_log(action, object_type);

            CREATE TABLE IF NOT EXISTS org_settings (
                org_id TEXT PRIMARY KEY REFERENCES organizations(id) ON DELETE CASCADE,
                data       TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );

            CREATE TABLE IF NOT EXISTS runtime_flags (
                name       TEXT PRIMARY KEY,
                expires_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    // ── Organization / user operations ──

    pub fn create_org(&self, id: &str, name: &str, description: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO organizations (id, name, description) VALUES (?1, ?2, ?3)",
            params![id, name, description],
        )?;
        Ok(())
    }

    pub fn get_org(&self, id: &str) -> anyhow::Result<Option<Organization>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, description, created_at FROM organizations WHERE id = ?1",
        )?;
        let row = stmt
            .query_row(params![id], |row| {
                Ok(Organization {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    pub fn list_orgs(&self) -> anyhow::Result<Vec<Organization>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, description, created_at FROM organizations ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Organization {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn create_user(&self, id: &str, email: &str, password_hash: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO users (id, email, password_hash) VALUES (?1, ?2, ?3)",
            params![id, email, password_hash],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> anyhow::Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT id, email, password_hash, created_at FROM users WHERE id = ?1")?;
        let row = stmt
            .query_row(params![id], |row| {
                Ok(User {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    password_hash: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    /// Deleting a user anonymizes their audit rows but never removes them.
    pub fn delete_user(&self, id: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE audit_log SET user_id = NULL WHERE user_id = ?1",
            params![id],
        )?;
        let count = tx.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(count > 0)
    }

    pub fn add_membership(&self, user_id: &str, org_id: &str, role: Role) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO memberships (user_id, org_id, role) VALUES (?1, ?2, ?3) \
             ON CONFLICT(user_id, org_id) DO UPDATE SET role = ?3",
            params![user_id, org_id, role.as_str()],
        )?;
        Ok(())
    }

    /// Memberships ordered by org creation; the first is the default org.
    pub fn memberships_for_user(&self, user_id: &str) -> anyhow::Result<Vec<Membership>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT m.user_id, m.org_id, m.role FROM memberships m \
             JOIN organizations o ON o.id = m.org_id \
             WHERE m.user_id = ?1 ORDER BY o.created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                let role: String = row.get(2)?;
                Ok(Membership {
                    user_id: row.get(0)?,
                    org_id: row.get(1)?,
                    role: Role::parse(&role).unwrap_or(Role::Viewer),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Source operations ──

    pub fn create_source(
        &self,
        id: &str,
        url: &str,
        name: &str,
        source_type: SourceType,
        is_active: bool,
        trust: f64,
        fetch_interval_mins: i64,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sources (id, url, name, source_type, is_active, trust, fetch_interval_mins) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![id, url, name, source_type.as_str(), is_active, trust, fetch_interval_mins],
        )?;
        Ok(())
    }

    pub fn update_source(
        &self,
        id: &str,
        url: &str,
        name: &str,
        source_type: SourceType,
        is_active: bool,
        trust: f64,
        fetch_interval_mins: i64,
    ) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE sources SET url = ?2, name = ?3, source_type = ?4, is_active = ?5, \
             trust = ?6, fetch_interval_mins = ?7 WHERE id = ?1",
            params![id, url, name, source_type.as_str(), is_active, trust, fetch_interval_mins],
        )?;
        Ok(count > 0)
    }

    pub fn delete_source(&self, id: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute("DELETE FROM sources WHERE id = ?1", params![id])?;
        Ok(count > 0)
    }

    pub fn get_source(&self, id: &str) -> anyhow::Result<Option<Source>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{SOURCE_SELECT} WHERE id = ?1"))?;
        let row = stmt.query_row(params![id], row_to_source).optional()?;
        Ok(row)
    }

    pub fn list_sources(&self) -> anyhow::Result<Vec<Source>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{SOURCE_SELECT} ORDER BY created_at ASC"))?;
        let rows = stmt
            .query_map([], row_to_source)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Active sources of a type whose fetch interval has elapsed.
    pub fn due_sources(&self, source_type: SourceType, now: &str) -> anyhow::Result<Vec<Source>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{SOURCE_SELECT} WHERE is_active = 1 AND source_type = ?1 AND \
             (last_fetched_at IS NULL OR \
              strftime('%s', ?2) - strftime('%s', last_fetched_at) >= fetch_interval_mins * 60)"
        ))?;
        let rows = stmt
            .query_map(params![source_type.as_str(), now], row_to_source)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn record_fetch_result(
        &self,
        id: &str,
        fetched_at: &str,
        last_error: Option<&str>,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sources SET last_fetched_at = ?2, last_error = ?3 WHERE id = ?1",
            params![id, fetched_at, last_error],
        )?;
        Ok(())
    }

    pub fn append_dead_letter(&self, id: &str, entry_url: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        let current: Option<String> = conn
            .query_row(
                "SELECT dead_letter FROM sources WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Ok(());
        };
        let mut list: Vec<String> = serde_json::from_str(&current).unwrap_or_default();
        if !list.iter().any(|u| u == entry_url) {
            list.push(entry_url.to_string());
        }
        conn.execute(
            "UPDATE sources SET dead_letter = ?2 WHERE id = ?1",
            params![id, serde_json::to_string(&list)?],
        )?;
        Ok(())
    }

    // ── Event operations ──

    /// Deduplicating insert. An existing row matching `(source_url, published_at)`
    /// or `(source_url, sha256(raw_title))` is left untouched and reported as
    /// not-new. A unique-index race is recovered by re-reading the row.
    pub fn upsert_event(
        &self,
        raw: &RawEvent,
        fetched_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<(String, bool)> {
        let hash = title_hash(&raw.raw_title);
        let published = fmt_ts(raw.published_at);
        let conn = self.conn.lock().unwrap();

        let existing: Option<String> = conn
            .query_row(
                "SELECT event_id FROM events WHERE source_url = ?1 AND \
                 (published_at = ?2 OR title_hash = ?3) LIMIT 1",
                params![raw.source_url, published, hash],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok((id, false));
        }

        let event_id = uuid::Uuid::new_v4().to_string();
        let inserted = conn.execute(
            "INSERT INTO events (event_id, source_id, source_url, title_hash, raw_title, \
             raw_text, fetched_at, published_at, timestamp, metadata) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT(source_url, published_at) DO NOTHING",
            params![
                event_id,
                raw.source_id,
                raw.source_url,
                hash,
                raw.raw_title,
                raw.raw_text,
                fmt_ts(fetched_at),
                published,
                fmt_ts(timestamp),
                raw.raw_metadata.to_string(),
            ],
        )?;
        if inserted == 0 {
            // Lost the race to a concurrent writer; the row is theirs.
            let id: String = conn.query_row(
                "SELECT event_id FROM events WHERE source_url = ?1 AND published_at = ?2",
                params![raw.source_url, published],
                |row| row.get(0),
            )?;
            return Ok((id, false));
        }
        Ok((event_id, true))
    }

    /// Applies enrichment exactly once. Returns false when the event was
    /// already enriched (idempotent retry) or does not exist.
    pub fn apply_enrichment(
        &self,
        event_id: &str,
        enrichment: &Enrichment,
        enriched_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE events SET summary = ?2, category = ?3, sentiment = ?4, entities = ?5, \
             location_name = ?6, admin_region = ?7, location_lat = ?8, location_lon = ?9, \
             confidence_score = ?10, relevance_score = ?11, priority_score = ?12, \
             enriched_at = ?13, row_version = row_version + 1 \
             WHERE event_id = ?1 AND enriched_at IS NULL",
            params![
                event_id,
                enrichment.summary,
                enrichment.category.as_str(),
                enrichment.sentiment.as_str(),
                serde_json::to_string(&enrichment.entities)?,
                enrichment.location_name,
                enrichment.admin_region,
                enrichment.location_lat,
                enrichment.location_lon,
                enrichment.confidence_score,
                enrichment.relevance_score,
                enrichment.priority_score,
                fmt_ts(enriched_at),
            ],
        )?;
        Ok(count > 0)
    }

    /// Existence check that sees through soft deletion: Some(true) when the
    /// row exists but is deleted.
    pub fn event_deleted_state(&self, event_id: &str) -> anyhow::Result<Option<bool>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<Option<String>> = conn
            .query_row(
                "SELECT deleted_at FROM events WHERE event_id = ?1",
                params![event_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.map(|deleted_at| deleted_at.is_some()))
    }

    pub fn get_event(&self, event_id: &str) -> anyhow::Result<Option<Event>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLS} FROM events WHERE event_id = ?1 AND deleted_at IS NULL"
        ))?;
        let row = stmt.query_row(params![event_id], row_to_event).optional()?;
        Ok(row)
    }

    /// Filtered event listing with a deterministic `(timestamp DESC, event_id DESC)`
    /// order. Returns the page plus the unpaged total.
    pub fn list_events(&self, filters: &EventFilters) -> anyhow::Result<(Vec<Event>, u64)> {
        let conn = self.conn.lock().unwrap();
        let mut where_sql = "deleted_at IS NULL".to_string();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref c) = filters.category {
            where_sql.push_str(&format!(" AND category = ?{}", param_values.len() + 1));
            param_values.push(Box::new(c.clone()));
        }
        if let Some(ref s) = filters.sentiment {
            where_sql.push_str(&format!(" AND sentiment = ?{}", param_values.len() + 1));
            param_values.push(Box::new(s.clone()));
        }
        if let Some(ref loc) = filters.location_name {
            where_sql.push_str(&format!(
                " AND location_name LIKE ?{}",
                param_values.len() + 1
            ));
            param_values.push(Box::new(format!("%{loc}%")));
        }
        if let Some(min_rel) = filters.min_relevance {
            where_sql.push_str(&format!(
                " AND relevance_score >= ?{}",
                param_values.len() + 1
            ));
            param_values.push(Box::new(min_rel));
        }
        if let Some(ref since) = filters.since {
            where_sql.push_str(&format!(" AND timestamp >= ?{}", param_values.len() + 1));
            param_values.push(Box::new(since.clone()));
        }
        if let Some(ref until) = filters.until {
            where_sql.push_str(&format!(" AND timestamp <= ?{}", param_values.len() + 1));
            param_values.push(Box::new(until.clone()));
        }
        if let Some(ref cid) = filters.cluster_id {
            where_sql.push_str(&format!(" AND cluster_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(cid.clone()));
        }

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();

        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM events WHERE {where_sql}"),
            params_ref.as_slice(),
            |row| row.get(0),
        )?;

        let page_size = filters.effective_page_size();
        let offset = filters.page * page_size;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLS} FROM events WHERE {where_sql} \
             ORDER BY timestamp DESC, event_id DESC LIMIT {page_size} OFFSET {offset}"
        ))?;
        let rows = stmt
            .query_map(params_ref.as_slice(), row_to_event)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok((rows, total))
    }

    /// Enriched, live events in `[since, until]`: the fusion candidate set.
    pub fn events_in_window(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Event>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLS} FROM events \
             WHERE deleted_at IS NULL AND enriched_at IS NOT NULL \
             AND timestamp >= ?1 AND timestamp <= ?2 \
             ORDER BY timestamp ASC, event_id ASC"
        ))?;
        let rows = stmt
            .query_map(params![fmt_ts(since), fmt_ts(until)], row_to_event)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn events_by_cluster(&self, cluster_id: &str) -> anyhow::Result<Vec<Event>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLS} FROM events \
             WHERE cluster_id = ?1 AND deleted_at IS NULL \
             ORDER BY timestamp ASC, event_id ASC"
        ))?;
        let rows = stmt
            .query_map(params![cluster_id], row_to_event)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Compare-and-set cluster assignment, guarded by the row version so a
    /// concurrent retention sweep cannot be overwritten.
    pub fn set_cluster_assignment(
        &self,
        event_id: &str,
        cluster_id: Option<&str>,
        source_count: i64,
        multi_source_boost: bool,
        priority_score: f64,
        expected_version: i64,
    ) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE events SET cluster_id = ?2, source_count = ?3, multi_source_boost = ?4, \
             priority_score = ?5, row_version = row_version + 1 \
             WHERE event_id = ?1 AND row_version = ?6 AND deleted_at IS NULL",
            params![
                event_id,
                cluster_id,
                source_count,
                multi_source_boost,
                priority_score,
                expected_version
            ],
        )?;
        Ok(count > 0)
    }

    /// Member count of a cluster within a timestamp window (stability trend).
    pub fn cluster_members_between(
        &self,
        cluster_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE cluster_id = ?1 AND deleted_at IS NULL \
             AND timestamp >= ?2 AND timestamp < ?3",
            params![cluster_id, fmt_ts(since), fmt_ts(until)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Marks events older than the cutoff as deleted. Returns the affected
    /// `(event_id, cluster_id)` pairs so fusion state can be recomputed.
    pub fn soft_delete_events_before(
        &self,
        cutoff: DateTime<Utc>,
        deleted_at: DateTime<Utc>,
    ) -> anyhow::Result<Vec<(String, Option<String>)>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let affected = {
            let mut stmt = tx.prepare(
                "SELECT event_id, cluster_id FROM events \
                 WHERE deleted_at IS NULL AND timestamp < ?1",
            )?;
            stmt.query_map(params![fmt_ts(cutoff)], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?
        };
        tx.execute(
            "UPDATE events SET deleted_at = ?2, row_version = row_version + 1 \
             WHERE deleted_at IS NULL AND timestamp < ?1",
            params![fmt_ts(cutoff), fmt_ts(deleted_at)],
        )?;
        tx.commit()?;
        Ok(affected)
    }

    /// Physically removes soft-deleted events past the grace window.
    pub fn purge_soft_deleted_before(&self, grace_cutoff: DateTime<Utc>) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "DELETE FROM events WHERE deleted_at IS NOT NULL AND deleted_at < ?1",
            params![fmt_ts(grace_cutoff)],
        )?;
        Ok(count)
    }

    // ── Cluster operations ──

    pub fn upsert_cluster(&self, cluster: &Cluster) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO clusters (cluster_id, canonical_event_id, member_count, merged_summary, \
             merged_entities, earliest_timestamp, latest_timestamp, avg_confidence, avg_relevance, \
             avg_priority, stability_trend, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
             ON CONFLICT(cluster_id) DO UPDATE SET \
             canonical_event_id = ?2, member_count = ?3, merged_summary = ?4, \
             merged_entities = ?5, earliest_timestamp = ?6, latest_timestamp = ?7, \
             avg_confidence = ?8, avg_relevance = ?9, avg_priority = ?10, \
             stability_trend = ?11, updated_at = ?12",
            params![
                cluster.cluster_id,
                cluster.canonical_event_id,
                cluster.member_count,
                cluster.merged_summary,
                serde_json::to_string(&cluster.merged_entities)?,
                fmt_ts(cluster.earliest_timestamp),
                fmt_ts(cluster.latest_timestamp),
                cluster.avg_confidence,
                cluster.avg_relevance,
                cluster.avg_priority,
                cluster.stability_trend.as_str(),
                fmt_ts(cluster.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_cluster(&self, cluster_id: &str) -> anyhow::Result<Option<Cluster>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT cluster_id, canonical_event_id, member_count, merged_summary, merged_entities, \
             earliest_timestamp, latest_timestamp, avg_confidence, avg_relevance, avg_priority, \
             stability_trend, updated_at FROM clusters WHERE cluster_id = ?1",
        )?;
        let row = stmt
            .query_row(params![cluster_id], |row| {
                let trend: String = row.get(10)?;
                Ok(Cluster {
                    cluster_id: row.get(0)?,
                    canonical_event_id: row.get(1)?,
                    member_count: row.get(2)?,
                    merged_summary: row.get(3)?,
                    merged_entities: json_col::<EntityBag>(row, 4)?,
                    earliest_timestamp: ts_col(row, 5)?,
                    latest_timestamp: ts_col(row, 6)?,
                    avg_confidence: row.get(7)?,
                    avg_relevance: row.get(8)?,
                    avg_priority: row.get(9)?,
                    stability_trend: StabilityTrend::parse(&trend)
                        .unwrap_or(StabilityTrend::Unknown),
                    updated_at: ts_col(row, 11)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    pub fn delete_cluster(&self, cluster_id: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "DELETE FROM clusters WHERE cluster_id = ?1",
            params![cluster_id],
        )?;
        Ok(count > 0)
    }

    // ── Runtime flags (fusion singleton lock) ──

    /// Cooperative TTL lock. Returns false while another holder's lease lives.
    pub fn try_acquire_flag(&self, name: &str, ttl_secs: i64) -> anyhow::Result<bool> {
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        let held: Option<String> = conn
            .query_row(
                "SELECT expires_at FROM runtime_flags WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(expires) = held
            && parse_ts(&expires).is_some_and(|t| t > now)
        {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO runtime_flags (name, expires_at) VALUES (?1, ?2) \
             ON CONFLICT(name) DO UPDATE SET expires_at = ?2",
            params![name, fmt_ts(now + Duration::seconds(ttl_secs))],
        )?;
        Ok(true)
    }

    pub fn release_flag(&self, name: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM runtime_flags WHERE name = ?1", params![name])?;
        Ok(())
    }

    // ── Dossier operations ──

    pub fn create_dossier(&self, d: &Dossier) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO dossiers (id, org_id, name, dossier_type, description, aliases, tags, \
             notes, known_lat, known_lon) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                d.id,
                d.org_id,
                d.name,
                d.dossier_type.as_str(),
                d.description,
                serde_json::to_string(&d.aliases)?,
                serde_json::to_string(&d.tags)?,
                d.notes,
                d.known_lat,
                d.known_lon,
            ],
        )?;
        Ok(())
    }

    pub fn update_dossier(
        &self,
        org_id: &str,
        id: &str,
        name: &str,
        description: &str,
        aliases: &[String],
        tags: &[String],
        notes: &str,
        known_lat: Option<f64>,
        known_lon: Option<f64>,
    ) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE dossiers SET name = ?3, description = ?4, aliases = ?5, tags = ?6, \
             notes = ?7, known_lat = ?8, known_lon = ?9, stats_dirty = 1, \
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') \
             WHERE id = ?2 AND org_id = ?1",
            params![
                org_id,
                id,
                name,
                description,
                serde_json::to_string(&aliases)?,
                serde_json::to_string(&tags)?,
                notes,
                known_lat,
                known_lon,
            ],
        )?;
        Ok(count > 0)
    }

    pub fn delete_dossier(&self, org_id: &str, id: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "DELETE FROM dossiers WHERE id = ?2 AND org_id = ?1",
            params![org_id, id],
        )?;
        Ok(count > 0)
    }

    /// Owning org of a dossier regardless of tenancy. Used only to tell a
    /// cross-org probe (audited) apart from a plain miss.
    pub fn dossier_org(&self, id: &str) -> anyhow::Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT org_id FROM dossiers WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_dossier(&self, org_id: &str, id: &str) -> anyhow::Result<Option<Dossier>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare(&format!("{DOSSIER_SELECT} WHERE id = ?2 AND org_id = ?1"))?;
        let row = stmt
            .query_row(params![org_id, id], row_to_dossier)
            .optional()?;
        Ok(row)
    }

    pub fn list_dossiers(&self, org_id: &str) -> anyhow::Result<Vec<Dossier>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{DOSSIER_SELECT} WHERE org_id = ?1 ORDER BY created_at ASC"
        ))?;
        let rows = stmt
            .query_map(params![org_id], row_to_dossier)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every dossier across all orgs; the matcher walks these per event.
    pub fn all_dossiers(&self) -> anyhow::Result<Vec<Dossier>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare(&format!("{DOSSIER_SELECT} ORDER BY org_id ASC, created_at ASC"))?;
        let rows = stmt
            .query_map([], row_to_dossier)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn dirty_dossiers(&self) -> anyhow::Result<Vec<Dossier>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{DOSSIER_SELECT} WHERE stats_dirty = 1"))?;
        let rows = stmt
            .query_map([], row_to_dossier)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn mark_dossiers_dirty(&self, ids: &[String]) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        for id in ids {
            conn.execute(
                "UPDATE dossiers SET stats_dirty = 1 WHERE id = ?1",
                params![id],
            )?;
        }
        Ok(())
    }

    /// Replaces the derived statistics in one write and clears the dirty flag.
    pub fn write_dossier_stats(
        &self,
        id: &str,
        event_count: i64,
        last_event_at: Option<&str>,
        count_7d: i64,
        count_30d: i64,
        category_breakdown: &HashMap<String, i64>,
        sentiment_breakdown: &HashMap<String, i64>,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE dossiers SET event_count = ?2, last_event_at = ?3, count_7d = ?4, \
             count_30d = ?5, category_breakdown = ?6, sentiment_breakdown = ?7, \
             stats_dirty = 0, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE id = ?1",
            params![
                id,
                event_count,
                last_event_at,
                count_7d,
                count_30d,
                serde_json::to_string(category_breakdown)?,
                serde_json::to_string(sentiment_breakdown)?,
            ],
        )?;
        Ok(())
    }

    // ── Watchlist operations ──

    pub fn create_watchlist(
        &self,
        id: &str,
        org_id: &str,
        user_id: Option<&str>,
        name: &str,
        priority: WatchlistPriority,
        dossier_ids: &[String],
    ) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO watchlists (id, org_id, user_id, name, priority) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, org_id, user_id, name, priority.as_str()],
        )?;
        for dossier_id in dossier_ids {
            tx.execute(
                "INSERT OR IGNORE INTO watchlist_dossiers (watchlist_id, dossier_id) \
                 SELECT ?1, id FROM dossiers WHERE id = ?2 AND org_id = ?3",
                params![id, dossier_id, org_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn update_watchlist(
        &self,
        org_id: &str,
        id: &str,
        name: &str,
        priority: WatchlistPriority,
        dossier_ids: &[String],
    ) -> anyhow::Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let count = tx.execute(
            "UPDATE watchlists SET name = ?3, priority = ?4 WHERE id = ?2 AND org_id = ?1",
            params![org_id, id, name, priority.as_str()],
        )?;
        if count == 0 {
            return Ok(false);
        }
        tx.execute(
            "DELETE FROM watchlist_dossiers WHERE watchlist_id = ?1",
            params![id],
        )?;
        for dossier_id in dossier_ids {
            tx.execute(
                "INSERT OR IGNORE INTO watchlist_dossiers (watchlist_id, dossier_id) \
                 SELECT ?1, id FROM dossiers WHERE id = ?2 AND org_id = ?3",
                params![id, dossier_id, org_id],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    pub fn delete_watchlist(&self, org_id: &str, id: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "DELETE FROM watchlists WHERE id = ?2 AND org_id = ?1",
            params![org_id, id],
        )?;
        Ok(count > 0)
    }

    pub fn watchlist_org(&self, id: &str) -> anyhow::Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT org_id FROM watchlists WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_watchlist(&self, org_id: &str, id: &str) -> anyhow::Result<Option<Watchlist>> {
        let lists = self.list_watchlists_where(org_id, Some(id))?;
        Ok(lists.into_iter().next())
    }

    pub fn list_watchlists(&self, org_id: &str) -> anyhow::Result<Vec<Watchlist>> {
        self.list_watchlists_where(org_id, None)
    }

    fn list_watchlists_where(
        &self,
        org_id: &str,
        id: Option<&str>,
    ) -> anyhow::Result<Vec<Watchlist>> {
        let conn = self.conn.lock().unwrap();
        let (where_sql, params_vec): (&str, Vec<&dyn rusqlite::types::ToSql>) = match &id {
            Some(id) => (
                "WHERE w.org_id = ?1 AND w.id = ?2",
                vec![&org_id as &dyn rusqlite::types::ToSql, id],
            ),
            None => (
                "WHERE w.org_id = ?1",
                vec![&org_id as &dyn rusqlite::types::ToSql],
            ),
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT w.id, w.org_id, w.user_id, w.name, w.priority, w.created_at \
             FROM watchlists w {where_sql} ORDER BY w.created_at ASC"
        ))?;
        let mut lists = stmt
            .query_map(params_vec.as_slice(), |row| {
                let priority: String = row.get(4)?;
                Ok(Watchlist {
                    id: row.get(0)?,
                    org_id: row.get(1)?,
                    user_id: row.get(2)?,
                    name: row.get(3)?,
                    priority: WatchlistPriority::parse(&priority)
                        .unwrap_or(WatchlistPriority::Medium),
                    dossier_ids: Vec::new(),
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut link_stmt = conn.prepare(
            "SELECT dossier_id FROM watchlist_dossiers WHERE watchlist_id = ?1 ORDER BY dossier_id",
        )?;
        for list in &mut lists {
            list.dossier_ids = link_stmt
                .query_map(params![list.id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
        }
        Ok(lists)
    }

    // ── Feedback operations ──

    pub fn create_feedback(&self, fb: &EventFeedback) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO event_feedback (id, event_id, user_id, org_id, feedback_type, \
             accuracy_rating, relevance_rating, is_false_positive, suggested_category, comment) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                fb.id,
                fb.event_id,
                fb.user_id,
                fb.org_id,
                fb.feedback_type.as_str(),
                fb.accuracy_rating,
                fb.relevance_rating,
                fb.is_false_positive,
                fb.suggested_category,
                fb.comment,
            ],
        )?;
        Ok(())
    }

    pub fn get_feedback(&self, org_id: &str, id: &str) -> anyhow::Result<Option<EventFeedback>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, event_id, user_id, org_id, feedback_type, accuracy_rating, \
             relevance_rating, is_false_positive, suggested_category, comment, created_at \
             FROM event_feedback WHERE id = ?2 AND org_id = ?1",
        )?;
        let row = stmt
            .query_row(params![org_id, id], row_to_feedback)
            .optional()?;
        Ok(row)
    }

    pub fn delete_feedback(&self, org_id: &str, id: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "DELETE FROM event_feedback WHERE id = ?2 AND org_id = ?1",
            params![org_id, id],
        )?;
        Ok(count > 0)
    }

    pub fn feedback_stats(&self, org_id: &str) -> anyhow::Result<FeedbackStats> {
        let conn = self.conn.lock().unwrap();
        let mut by_type = HashMap::new();
        let mut stmt = conn.prepare(
            "SELECT feedback_type, COUNT(*) FROM event_feedback WHERE org_id = ?1 \
             GROUP BY feedback_type",
        )?;
        let rows = stmt.query_map(params![org_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (kind, count) = row?;
            by_type.insert(kind, count);
        }
        let (total, false_positives, avg_accuracy, avg_relevance): (
            i64,
            i64,
            Option<f64>,
            Option<f64>,
        ) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(is_false_positive), 0), \
             AVG(accuracy_rating), AVG(relevance_rating) \
             FROM event_feedback WHERE org_id = ?1",
            params![org_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;
        Ok(FeedbackStats {
            total,
            by_type,
            false_positive_rate: if total > 0 {
                false_positives as f64 / total as f64
            } else {
                0.0
            },
            avg_accuracy_rating: avg_accuracy,
            avg_relevance_rating: avg_relevance,
        })
    }

    // ── Audit operations ──

    pub fn append_audit(&self, rec: &AuditRecord) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO audit_log (id, org_id, user_id, user_email, action, object_type, \
             object_id, description, metadata, ip_address, user_agent, timestamp) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                rec.id,
                rec.org_id,
                rec.user_id,
                rec.user_email,
                rec.action.as_str(),
                rec.object_type,
                rec.object_id,
                rec.description,
                rec.metadata.to_string(),
                rec.ip_address,
                rec.user_agent,
                rec.timestamp,
            ],
        )?;
        Ok(())
    }

    pub fn list_audit(
        &self,
        org_id: &str,
        query: &AuditQuery,
    ) -> anyhow::Result<(Vec<AuditRecord>, u64)> {
        let conn = self.conn.lock().unwrap();
        let mut where_sql = "org_id = ?1".to_string();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(org_id.to_string())];

        if let Some(ref action) = query.action {
            where_sql.push_str(&format!(" AND action = ?{}", param_values.len() + 1));
            param_values.push(Box::new(action.clone()));
        }
        if let Some(ref ot) = query.object_type {
            where_sql.push_str(&format!(" AND object_type = ?{}", param_values.len() + 1));
            param_values.push(Box::new(ot.clone()));
        }
        if let Some(ref uid) = query.user_id {
            where_sql.push_str(&format!(" AND user_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(uid.clone()));
        }
        if let Some(ref since) = query.since {
            where_sql.push_str(&format!(" AND timestamp >= ?{}", param_values.len() + 1));
            param_values.push(Box::new(since.clone()));
        }
        if let Some(ref until) = query.until {
            where_sql.push_str(&format!(" AND timestamp <= ?{}", param_values.len() + 1));
            param_values.push(Box::new(until.clone()));
        }

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();

        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM audit_log WHERE {where_sql}"),
            params_ref.as_slice(),
            |row| row.get(0),
        )?;

        let page_size = query.page_size.clamp(1, 1000);
        let offset = query.page * page_size;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, org_id, user_id, user_email, action, object_type, object_id, \
             description, metadata, ip_address, user_agent, timestamp \
             FROM audit_log WHERE {where_sql} \
             ORDER BY timestamp DESC, id DESC LIMIT {page_size} OFFSET {offset}"
        ))?;
        let rows = stmt
            .query_map(params_ref.as_slice(), |row| {
                let action: String = row.get(4)?;
                Ok(AuditRecord {
                    id: row.get(0)?,
                    org_id: row.get(1)?,
                    user_id: row.get(2)?,
                    user_email: row.get(3)?,
                    action: AuditAction::parse(&action).unwrap_or(AuditAction::View),
                    object_type: row.get(5)?,
                    object_id: row.get(6)?,
                    description: row.get(7)?,
                    metadata: json_col::<serde_json::Value>(row, 8)?,
                    ip_address: row.get(9)?,
                    user_agent: row.get(10)?,
                    timestamp: row.get(11)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok((rows, total))
    }

    /// Retention sweep is the only caller allowed to delete audit rows.
    pub fn purge_audit_before(&self, org_id: &str, cutoff: &str) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "DELETE FROM audit_log WHERE org_id = ?1 AND timestamp < ?2",
            params![org_id, cutoff],
        )?;
        Ok(count)
    }

    // ── Org settings operations ──

    pub fn get_org_settings(&self, org_id: &str) -> anyhow::Result<Option<OrgSettings>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT data, updated_at FROM org_settings WHERE org_id = ?1",
                params![org_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((data, updated_at)) = row else {
            return Ok(None);
        };
        let mut settings: OrgSettings =
            serde_json::from_str(&data).unwrap_or_else(|_| OrgSettings::defaults(org_id));
        settings.org_id = org_id.to_string();
        settings.updated_at = updated_at;
        Ok(Some(settings))
    }

    pub fn put_org_settings(&self, settings: &OrgSettings) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO org_settings (org_id, data, updated_at) \
             VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%SZ','now')) \
             ON CONFLICT(org_id) DO UPDATE SET data = ?2, \
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')",
            params![settings.org_id, serde_json::to_string(settings)?],
        )?;
        Ok(())
    }

    pub fn delete_org_settings(&self, org_id: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "DELETE FROM org_settings WHERE org_id = ?1",
            params![org_id],
        )?;
        Ok(count > 0)
    }

    /// Settings for every org, defaults filled in for orgs without a row.
    pub fn all_org_settings(&self) -> anyhow::Result<Vec<OrgSettings>> {
        let orgs = self.list_orgs()?;
        let mut out = Vec::with_capacity(orgs.len());
        for org in orgs {
            out.push(
                self.get_org_settings(&org.id)?
                    .unwrap_or_else(|| OrgSettings::defaults(&org.id)),
            );
        }
        Ok(out)
    }

    // ── Dashboard aggregates ──

    pub fn count_events_since(&self, since: DateTime<Utc>) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE deleted_at IS NULL AND timestamp >= ?1",
            params![fmt_ts(since)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count_high_priority_since(
        &self,
        since: DateTime<Utc>,
        min_relevance: f64,
    ) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE deleted_at IS NULL AND timestamp >= ?1 \
             AND relevance_score >= ?2",
            params![fmt_ts(since), min_relevance],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn top_locations_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<(String, i64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT location_name, COUNT(*) as count FROM events \
             WHERE deleted_at IS NULL AND timestamp >= ?1 AND location_name IS NOT NULL \
             GROUP BY location_name ORDER BY count DESC, location_name ASC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![fmt_ts(since), limit], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn distribution_since(
        &self,
        column: DistributionColumn,
        since: DateTime<Utc>,
    ) -> anyhow::Result<HashMap<String, i64>> {
        let col = column.as_str();
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {col}, COUNT(*) FROM events \
             WHERE deleted_at IS NULL AND timestamp >= ?1 AND {col} IS NOT NULL GROUP BY {col}"
        ))?;
        let rows = stmt.query_map(params![fmt_ts(since)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (k, v) = row?;
            out.insert(k, v);
        }
        Ok(out)
    }

    pub fn dossier_counts(&self, org_id: &str) -> anyhow::Result<(i64, i64)> {
        let conn = self.conn.lock().unwrap();
        let row = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN event_count > 0 THEN 1 ELSE 0 END), 0) \
             FROM dossiers WHERE org_id = ?1",
            params![org_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        Ok(row)
    }

    /// Daily total and per-category counts over the trailing `days`.
    pub fn daily_trends(
        &self,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<(String, String, i64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT substr(timestamp, 1, 10) as day, COALESCE(category, 'other'), COUNT(*) \
             FROM events WHERE deleted_at IS NULL AND timestamp >= ?1 \
             GROUP BY day, category ORDER BY day ASC",
        )?;
        let rows = stmt
            .query_map(params![fmt_ts(since)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// ── Row mappers ──

const SOURCE_SELECT: &str = "SELECT id, url, name, source_type, is_active, trust, \
     fetch_interval_mins, last_fetched_at, last_error, dead_letter, created_at FROM sources";

fn row_to_source(row: &rusqlite::Row) -> rusqlite::Result<Source> {
    let source_type: String = row.get(3)?;
    Ok(Source {
        id: row.get(0)?,
        url: row.get(1)?,
        name: row.get(2)?,
        source_type: SourceType::parse(&source_type).unwrap_or(SourceType::Rss),
        is_active: row.get(4)?,
        trust: row.get(5)?,
        fetch_interval_mins: row.get(6)?,
        last_fetched_at: row.get(7)?,
        last_error: row.get(8)?,
        dead_letter: json_col::<Vec<String>>(row, 9)?,
        created_at: row.get(10)?,
    })
}

const DOSSIER_SELECT: &str = "SELECT id, org_id, name, dossier_type, description, aliases, \
     tags, notes, known_lat, known_lon, event_count, last_event_at, count_7d, count_30d, \
     category_breakdown, sentiment_breakdown, created_at, updated_at FROM dossiers";

fn row_to_dossier(row: &rusqlite::Row) -> rusqlite::Result<Dossier> {
    let dossier_type: String = row.get(3)?;
    Ok(Dossier {
        id: row.get(0)?,
        org_id: row.get(1)?,
        name: row.get(2)?,
        dossier_type: DossierType::parse(&dossier_type).unwrap_or(DossierType::Topic),
        description: row.get(4)?,
        aliases: json_col::<Vec<String>>(row, 5)?,
        tags: json_col::<Vec<String>>(row, 6)?,
        notes: row.get(7)?,
        known_lat: row.get(8)?,
        known_lon: row.get(9)?,
        event_count: row.get(10)?,
        last_event_at: row.get(11)?,
        count_7d: row.get(12)?,
        count_30d: row.get(13)?,
        category_breakdown: json_col::<HashMap<String, i64>>(row, 14)?,
        sentiment_breakdown: json_col::<HashMap<String, i64>>(row, 15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

fn row_to_feedback(row: &rusqlite::Row) -> rusqlite::Result<EventFeedback> {
    let feedback_type: String = row.get(4)?;
    Ok(EventFeedback {
        id: row.get(0)?,
        event_id: row.get(1)?,
        user_id: row.get(2)?,
        org_id: row.get(3)?,
        feedback_type: FeedbackType::parse(&feedback_type).unwrap_or(FeedbackType::Relevant),
        accuracy_rating: row.get(5)?,
        relevance_rating: row.get(6)?,
        is_false_positive: row.get::<_, i64>(7)? != 0,
        suggested_category: row.get(8)?,
        comment: row.get(9)?,
        created_at: row.get(10)?,
    })
}

#[derive(Debug, Clone, Copy)]
pub enum DistributionColumn {
    Category,
    Sentiment,
}

impl DistributionColumn {
    fn as_str(&self) -> &'static str {
        match self {
            DistributionColumn::Category => "category",
            DistributionColumn::Sentiment => "sentiment",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::{Category, Enrichment, Sentiment};

    fn raw(source_url: &str, title: &str, published_at: DateTime<Utc>) -> RawEvent {
        RawEvent {
            source_id: "src-1".into(),
            source_url: source_url.into(),
            raw_title: title.into(),
            raw_text: "text".into(),
            published_at,
            location_hint: None,
            raw_metadata: serde_json::json!({}),
        }
    }

    fn enrichment() -> Enrichment {
        Enrichment {
            summary: "A protest took place.".into(),
            category: Category::Protest,
            sentiment: Sentiment::Negative,
            entities: EntityBag {
                locations: vec!["Brussels".into()],
                ..Default::default()
            },
            location_name: Some("Brussels".into()),
            admin_region: None,
            location_lat: Some(50.85),
            location_lon: Some(4.35),
            confidence_score: 0.7,
            relevance_score: 0.8,
            priority_score: 0.6,
        }
    }

    #[test]
    fn upsert_dedupes_by_url_and_published_at() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let r = raw("https://example.org/a", "Title A", now);
        let (id1, new1) = store.upsert_event(&r, now, now).unwrap();
        let (id2, new2) = store.upsert_event(&r, now, now).unwrap();
        assert!(new1);
        assert!(!new2);
        assert_eq!(id1, id2);
    }

    #[test]
    fn upsert_dedupes_by_url_and_title_hash() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let first = raw("https://example.org/a", "Title A", now);
        let (id1, _) = store.upsert_event(&first, now, now).unwrap();
        // same url + title, different published_at: still a duplicate
        let later = raw("https://example.org/a", "Title A", now + Duration::hours(1));
        let (id2, new2) = store.upsert_event(&later, now, now).unwrap();
        assert!(!new2);
        assert_eq!(id1, id2);
    }

    #[test]
    fn enrichment_applies_exactly_once() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let (id, _) = store
            .upsert_event(&raw("https://example.org/a", "T", now), now, now)
            .unwrap();
        assert!(store.apply_enrichment(&id, &enrichment(), now).unwrap());
        assert!(!store.apply_enrichment(&id, &enrichment(), now).unwrap());
        let event = store.get_event(&id).unwrap().unwrap();
        assert_eq!(event.category, Some(Category::Protest));
        assert!(event.is_enriched());
    }

    #[test]
    fn cluster_cas_rejects_stale_version() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let (id, _) = store
            .upsert_event(&raw("https://example.org/a", "T", now), now, now)
            .unwrap();
        let event = store.get_event(&id).unwrap().unwrap();
        assert!(
            store
                .set_cluster_assignment(&id, Some("c1"), 2, true, 0.5, event.row_version)
                .unwrap()
        );
        // stale version: the first CAS bumped it
        assert!(
            !store
                .set_cluster_assignment(&id, Some("c2"), 3, true, 0.5, event.row_version)
                .unwrap()
        );
    }

    #[test]
    fn soft_delete_hides_event_and_purge_removes_it() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let old = now - Duration::days(40);
        let (id, _) = store
            .upsert_event(&raw("https://example.org/old", "Old", old), old, old)
            .unwrap();
        let affected = store
            .soft_delete_events_before(now - Duration::days(30), now)
            .unwrap();
        assert_eq!(affected.len(), 1);
        assert_eq!(affected[0].0, id);
        assert!(store.get_event(&id).unwrap().is_none());
        let purged = store
            .purge_soft_deleted_before(now + Duration::days(8))
            .unwrap();
        assert_eq!(purged, 1);
    }

    #[test]
    fn list_events_filters_and_orders() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        for (i, title) in ["a", "b", "c"].iter().enumerate() {
            let t = now - Duration::hours(i as i64);
            let (id, _) = store
                .upsert_event(&raw(&format!("https://e.org/{title}"), title, t), t, t)
                .unwrap();
            store.apply_enrichment(&id, &enrichment(), t).unwrap();
        }
        let (rows, total) = store
            .list_events(&EventFilters {
                category: Some("protest".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 3);
        // newest first
        assert!(rows[0].timestamp >= rows[1].timestamp);
    }

    #[test]
    fn tenancy_scopes_dossiers() {
        let store = Store::open_in_memory().unwrap();
        store.create_org("org-a", "A", "").unwrap();
        store.create_org("org-b", "B", "").unwrap();
        let d = Dossier {
            id: "d1".into(),
            org_id: "org-a".into(),
            name: "Brussels".into(),
            dossier_type: DossierType::Location,
            description: String::new(),
            aliases: Vec::new(),
            tags: Vec::new(),
            notes: String::new(),
            known_lat: None,
            known_lon: None,
            event_count: 0,
            last_event_at: None,
            count_7d: 0,
            count_30d: 0,
            category_breakdown: HashMap::new(),
            sentiment_breakdown: HashMap::new(),
            created_at: String::new(),
            updated_at: String::new(),
        };
        store.create_dossier(&d).unwrap();
        assert!(store.get_dossier("org-a", "d1").unwrap().is_some());
        assert!(store.get_dossier("org-b", "d1").unwrap().is_none());
        assert_eq!(store.list_dossiers("org-b").unwrap().len(), 0);
        // zero dossiers means zero counts, never nulls
        assert_eq!(store.dossier_counts("org-b").unwrap(), (0, 0));
    }

    #[test]
    fn deleting_user_anonymizes_audit() {
        let store = Store::open_in_memory().unwrap();
        store.create_org("org-a", "A", "").unwrap();
        store.create_user("u1", "u1@example.org", "x").unwrap();
        store
            .append_audit(&AuditRecord {
                id: "a1".into(),
                org_id: "org-a".into(),
                user_id: Some("u1".into()),
                user_email: Some("u1@example.org".into()),
                action: AuditAction::Create,
                object_type: "dossier".into(),
                object_id: None,
                description: String::new(),
                metadata: serde_json::json!({}),
                ip_address: None,
                user_agent: None,
                timestamp: fmt_ts(Utc::now()),
            })
            .unwrap();
        assert!(store.delete_user("u1").unwrap());
        let (rows, total) = store
            .list_audit("org-a", &AuditQuery::default())
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].user_id, None);
        assert_eq!(rows[0].user_email.as_deref(), Some("u1@example.org"));
    }

    #[test]
    fn fusion_flag_is_exclusive_until_expiry() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.try_acquire_flag("fusion_in_progress", 60).unwrap());
        assert!(!store.try_acquire_flag("fusion_in_progress", 60).unwrap());
        store.release_flag("fusion_in_progress").unwrap();
        assert!(store.try_acquire_flag("fusion_in_progress", 60).unwrap());
    }

    #[test]
    fn org_settings_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        store.create_org("org-a", "A", "").unwrap();
        assert!(store.get_org_settings("org-a").unwrap().is_none());
        let mut settings = OrgSettings::defaults("org-a");
        settings.high_priority_threshold = 0.9;
        store.put_org_settings(&settings).unwrap();
        let read = store.get_org_settings("org-a").unwrap().unwrap();
        assert_eq!(read.high_priority_threshold, 0.9);
        assert!(store.delete_org_settings("org-a").unwrap());
    }
}
