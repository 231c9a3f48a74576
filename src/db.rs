use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, params};
use serde::de::DeserializeOwned;

use crate::error::PipelineError;
use crate::models::{
    ExtractedProposal, Proposal, ProposalStatus, Rfp, RfpStatus, SynthesizedRfp, Vendor,
};

type Result<T> = std::result::Result<T, PipelineError>;

/// SQLite-backed store shared between the CLI and the watcher's
/// per-message tasks. The connection is guarded by a mutex; every call
/// locks, runs one statement batch, and unlocks.
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    pub fn open() -> Result<Self> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PipelineError::Other(format!("cannot create data dir: {e}")))?;
        }
        Self::open_at(&path)
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("TENDER_DB") {
            return PathBuf::from(path);
        }
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "tender") {
            proj_dirs.data_dir().join("tender.db")
        } else {
            PathBuf::from("tender.db")
        }
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means another handle panicked mid-statement;
        // the connection itself is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn init(&self) -> Result<()> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS vendors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                contact_person TEXT,
                phone TEXT,
                address TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS rfps (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                budget REAL,
                deadline TEXT,
                requirements TEXT NOT NULL DEFAULT '[]',
                payment_terms TEXT,
                warranty TEXT,
                status TEXT NOT NULL DEFAULT 'draft' CHECK (status IN ('draft', 'sent', 'closed')),
                original_text TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- No uniqueness on (rfp_id, vendor_id): vendors may submit
            -- revised proposals for the same RFP.
            CREATE TABLE IF NOT EXISTS proposals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rfp_id INTEGER NOT NULL REFERENCES rfps(id),
                vendor_id INTEGER NOT NULL REFERENCES vendors(id),
                email_body TEXT NOT NULL,
                extracted_data TEXT NOT NULL DEFAULT '{}',
                pricing TEXT NOT NULL DEFAULT '{}',
                terms TEXT NOT NULL DEFAULT '{}',
                ai_score REAL,
                ai_summary TEXT,
                ai_recommendation TEXT,
                status TEXT NOT NULL DEFAULT 'received'
                    CHECK (status IN ('received', 'reviewed', 'accepted', 'rejected')),
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_proposals_rfp ON proposals(rfp_id);
            CREATE INDEX IF NOT EXISTS idx_proposals_vendor ON proposals(vendor_id);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='proposals'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(PipelineError::Other(
                "database not initialized; run 'tender init' first".to_string(),
            ));
        }
        Ok(())
    }

    // --- Vendor operations ---

    pub fn create_vendor(
        &self,
        name: &str,
        email: &str,
        contact_person: Option<&str>,
        phone: Option<&str>,
        address: Option<&str>,
    ) -> Result<Vendor> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO vendors (name, email, contact_person, phone, address)
             VALUES (?1, LOWER(?2), ?3, ?4, ?5)",
            params![name, email, contact_person, phone, address],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_vendor(id)?
            .ok_or_else(|| PipelineError::Other("vendor row vanished after insert".into()))
    }

    pub fn get_vendor(&self, id: i64) -> Result<Option<Vendor>> {
        let result = self.conn().query_row(
            "SELECT id, name, email, contact_person, phone, address, created_at
             FROM vendors WHERE id = ?1",
            [id],
            Self::row_to_vendor,
        );
        optional(result)
    }

    pub fn find_vendor_by_email(&self, email: &str) -> Result<Option<Vendor>> {
        let result = self.conn().query_row(
            "SELECT id, name, email, contact_person, phone, address, created_at
             FROM vendors WHERE email = LOWER(?1)",
            [email],
            Self::row_to_vendor,
        );
        optional(result)
    }

    pub fn list_vendors(&self) -> Result<Vec<Vendor>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, email, contact_person, phone, address, created_at
             FROM vendors ORDER BY name",
        )?;
        let rows = stmt.query_map([], Self::row_to_vendor)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn row_to_vendor(row: &rusqlite::Row) -> rusqlite::Result<Vendor> {
        Ok(Vendor {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            contact_person: row.get(3)?,
            phone: row.get(4)?,
            address: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    // --- RFP operations ---

    pub fn create_rfp(&self, fields: &SynthesizedRfp, original_text: &str) -> Result<Rfp> {
        let requirements = to_json(&fields.requirements)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO rfps (title, description, budget, deadline, requirements,
                               payment_terms, warranty, status, original_text)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'draft', ?8)",
            params![
                fields.title,
                fields.description,
                fields.budget,
                fields.deadline,
                requirements,
                fields.payment_terms,
                fields.warranty,
                original_text,
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_rfp(id)?
            .ok_or_else(|| PipelineError::Other("rfp row vanished after insert".into()))
    }

    pub fn get_rfp(&self, id: i64) -> Result<Option<Rfp>> {
        let result = self.conn().query_row(
            "SELECT id, title, description, budget, deadline, requirements,
                    payment_terms, warranty, status, original_text, created_at
             FROM rfps WHERE id = ?1",
            [id],
            Self::row_to_rfp,
        );
        optional(result)
    }

    pub fn list_rfps(&self, status: Option<RfpStatus>) -> Result<Vec<Rfp>> {
        let conn = self.conn();
        let mut sql = String::from(
            "SELECT id, title, description, budget, deadline, requirements,
                    payment_terms, warranty, status, original_text, created_at
             FROM rfps",
        );
        if status.is_some() {
            sql.push_str(" WHERE status = ?1");
        }
        sql.push_str(" ORDER BY id");

        let mut stmt = conn.prepare(&sql)?;
        let rows = if let Some(s) = status {
            stmt.query_map([s.as_str()], Self::row_to_rfp)?
        } else {
            stmt.query_map([], Self::row_to_rfp)?
        };
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn set_rfp_status(&self, id: i64, status: RfpStatus) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE rfps SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        if changed == 0 {
            return Err(PipelineError::Other(format!("no RFP with id {id}")));
        }
        Ok(())
    }

    fn row_to_rfp(row: &rusqlite::Row) -> rusqlite::Result<Rfp> {
        let status: String = row.get(8)?;
        Ok(Rfp {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            budget: row.get(3)?,
            deadline: row.get(4)?,
            requirements: json_col(row, 5)?,
            payment_terms: row.get(6)?,
            warranty: row.get(7)?,
            status: RfpStatus::parse(&status).ok_or_else(|| bad_col(8, &status))?,
            original_text: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    // --- Proposal operations ---

    /// Records one new proposal with status `received`. Pricing and the four
    /// term fields are copied verbatim from the extracted payload; duplicate
    /// submissions for the same (rfp, vendor) pair are accepted.
    pub fn create_proposal(
        &self,
        rfp_id: i64,
        vendor_id: i64,
        email_body: &str,
        extracted: &ExtractedProposal,
    ) -> Result<Proposal> {
        let extracted_json = to_json(extracted)?;
        let pricing_json = to_json(&extracted.pricing)?;
        let terms_json = to_json(&extracted.terms())?;

        let conn = self.conn();
        conn.execute(
            "INSERT INTO proposals (rfp_id, vendor_id, email_body, extracted_data,
                                    pricing, terms, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'received')",
            params![rfp_id, vendor_id, email_body, extracted_json, pricing_json, terms_json],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_proposal(id)?
            .ok_or_else(|| PipelineError::Other("proposal row vanished after insert".into()))
    }

    pub fn get_proposal(&self, id: i64) -> Result<Option<Proposal>> {
        let result = self.conn().query_row(
            &format!("{PROPOSAL_SELECT} WHERE p.id = ?1"),
            [id],
            Self::row_to_proposal,
        );
        optional(result)
    }

    pub fn list_proposals(&self, rfp_id: i64) -> Result<Vec<Proposal>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{PROPOSAL_SELECT} WHERE p.rfp_id = ?1 ORDER BY p.id"))?;
        let rows = stmt.query_map([rfp_id], Self::row_to_proposal)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count_proposals(&self, rfp_id: i64, vendor_id: i64) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM proposals WHERE rfp_id = ?1 AND vendor_id = ?2",
            params![rfp_id, vendor_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Comparison Engine write-back. Only the three derived score fields are
    /// touched; everything else on the proposal stays as recorded.
    pub fn set_proposal_scores(
        &self,
        id: i64,
        score: f64,
        summary: &str,
        recommendation: &str,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE proposals SET ai_score = ?1, ai_summary = ?2, ai_recommendation = ?3
             WHERE id = ?4",
            params![score, summary, recommendation, id],
        )?;
        Ok(())
    }

    pub fn set_proposal_status(&self, id: i64, status: ProposalStatus) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE proposals SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        if changed == 0 {
            return Err(PipelineError::Other(format!("no proposal with id {id}")));
        }
        Ok(())
    }

    fn row_to_proposal(row: &rusqlite::Row) -> rusqlite::Result<Proposal> {
        let status: String = row.get(11)?;
        Ok(Proposal {
            id: row.get(0)?,
            rfp_id: row.get(1)?,
            vendor_id: row.get(2)?,
            vendor_name: row.get(3)?,
            email_body: row.get(4)?,
            extracted_data: json_col(row, 5)?,
            pricing: json_col(row, 6)?,
            terms: json_col(row, 7)?,
            ai_score: row.get(8)?,
            ai_summary: row.get(9)?,
            ai_recommendation: row.get(10)?,
            status: ProposalStatus::parse(&status).ok_or_else(|| bad_col(11, &status))?,
            created_at: row.get(12)?,
        })
    }
}

const PROPOSAL_SELECT: &str = "SELECT p.id, p.rfp_id, p.vendor_id, v.name, p.email_body,
        p.extracted_data, p.pricing, p.terms, p.ai_score, p.ai_summary,
        p.ai_recommendation, p.status, p.created_at
     FROM proposals p
     LEFT JOIN vendors v ON p.vendor_id = v.id";

fn optional<T>(result: rusqlite::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| PipelineError::Other(format!("cannot encode json column: {e}")))
}

fn json_col<T: DeserializeOwned>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn bad_col(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("invalid status value: {value}").into(),
    )
}
