//! PostgreSQL store.
//!
//! All SQL is runtime-checked (`sqlx::query`, not `sqlx::query!`) so building the crate never
//! needs a live database. Lockable saves run in one transaction: the prior row is read
//! `FOR UPDATE` for the audit snapshot, then an `INSERT … ON CONFLICT DO UPDATE … WHERE` applies
//! the lock transition against the conflicting row itself. An empty `RETURNING` means the row
//! was locked and the actor is not an administrator.

use super::{observe, truncate_statement, RecordStore, SaveOutcome, VisitUpsert};
use crate::access::Role;
use crate::audit::{AuditAction, AuditEntry, AuditSink, UnlockEvent};
use crate::config::CoreConfig;
use crate::constants::{LOGGED_QUERY_PREFIX_LEN, POSTGRES_SCHEMA};
use crate::error::{StoreError, StoreResult};
use crate::labs::LabKind;
use crate::lock::{LockState, LockTable, SaveIntent};
use crate::records::{
    AcceptanceContent, DateWindow, LabAcceptance, LabKey, LabOrder, LabResults, Morphology, Visit,
    VisitKey,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use prism_types::{NonEmptyText, RecordNumber, VisitId};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const VISIT_COLUMNS: &str = "cr, labid, date_received, name, age, sex, faculty, jr, sr, sample, \
     tlc, bm_quality, blasts, eos, plasma, right_imprint, left_imprint, suspicion, created_at, \
     updated_at";
const MORPHOLOGY_COLUMNS: &str = "cr, labid, report, locked, updated_at";
const ORDER_COLUMNS: &str = "cr, labid, lab, panels, payment, notes, created_at, updated_at";
const ACCEPTANCE_COLUMNS: &str =
    "cr, labid, lab, unique_lab_id, panel_status, notes, locked, locked_at, locked_by, updated_at";
const RESULTS_COLUMNS: &str = "cr, labid, lab, panel_results, locked, locked_at, locked_by, updated_at";

pub struct PgStore {
    pool: PgPool,
    cfg: Arc<CoreConfig>,
}

impl PgStore {
    pub fn new(pool: PgPool, cfg: Arc<CoreConfig>) -> Self {
        Self { pool, cfg }
    }

    pub async fn connect(database_url: &str, cfg: Arc<CoreConfig>) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .idle_timeout(Duration::from_secs(30))
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self::new(pool, cfg))
    }

    /// Create every table and index if missing.
    pub async fn migrate(&self) -> StoreResult<()> {
        self.timed(POSTGRES_SCHEMA, self.pool.execute(POSTGRES_SCHEMA))
            .await
            .map(|_| ())
    }

    async fn timed<T, F>(&self, sql: &str, op: F) -> StoreResult<T>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        let label = truncate_statement(sql, LOGGED_QUERY_PREFIX_LEN);
        observe(&label, self.cfg.slow_query_threshold(), op)
            .await
            .map_err(|e| {
                tracing::error!("DB query error: {} query: {}", e, label);
                StoreError::Database(e)
            })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// `ILIKE` pattern matching `needle` as a literal substring.
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn column<T, E: Display>(name: &str, parsed: Result<T, E>) -> StoreResult<T> {
    parsed.map_err(|e| StoreError::Decode(format!("{name}: {e}")))
}

fn lock_state(
    locked: bool,
    locked_at: Option<DateTime<Utc>>,
    locked_by: Option<String>,
) -> StoreResult<LockState> {
    let locked_by = locked_by
        .map(|role| column("locked_by", role.parse::<Role>()))
        .transpose()?;
    Ok(LockState {
        locked,
        locked_at,
        locked_by,
    })
}

#[derive(sqlx::FromRow)]
struct VisitRow {
    cr: String,
    labid: String,
    date_received: NaiveDate,
    name: String,
    age: String,
    sex: String,
    faculty: String,
    jr: Option<String>,
    sr: Option<String>,
    sample: String,
    tlc: Option<String>,
    bm_quality: Option<String>,
    blasts: Option<String>,
    eos: Option<String>,
    plasma: Option<String>,
    right_imprint: Option<String>,
    left_imprint: Option<String>,
    suspicion: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<VisitRow> for Visit {
    type Error = StoreError;

    fn try_from(row: VisitRow) -> StoreResult<Self> {
        Ok(Visit {
            record_number: column("cr", RecordNumber::parse(&row.cr))?,
            visit_id: column("labid", VisitId::parse(&row.labid))?,
            date_received: row.date_received,
            name: column("name", NonEmptyText::new(&row.name))?,
            age: column("age", NonEmptyText::new(&row.age))?,
            sex: column("sex", NonEmptyText::new(&row.sex))?,
            faculty: column("faculty", NonEmptyText::new(&row.faculty))?,
            jr: row.jr,
            sr: row.sr,
            sample: column("sample", NonEmptyText::new(&row.sample))?,
            tlc: row.tlc,
            bm_quality: row.bm_quality,
            blasts: row.blasts,
            eos: row.eos,
            plasma: row.plasma,
            right_imprint: row.right_imprint,
            left_imprint: row.left_imprint,
            suspicion: row.suspicion,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MorphologyRow {
    cr: String,
    labid: String,
    report: String,
    locked: bool,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MorphologyRow> for Morphology {
    type Error = StoreError;

    fn try_from(row: MorphologyRow) -> StoreResult<Self> {
        Ok(Morphology {
            record_number: column("cr", RecordNumber::parse(&row.cr))?,
            visit_id: column("labid", VisitId::parse(&row.labid))?,
            report: row.report,
            lock: lock_state(row.locked, None, None)?,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    cr: String,
    labid: String,
    lab: String,
    panels: String,
    payment: String,
    notes: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for LabOrder {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> StoreResult<Self> {
        Ok(LabOrder {
            record_number: column("cr", RecordNumber::parse(&row.cr))?,
            visit_id: column("labid", VisitId::parse(&row.labid))?,
            lab: column("lab", row.lab.parse::<LabKind>())?,
            panels: row.panels,
            payment: row.payment,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AcceptanceRow {
    cr: String,
    labid: String,
    lab: String,
    unique_lab_id: Option<String>,
    panel_status: serde_json::Value,
    notes: String,
    locked: bool,
    locked_at: Option<DateTime<Utc>>,
    locked_by: Option<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AcceptanceRow> for LabAcceptance {
    type Error = StoreError;

    fn try_from(row: AcceptanceRow) -> StoreResult<Self> {
        Ok(LabAcceptance {
            record_number: column("cr", RecordNumber::parse(&row.cr))?,
            visit_id: column("labid", VisitId::parse(&row.labid))?,
            lab: column("lab", row.lab.parse::<LabKind>())?,
            content: AcceptanceContent {
                accession: row.unique_lab_id,
                panel_status: row.panel_status,
                notes: row.notes,
            },
            lock: lock_state(row.locked, row.locked_at, row.locked_by)?,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResultsRow {
    cr: String,
    labid: String,
    lab: String,
    panel_results: serde_json::Value,
    locked: bool,
    locked_at: Option<DateTime<Utc>>,
    locked_by: Option<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ResultsRow> for LabResults {
    type Error = StoreError;

    fn try_from(row: ResultsRow) -> StoreResult<Self> {
        Ok(LabResults {
            record_number: column("cr", RecordNumber::parse(&row.cr))?,
            visit_id: column("labid", VisitId::parse(&row.labid))?,
            lab: column("lab", row.lab.parse::<LabKind>())?,
            panel_results: row.panel_results,
            lock: lock_state(row.locked, row.locked_at, row.locked_by)?,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UnlockRow {
    id: Uuid,
    cr: String,
    labid: String,
    table_name: String,
    lab: Option<String>,
    reason: String,
    unlocked_by: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UnlockRow> for UnlockEvent {
    type Error = StoreError;

    fn try_from(row: UnlockRow) -> StoreResult<Self> {
        Ok(UnlockEvent {
            id: row.id,
            record_number: column("cr", RecordNumber::parse(&row.cr))?,
            visit_id: column("labid", VisitId::parse(&row.labid))?,
            table: LockTable::parse(&row.table_name)
                .ok_or_else(|| StoreError::Decode(format!("table_name: {}", row.table_name)))?,
            lab: row
                .lab
                .map(|lab| column("lab", lab.parse::<LabKind>()))
                .transpose()?,
            reason: row.reason,
            unlocked_by: column("unlocked_by", row.unlocked_by.parse::<Role>())?,
            at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    role: String,
    action: String,
    cr: String,
    labid: Option<String>,
    lab: Option<String>,
    old_data: Option<serde_json::Value>,
    new_data: Option<serde_json::Value>,
    old_fingerprint: Option<String>,
    new_fingerprint: Option<String>,
    ip: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = StoreError;

    fn try_from(row: AuditRow) -> StoreResult<Self> {
        Ok(AuditEntry {
            id: row.id,
            role: column("role", row.role.parse::<Role>())?,
            action: AuditAction::parse(&row.action)
                .ok_or_else(|| StoreError::Decode(format!("action: {}", row.action)))?,
            record_number: column("cr", RecordNumber::parse(&row.cr))?,
            visit_id: row
                .labid
                .map(|id| column("labid", VisitId::parse(id)))
                .transpose()?,
            lab: row
                .lab
                .map(|lab| column("lab", lab.parse::<LabKind>()))
                .transpose()?,
            old_snapshot: row.old_data,
            new_snapshot: row.new_data,
            old_fingerprint: row.old_fingerprint,
            new_fingerprint: row.new_fingerprint,
            origin: row.ip,
            at: row.created_at,
        })
    }
}

fn decode_all<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn decode_one<R, T>(row: Option<R>) -> StoreResult<Option<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    row.map(T::try_from).transpose()
}

#[async_trait]
impl RecordStore for PgStore {
    async fn upsert_visit(&self, visit: &Visit) -> StoreResult<VisitUpsert> {
        let select = format!(
            "SELECT {VISIT_COLUMNS} FROM patients WHERE cr = $1 AND labid = $2 FOR UPDATE"
        );
        let upsert = format!(
            r#"
            INSERT INTO patients
                (cr, labid, date_received, name, age, sex, faculty, jr, sr,
                 sample, tlc, bm_quality, blasts, eos, plasma,
                 right_imprint, left_imprint, suspicion, created_at, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20)
            ON CONFLICT (cr, labid) DO UPDATE SET
                date_received = EXCLUDED.date_received,
                name          = EXCLUDED.name,
                age           = EXCLUDED.age,
                sex           = EXCLUDED.sex,
                faculty       = EXCLUDED.faculty,
                jr            = EXCLUDED.jr,
                sr            = EXCLUDED.sr,
                sample        = EXCLUDED.sample,
                tlc           = EXCLUDED.tlc,
                bm_quality    = EXCLUDED.bm_quality,
                blasts        = EXCLUDED.blasts,
                eos           = EXCLUDED.eos,
                plasma        = EXCLUDED.plasma,
                right_imprint = EXCLUDED.right_imprint,
                left_imprint  = EXCLUDED.left_imprint,
                suspicion     = EXCLUDED.suspicion,
                updated_at    = EXCLUDED.updated_at
            RETURNING {VISIT_COLUMNS}
            "#
        );

        let mut tx = self.pool.begin().await?;
        let previous = self
            .timed(
                &select,
                sqlx::query_as::<_, VisitRow>(&select)
                    .bind(visit.record_number.as_str())
                    .bind(visit.visit_id.as_str())
                    .fetch_optional(&mut *tx),
            )
            .await?;
        let saved = self
            .timed(
                &upsert,
                sqlx::query_as::<_, VisitRow>(&upsert)
                    .bind(visit.record_number.as_str())
                    .bind(visit.visit_id.as_str())
                    .bind(visit.date_received)
                    .bind(visit.name.as_str())
                    .bind(visit.age.as_str())
                    .bind(visit.sex.as_str())
                    .bind(visit.faculty.as_str())
                    .bind(visit.jr.as_deref())
                    .bind(visit.sr.as_deref())
                    .bind(visit.sample.as_str())
                    .bind(visit.tlc.as_deref())
                    .bind(visit.bm_quality.as_deref())
                    .bind(visit.blasts.as_deref())
                    .bind(visit.eos.as_deref())
                    .bind(visit.plasma.as_deref())
                    .bind(visit.right_imprint.as_deref())
                    .bind(visit.left_imprint.as_deref())
                    .bind(visit.suspicion.as_deref())
                    .bind(visit.created_at)
                    .bind(visit.updated_at)
                    .fetch_one(&mut *tx),
            )
            .await?;
        tx.commit().await?;

        Ok(VisitUpsert {
            previous: decode_one(previous)?,
            saved: saved.try_into()?,
        })
    }

    async fn find_visit(&self, key: &VisitKey) -> StoreResult<Option<Visit>> {
        let sql = format!("SELECT {VISIT_COLUMNS} FROM patients WHERE cr = $1 AND labid = $2");
        let row = self
            .timed(
                &sql,
                sqlx::query_as::<_, VisitRow>(&sql)
                    .bind(key.record_number.as_str())
                    .bind(key.visit_id.as_str())
                    .fetch_optional(&self.pool),
            )
            .await?;
        decode_one(row)
    }

    async fn visits_for_record(&self, record_number: &RecordNumber) -> StoreResult<Vec<Visit>> {
        let sql = format!(
            "SELECT {VISIT_COLUMNS} FROM patients WHERE cr = $1 ORDER BY date_received ASC, id ASC"
        );
        let rows = self
            .timed(
                &sql,
                sqlx::query_as::<_, VisitRow>(&sql)
                    .bind(record_number.as_str())
                    .fetch_all(&self.pool),
            )
            .await?;
        decode_all(rows)
    }

    async fn visits_for_records(
        &self,
        record_numbers: &[RecordNumber],
    ) -> StoreResult<Vec<Visit>> {
        let sql = format!("SELECT {VISIT_COLUMNS} FROM patients WHERE cr = ANY($1) ORDER BY id");
        let keys: Vec<String> = record_numbers.iter().map(|r| r.to_string()).collect();
        let rows = self
            .timed(
                &sql,
                sqlx::query_as::<_, VisitRow>(&sql)
                    .bind(keys)
                    .fetch_all(&self.pool),
            )
            .await?;
        decode_all(rows)
    }

    async fn search_visits(&self, needle: &str, limit: usize) -> StoreResult<Vec<Visit>> {
        let sql = format!(
            r#"
            SELECT DISTINCT ON (cr) {VISIT_COLUMNS}
            FROM patients
            WHERE cr ILIKE $1 OR labid ILIKE $1 OR name ILIKE $1
            ORDER BY cr, date_received DESC, id DESC
            LIMIT $2
            "#
        );
        let rows = self
            .timed(
                &sql,
                sqlx::query_as::<_, VisitRow>(&sql)
                    .bind(like_pattern(needle))
                    .bind(sql_limit(limit))
                    .fetch_all(&self.pool),
            )
            .await?;
        decode_all(rows)
    }

    async fn find_morphology(&self, key: &VisitKey) -> StoreResult<Option<Morphology>> {
        let sql =
            format!("SELECT {MORPHOLOGY_COLUMNS} FROM morphology WHERE cr = $1 AND labid = $2");
        let row = self
            .timed(
                &sql,
                sqlx::query_as::<_, MorphologyRow>(&sql)
                    .bind(key.record_number.as_str())
                    .bind(key.visit_id.as_str())
                    .fetch_optional(&self.pool),
            )
            .await?;
        decode_one(row)
    }

    async fn save_morphology(
        &self,
        key: &VisitKey,
        report: &str,
        intent: &SaveIntent,
    ) -> StoreResult<SaveOutcome<Morphology>> {
        let select = format!(
            "SELECT {MORPHOLOGY_COLUMNS} FROM morphology WHERE cr = $1 AND labid = $2 FOR UPDATE"
        );
        let upsert = format!(
            r#"
            INSERT INTO morphology (cr, labid, report, locked, updated_at)
            VALUES ($1, $2, $3, TRUE, $4)
            ON CONFLICT (cr, labid) DO UPDATE SET
                report     = EXCLUDED.report,
                locked     = TRUE,
                updated_at = EXCLUDED.updated_at
            WHERE morphology.locked = FALSE OR $5
            RETURNING {MORPHOLOGY_COLUMNS}
            "#
        );

        let mut tx = self.pool.begin().await?;
        let previous = self
            .timed(
                &select,
                sqlx::query_as::<_, MorphologyRow>(&select)
                    .bind(key.record_number.as_str())
                    .bind(key.visit_id.as_str())
                    .fetch_optional(&mut *tx),
            )
            .await?;
        let saved = self
            .timed(
                &upsert,
                sqlx::query_as::<_, MorphologyRow>(&upsert)
                    .bind(key.record_number.as_str())
                    .bind(key.visit_id.as_str())
                    .bind(report)
                    .bind(intent.at)
                    .bind(intent.actor.is_admin())
                    .fetch_optional(&mut *tx),
            )
            .await?;

        let Some(saved) = saved else {
            return Ok(SaveOutcome::Locked);
        };
        tx.commit().await?;

        Ok(SaveOutcome::Saved {
            previous: decode_one(previous)?,
            current: saved.try_into()?,
        })
    }

    async fn morphology_for_record(
        &self,
        record_number: &RecordNumber,
    ) -> StoreResult<Vec<Morphology>> {
        let sql = format!("SELECT {MORPHOLOGY_COLUMNS} FROM morphology WHERE cr = $1 ORDER BY id");
        let rows = self
            .timed(
                &sql,
                sqlx::query_as::<_, MorphologyRow>(&sql)
                    .bind(record_number.as_str())
                    .fetch_all(&self.pool),
            )
            .await?;
        decode_all(rows)
    }

    async fn find_order(&self, key: &LabKey) -> StoreResult<Option<LabOrder>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM lab_orders WHERE cr = $1 AND labid = $2 AND lab = $3"
        );
        let row = self
            .timed(
                &sql,
                sqlx::query_as::<_, OrderRow>(&sql)
                    .bind(key.visit.record_number.as_str())
                    .bind(key.visit.visit_id.as_str())
                    .bind(key.lab.as_str())
                    .fetch_optional(&self.pool),
            )
            .await?;
        decode_one(row)
    }

    async fn save_order(&self, order: &LabOrder) -> StoreResult<LabOrder> {
        let sql = format!(
            r#"
            INSERT INTO lab_orders (cr, labid, lab, panels, payment, notes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (cr, labid, lab) DO UPDATE SET
                panels     = EXCLUDED.panels,
                payment    = EXCLUDED.payment,
                notes      = EXCLUDED.notes,
                updated_at = EXCLUDED.updated_at
            RETURNING {ORDER_COLUMNS}
            "#
        );
        let row = self
            .timed(
                &sql,
                sqlx::query_as::<_, OrderRow>(&sql)
                    .bind(order.record_number.as_str())
                    .bind(order.visit_id.as_str())
                    .bind(order.lab.as_str())
                    .bind(&order.panels)
                    .bind(&order.payment)
                    .bind(&order.notes)
                    .bind(order.created_at)
                    .bind(order.updated_at)
                    .fetch_one(&self.pool),
            )
            .await?;
        row.try_into()
    }

    async fn orders_for_record(&self, record_number: &RecordNumber) -> StoreResult<Vec<LabOrder>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM lab_orders WHERE cr = $1 ORDER BY id");
        let rows = self
            .timed(
                &sql,
                sqlx::query_as::<_, OrderRow>(&sql)
                    .bind(record_number.as_str())
                    .fetch_all(&self.pool),
            )
            .await?;
        decode_all(rows)
    }

    async fn orders_by_lab(
        &self,
        lab: LabKind,
        window: Option<DateWindow>,
    ) -> StoreResult<Vec<LabOrder>> {
        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM lab_orders
            WHERE lab = $1
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at < $3)
            ORDER BY created_at DESC, id DESC
            "#
        );
        let (start, end) = match window.map(|w| w.bounds()) {
            Some((start, end)) => (Some(start), end),
            None => (None, None),
        };
        let rows = self
            .timed(
                &sql,
                sqlx::query_as::<_, OrderRow>(&sql)
                    .bind(lab.as_str())
                    .bind(start)
                    .bind(end)
                    .fetch_all(&self.pool),
            )
            .await?;
        decode_all(rows)
    }

    async fn find_acceptance(&self, key: &LabKey) -> StoreResult<Option<LabAcceptance>> {
        let sql = format!(
            "SELECT {ACCEPTANCE_COLUMNS} FROM lab_acceptance WHERE cr = $1 AND labid = $2 AND lab = $3"
        );
        let row = self
            .timed(
                &sql,
                sqlx::query_as::<_, AcceptanceRow>(&sql)
                    .bind(key.visit.record_number.as_str())
                    .bind(key.visit.visit_id.as_str())
                    .bind(key.lab.as_str())
                    .fetch_optional(&self.pool),
            )
            .await?;
        decode_one(row)
    }

    async fn accession_owner(
        &self,
        lab: LabKind,
        accession: &str,
        exclude: &VisitKey,
    ) -> StoreResult<Option<VisitKey>> {
        const SQL: &str = r#"
            SELECT cr, labid FROM lab_acceptance
            WHERE lab = $1 AND unique_lab_id = $2
              AND NOT (cr = $3 AND labid = $4)
            LIMIT 1
        "#;
        let row = self
            .timed(
                SQL,
                sqlx::query_as::<_, (String, String)>(SQL)
                    .bind(lab.as_str())
                    .bind(accession)
                    .bind(exclude.record_number.as_str())
                    .bind(exclude.visit_id.as_str())
                    .fetch_optional(&self.pool),
            )
            .await?;

        row.map(|(cr, labid)| -> StoreResult<VisitKey> {
            Ok(VisitKey::new(
                column("cr", RecordNumber::parse(cr))?,
                column("labid", VisitId::parse(labid))?,
            ))
        })
        .transpose()
    }

    async fn save_acceptance(
        &self,
        key: &LabKey,
        content: &AcceptanceContent,
        intent: &SaveIntent,
    ) -> StoreResult<SaveOutcome<LabAcceptance>> {
        let select = format!(
            "SELECT {ACCEPTANCE_COLUMNS} FROM lab_acceptance \
             WHERE cr = $1 AND labid = $2 AND lab = $3 FOR UPDATE"
        );
        let upsert = format!(
            r#"
            INSERT INTO lab_acceptance
                (cr, labid, lab, unique_lab_id, panel_status, notes,
                 locked, locked_at, locked_by, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7, $8, $7)
            ON CONFLICT (cr, labid, lab) DO UPDATE SET
                unique_lab_id = EXCLUDED.unique_lab_id,
                panel_status  = EXCLUDED.panel_status,
                notes         = EXCLUDED.notes,
                locked        = TRUE,
                locked_at     = CASE WHEN lab_acceptance.locked THEN lab_acceptance.locked_at ELSE EXCLUDED.locked_at END,
                locked_by     = CASE WHEN lab_acceptance.locked THEN lab_acceptance.locked_by ELSE EXCLUDED.locked_by END,
                updated_at    = EXCLUDED.updated_at
            WHERE lab_acceptance.locked = FALSE OR $9
            RETURNING {ACCEPTANCE_COLUMNS}
            "#
        );

        let mut tx = self.pool.begin().await?;
        let previous = self
            .timed(
                &select,
                sqlx::query_as::<_, AcceptanceRow>(&select)
                    .bind(key.visit.record_number.as_str())
                    .bind(key.visit.visit_id.as_str())
                    .bind(key.lab.as_str())
                    .fetch_optional(&mut *tx),
            )
            .await?;
        let saved = self
            .timed(
                &upsert,
                sqlx::query_as::<_, AcceptanceRow>(&upsert)
                    .bind(key.visit.record_number.as_str())
                    .bind(key.visit.visit_id.as_str())
                    .bind(key.lab.as_str())
                    .bind(content.accession.as_deref())
                    .bind(&content.panel_status)
                    .bind(&content.notes)
                    .bind(intent.at)
                    .bind(intent.actor.as_str())
                    .bind(intent.actor.is_admin())
                    .fetch_optional(&mut *tx),
            )
            .await;

        let saved = match (saved, content.accession.as_deref()) {
            (Ok(row), _) => row,
            (Err(StoreError::Database(err)), Some(accession)) if is_unique_violation(&err) => {
                drop(tx);
                return match self.accession_owner(key.lab, accession, &key.visit).await? {
                    Some(owner) => Err(StoreError::AccessionTaken {
                        owner: owner.record_number,
                    }),
                    None => Err(StoreError::Database(err)),
                };
            }
            (Err(e), _) => return Err(e),
        };

        let Some(saved) = saved else {
            return Ok(SaveOutcome::Locked);
        };
        tx.commit().await?;

        Ok(SaveOutcome::Saved {
            previous: decode_one(previous)?,
            current: saved.try_into()?,
        })
    }

    async fn acceptance_for_record(
        &self,
        record_number: &RecordNumber,
    ) -> StoreResult<Vec<LabAcceptance>> {
        let sql =
            format!("SELECT {ACCEPTANCE_COLUMNS} FROM lab_acceptance WHERE cr = $1 ORDER BY id");
        let rows = self
            .timed(
                &sql,
                sqlx::query_as::<_, AcceptanceRow>(&sql)
                    .bind(record_number.as_str())
                    .fetch_all(&self.pool),
            )
            .await?;
        decode_all(rows)
    }

    async fn acceptance_by_lab(&self, lab: LabKind) -> StoreResult<Vec<LabAcceptance>> {
        let sql =
            format!("SELECT {ACCEPTANCE_COLUMNS} FROM lab_acceptance WHERE lab = $1 ORDER BY id");
        let rows = self
            .timed(
                &sql,
                sqlx::query_as::<_, AcceptanceRow>(&sql)
                    .bind(lab.as_str())
                    .fetch_all(&self.pool),
            )
            .await?;
        decode_all(rows)
    }

    async fn find_results(&self, key: &LabKey) -> StoreResult<Option<LabResults>> {
        let sql = format!(
            "SELECT {RESULTS_COLUMNS} FROM lab_results WHERE cr = $1 AND labid = $2 AND lab = $3"
        );
        let row = self
            .timed(
                &sql,
                sqlx::query_as::<_, ResultsRow>(&sql)
                    .bind(key.visit.record_number.as_str())
                    .bind(key.visit.visit_id.as_str())
                    .bind(key.lab.as_str())
                    .fetch_optional(&self.pool),
            )
            .await?;
        decode_one(row)
    }

    async fn save_results(
        &self,
        key: &LabKey,
        panel_results: &serde_json::Value,
        intent: &SaveIntent,
    ) -> StoreResult<SaveOutcome<LabResults>> {
        let select = format!(
            "SELECT {RESULTS_COLUMNS} FROM lab_results \
             WHERE cr = $1 AND labid = $2 AND lab = $3 FOR UPDATE"
        );
        let upsert = format!(
            r#"
            INSERT INTO lab_results
                (cr, labid, lab, panel_results, locked, locked_at, locked_by, updated_at)
            VALUES ($1, $2, $3, $4, TRUE, $5, $6, $5)
            ON CONFLICT (cr, labid, lab) DO UPDATE SET
                panel_results = EXCLUDED.panel_results,
                locked        = TRUE,
                locked_at     = CASE WHEN lab_results.locked THEN lab_results.locked_at ELSE EXCLUDED.locked_at END,
                locked_by     = CASE WHEN lab_results.locked THEN lab_results.locked_by ELSE EXCLUDED.locked_by END,
                updated_at    = EXCLUDED.updated_at
            WHERE lab_results.locked = FALSE OR $7
            RETURNING {RESULTS_COLUMNS}
            "#
        );

        let mut tx = self.pool.begin().await?;
        let previous = self
            .timed(
                &select,
                sqlx::query_as::<_, ResultsRow>(&select)
                    .bind(key.visit.record_number.as_str())
                    .bind(key.visit.visit_id.as_str())
                    .bind(key.lab.as_str())
                    .fetch_optional(&mut *tx),
            )
            .await?;
        let saved = self
            .timed(
                &upsert,
                sqlx::query_as::<_, ResultsRow>(&upsert)
                    .bind(key.visit.record_number.as_str())
                    .bind(key.visit.visit_id.as_str())
                    .bind(key.lab.as_str())
                    .bind(panel_results)
                    .bind(intent.at)
                    .bind(intent.actor.as_str())
                    .bind(intent.actor.is_admin())
                    .fetch_optional(&mut *tx),
            )
            .await?;

        let Some(saved) = saved else {
            return Ok(SaveOutcome::Locked);
        };
        tx.commit().await?;

        Ok(SaveOutcome::Saved {
            previous: decode_one(previous)?,
            current: saved.try_into()?,
        })
    }

    async fn results_for_record(
        &self,
        record_number: &RecordNumber,
    ) -> StoreResult<Vec<LabResults>> {
        let sql = format!("SELECT {RESULTS_COLUMNS} FROM lab_results WHERE cr = $1 ORDER BY id");
        let rows = self
            .timed(
                &sql,
                sqlx::query_as::<_, ResultsRow>(&sql)
                    .bind(record_number.as_str())
                    .fetch_all(&self.pool),
            )
            .await?;
        decode_all(rows)
    }

    async fn results_by_lab(&self, lab: LabKind) -> StoreResult<Vec<LabResults>> {
        let sql = format!("SELECT {RESULTS_COLUMNS} FROM lab_results WHERE lab = $1 ORDER BY id");
        let rows = self
            .timed(
                &sql,
                sqlx::query_as::<_, ResultsRow>(&sql)
                    .bind(lab.as_str())
                    .fetch_all(&self.pool),
            )
            .await?;
        decode_all(rows)
    }

    async fn unlock(&self, event: &UnlockEvent) -> StoreResult<bool> {
        const INSERT_EVENT: &str = r#"
            INSERT INTO unlock_log (id, cr, labid, table_name, lab, reason, unlocked_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#;

        let update = match (event.table, event.lab) {
            (LockTable::Morphology, _) => {
                "UPDATE morphology SET locked = FALSE WHERE cr = $1 AND labid = $2"
            }
            (LockTable::LabAcceptance, Some(_)) => {
                "UPDATE lab_acceptance SET locked = FALSE WHERE cr = $1 AND labid = $2 AND lab = $3"
            }
            (LockTable::LabResults, Some(_)) => {
                "UPDATE lab_results SET locked = FALSE WHERE cr = $1 AND labid = $2 AND lab = $3"
            }
            (LockTable::LabAcceptance | LockTable::LabResults, None) => return Ok(false),
        };

        let mut tx = self.pool.begin().await?;
        let mut query = sqlx::query(update)
            .bind(event.record_number.as_str())
            .bind(event.visit_id.as_str());
        if let Some(lab) = event.lab.filter(|_| event.table != LockTable::Morphology) {
            query = query.bind(lab.as_str());
        }
        let updated = self.timed(update, query.execute(&mut *tx)).await?;
        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        self.timed(
            INSERT_EVENT,
            sqlx::query(INSERT_EVENT)
                .bind(event.id)
                .bind(event.record_number.as_str())
                .bind(event.visit_id.as_str())
                .bind(event.table.as_str())
                .bind(event.lab.map(LabKind::as_str))
                .bind(&event.reason)
                .bind(event.unlocked_by.as_str())
                .bind(event.at)
                .execute(&mut *tx),
        )
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn unlock_history(&self, limit: usize) -> StoreResult<Vec<UnlockEvent>> {
        const SQL: &str = r#"
            SELECT id, cr, labid, table_name, lab, reason, unlocked_by, created_at
            FROM unlock_log
            ORDER BY created_at DESC
            LIMIT $1
        "#;
        let rows = self
            .timed(
                SQL,
                sqlx::query_as::<_, UnlockRow>(SQL)
                    .bind(sql_limit(limit))
                    .fetch_all(&self.pool),
            )
            .await?;
        decode_all(rows)
    }
}

#[async_trait]
impl AuditSink for PgStore {
    async fn append(&self, entry: &AuditEntry) -> StoreResult<()> {
        const SQL: &str = r#"
            INSERT INTO audit_log
                (id, role, action, cr, labid, lab, old_data, new_data,
                 old_fingerprint, new_fingerprint, ip, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#;
        self.timed(
            SQL,
            sqlx::query(SQL)
                .bind(entry.id)
                .bind(entry.role.as_str())
                .bind(entry.action.as_str())
                .bind(entry.record_number.as_str())
                .bind(entry.visit_id.as_ref().map(VisitId::as_str))
                .bind(entry.lab.map(LabKind::as_str))
                .bind(entry.old_snapshot.as_ref())
                .bind(entry.new_snapshot.as_ref())
                .bind(entry.old_fingerprint.as_deref())
                .bind(entry.new_fingerprint.as_deref())
                .bind(entry.origin.as_deref())
                .bind(entry.at)
                .execute(&self.pool),
        )
        .await
        .map(|_| ())
    }

    async fn entries_for_record(
        &self,
        record_number: &RecordNumber,
        limit: usize,
    ) -> StoreResult<Vec<AuditEntry>> {
        const SQL: &str = r#"
            SELECT id, role, action, cr, labid, lab, old_data, new_data,
                   old_fingerprint, new_fingerprint, ip, created_at
            FROM audit_log
            WHERE cr = $1
            ORDER BY created_at DESC
            LIMIT $2
        "#;
        let rows = self
            .timed(
                SQL,
                sqlx::query_as::<_, AuditRow>(SQL)
                    .bind(record_number.as_str())
                    .bind(sql_limit(limit))
                    .fetch_all(&self.pool),
            )
            .await?;
        decode_all(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("A_1"), "%A\\_1%");
        assert_eq!(like_pattern("50%"), "%50\\%%");
        assert_eq!(like_pattern("asha"), "%asha%");
    }

    #[test]
    fn lock_state_decodes_roles() {
        let state = lock_state(true, None, Some("fish".into())).unwrap();
        assert_eq!(state.locked_by, Some(Role::Fish));

        let err = lock_state(true, None, Some("janitor".into())).unwrap_err();
        assert!(matches!(err, StoreError::Decode(msg) if msg.starts_with("locked_by")));
    }

    #[test]
    fn schema_declares_every_table() {
        for table in [
            "patients",
            "morphology",
            "lab_orders",
            "lab_acceptance",
            "lab_results",
            "unlock_log",
            "audit_log",
        ] {
            assert!(
                POSTGRES_SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
                "{table} missing from schema"
            );
        }
    }
}
