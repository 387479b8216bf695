//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. The lead's qualification data
//! and suggestion list are stored as JSON columns; everything else is flat.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StorageError;
use crate::funnel::{ConversationMode, FunnelStage, LeadStatus, QualificationData};
use crate::lead::{Direction, Intent, Lead, Message, Property, Visit};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StorageError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StorageError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StorageError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| StorageError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 string into DateTime<Utc>; MIN_UTC on bad data.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn stage_to_str(stage: FunnelStage) -> &'static str {
    match stage {
        FunnelStage::Precalificacion => "PRECALIFICACION",
        FunnelStage::Calificacion => "CALIFICACION",
        FunnelStage::PostCalificacion => "POST_CALIFICACION",
        FunnelStage::Finalizado => "FINALIZADO",
    }
}

fn str_to_stage(s: &str) -> FunnelStage {
    match s {
        "CALIFICACION" => FunnelStage::Calificacion,
        "POST_CALIFICACION" => FunnelStage::PostCalificacion,
        "FINALIZADO" => FunnelStage::Finalizado,
        _ => FunnelStage::Precalificacion,
    }
}

fn status_to_str(status: LeadStatus) -> &'static str {
    match status {
        LeadStatus::Nuevo => "NUEVO",
        LeadStatus::BuscandoPropiedad => "BUSCANDO_PROPIEDAD",
        LeadStatus::Calificando => "CALIFICANDO",
        LeadStatus::Calificado => "CALIFICADO",
        LeadStatus::Descalificado => "DESCALIFICADO",
        LeadStatus::AgendandoVisita => "AGENDANDO_VISITA",
        LeadStatus::VisitaAgendada => "VISITA_AGENDADA",
        LeadStatus::ProcesoCompletado => "PROCESO_COMPLETADO",
    }
}

fn str_to_status(s: &str) -> LeadStatus {
    match s {
        "BUSCANDO_PROPIEDAD" => LeadStatus::BuscandoPropiedad,
        "CALIFICANDO" => LeadStatus::Calificando,
        "CALIFICADO" => LeadStatus::Calificado,
        "DESCALIFICADO" => LeadStatus::Descalificado,
        "AGENDANDO_VISITA" => LeadStatus::AgendandoVisita,
        "VISITA_AGENDADA" => LeadStatus::VisitaAgendada,
        "PROCESO_COMPLETADO" => LeadStatus::ProcesoCompletado,
        _ => LeadStatus::Nuevo,
    }
}

fn mode_to_str(mode: ConversationMode) -> &'static str {
    match mode {
        ConversationMode::None => "none",
        ConversationMode::AwaitingDate => "awaiting_date",
        ConversationMode::AwaitingPropertyConfirmation => "awaiting_property_confirmation",
    }
}

fn str_to_mode(s: &str) -> ConversationMode {
    match s {
        "awaiting_date" => ConversationMode::AwaitingDate,
        "awaiting_property_confirmation" => ConversationMode::AwaitingPropertyConfirmation,
        _ => ConversationMode::None,
    }
}

/// Convert `Option<String>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_f64(v: Option<f64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Real(v),
        None => libsql::Value::Null,
    }
}

fn opt_u32(v: Option<u32>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v as i64),
        None => libsql::Value::Null,
    }
}

const LEAD_COLUMNS: &str = "id, intent, rooms, budget, neighborhood, stage, status, mode, \
     property_id, pending_property_id, last_suggestions, rejected_property_ids, qualification, \
     created_at, updated_at";

/// Map a libsql Row to a Lead.
fn row_to_lead(row: &libsql::Row) -> Result<Lead, StorageError> {
    let intent: Option<String> = row.get(1).ok();
    let rooms: Option<i64> = row.get(2).ok();
    let budget: Option<f64> = row.get(3).ok();
    let stage: String = row.get(5).map_err(query_err)?;
    let status: String = row.get(6).map_err(query_err)?;
    let mode: String = row.get(7).map_err(query_err)?;
    let suggestions: String = row.get(10).map_err(query_err)?;
    let rejected: String = row.get(11).map_err(query_err)?;
    let qualification: String = row.get(12).map_err(query_err)?;
    let created: String = row.get(13).map_err(query_err)?;
    let updated: String = row.get(14).map_err(query_err)?;

    let qualification: QualificationData = serde_json::from_str(&qualification)
        .map_err(|e| StorageError::Serialization(format!("qualification column: {e}")))?;
    let last_suggestions: Vec<String> = serde_json::from_str(&suggestions)
        .map_err(|e| StorageError::Serialization(format!("last_suggestions column: {e}")))?;
    let rejected_property_ids: Vec<String> = serde_json::from_str(&rejected)
        .map_err(|e| StorageError::Serialization(format!("rejected_property_ids column: {e}")))?;

    Ok(Lead {
        id: row.get(0).map_err(query_err)?,
        intent: intent.as_deref().and_then(Intent::parse),
        rooms: rooms.map(|r| r.max(0) as u32),
        budget,
        neighborhood: row.get(4).ok(),
        stage: str_to_stage(&stage),
        status: str_to_status(&status),
        mode: str_to_mode(&mode),
        property_id: row.get(8).ok(),
        pending_property_id: row.get(9).ok(),
        last_suggestions,
        rejected_property_ids,
        qualification,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_property(row: &libsql::Row) -> Result<Property, StorageError> {
    let rooms: i64 = row.get(3).map_err(query_err)?;
    let active: i64 = row.get(6).map_err(query_err)?;
    Ok(Property {
        id: row.get(0).map_err(query_err)?,
        title: row.get(1).map_err(query_err)?,
        neighborhood: row.get(2).map_err(query_err)?,
        rooms: rooms.max(0) as u32,
        price: row.get(4).map_err(query_err)?,
        url: row.get(5).map_err(query_err)?,
        active: active != 0,
    })
}

fn query_err(e: libsql::Error) -> StorageError {
    StorageError::Query(e.to_string())
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), StorageError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn get_or_create_lead(&self, lead_id: &str) -> Result<Lead, StorageError> {
        if let Some(lead) = self.get_lead(lead_id).await? {
            return Ok(lead);
        }
        let lead = Lead::new(lead_id);
        self.save_lead(&lead).await?;
        debug!(lead_id, "Lead created");
        Ok(lead)
    }

    async fn get_lead(&self, lead_id: &str) -> Result<Option<Lead>, StorageError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1"),
                params![lead_id],
            )
            .await
            .map_err(|e| StorageError::Query(format!("get_lead: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_lead(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StorageError::Query(format!("get_lead: {e}"))),
        }
    }

    async fn save_lead(&self, lead: &Lead) -> Result<(), StorageError> {
        let qualification = serde_json::to_string(&lead.qualification)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let suggestions = serde_json::to_string(&lead.last_suggestions)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let rejected = serde_json::to_string(&lead.rejected_property_ids)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        self.conn()
            .execute(
                "INSERT INTO leads (id, intent, rooms, budget, neighborhood, stage, status, mode,
                    property_id, pending_property_id, last_suggestions, rejected_property_ids,
                    qualification, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(id) DO UPDATE SET
                    intent = excluded.intent,
                    rooms = excluded.rooms,
                    budget = excluded.budget,
                    neighborhood = excluded.neighborhood,
                    stage = excluded.stage,
                    status = excluded.status,
                    mode = excluded.mode,
                    property_id = excluded.property_id,
                    pending_property_id = excluded.pending_property_id,
                    last_suggestions = excluded.last_suggestions,
                    rejected_property_ids = excluded.rejected_property_ids,
                    qualification = excluded.qualification,
                    updated_at = excluded.updated_at",
                params![
                    lead.id.clone(),
                    opt_text(lead.intent.map(|i| match i {
                        Intent::Rental => "alquiler",
                        Intent::Sale => "venta",
                    })),
                    opt_u32(lead.rooms),
                    opt_f64(lead.budget),
                    opt_text(lead.neighborhood.as_deref()),
                    stage_to_str(lead.stage),
                    status_to_str(lead.status),
                    mode_to_str(lead.mode),
                    opt_text(lead.property_id.as_deref()),
                    opt_text(lead.pending_property_id.as_deref()),
                    suggestions,
                    rejected,
                    qualification,
                    lead.created_at.to_rfc3339(),
                    now,
                ],
            )
            .await
            .map_err(|e| StorageError::Query(format!("save_lead: {e}")))?;
        Ok(())
    }

    async fn append_message(
        &self,
        lead_id: &str,
        text: &str,
        direction: Direction,
    ) -> Result<(), StorageError> {
        let direction = match direction {
            Direction::In => "in",
            Direction::Out => "out",
        };
        self.conn()
            .execute(
                "INSERT INTO messages (id, lead_id, direction, text, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    lead_id,
                    direction,
                    text,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StorageError::Query(format!("append_message: {e}")))?;
        Ok(())
    }

    async fn recent_messages(
        &self,
        lead_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        // Newest N, then reversed so callers get oldest→newest.
        let mut rows = self
            .conn()
            .query(
                "SELECT lead_id, direction, text, sent_at FROM messages
                 WHERE lead_id = ?1 ORDER BY sent_at DESC LIMIT ?2",
                params![lead_id, limit as i64],
            )
            .await
            .map_err(|e| StorageError::Query(format!("recent_messages: {e}")))?;

        let mut messages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let direction: String = row.get(1).map_err(query_err)?;
            let sent_at: String = row.get(3).map_err(query_err)?;
            messages.push(Message {
                lead_id: row.get(0).map_err(query_err)?,
                direction: if direction == "out" {
                    Direction::Out
                } else {
                    Direction::In
                },
                text: row.get(2).map_err(query_err)?,
                sent_at: parse_datetime(&sent_at),
            });
        }
        messages.reverse();
        Ok(messages)
    }

    async fn get_property(&self, property_id: &str) -> Result<Option<Property>, StorageError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, title, neighborhood, rooms, price, url, active
                 FROM properties WHERE id = ?1",
                params![property_id],
            )
            .await
            .map_err(|e| StorageError::Query(format!("get_property: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_property(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StorageError::Query(format!("get_property: {e}"))),
        }
    }

    async fn active_properties(&self) -> Result<Vec<Property>, StorageError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, title, neighborhood, rooms, price, url, active
                 FROM properties WHERE active = 1",
                (),
            )
            .await
            .map_err(|e| StorageError::Query(format!("active_properties: {e}")))?;

        let mut properties = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            properties.push(row_to_property(&row)?);
        }
        Ok(properties)
    }

    async fn insert_property(&self, property: &Property) -> Result<(), StorageError> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO properties (id, title, neighborhood, rooms, price, url, active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    property.id.clone(),
                    property.title.clone(),
                    property.neighborhood.clone(),
                    property.rooms as i64,
                    property.price,
                    property.url.clone(),
                    property.active as i64,
                ],
            )
            .await
            .map_err(|e| StorageError::Query(format!("insert_property: {e}")))?;
        Ok(())
    }

    async fn create_visit(
        &self,
        lead_id: &str,
        property_id: &str,
        visit_at: DateTime<Utc>,
        notes: Option<&str>,
    ) -> Result<(), StorageError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO visits (id, lead_id, property_id, visit_at, confirmed, notes, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    lead_id,
                    property_id,
                    visit_at.to_rfc3339(),
                    opt_text(notes),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StorageError::Query(format!("create_visit: {e}")))?;
        debug!(lead_id, property_id, visit_at = %visit_at, "Visit recorded");
        Ok(())
    }

    async fn visit_exists(
        &self,
        lead_id: &str,
        property_id: &str,
        visit_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM visits WHERE lead_id = ?1 AND property_id = ?2 AND visit_at = ?3",
                params![lead_id, property_id, visit_at.to_rfc3339()],
            )
            .await
            .map_err(|e| StorageError::Query(format!("visit_exists: {e}")))?;

        match rows.next().await {
            Ok(Some(_)) => Ok(true),
            Ok(None) => Ok(false),
            Err(e) => Err(StorageError::Query(format!("visit_exists: {e}"))),
        }
    }

    async fn visits_for_lead(&self, lead_id: &str) -> Result<Vec<Visit>, StorageError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT lead_id, property_id, visit_at, confirmed, notes, created_at
                 FROM visits WHERE lead_id = ?1 ORDER BY created_at ASC",
                params![lead_id],
            )
            .await
            .map_err(|e| StorageError::Query(format!("visits_for_lead: {e}")))?;

        let mut visits = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let visit_at: String = row.get(2).map_err(query_err)?;
            let confirmed: i64 = row.get(3).map_err(query_err)?;
            let created_at: String = row.get(5).map_err(query_err)?;
            visits.push(Visit {
                lead_id: row.get(0).map_err(query_err)?,
                property_id: row.get(1).map_err(query_err)?,
                visit_at: parse_datetime(&visit_at),
                confirmed: confirmed != 0,
                notes: row.get(4).ok(),
                created_at: parse_datetime(&created_at),
            });
        }
        Ok(visits)
    }
}
