//! Unified `Database` trait — single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::lead::{Direction, Lead, Message, Property, Visit};

/// Backend-agnostic database trait covering leads, messages, properties, and
/// visits.
///
/// Leads are saved as a whole row in one atomic write (`save_lead` refreshes
/// `updated_at`); callers serialize per-lead processing, so read-then-save is
/// safe within one message's handling.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), StorageError>;

    // ── Leads ───────────────────────────────────────────────────────

    /// Fetch a lead, creating it at the top of the funnel if absent.
    async fn get_or_create_lead(&self, lead_id: &str) -> Result<Lead, StorageError>;

    /// Fetch a lead without creating it.
    async fn get_lead(&self, lead_id: &str) -> Result<Option<Lead>, StorageError>;

    /// Persist the full lead row, refreshing `updated_at`.
    async fn save_lead(&self, lead: &Lead) -> Result<(), StorageError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Append a message to the per-lead conversation log.
    async fn append_message(
        &self,
        lead_id: &str,
        text: &str,
        direction: Direction,
    ) -> Result<(), StorageError>;

    /// Most recent messages for a lead, ordered oldest→newest.
    async fn recent_messages(
        &self,
        lead_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError>;

    // ── Properties ──────────────────────────────────────────────────

    /// Look up one property by id.
    async fn get_property(&self, property_id: &str) -> Result<Option<Property>, StorageError>;

    /// All ACTIVE properties in the catalog.
    async fn active_properties(&self) -> Result<Vec<Property>, StorageError>;

    /// Insert a property (admin/seed path).
    async fn insert_property(&self, property: &Property) -> Result<(), StorageError>;

    // ── Visits ──────────────────────────────────────────────────────

    /// Record a scheduled visit.
    async fn create_visit(
        &self,
        lead_id: &str,
        property_id: &str,
        visit_at: DateTime<Utc>,
        notes: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Whether an identical visit already exists (re-delivery guard).
    async fn visit_exists(
        &self,
        lead_id: &str,
        property_id: &str,
        visit_at: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// All visits for a lead, oldest first.
    async fn visits_for_lead(&self, lead_id: &str) -> Result<Vec<Visit>, StorageError>;
}
