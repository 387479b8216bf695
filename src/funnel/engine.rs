//! Stage transition engine — the only place that moves a lead through the
//! funnel or creates a visit.
//!
//! Transitions are decided from persisted state and extraction output, never
//! from what the free-text reply generator happened to say. Repeated calls
//! with the same inputs are idempotent: once a transition fires, the lead is
//! in the target stage and the same guard cannot fire again.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::funnel::{FunnelStage, LeadStatus};
use crate::lead::Lead;
use crate::schedule::VisitDateParser;
use crate::store::Database;

/// What one `advance` call did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdvanceOutcome {
    /// The lead moved to a new funnel stage.
    pub did_transition: bool,
    /// A visit was recorded for this timestamp.
    pub visit_at: Option<DateTime<Utc>>,
}

/// Drives `(stage, status)` transitions for a lead.
pub struct StageEngine {
    db: Arc<dyn Database>,
    date_parser: Arc<dyn VisitDateParser>,
}

impl StageEngine {
    pub fn new(db: Arc<dyn Database>, date_parser: Arc<dyn VisitDateParser>) -> Self {
        Self { db, date_parser }
    }

    /// Run the transition table once against the lead's current state.
    ///
    /// Mutates `lead` in place; the caller persists it afterwards. `now`
    /// anchors relative date expressions in `message`.
    pub async fn advance(
        &self,
        lead: &mut Lead,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<AdvanceOutcome, StorageError> {
        match lead.stage {
            FunnelStage::Precalificacion => self.advance_precalificacion(lead).await,
            FunnelStage::Calificacion => Ok(advance_calificacion(lead)),
            FunnelStage::PostCalificacion => {
                self.advance_post_calificacion(lead, message, now).await
            }
            // Terminal. The lead can still message us but nothing moves.
            FunnelStage::Finalizado => Ok(AdvanceOutcome::default()),
        }
    }

    async fn advance_precalificacion(
        &self,
        lead: &mut Lead,
    ) -> Result<AdvanceOutcome, StorageError> {
        let Some(property_id) = lead.property_id.clone() else {
            if lead.status == LeadStatus::Nuevo {
                lead.set_stage(FunnelStage::Precalificacion, LeadStatus::BuscandoPropiedad);
            }
            return Ok(AdvanceOutcome::default());
        };

        match self.db.get_property(&property_id).await? {
            Some(property) if property.active => {
                // Entering CALIFICACION with a confirmed property: don't make
                // the lead re-confirm what they just confirmed.
                lead.qualification.property_confirmed = true;
                lead.set_stage(FunnelStage::Calificacion, LeadStatus::Calificando);
                info!(lead_id = %lead.id, property_id = %property_id, "Lead entered qualification");
                Ok(AdvanceOutcome {
                    did_transition: true,
                    visit_at: None,
                })
            }
            _ => {
                // Dangling reference (deleted or deactivated). Recoverable:
                // clear it and go back to searching.
                warn!(
                    lead_id = %lead.id,
                    property_id = %property_id,
                    "Confirmed property no longer available, reverting to search"
                );
                lead.property_id = None;
                lead.set_stage(FunnelStage::Precalificacion, LeadStatus::BuscandoPropiedad);
                Ok(AdvanceOutcome::default())
            }
        }
    }

    async fn advance_post_calificacion(
        &self,
        lead: &mut Lead,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<AdvanceOutcome, StorageError> {
        if lead.status != LeadStatus::AgendandoVisita {
            // Descalificado: terminal for scheduling, replies still flow.
            return Ok(AdvanceOutcome::default());
        }
        let Some(visit_at) = self.date_parser.parse(message, now) else {
            // Unparseable scheduling text is not an error; the reply will
            // re-ask for a clearer date.
            debug!(lead_id = %lead.id, "No visit date parsed from message");
            return Ok(AdvanceOutcome::default());
        };
        let Some(property_id) = lead.property_id.clone() else {
            warn!(lead_id = %lead.id, "Scheduling without a confirmed property, skipping");
            return Ok(AdvanceOutcome::default());
        };

        // Re-delivery guard: an identical visit means this message was
        // already processed.
        if !self.db.visit_exists(&lead.id, &property_id, visit_at).await? {
            self.db
                .create_visit(&lead.id, &property_id, visit_at, None)
                .await?;
        }
        lead.set_stage(FunnelStage::Finalizado, LeadStatus::ProcesoCompletado);
        info!(lead_id = %lead.id, property_id = %property_id, visit_at = %visit_at, "Visit scheduled");
        Ok(AdvanceOutcome {
            did_transition: true,
            visit_at: Some(visit_at),
        })
    }
}

fn advance_calificacion(lead: &mut Lead) -> AdvanceOutcome {
    if !lead.qualification.missing_fields().is_empty() {
        lead.set_stage(FunnelStage::Calificacion, LeadStatus::Calificando);
        return AdvanceOutcome::default();
    }
    let status = if lead.qualification.is_qualified() {
        LeadStatus::AgendandoVisita
    } else {
        LeadStatus::Descalificado
    };
    lead.set_stage(FunnelStage::PostCalificacion, status);
    info!(lead_id = %lead.id, status = %status, "Qualification complete");
    AdvanceOutcome {
        did_transition: true,
        visit_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funnel::ConversationMode;
    use crate::lead::Property;
    use crate::schedule::SpanishDateParser;
    use crate::store::LibSqlBackend;
    use chrono::TimeZone;

    async fn engine() -> (Arc<LibSqlBackend>, StageEngine) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let engine = StageEngine::new(db.clone(), Arc::new(SpanishDateParser));
        (db, engine)
    }

    fn property(id: &str, active: bool) -> Property {
        Property {
            id: id.to_string(),
            title: "Depto 2 amb".to_string(),
            neighborhood: "Palermo".to_string(),
            rooms: 2,
            price: 450_000.0,
            url: String::new(),
            active,
        }
    }

    // Friday 2025-03-14.
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap()
    }

    fn qualified_lead(id: &str) -> Lead {
        let mut lead = Lead::new(id);
        lead.property_id = Some("prop_001".to_string());
        lead.qualification.property_confirmed = true;
        lead.qualification.buyer_confirmed = true;
        lead.qualification.motive_confirmed = true;
        lead.qualification.financing_confirmed = true;
        lead.qualification.ready_to_close = true;
        lead
    }

    #[tokio::test]
    async fn new_lead_moves_to_searching() {
        let (_db, engine) = engine().await;
        let mut lead = Lead::new("l1");
        let outcome = engine.advance(&mut lead, "hola", now()).await.unwrap();
        assert!(!outcome.did_transition);
        assert_eq!(lead.stage, FunnelStage::Precalificacion);
        assert_eq!(lead.status, LeadStatus::BuscandoPropiedad);
    }

    #[tokio::test]
    async fn confirmed_property_enters_qualification() {
        let (db, engine) = engine().await;
        db.insert_property(&property("prop_001", true)).await.unwrap();

        let mut lead = Lead::new("l1");
        lead.property_id = Some("prop_001".to_string());
        lead.mode = ConversationMode::AwaitingPropertyConfirmation;

        let outcome = engine.advance(&mut lead, "si, esa", now()).await.unwrap();
        assert!(outcome.did_transition);
        assert_eq!(lead.stage, FunnelStage::Calificacion);
        assert_eq!(lead.status, LeadStatus::Calificando);
        assert!(lead.qualification.property_confirmed);
        // Stage change clears the conversation mode.
        assert_eq!(lead.mode, ConversationMode::None);
    }

    #[tokio::test]
    async fn dangling_property_reverts_to_search() {
        let (db, engine) = engine().await;
        db.insert_property(&property("prop_001", false)).await.unwrap();

        let mut lead = Lead::new("l1");
        lead.property_id = Some("prop_001".to_string());

        let outcome = engine.advance(&mut lead, "si", now()).await.unwrap();
        assert!(!outcome.did_transition);
        assert_eq!(lead.stage, FunnelStage::Precalificacion);
        assert_eq!(lead.status, LeadStatus::BuscandoPropiedad);
        assert!(lead.property_id.is_none());
        assert!(!lead.qualification.property_confirmed);
    }

    #[tokio::test]
    async fn incomplete_qualification_stays_put() {
        let (_db, engine) = engine().await;
        let mut lead = Lead::new("l1");
        lead.set_stage(FunnelStage::Calificacion, LeadStatus::Calificando);
        lead.qualification.property_confirmed = true;

        let outcome = engine.advance(&mut lead, "es para mi", now()).await.unwrap();
        assert!(!outcome.did_transition);
        assert_eq!(lead.stage, FunnelStage::Calificacion);
    }

    #[tokio::test]
    async fn complete_qualification_moves_to_scheduling() {
        let (_db, engine) = engine().await;
        let mut lead = qualified_lead("l1");
        lead.set_stage(FunnelStage::Calificacion, LeadStatus::Calificando);

        let outcome = engine.advance(&mut lead, "dale", now()).await.unwrap();
        assert!(outcome.did_transition);
        assert_eq!(lead.stage, FunnelStage::PostCalificacion);
        assert_eq!(lead.status, LeadStatus::AgendandoVisita);
    }

    #[tokio::test]
    async fn date_message_creates_visit_and_finalizes() {
        let (db, engine) = engine().await;
        let mut lead = qualified_lead("l1");
        lead.set_stage(FunnelStage::PostCalificacion, LeadStatus::AgendandoVisita);

        let outcome = engine
            .advance(&mut lead, "el martes a las 15", now())
            .await
            .unwrap();
        assert!(outcome.did_transition);
        assert!(outcome.visit_at.is_some());
        assert_eq!(lead.stage, FunnelStage::Finalizado);
        assert_eq!(lead.status, LeadStatus::ProcesoCompletado);

        let visits = db.visits_for_lead("l1").await.unwrap();
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].property_id, "prop_001");
    }

    #[tokio::test]
    async fn redelivered_date_message_does_not_double_create() {
        let (db, engine) = engine().await;
        let mut lead = qualified_lead("l1");
        lead.set_stage(FunnelStage::PostCalificacion, LeadStatus::AgendandoVisita);

        engine
            .advance(&mut lead, "el martes a las 15", now())
            .await
            .unwrap();
        // Simulate at-least-once delivery: same message against a stale copy.
        let mut stale = qualified_lead("l1");
        stale.set_stage(FunnelStage::PostCalificacion, LeadStatus::AgendandoVisita);
        engine
            .advance(&mut stale, "el martes a las 15", now())
            .await
            .unwrap();

        assert_eq!(db.visits_for_lead("l1").await.unwrap().len(), 1);

        // And the finalized copy itself is inert.
        let outcome = engine
            .advance(&mut lead, "el martes a las 15", now())
            .await
            .unwrap();
        assert_eq!(outcome, AdvanceOutcome::default());
    }

    #[tokio::test]
    async fn unparseable_date_reprompts_without_regression() {
        let (db, engine) = engine().await;
        let mut lead = qualified_lead("l1");
        lead.set_stage(FunnelStage::PostCalificacion, LeadStatus::AgendandoVisita);

        let outcome = engine
            .advance(&mut lead, "cuando puedan ustedes", now())
            .await
            .unwrap();
        assert!(!outcome.did_transition);
        assert_eq!(lead.status, LeadStatus::AgendandoVisita);
        assert!(db.visits_for_lead("l1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn disqualified_lead_never_schedules() {
        let (db, engine) = engine().await;
        let mut lead = Lead::new("l1");
        lead.property_id = Some("prop_001".to_string());
        lead.set_stage(FunnelStage::PostCalificacion, LeadStatus::Descalificado);

        let outcome = engine
            .advance(&mut lead, "el martes a las 15", now())
            .await
            .unwrap();
        assert!(!outcome.did_transition);
        assert_eq!(lead.status, LeadStatus::Descalificado);
        assert!(db.visits_for_lead("l1").await.unwrap().is_empty());
    }
}
