//! Per-message processing pipeline.
//!
//! One inbound message is handled to completion before the reply goes out:
//! log it, extract signals, resolve any pending confirmation, run the stage
//! engine, search the catalog if a property is still needed, generate the
//! reply, classify it, persist. Storage failures propagate; everything else
//! degrades to a deterministic path.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::BotConfig;
use crate::error::PipelineError;
use crate::extract::{rules, SignalExtractor};
use crate::funnel::prompts::{build_instructions, PromptContext};
use crate::funnel::{ConversationMode, FunnelStage, LeadStatus, StageEngine};
use crate::lead::{Direction, Lead, Message, Property};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::matching::{
    count_detail_requests, format_property, format_property_list, SearchCriteria, SearchOutcome,
    DETAIL_REQUEST_LIMIT,
};
use crate::pipeline::classifier::{classify_reply_intent, ReplyIntent};
use crate::store::Database;

/// Fixed user-facing reply when reply generation fails. Never exposes
/// internal error detail.
const APOLOGY_REPLY: &str =
    "Disculpa, estamos con un inconveniente tecnico. Escribime de nuevo en unos minutos.";

/// Catalog search result carried into reply generation.
#[derive(Debug, Default)]
struct SearchContext {
    /// Single candidate awaiting confirmation.
    candidate: Option<Property>,
    /// Several candidates offered as a numbered list.
    suggestions: Vec<Property>,
}

/// Handles one inbound WhatsApp message end to end.
pub struct MessageProcessor {
    db: Arc<dyn Database>,
    extractor: SignalExtractor,
    engine: StageEngine,
    llm: Option<Arc<dyn LlmProvider>>,
    config: BotConfig,
}

impl MessageProcessor {
    pub fn new(
        db: Arc<dyn Database>,
        extractor: SignalExtractor,
        engine: StageEngine,
        llm: Option<Arc<dyn LlmProvider>>,
        config: BotConfig,
    ) -> Self {
        Self {
            db,
            extractor,
            engine,
            llm,
            config,
        }
    }

    /// Process one inbound message and produce the reply text.
    pub async fn handle(&self, lead_id: &str, text: &str) -> Result<String, PipelineError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::InvalidMessage("empty message body".into()));
        }

        self.db.append_message(lead_id, text, Direction::In).await?;
        let mut lead = self.db.get_or_create_lead(lead_id).await?;

        // History includes the message just appended, as its last entry.
        let history = self
            .db
            .recent_messages(lead_id, lead.stage.context_window())
            .await?;
        let prior_history = &history[..history.len().saturating_sub(1)];

        let signals = self.extractor.extract(text, prior_history).await;
        apply_profile(&mut lead, &signals);
        lead.qualification.merge(&signals.qualification);

        resolve_pending_confirmation(&mut lead, text);

        let outcome = self
            .engine
            .advance(&mut lead, text, Utc::now())
            .await
            .map_err(PipelineError::Storage)?;

        let search = self.search_if_needed(&mut lead, prior_history).await?;

        // The stage may have just changed; re-slice the fetched history to
        // the new stage's window (windows only shrink as the funnel advances).
        let window = lead.stage.context_window();
        let reply_history = &history[history.len().saturating_sub(window)..];

        let reply = match self
            .generate_reply(&lead, reply_history, &search, &outcome)
            .await
        {
            Some(reply) => reply,
            None => {
                // Reply generation failed. The inbound message and every
                // rule-layer mutation still persist; only the outbound log
                // entry is skipped.
                self.db.save_lead(&lead).await?;
                return Ok(APOLOGY_REPLY.to_string());
            }
        };

        self.apply_reply_intent(&mut lead, &reply);
        self.db.save_lead(&lead).await?;
        self.db
            .append_message(lead_id, &reply, Direction::Out)
            .await?;

        info!(
            lead_id = %lead.id,
            stage = %lead.stage,
            status = %lead.status,
            transitioned = outcome.did_transition,
            "Message processed"
        );
        Ok(reply)
    }

    /// Search the catalog while the lead is still pinning down a property.
    async fn search_if_needed(
        &self,
        lead: &mut Lead,
        history: &[Message],
    ) -> Result<SearchContext, PipelineError> {
        if lead.stage != FunnelStage::Precalificacion
            || lead.property_id.is_some()
            || lead.pending_property_id.is_some()
        {
            return Ok(SearchContext::default());
        }

        let mut criteria = SearchCriteria::from_lead(lead);
        if criteria.is_empty() {
            return Ok(SearchContext::default());
        }
        let mut catalog = self.db.active_properties().await?;
        catalog.retain(|p| !lead.rejected_property_ids.contains(&p.id));

        let mut outcome = criteria.search(&catalog, self.config.max_suggestions);
        // After enough fruitless detail requests, relax the criteria instead
        // of asking again.
        if outcome == SearchOutcome::NoMatch
            && count_detail_requests(history) >= DETAIL_REQUEST_LIMIT
        {
            while outcome == SearchOutcome::NoMatch && criteria.broaden() {
                outcome = criteria.search(&catalog, self.config.max_suggestions);
            }
        }

        let mut search = SearchContext::default();
        match outcome {
            SearchOutcome::NoMatch => {}
            SearchOutcome::Single(property) => {
                lead.pending_property_id = Some(property.id.clone());
                lead.mode = ConversationMode::AwaitingPropertyConfirmation;
                search.candidate = Some(property);
            }
            SearchOutcome::Multiple(properties) => {
                lead.last_suggestions = properties.iter().map(|p| p.id.clone()).collect();
                search.suggestions = properties;
            }
        }
        Ok(search)
    }

    /// Generate the reply text. `None` means generation failed and the
    /// apology path should be taken; with no LLM configured the deterministic
    /// fallback always produces a reply.
    async fn generate_reply(
        &self,
        lead: &Lead,
        history: &[Message],
        search: &SearchContext,
        outcome: &crate::funnel::AdvanceOutcome,
    ) -> Option<String> {
        let Some(llm) = &self.llm else {
            return Some(self.fallback_reply(lead, search, outcome));
        };

        let suggestion_list = (!search.suggestions.is_empty())
            .then(|| format_property_list(&search.suggestions));
        let title = self.property_title(lead, search).await;
        let ctx = PromptContext {
            agency_name: &self.config.agency_name,
            agent_name: &self.config.agent_name,
            property_title: title.as_deref(),
            suggestion_list: suggestion_list.as_deref(),
        };

        let mut messages = vec![ChatMessage::system(build_instructions(lead.stage, lead, &ctx))];
        for entry in history {
            match entry.direction {
                Direction::In => messages.push(ChatMessage::user(entry.text.clone())),
                Direction::Out => messages.push(ChatMessage::assistant(entry.text.clone())),
            }
        }

        let request = CompletionRequest::new(messages)
            .with_max_tokens(200)
            .with_temperature(0.7);
        match llm.complete(request).await {
            Ok(response) => Some(response.content.trim().to_string()),
            Err(e) => {
                warn!(lead_id = %lead.id, error = %e, "Reply generation failed");
                None
            }
        }
    }

    /// Title of the property currently in play, for prompt interpolation.
    async fn property_title(&self, lead: &Lead, search: &SearchContext) -> Option<String> {
        if let Some(candidate) = &search.candidate {
            return Some(format_property(candidate));
        }
        let id = lead
            .property_id
            .as_deref()
            .or(lead.pending_property_id.as_deref())?;
        match self.db.get_property(id).await {
            Ok(Some(property)) => Some(property.title),
            Ok(None) => None,
            Err(e) => {
                warn!(property_id = %id, error = %e, "Property lookup for prompt failed");
                None
            }
        }
    }

    /// Deterministic reply used when no LLM is configured.
    fn fallback_reply(
        &self,
        lead: &Lead,
        search: &SearchContext,
        outcome: &crate::funnel::AdvanceOutcome,
    ) -> String {
        match lead.stage {
            FunnelStage::Precalificacion => {
                if let Some(candidate) = &search.candidate {
                    return format!(
                        "Encontre esta opcion: {}. Confirmame si es la que te interesa.",
                        format_property(candidate)
                    );
                }
                if !search.suggestions.is_empty() {
                    return format!(
                        "Tengo estas opciones:\n{}\nDecime el numero de la que te interese.",
                        format_property_list(&search.suggestions)
                    );
                }
                if lead.neighborhood.is_none() {
                    format!(
                        "Buenas! Soy {} de {}. En que barrio estas buscando?",
                        self.config.agent_name, self.config.agency_name
                    )
                } else if lead.rooms.is_none() {
                    "Cuantos ambientes necesitas?".to_string()
                } else if lead.budget.is_none() {
                    "Que presupuesto tenes en mente?".to_string()
                } else {
                    "Por ahora no encontre opciones con esos criterios. Te aviso apenas entre algo."
                        .to_string()
                }
            }
            FunnelStage::Calificacion => {
                match lead.qualification.missing_fields().first().copied() {
                    Some("comprador_confirmado") => "La propiedad es para vos?".to_string(),
                    Some("motivo") => {
                        "Cual es el motivo de la busqueda, mudanza o inversion?".to_string()
                    }
                    Some("financiacion") => "Como pensas financiar la operacion?".to_string(),
                    Some("listo_para_cerrar") => {
                        "Si la propiedad te sirve, estas en condiciones de avanzar?".to_string()
                    }
                    _ => "Gracias por la informacion, ya tengo todo lo que necesitaba.".to_string(),
                }
            }
            FunnelStage::PostCalificacion => match lead.status {
                LeadStatus::Descalificado => {
                    "Gracias por tu interes. Por el momento no tenemos una opcion que encaje, \
                     quedamos en contacto."
                        .to_string()
                }
                _ => "Genial, podemos coordinar una visita. Que dia y horario te queda comodo?"
                    .to_string(),
            },
            FunnelStage::Finalizado => match outcome.visit_at {
                Some(visit_at) => format!(
                    "Listo, agendamos la visita para el {}. Nos vemos ahi!",
                    visit_at.format("%d/%m a las %H:%M")
                ),
                None => "La visita ya quedo coordinada. Cualquier cosa me escribis.".to_string(),
            },
        }
    }

    /// Read the generated reply back to set the transient conversation mode.
    fn apply_reply_intent(&self, lead: &mut Lead, reply: &str) {
        match classify_reply_intent(reply) {
            ReplyIntent::AsksSchedule => {
                if lead.stage == FunnelStage::PostCalificacion
                    && lead.status == LeadStatus::AgendandoVisita
                {
                    lead.mode = ConversationMode::AwaitingDate;
                }
            }
            ReplyIntent::AsksPropertyConfirmation => {
                if lead.stage == FunnelStage::Precalificacion
                    && lead.pending_property_id.is_some()
                {
                    lead.mode = ConversationMode::AwaitingPropertyConfirmation;
                }
            }
            ReplyIntent::None => {}
        }
    }
}

/// Overlay extracted profile fields. Fresh statements win over stored ones;
/// the lead can change their mind about neighborhood or budget.
fn apply_profile(lead: &mut Lead, signals: &crate::extract::ExtractedSignals) {
    let profile = &signals.profile;
    if profile.intent.is_some() {
        lead.intent = profile.intent;
    }
    if profile.rooms.is_some() {
        lead.rooms = profile.rooms;
    }
    if profile.budget.is_some() {
        lead.budget = profile.budget;
    }
    if let Some(neighborhood) = &profile.neighborhood {
        lead.neighborhood = Some(neighborhood.clone());
    }
}

/// Resolve an answer to a pending property confirmation or suggestion list
/// before the engine runs, so a "si" can transition in the same turn.
fn resolve_pending_confirmation(lead: &mut Lead, text: &str) {
    if lead.mode == ConversationMode::AwaitingPropertyConfirmation
        && lead.pending_property_id.is_some()
    {
        match rules::property_confirmation(text) {
            Some(true) => {
                lead.property_id = lead.pending_property_id.take();
                lead.mode = ConversationMode::None;
                lead.last_suggestions.clear();
            }
            Some(false) => {
                if let Some(rejected) = lead.pending_property_id.take() {
                    lead.rejected_property_ids.push(rejected);
                }
                lead.mode = ConversationMode::None;
            }
            None => {}
        }
        return;
    }

    if lead.stage == FunnelStage::Precalificacion && !lead.last_suggestions.is_empty() {
        if let Some(chosen) = rules::choose_suggestion(text, &lead.last_suggestions) {
            lead.property_id = Some(chosen);
            lead.last_suggestions.clear();
            lead.mode = ConversationMode::None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::CompletionResponse;
    use crate::schedule::SpanishDateParser;
    use crate::store::LibSqlBackend;
    use async_trait::async_trait;

    struct FailingProvider;

    #[async_trait]
    impl LlmProvider for FailingProvider {
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Err(LlmError::RequestFailed {
                provider: "test".to_string(),
                reason: "down".to_string(),
            })
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    async fn processor_with(llm: Option<Arc<dyn LlmProvider>>) -> (Arc<LibSqlBackend>, MessageProcessor) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let engine = StageEngine::new(db.clone(), Arc::new(SpanishDateParser));
        let extractor = SignalExtractor::new(llm.clone());
        let processor = MessageProcessor::new(
            db.clone(),
            extractor,
            engine,
            llm,
            BotConfig::default(),
        );
        (db, processor)
    }

    fn property(id: &str, neighborhood: &str, rooms: u32, price: f64) -> Property {
        Property {
            id: id.to_string(),
            title: format!("Depto {rooms} amb {neighborhood}"),
            neighborhood: neighborhood.to_string(),
            rooms,
            price,
            url: String::new(),
            active: true,
        }
    }

    #[tokio::test]
    async fn first_message_asks_for_missing_detail() {
        let (db, processor) = processor_with(None).await;
        let reply = processor.handle("l1", "Hola, busco un depto").await.unwrap();
        assert!(reply.contains("barrio"));

        let lead = db.get_lead("l1").await.unwrap().unwrap();
        assert_eq!(lead.stage, FunnelStage::Precalificacion);
        assert_eq!(lead.status, LeadStatus::BuscandoPropiedad);

        let log = db.recent_messages("l1", 10).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].direction, Direction::In);
        assert_eq!(log[1].direction, Direction::Out);
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let (_db, processor) = processor_with(None).await;
        assert!(processor.handle("l1", "   ").await.is_err());
    }

    #[tokio::test]
    async fn single_match_asks_for_confirmation() {
        let (db, processor) = processor_with(None).await;
        db.insert_property(&property("prop_001", "Palermo", 2, 450_000.0))
            .await
            .unwrap();

        let reply = processor
            .handle("l1", "Busco 2 ambientes en Palermo hasta 500k")
            .await
            .unwrap();
        assert!(reply.contains("Confirmame"));

        let lead = db.get_lead("l1").await.unwrap().unwrap();
        assert_eq!(lead.pending_property_id.as_deref(), Some("prop_001"));
        assert_eq!(lead.mode, ConversationMode::AwaitingPropertyConfirmation);
        assert!(lead.property_id.is_none());
    }

    #[tokio::test]
    async fn confirmation_promotes_pending_property_and_enters_qualification() {
        let (db, processor) = processor_with(None).await;
        db.insert_property(&property("prop_001", "Palermo", 2, 450_000.0))
            .await
            .unwrap();

        processor
            .handle("l1", "Busco 2 ambientes en Palermo hasta 500k")
            .await
            .unwrap();
        processor.handle("l1", "si, esa es").await.unwrap();

        let lead = db.get_lead("l1").await.unwrap().unwrap();
        assert_eq!(lead.property_id.as_deref(), Some("prop_001"));
        assert!(lead.pending_property_id.is_none());
        assert_eq!(lead.stage, FunnelStage::Calificacion);
        assert_eq!(lead.status, LeadStatus::Calificando);
        assert!(lead.qualification.property_confirmed);
    }

    #[tokio::test]
    async fn rejection_clears_pending_property() {
        let (db, processor) = processor_with(None).await;
        db.insert_property(&property("prop_001", "Palermo", 2, 450_000.0))
            .await
            .unwrap();

        processor
            .handle("l1", "Busco 2 ambientes en Palermo hasta 500k")
            .await
            .unwrap();
        processor.handle("l1", "no, otra").await.unwrap();

        let lead = db.get_lead("l1").await.unwrap().unwrap();
        assert!(lead.property_id.is_none());
        assert!(lead.pending_property_id.is_none());
        assert_eq!(lead.rejected_property_ids, vec!["prop_001".to_string()]);
        assert_eq!(lead.stage, FunnelStage::Precalificacion);
    }

    #[tokio::test]
    async fn rejected_property_is_not_reoffered() {
        let (db, processor) = processor_with(None).await;
        db.insert_property(&property("prop_001", "Palermo", 2, 450_000.0))
            .await
            .unwrap();

        processor
            .handle("l1", "Busco 2 ambientes en Palermo hasta 500k")
            .await
            .unwrap();
        processor.handle("l1", "no, otra").await.unwrap();

        // The rejection turn searches again; the turned-down property must
        // not come back as the pending candidate.
        let lead = db.get_lead("l1").await.unwrap().unwrap();
        assert!(lead.pending_property_id.is_none());
        assert_eq!(lead.rejected_property_ids, vec!["prop_001".to_string()]);

        // Nor on any later turn.
        processor
            .handle("l1", "tenes algo mas en palermo?")
            .await
            .unwrap();
        let lead = db.get_lead("l1").await.unwrap().unwrap();
        assert!(lead.pending_property_id.is_none());
        assert!(lead.property_id.is_none());
    }

    #[tokio::test]
    async fn multiple_matches_offer_numbered_suggestions() {
        let (db, processor) = processor_with(None).await;
        db.insert_property(&property("prop_001", "Palermo", 2, 450_000.0))
            .await
            .unwrap();
        db.insert_property(&property("prop_002", "Palermo", 3, 480_000.0))
            .await
            .unwrap();

        let reply = processor
            .handle("l1", "Busco 2 ambientes en Palermo hasta 500k")
            .await
            .unwrap();
        assert!(reply.contains("1."));
        assert!(reply.contains("2."));

        let lead = db.get_lead("l1").await.unwrap().unwrap();
        assert_eq!(lead.last_suggestions.len(), 2);

        processor.handle("l1", "la primera").await.unwrap();
        let lead = db.get_lead("l1").await.unwrap().unwrap();
        assert!(lead.property_id.is_some());
        assert!(lead.last_suggestions.is_empty());
        assert_eq!(lead.stage, FunnelStage::Calificacion);
    }

    #[tokio::test]
    async fn llm_failure_returns_apology_without_outbound_log() {
        let (db, processor) = processor_with(Some(Arc::new(FailingProvider))).await;

        let reply = processor.handle("l1", "es para mi, me mudo").await.unwrap();
        assert_eq!(reply, APOLOGY_REPLY);

        // Inbound logged, outbound not.
        let log = db.recent_messages("l1", 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].direction, Direction::In);

        // Rule-layer mutations still persisted.
        let lead = db.get_lead("l1").await.unwrap().unwrap();
        assert!(lead.qualification.buyer_confirmed);
        assert!(lead.qualification.motive_confirmed);
    }

    /// Provider that records how many messages each request carried.
    struct CapturingProvider {
        sizes: std::sync::Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl LlmProvider for CapturingProvider {
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.sizes.lock().unwrap().push(request.messages.len());
            Ok(CompletionResponse {
                content: "Perfecto!".to_string(),
            })
        }

        fn model_name(&self) -> &str {
            "capturing"
        }
    }

    #[tokio::test]
    async fn reply_context_shrinks_after_stage_transition() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let engine = StageEngine::new(db.clone(), Arc::new(SpanishDateParser));
        let provider = Arc::new(CapturingProvider {
            sizes: std::sync::Mutex::new(Vec::new()),
        });
        let llm: Arc<dyn LlmProvider> = provider.clone();
        // Rule-only extraction so the provider sees only reply generation.
        let processor = MessageProcessor::new(
            db.clone(),
            SignalExtractor::new(None),
            engine,
            Some(llm),
            BotConfig::default(),
        );

        let mut lead = Lead::new("l1");
        lead.property_id = Some("prop_001".to_string());
        lead.qualification.property_confirmed = true;
        lead.qualification.buyer_confirmed = true;
        lead.qualification.motive_confirmed = true;
        lead.qualification.financing_confirmed = true;
        lead.set_stage(FunnelStage::Calificacion, LeadStatus::Calificando);
        db.save_lead(&lead).await.unwrap();
        for i in 0..7 {
            let direction = if i % 2 == 0 { Direction::In } else { Direction::Out };
            db.append_message("l1", &format!("mensaje {i}"), direction)
                .await
                .unwrap();
        }

        processor
            .handle("l1", "si me gusta puedo avanzar ya")
            .await
            .unwrap();

        let lead = db.get_lead("l1").await.unwrap().unwrap();
        assert_eq!(lead.stage, FunnelStage::PostCalificacion);

        // The reply prompt carries the PostCalificacion window (4), not the
        // Calificacion window (6) the history was fetched with: one
        // instruction block plus four history entries.
        let sizes = provider.sizes.lock().unwrap();
        assert_eq!(sizes.as_slice(), &[5]);
    }

    #[tokio::test]
    async fn qualified_lead_schedules_visit_end_to_end() {
        let (db, processor) = processor_with(None).await;
        db.insert_property(&property("prop_001", "Palermo", 2, 450_000.0))
            .await
            .unwrap();

        processor
            .handle("l1", "Busco 2 ambientes en Palermo hasta 500k")
            .await
            .unwrap();
        processor.handle("l1", "si, esa es").await.unwrap();
        processor.handle("l1", "es para mi, me mudo").await.unwrap();
        processor.handle("l1", "pago en efectivo").await.unwrap();
        let reply = processor
            .handle("l1", "si me gusta puedo avanzar ya")
            .await
            .unwrap();
        assert!(reply.contains("dia y horario"));

        let lead = db.get_lead("l1").await.unwrap().unwrap();
        assert_eq!(lead.stage, FunnelStage::PostCalificacion);
        assert_eq!(lead.status, LeadStatus::AgendandoVisita);
        assert_eq!(lead.mode, ConversationMode::AwaitingDate);

        let reply = processor.handle("l1", "el viernes a las 15").await.unwrap();
        assert!(reply.contains("visita"));

        let lead = db.get_lead("l1").await.unwrap().unwrap();
        assert_eq!(lead.stage, FunnelStage::Finalizado);
        assert_eq!(lead.status, LeadStatus::ProcesoCompletado);

        let visits = db.visits_for_lead("l1").await.unwrap();
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].property_id, "prop_001");
    }
}
