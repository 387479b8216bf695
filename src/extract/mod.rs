//! Signal extraction from inbound messages.
//!
//! Two layers. The rule layer ([`rules`]) always runs: keyword lists and
//! regexes, deterministic and free. When an LLM provider is configured it
//! refines the result — but only by filling keys the rules left unset, and
//! any failure (network, parse, empty response) degrades to rule-only output
//! with a warning. Extraction never fails the pipeline.

pub mod rules;

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::funnel::QualificationUpdate;
use crate::lead::{Intent, Message};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

/// Search-profile fields extracted from a message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub intent: Option<Intent>,
    pub rooms: Option<u32>,
    pub budget: Option<f64>,
    pub neighborhood: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Everything one message yielded.
#[derive(Debug, Clone, Default)]
pub struct ExtractedSignals {
    pub profile: ProfileUpdate,
    pub qualification: QualificationUpdate,
}

/// JSON shape the refinement prompt asks the model for.
#[derive(Debug, Deserialize)]
struct LlmExtraction {
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    rooms: Option<u32>,
    #[serde(default)]
    budget: Option<f64>,
    #[serde(default)]
    neighborhood: Option<String>,
    #[serde(flatten)]
    qualification: QualificationUpdate,
}

const EXTRACTION_INSTRUCTIONS: &str = r#"Sos un extractor de datos para una inmobiliaria. Analizá el último mensaje del cliente y devolvé SOLO un objeto JSON, sin texto adicional ni markdown.

Claves posibles (omití las que no puedas inferir del mensaje):
- "intent": "alquiler" o "venta"
- "rooms": número de ambientes (entero positivo)
- "budget": presupuesto en números (ej: 150000)
- "neighborhood": barrio mencionado
- "buyer_confirmed": true si compra para sí mismo
- "motive_confirmed": true si el motivo es claro (mudanza o inversión)
- "financing_confirmed": true si menciona cómo financia
- "timeline_confirmed": true si tiene plazos concretos
- "ready_to_close": true si dice que puede avanzar
- "needs_to_sell": true/false si menciona tener que vender antes
- "has_preapproval": true/false si menciona preaprobación bancaria

Nunca inventes datos. Si el mensaje no dice nada útil, devolvé {}."#;

/// Extracts profile and qualification signals from inbound messages.
pub struct SignalExtractor {
    llm: Option<Arc<dyn LlmProvider>>,
}

impl SignalExtractor {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { llm }
    }

    /// Run both layers over one message. `history` gives the LLM recent
    /// context; the rule layer only looks at the message itself.
    pub async fn extract(&self, message: &str, history: &[Message]) -> ExtractedSignals {
        let mut signals = ExtractedSignals {
            profile: ProfileUpdate {
                intent: rules::intent_signal(message),
                rooms: rules::rooms_signal(message),
                budget: rules::budget_signal(message),
                neighborhood: rules::neighborhood_signal(message),
            },
            qualification: rules::qualification_signals(message),
        };

        if let Some(llm) = &self.llm {
            match self.refine(llm.as_ref(), message, history).await {
                Ok(refined) => {
                    signals.qualification.fill_missing_from(&refined.qualification);
                    let profile = &mut signals.profile;
                    if profile.intent.is_none() {
                        profile.intent = refined.intent.as_deref().and_then(Intent::parse);
                    }
                    if profile.rooms.is_none() {
                        profile.rooms = refined.rooms.filter(|r| *r > 0);
                    }
                    if profile.budget.is_none() {
                        profile.budget = refined.budget.filter(|b| *b > 0.0);
                    }
                    if profile.neighborhood.is_none() {
                        profile.neighborhood = refined.neighborhood.filter(|n| !n.trim().is_empty());
                    }
                }
                Err(e) => {
                    warn!(error = %e, "LLM extraction refinement failed, using rule layer only");
                }
            }
        }

        debug!(
            profile_empty = signals.profile.is_empty(),
            qualification_empty = signals.qualification.is_empty(),
            "Extraction complete"
        );
        signals
    }

    async fn refine(
        &self,
        llm: &dyn LlmProvider,
        message: &str,
        history: &[Message],
    ) -> Result<LlmExtraction, crate::error::LlmError> {
        let mut messages = vec![ChatMessage::system(EXTRACTION_INSTRUCTIONS)];
        for entry in history.iter().rev().take(4).rev() {
            match entry.direction {
                crate::lead::Direction::In => messages.push(ChatMessage::user(entry.text.clone())),
                crate::lead::Direction::Out => {
                    messages.push(ChatMessage::assistant(entry.text.clone()))
                }
            }
        }
        messages.push(ChatMessage::user(message));

        let request = CompletionRequest::new(messages)
            .with_max_tokens(300)
            .with_temperature(0.0);
        let response = llm.complete(request).await?;

        let json = strip_code_fences(&response.content);
        serde_json::from_str(json).map_err(|e| crate::error::LlmError::ParseError(e.to_string()))
    }
}

/// Models often wrap JSON in ```json fences despite instructions.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::CompletionResponse;
    use async_trait::async_trait;

    /// Provider returning a fixed response, or failing.
    struct ScriptedProvider {
        response: Option<String>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            match &self.response {
                Some(content) => Ok(CompletionResponse {
                    content: content.clone(),
                }),
                None => Err(LlmError::RequestFailed {
                    provider: "scripted".to_string(),
                    reason: "unavailable".to_string(),
                }),
            }
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn rule_only_extraction_without_llm() {
        let extractor = SignalExtractor::new(None);
        let signals = extractor
            .extract("Busco depto de 2 ambientes en Palermo, hasta 150k", &[])
            .await;
        assert_eq!(signals.profile.rooms, Some(2));
        assert_eq!(signals.profile.budget, Some(150_000.0));
        assert_eq!(signals.profile.neighborhood.as_deref(), Some("Palermo"));
    }

    #[tokio::test]
    async fn llm_fills_gaps_but_never_overrides_rules() {
        let provider = ScriptedProvider {
            response: Some(
                r#"{"neighborhood": "Belgrano", "rooms": 5, "motive_confirmed": true}"#.to_string(),
            ),
        };
        let extractor = SignalExtractor::new(Some(Arc::new(provider)));
        let signals = extractor.extract("3 ambientes en palermo", &[]).await;
        // Rules found rooms and neighborhood, so refinement is ignored there.
        assert_eq!(signals.profile.rooms, Some(3));
        assert_eq!(signals.profile.neighborhood.as_deref(), Some("Palermo"));
        // The rules saw no motive signal, so the refinement fills it.
        assert_eq!(signals.qualification.motive_confirmed, Some(true));
    }

    #[tokio::test]
    async fn llm_failure_degrades_to_rules() {
        let provider = ScriptedProvider { response: None };
        let extractor = SignalExtractor::new(Some(Arc::new(provider)));
        let signals = extractor.extract("es para mi, pago en efectivo", &[]).await;
        assert_eq!(signals.qualification.buyer_confirmed, Some(true));
        assert_eq!(signals.qualification.financing_confirmed, Some(true));
    }

    #[tokio::test]
    async fn fenced_json_is_accepted() {
        let provider = ScriptedProvider {
            response: Some("```json\n{\"budget\": 200000}\n```".to_string()),
        };
        let extractor = SignalExtractor::new(Some(Arc::new(provider)));
        let signals = extractor.extract("tengo un presupuesto amplio", &[]).await;
        assert_eq!(signals.profile.budget, Some(200_000.0));
    }

    #[tokio::test]
    async fn malformed_json_degrades_to_rules() {
        let provider = ScriptedProvider {
            response: Some("no puedo ayudar con eso".to_string()),
        };
        let extractor = SignalExtractor::new(Some(Arc::new(provider)));
        let signals = extractor.extract("quiero alquilar en olivos", &[]).await;
        assert_eq!(signals.profile.intent, Some(Intent::Rental));
        assert_eq!(signals.profile.neighborhood.as_deref(), Some("Olivos"));
    }
}
