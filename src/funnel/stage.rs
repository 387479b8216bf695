//! Funnel state machine — tracks which stage of qualification a lead is in.

use serde::{Deserialize, Serialize};

/// The stages of the lead conversion funnel.
///
/// Progresses linearly: Precalificacion → Calificacion → PostCalificacion →
/// Finalizado. Finalizado is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunnelStage {
    /// Answering questions and pinning down one concrete property.
    Precalificacion,
    /// Asking the qualification questions.
    Calificacion,
    /// Scheduling a visit, or informing disqualification.
    PostCalificacion,
    /// Process complete (visit scheduled or lead disqualified).
    Finalizado,
}

impl FunnelStage {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: FunnelStage) -> bool {
        use FunnelStage::*;
        matches!(
            (self, target),
            (Precalificacion, Calificacion)
                | (Calificacion, PostCalificacion)
                | (PostCalificacion, Finalizado)
        )
    }

    /// Whether this stage is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalizado)
    }

    /// Maximum number of most-recent conversation turns exposed to the reply
    /// generator at this stage. Shrinks as the lead progresses: exploratory
    /// context early, minimal context once only scheduling remains.
    pub fn context_window(&self) -> usize {
        match self {
            Self::Precalificacion => 10,
            Self::Calificacion => 6,
            Self::PostCalificacion => 4,
            Self::Finalizado => 2,
        }
    }
}

impl Default for FunnelStage {
    fn default() -> Self {
        Self::Precalificacion
    }
}

impl std::fmt::Display for FunnelStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Precalificacion => "PRECALIFICACION",
            Self::Calificacion => "CALIFICACION",
            Self::PostCalificacion => "POST_CALIFICACION",
            Self::Finalizado => "FINALIZADO",
        };
        write!(f, "{s}")
    }
}

/// Finer-grained state within a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadStatus {
    // PRECALIFICACION
    /// Just arrived, nothing known yet.
    Nuevo,
    /// Identifying which property the lead wants.
    BuscandoPropiedad,
    // CALIFICACION
    /// Working through the qualification questions.
    Calificando,
    /// Passed qualification. Message processing jumps straight from
    /// `Calificando` to `AgendandoVisita`; this status is set from the
    /// operator panel when an agent qualifies a lead by hand.
    Calificado,
    /// Failed qualification.
    Descalificado,
    // POST_CALIFICACION
    /// Coordinating a visit date/time.
    AgendandoVisita,
    /// Visit confirmed. Set from the operator panel; a scheduling message
    /// moves the lead directly to `ProcesoCompletado`.
    VisitaAgendada,
    // FINALIZADO
    /// Visited or process otherwise closed.
    ProcesoCompletado,
}

impl Default for LeadStatus {
    fn default() -> Self {
        Self::Nuevo
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Nuevo => "NUEVO",
            Self::BuscandoPropiedad => "BUSCANDO_PROPIEDAD",
            Self::Calificando => "CALIFICANDO",
            Self::Calificado => "CALIFICADO",
            Self::Descalificado => "DESCALIFICADO",
            Self::AgendandoVisita => "AGENDANDO_VISITA",
            Self::VisitaAgendada => "VISITA_AGENDADA",
            Self::ProcesoCompletado => "PROCESO_COMPLETADO",
        };
        write!(f, "{s}")
    }
}

/// Short-lived conversational sub-state, orthogonal to the funnel stage.
///
/// Cleared whenever the funnel stage changes. Never gates a persisted state
/// change on its own — transitions and visit creation are decided from the
/// stage/status machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    None,
    /// The last outbound message asked for a visit date/time.
    AwaitingDate,
    /// The last outbound message asked the lead to confirm a property.
    AwaitingPropertyConfirmation,
}

impl Default for ConversationMode {
    fn default() -> Self {
        Self::None
    }
}
