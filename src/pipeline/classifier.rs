//! Secondary classification of the generated reply.
//!
//! The reply generator is free text; we scan its output for the questions it
//! chose to ask so the next inbound message can be interpreted in context.
//! This only ever sets the transient conversation mode — it never drives a
//! stage transition or a visit on its own.

/// What the outbound reply is asking the lead for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyIntent {
    /// Plain informational reply.
    None,
    /// The reply asks the lead to confirm a specific property.
    AsksPropertyConfirmation,
    /// The reply asks for a visit date/time.
    AsksSchedule,
}

const SCHEDULE_MARKERS: &[&str] = &[
    "dia y horario",
    "día y horario",
    "que dia",
    "qué día",
    "que horario",
    "qué horario",
    "cuando te queda",
    "cuándo te queda",
    "coordinar una visita",
    "agendar una visita",
    "cuando podrias",
    "cuándo podrías",
];

const CONFIRMATION_MARKERS: &[&str] = &[
    "es la que te interesa",
    "es la propiedad que",
    "es esta la propiedad",
    "te referis a",
    "te referís a",
    "es la que estabas buscando",
    "confirmame si",
    "confirmás",
    "confirmas si",
];

/// Classify an outbound reply. Schedule questions win over confirmation
/// questions when both appear, since scheduling is the later funnel step.
pub fn classify_reply_intent(reply: &str) -> ReplyIntent {
    let reply = reply.to_lowercase();
    if SCHEDULE_MARKERS.iter().any(|m| reply.contains(m)) {
        return ReplyIntent::AsksSchedule;
    }
    if CONFIRMATION_MARKERS.iter().any(|m| reply.contains(m)) {
        return ReplyIntent::AsksPropertyConfirmation;
    }
    ReplyIntent::None
}
