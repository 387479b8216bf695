//! Deterministic rule layer for signal extraction.
//!
//! Keyword and regex heuristics over the lowercased message. Runs on every
//! inbound message, with no network. Each category is independent; several can
//! fire from one message. The optional LLM refinement only fills what this
//! layer leaves unset.

use std::sync::LazyLock;

use regex::Regex;

use crate::funnel::QualificationUpdate;
use crate::lead::Intent;

// ── Phrase lists ────────────────────────────────────────────────────

const BUYER_PHRASES: &[&str] = &["para mi", "para mí", "es mío", "es mio", "soy yo", "es para mi"];

const RELOCATION_PHRASES: &[&str] = &["mudanza", "mudarme", "me mudo", "vivir", "casa nueva"];

const INVESTMENT_PHRASES: &[&str] = &["inversión", "inversion", "invertir", "inversor", "renta"];

const FINANCING_PHRASES: &[&str] = &[
    "ahorro",
    "efectivo",
    "contado",
    "crédito",
    "credito",
    "banco",
    "preaprobado",
    "hipotecario",
];

const PREAPPROVAL_PHRASES: &[&str] = &["preaprobado", "preaprobación", "preaprobacion", "pre aprobado"];

const NEEDS_TO_SELL_PHRASES: &[&str] = &["tengo que vender", "necesito vender", "vendo mi", "vender mi"];

const TIMELINE_PHRASES: &[&str] = &["pronto", "rápido", "rapido", "urgente", "este mes", "próximo mes", "proximo mes"];

const READY_PHRASES: &[&str] = &[
    "puedo avanzar",
    "si me gusta",
    "estoy listo",
    "estoy lista",
    "podemos coordinar",
    "quiero comprar",
    "quiero alquilar",
    "me interesa",
];

const CONFIRM_PHRASES: &[&str] = &["correcto", "exacto", "esa es", "ese es", "perfecto", "confirmo"];
const CONFIRM_WORDS: &[&str] = &["si", "sí", "dale", "ok"];

const REJECT_PHRASES: &[&str] = &["no es", "otra", "diferente", "equivocada"];
const REJECT_WORDS: &[&str] = &["no"];

/// Known neighborhoods, lowercase key → canonical name.
const NEIGHBORHOODS: &[(&str, &str)] = &[
    ("nuñez", "Núñez"),
    ("nunez", "Núñez"),
    ("palermo", "Palermo"),
    ("belgrano", "Belgrano"),
    ("recoleta", "Recoleta"),
    ("san telmo", "San Telmo"),
    ("puerto madero", "Puerto Madero"),
    ("villa crespo", "Villa Crespo"),
    ("caballito", "Caballito"),
    ("flores", "Flores"),
    ("barracas", "Barracas"),
    ("boca", "La Boca"),
    ("tigre", "Tigre"),
    ("vicente lopez", "Vicente López"),
    ("olivos", "Olivos"),
    ("martinez", "Martínez"),
];

// ── Regexes ─────────────────────────────────────────────────────────

static ROOMS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*(?:amb|habitac|dormitor|cuarto)").unwrap());

static BUDGET_K_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:[.,]\d+)?)\s*k\b").unwrap());

static BUDGET_M_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:[.,]\d+)?)\s*(?:m\b|millon|millón)").unwrap());

// Plain amounts need a thousands separator or at least four digits, so a
// room count near the word "presupuesto" is not read as money.
static BUDGET_PLAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\$|presupuesto\D{0,20}|usd\s*)(\d{1,3}(?:[.,]\d{3})+|\d{4,})").unwrap()
});

/// Match `word` as a whole token of `message`.
fn contains_word(message: &str, word: &str) -> bool {
    message
        .split(|c: char| !c.is_alphanumeric() && c != 'í' && c != 'é')
        .any(|token| token == word)
}

fn contains_any(message: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| message.contains(phrase))
}

// ── Extraction ──────────────────────────────────────────────────────

/// Extract qualification signals from one message.
pub fn qualification_signals(message: &str) -> QualificationUpdate {
    let message = message.to_lowercase();
    let mut update = QualificationUpdate::default();

    if contains_any(&message, BUYER_PHRASES) {
        update.buyer_confirmed = Some(true);
        update.decision_maker = Some(true);
    }

    if contains_any(&message, RELOCATION_PHRASES) || contains_any(&message, INVESTMENT_PHRASES) {
        update.motive_confirmed = Some(true);
    }

    if contains_any(&message, FINANCING_PHRASES) {
        update.financing_confirmed = Some(true);
    }

    if contains_any(&message, PREAPPROVAL_PHRASES) {
        update.has_preapproval = Some(true);
    }

    if contains_any(&message, NEEDS_TO_SELL_PHRASES) {
        update.needs_to_sell = Some(true);
    }

    if contains_any(&message, TIMELINE_PHRASES) || contains_word(&message, "ya") {
        update.timeline_confirmed = Some(true);
    }

    if contains_any(&message, READY_PHRASES)
        || contains_word(&message, "dale")
        || contains_word(&message, "vamos")
    {
        update.ready_to_close = Some(true);
    }

    update
}

/// Extract the lead's intent (rental vs purchase), if stated.
pub fn intent_signal(message: &str) -> Option<Intent> {
    let message = message.to_lowercase();
    if message.contains("alquilar") || message.contains("alquiler") || message.contains("rentar") {
        return Some(Intent::Rental);
    }
    if message.contains("comprar") || contains_word(&message, "compra") {
        return Some(Intent::Sale);
    }
    None
}

/// Extract a room count. Monoambiente/studio counts as 1. Never zero.
pub fn rooms_signal(message: &str) -> Option<u32> {
    let message = message.to_lowercase();
    if message.contains("monoambiente") || contains_word(&message, "mono") {
        return Some(1);
    }
    let captures = ROOMS_RE.captures(&message)?;
    let rooms: u32 = captures.get(1)?.as_str().parse().ok()?;
    (rooms > 0).then_some(rooms)
}

/// Extract a budget amount, supporting "150k", "1.5M", "$120.000".
/// Never zero or negative.
pub fn budget_signal(message: &str) -> Option<f64> {
    let message = message.to_lowercase();

    if let Some(captures) = BUDGET_M_RE.captures(&message) {
        let amount: f64 = captures.get(1)?.as_str().replace(',', ".").parse().ok()?;
        return positive(amount * 1_000_000.0);
    }
    if let Some(captures) = BUDGET_K_RE.captures(&message) {
        let amount: f64 = captures.get(1)?.as_str().replace(',', ".").parse().ok()?;
        return positive(amount * 1_000.0);
    }
    if let Some(captures) = BUDGET_PLAIN_RE.captures(&message) {
        let raw = captures.get(1)?.as_str().replace(['.', ','], "");
        let amount: f64 = raw.parse().ok()?;
        return positive(amount);
    }
    None
}

fn positive(amount: f64) -> Option<f64> {
    (amount > 0.0).then_some(amount)
}

/// Recognize a known neighborhood mention.
pub fn neighborhood_signal(message: &str) -> Option<String> {
    let message = message.to_lowercase();
    NEIGHBORHOODS
        .iter()
        .find(|(key, _)| message.contains(key))
        .map(|(_, name)| name.to_string())
}

/// Whether the message confirms or rejects an offered property.
/// `None` when neither reading is clear.
pub fn property_confirmation(message: &str) -> Option<bool> {
    let message = message.to_lowercase();

    // Rejection phrases are more specific than the bare "si", check them first.
    if contains_any(&message, REJECT_PHRASES)
        || REJECT_WORDS.iter().any(|w| contains_word(&message, w))
    {
        return Some(false);
    }
    if contains_any(&message, CONFIRM_PHRASES)
        || CONFIRM_WORDS.iter().any(|w| contains_word(&message, w))
    {
        return Some(true);
    }
    None
}

/// Detect the lead picking one of the offered suggestions, by ordinal
/// ("la primera"), bare number ("2"), or explicit id ("prop_001").
pub fn choose_suggestion(message: &str, suggestions: &[String]) -> Option<String> {
    let message = message.trim().to_lowercase();

    if let Ok(number) = message.parse::<usize>() {
        if (1..=suggestions.len()).contains(&number) {
            return Some(suggestions[number - 1].clone());
        }
    }

    const ORDINALS: &[(&str, usize)] = &[
        ("primer", 0),
        ("segund", 1),
        ("tercer", 2),
        ("ultim", usize::MAX),
        ("últim", usize::MAX),
    ];
    for (stem, index) in ORDINALS {
        if message.contains(stem) {
            let index = if *index == usize::MAX {
                suggestions.len().checked_sub(1)?
            } else {
                *index
            };
            return suggestions.get(index).cloned();
        }
    }

    if message.starts_with("prop_") && suggestions.iter().any(|s| s == &message) {
        return Some(message);
    }

    None
}
