//! Lead, property, message, and visit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::funnel::{ConversationMode, FunnelStage, LeadStatus, QualificationData};

/// What the lead is looking to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Rental,
    Sale,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rental => write!(f, "alquiler"),
            Self::Sale => write!(f, "venta"),
        }
    }
}

impl Intent {
    /// Parse the wire/extraction value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "alquiler" | "rental" | "rent" => Some(Self::Rental),
            "venta" | "compra" | "sale" | "buy" => Some(Self::Sale),
            _ => None,
        }
    }
}

/// A prospective client, one per originating phone number.
///
/// Created on the first inbound message, mutated by every one after that,
/// never deleted — `Finalizado` is a soft completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    /// Phone identifier, e.g. `whatsapp:+54911...`. Immutable.
    pub id: String,
    pub intent: Option<Intent>,
    pub rooms: Option<u32>,
    pub budget: Option<f64>,
    pub neighborhood: Option<String>,
    pub stage: FunnelStage,
    pub status: LeadStatus,
    /// Short-lived conversational sub-state, cleared on stage change.
    pub mode: ConversationMode,
    /// Confirmed property, set once exactly one candidate is confirmed.
    pub property_id: Option<String>,
    /// Property offered but not yet confirmed by the lead.
    pub pending_property_id: Option<String>,
    /// Property ids most recently offered, newest batch wins.
    pub last_suggestions: Vec<String>,
    /// Properties the lead explicitly turned down; never offered again.
    pub rejected_property_ids: Vec<String>,
    pub qualification: QualificationData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Fresh lead at the top of the funnel.
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            intent: None,
            rooms: None,
            budget: None,
            neighborhood: None,
            stage: FunnelStage::Precalificacion,
            status: LeadStatus::Nuevo,
            mode: ConversationMode::None,
            property_id: None,
            pending_property_id: None,
            last_suggestions: Vec::new(),
            rejected_property_ids: Vec::new(),
            qualification: QualificationData::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to a new (stage, status), clearing the conversation mode when the
    /// stage actually changes.
    pub fn set_stage(&mut self, stage: FunnelStage, status: LeadStatus) {
        if stage != self.stage {
            self.mode = ConversationMode::None;
        }
        self.stage = stage;
        self.status = status;
    }
}

/// A property in the catalog. Read-only from the bot's perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: String,
    pub title: String,
    pub neighborhood: String,
    pub rooms: u32,
    pub price: f64,
    pub url: String,
    pub active: bool,
}

/// Message direction relative to the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

/// One entry in the append-only per-lead conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub lead_id: String,
    pub direction: Direction,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// A scheduled property visit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visit {
    pub lead_id: String,
    pub property_id: String,
    pub visit_at: DateTime<Utc>,
    pub confirmed: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}
