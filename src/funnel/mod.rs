//! Lead qualification funnel — stages, qualification data, transitions, prompts.

pub mod engine;
pub mod prompts;
pub mod qualification;
pub mod stage;

pub use engine::{AdvanceOutcome, StageEngine};
pub use qualification::{QualificationData, QualificationUpdate};
pub use stage::{ConversationMode, FunnelStage, LeadStatus};
