//! Propleads — WhatsApp lead-qualification agent for a real-estate agency.

pub mod config;
pub mod error;
pub mod extract;
pub mod funnel;
pub mod lead;
pub mod llm;
pub mod matching;
pub mod pipeline;
pub mod schedule;
pub mod server;
pub mod store;
