//! Message-processing pipeline: classification and the per-message processor.

pub mod classifier;
pub mod processor;

pub use classifier::{classify_reply_intent, ReplyIntent};
pub use processor::MessageProcessor;
