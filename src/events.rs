//! Structured progress events
//!
//! The engine emits events at defined checkpoints instead of logging
//! presentation-oriented progress inline. Consumers implement [`EventSink`];
//! the default sink forwards to `tracing`.

use std::sync::Arc;
use tracing::info;

/// A checkpoint in the answering or discovery pipeline
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A discovery run started for an organization's domain
    DiscoveryStarted { org_id: i64, domain: String },
    /// One batch of URLs finished processing (discovery or fetch stage)
    BatchCompleted { completed: usize, total: usize },
    /// The decision policy chose cache vs. fresh fetch
    DecisionMade {
        org_id: i64,
        content_found: bool,
        confidence: f32,
    },
    /// An answer was synthesized
    AnswerSynthesized {
        org_id: i64,
        used_web_search: bool,
        confidence: f32,
    },
}

/// Receiver for progress events
///
/// Implementations must be cheap and infallible; the engine never awaits
/// acknowledgement and never fails on a sink's behalf.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Default sink: forward events to tracing at info level
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::DiscoveryStarted { org_id, domain } => {
                info!(org_id, %domain, "discovery started");
            }
            ProgressEvent::BatchCompleted { completed, total } => {
                info!(completed, total, "batch completed");
            }
            ProgressEvent::DecisionMade {
                org_id,
                content_found,
                confidence,
            } => {
                info!(org_id, content_found, confidence, "decision made");
            }
            ProgressEvent::AnswerSynthesized {
                org_id,
                used_web_search,
                confidence,
            } => {
                info!(org_id, used_web_search, confidence, "answer synthesized");
            }
        }
    }
}

/// Shared handle to an event sink
pub type SharedSink = Arc<dyn EventSink>;
