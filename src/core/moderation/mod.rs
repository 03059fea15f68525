// Core moderation module - the chat moderation engine.
// Platform-agnostic: storage, the chat API and the audit trail are ports.

pub mod audit;
pub mod content_filter;
pub mod dispatcher;
pub mod flood_detector;
pub mod join_verification;
pub mod moderation_models;
pub mod moderation_ports;
pub mod policy_editor;
pub mod warning_escalator;

#[cfg(test)]
pub mod test_support;

pub use audit::{AuditKind, AuditRecord};
pub use content_filter::ContentFilterCache;
pub use dispatcher::{contains_link, ModerationDispatcher, WarnReport};
pub use flood_detector::FloodDetector;
pub use join_verification::JoinVerifier;
pub use moderation_models::*;
pub use moderation_ports::*;
pub use policy_editor::{parse_duration, PolicyEditor};
pub use warning_escalator::WarningEscalator;
