pub mod agents;
pub mod alerts;
pub mod events;
pub mod guardrails;
pub mod info;
pub mod recall;
pub mod sessions;
pub mod tail;
