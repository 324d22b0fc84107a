#![deny(unsafe_code)]

/// Terminal front-end driving the coordinator.
pub mod app;
/// Conversation model, prompt assembly and generation orchestration.
pub mod chat;
/// Settings persistence.
pub mod settings;
