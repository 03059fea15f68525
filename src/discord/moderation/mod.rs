pub mod actions;
pub mod audit_channel;
pub mod commands;
pub mod events;
