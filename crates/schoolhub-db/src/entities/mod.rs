pub mod audit_events;
pub mod refresh_tokens;
pub mod schools;
pub mod users;
