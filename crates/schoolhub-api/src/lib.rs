pub mod app;
pub mod audit;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod request_meta;
pub mod security;
pub mod session;
pub mod state;
pub mod token;
pub mod validation;
