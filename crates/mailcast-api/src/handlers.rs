//! API request handlers

pub mod campaigns;
pub mod health;
pub mod providers;
pub mod webhooks;
