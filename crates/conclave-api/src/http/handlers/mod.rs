//! HTTP request handlers for the REST API.

pub mod bot;
pub mod escalation;
pub mod message;
pub mod role_card;
pub mod room;
pub mod ws;
