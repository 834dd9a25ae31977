//! PIX payment backend for a Telegram storefront bot.
//!
//! Charges are created against one of several PIX gateways, confirmed through
//! gateway webhooks, credited to the user's balance exactly once, and answered
//! with a confirmation screen taken from the editable conversation flow.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod flow;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod telegram;
pub mod workers;
