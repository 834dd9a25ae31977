//! Health check module
//! Provides health status for the application and its dependencies

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::database::repository::LedgerStore;
use crate::flow::store::FlowStore;
use crate::telegram::TelegramBot;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        !matches!(self.status, HealthState::Unhealthy)
    }

    fn record(&mut self, component: &str, health: ComponentHealth) {
        self.status = match (&self.status, &health.status) {
            (_, ComponentState::Down) => HealthState::Unhealthy,
            (HealthState::Healthy, ComponentState::Warning) => HealthState::Degraded,
            (current, _) => current.clone(),
        };
        self.checks.insert(component.to_string(), health);
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn LedgerStore>,
    bot: Option<Arc<TelegramBot>>,
    flows: FlowStore,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn LedgerStore>, bot: Option<Arc<TelegramBot>>, flows: FlowStore) -> Self {
        Self { store, bot, flows }
    }

    /// Perform comprehensive health check
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        // Check database health
        let start = Instant::now();
        match timeout(Duration::from_secs(5), self.store.ping()).await {
            Ok(Ok(())) => {
                let response_time = start.elapsed().as_millis();
                health_status.record("database", ComponentHealth::up(Some(response_time)));
                info!("Database health check: OK ({}ms)", response_time);
            }
            Ok(Err(e)) => {
                health_status.record("database", ComponentHealth::down(Some(e.to_string())));
                error!("Database health check failed: {}", e);
            }
            Err(_) => {
                health_status.record("database", ComponentHealth::down(Some("Timeout".to_string())));
                error!("Database health check timed out");
            }
        }

        // Check Telegram bot state; without a token messages are only logged
        if let Some(bot) = &self.bot {
            if bot.is_running() {
                health_status.record("telegram", ComponentHealth::up(None));
            } else {
                health_status.record(
                    "telegram",
                    ComponentHealth::warning(None, Some("bot is not running".to_string())),
                );
                warn!("Telegram bot is configured but not running");
            }
        }

        // Check flow document
        let start = Instant::now();
        match self.flows.load_primary().await {
            Ok(_) => health_status.record(
                "flows",
                ComponentHealth::up(Some(start.elapsed().as_millis())),
            ),
            // Confirmations fall back to the default message, so this only degrades
            Err(e) => {
                health_status.record("flows", ComponentHealth::warning(None, Some(e.to_string())));
                warn!("Flow document check failed: {}", e);
            }
        }

        health_status
    }
}
