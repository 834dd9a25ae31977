use crate::config::GatewaySettings;
use crate::database::models::GatewayConfig;
use crate::database::repository::GatewayConfigStore;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::GatewayClient;
use crate::payments::providers::{EfiGateway, OpenPixGateway, SuitPayGateway};
use crate::payments::types::GatewayName;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

/// Builds a client from a gateway's stored configuration.
pub type GatewayConstructor = Arc<
    dyn Fn(&GatewayConfig, &GatewaySettings) -> PaymentResult<Box<dyn GatewayClient>>
        + Send
        + Sync,
>;

struct CachedClient {
    fingerprint: String,
    client: Arc<dyn GatewayClient>,
}

/// Maps gateway names to adapters and picks the gateway for each payment.
///
/// Configurations are read from the store on every call so that an
/// administrator enabling or disabling a gateway takes effect immediately.
/// Built clients are kept per configuration id and rebuilt when the stored
/// configuration changes, so adapter state such as OAuth tokens outlives a
/// single charge.
pub struct GatewayRegistry {
    store: Arc<dyn GatewayConfigStore>,
    settings: GatewaySettings,
    constructors: HashMap<String, GatewayConstructor>,
    clients: RwLock<HashMap<i64, CachedClient>>,
}

impl GatewayRegistry {
    /// Registry with the Efí, SuitPay and OpenPix adapters.
    pub fn new(store: Arc<dyn GatewayConfigStore>, settings: GatewaySettings) -> Self {
        let mut registry = Self::empty(store, settings);
        registry.register(GatewayName::Efi.as_str(), Arc::new(build_efi));
        registry.register(GatewayName::SuitPay.as_str(), Arc::new(build_suitpay));
        registry.register(GatewayName::OpenPix.as_str(), Arc::new(build_openpix));
        registry
    }

    /// Registry without any adapter.
    pub fn empty(store: Arc<dyn GatewayConfigStore>, settings: GatewaySettings) -> Self {
        Self {
            store,
            settings,
            constructors: HashMap::new(),
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Add or replace the adapter for `name`.
    pub fn register(&mut self, name: &str, constructor: GatewayConstructor) {
        self.constructors
            .insert(Self::canonical_name(name), constructor);
    }

    pub fn supports(&self, name: &str) -> bool {
        self.constructors.contains_key(&Self::canonical_name(name))
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Known aliases (`gerencianet`, `woovi`, ...) map to their adapter's name.
    pub fn canonical_name(name: &str) -> String {
        GatewayName::from_str(name)
            .map(|gateway| gateway.as_str().to_string())
            .unwrap_or_else(|_| name.trim().to_lowercase())
    }

    /// The active configuration for `preferred`, else the active one with the lowest id.
    pub async fn resolve(&self, preferred: Option<&str>) -> PaymentResult<GatewayConfig> {
        let active = self.store.list_active().await?;

        if let Some(preferred) = preferred.filter(|p| !p.trim().is_empty()) {
            let wanted = Self::canonical_name(preferred);
            if let Some(config) = active
                .iter()
                .find(|config| Self::canonical_name(&config.name) == wanted)
            {
                return Ok(config.clone());
            }
            warn!(preferred = %preferred, "preferred gateway is not active, falling back");
        }

        active
            .into_iter()
            .min_by_key(|config| config.id)
            .ok_or(PaymentError::NoActiveGateway)
    }

    /// Client for `config`, reused while the stored configuration is unchanged.
    pub async fn create_client(
        &self,
        config: &GatewayConfig,
    ) -> PaymentResult<Arc<dyn GatewayClient>> {
        let fingerprint = fingerprint(config);
        if let Some(cached) = self.clients.read().await.get(&config.id) {
            if cached.fingerprint == fingerprint {
                return Ok(cached.client.clone());
            }
        }

        let name = Self::canonical_name(&config.name);
        let Some(constructor) = self.constructors.get(&name).cloned() else {
            error!(
                gateway = %config.name,
                gateway_id = config.id,
                "gateway configuration has no registered adapter"
            );
            return Err(PaymentError::UnsupportedGateway {
                name: config.name.clone(),
            });
        };

        // Adapters may read certificate files while being built
        let owned = config.clone();
        let settings = self.settings.clone();
        let client = tokio::task::spawn_blocking(move || constructor(&owned, &settings))
            .await
            .map_err(|e| {
                PaymentError::configuration(
                    config.name.as_str(),
                    format!("adapter construction failed: {}", e),
                )
            })??;
        let client: Arc<dyn GatewayClient> = Arc::from(client);

        debug!(gateway = %config.name, gateway_id = config.id, "gateway client built");
        self.clients.write().await.insert(
            config.id,
            CachedClient {
                fingerprint,
                client: client.clone(),
            },
        );
        Ok(client)
    }

    /// Configuration and client for a named gateway, active or not.
    pub async fn client_for(
        &self,
        name: &str,
    ) -> PaymentResult<(GatewayConfig, Arc<dyn GatewayClient>)> {
        let config = match self.store.find_by_name(name).await? {
            Some(config) => config,
            None => {
                let canonical = Self::canonical_name(name);
                let all_active = self.store.list_active().await?;
                all_active
                    .into_iter()
                    .find(|config| Self::canonical_name(&config.name) == canonical)
                    .ok_or_else(|| {
                        PaymentError::validation(
                            format!("gateway '{}' is not configured", name),
                            "gateway",
                        )
                    })?
            }
        };
        let client = self.create_client(&config).await?;
        Ok((config, client))
    }
}

/// Everything an adapter is built from besides the shared settings.
fn fingerprint(config: &GatewayConfig) -> String {
    serde_json::json!({
        "name": config.name,
        "is_sandbox": config.is_sandbox,
        "credentials": config.credentials,
        "operational_config": config.operational_config,
    })
    .to_string()
}

fn build_efi(
    config: &GatewayConfig,
    settings: &GatewaySettings,
) -> PaymentResult<Box<dyn GatewayClient>> {
    Ok(Box::new(EfiGateway::from_gateway_config(config, settings)?))
}

fn build_suitpay(
    config: &GatewayConfig,
    settings: &GatewaySettings,
) -> PaymentResult<Box<dyn GatewayClient>> {
    Ok(Box::new(SuitPayGateway::from_gateway_config(config, settings)?))
}

fn build_openpix(
    config: &GatewayConfig,
    settings: &GatewaySettings,
) -> PaymentResult<Box<dyn GatewayClient>> {
    Ok(Box::new(OpenPixGateway::from_gateway_config(config, settings)?))
}
