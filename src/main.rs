use pixflow_backend::api::{self, AppState};
use pixflow_backend::config::AppConfig;
use pixflow_backend::database::memory::{MemoryGatewayConfigStore, MemoryLedgerStore};
use pixflow_backend::database::repository::{GatewayConfigStore, LedgerStore};
use pixflow_backend::flow::resolver::FlowGraphResolver;
use pixflow_backend::flow::store::FlowStore;
use pixflow_backend::health::HealthChecker;
use pixflow_backend::logging::init_tracing;
use pixflow_backend::middleware::logging::{request_logging_middleware, UuidRequestId};
use pixflow_backend::payments::factory::GatewayRegistry;
use pixflow_backend::services::ledger::TransactionLedger;
use pixflow_backend::services::notification::{LogNotifier, NotificationQueue, Notifier};
use pixflow_backend::services::payment_service::PaymentService;
use pixflow_backend::services::webhook_processor::WebhookReconciler;
use pixflow_backend::telegram::TelegramBot;
use pixflow_backend::workers::NotificationRetryWorker;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

type Stores = (Arc<dyn LedgerStore>, Arc<dyn GatewayConfigStore>);

#[cfg(feature = "database")]
async fn postgres_stores(config: &AppConfig) -> anyhow::Result<Option<Stores>> {
    use pixflow_backend::database::gateway_config_repository::GatewayConfigRepository;
    use pixflow_backend::database::connect;
    use pixflow_backend::database::transaction_repository::TransactionRepository;

    let Some(db_config) = &config.database else {
        return Ok(None);
    };

    info!("Initializing database connection pool...");
    let pool = connect(db_config).await?;

    Ok(Some((
        Arc::new(TransactionRepository::new(pool.clone())),
        Arc::new(GatewayConfigRepository::new(pool)),
    )))
}

#[cfg(not(feature = "database"))]
async fn postgres_stores(config: &AppConfig) -> anyhow::Result<Option<Stores>> {
    if config.database.is_some() {
        warn!("DATABASE_URL is set but the database feature is disabled");
    }
    Ok(None)
}

/// Ledger and gateway stores, Postgres when configured and in memory otherwise.
async fn build_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    if let Some(stores) = postgres_stores(config).await? {
        return Ok(stores);
    }

    warn!("No database configured, ledger is kept in memory and lost on restart");
    let gateways = match &config.gateways.seed_path {
        Some(path) => {
            let store = MemoryGatewayConfigStore::from_seed_file(path).await?;
            info!(seed = %path, "Gateway configurations loaded from seed file");
            store
        }
        None => {
            warn!("No gateway seed file configured, every charge will fail until one is added");
            MemoryGatewayConfigStore::new(Vec::new())
        }
    };

    Ok((Arc::new(MemoryLedgerStore::new()), Arc::new(gateways)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(&config.logging);

    info!(
        host = %config.server.host,
        port = config.server.port,
        public_base_url = %config.server.public_base_url,
        "Starting PIX payment backend"
    );

    let (ledger_store, gateway_store) = build_stores(&config).await?;

    let bot = match &config.telegram {
        Some(telegram_config) => {
            let bot = Arc::new(TelegramBot::new(telegram_config)?);
            match bot.start().await {
                Ok(identity) => info!(username = ?identity.username, "Telegram bot connected"),
                Err(e) => warn!(error = %e, "Telegram bot failed to start, confirmations will be queued"),
            }
            Some(bot)
        }
        None => {
            warn!("TELEGRAM_BOT_TOKEN not set, confirmations are only logged");
            None
        }
    };
    let notifier: Arc<dyn Notifier> = match &bot {
        Some(bot) => bot.clone() as Arc<dyn Notifier>,
        None => Arc::new(LogNotifier),
    };

    let flows = FlowStore::from_config(&config.flows);
    let ledger = TransactionLedger::new(ledger_store.clone());
    let registry = Arc::new(GatewayRegistry::new(gateway_store, config.gateways.clone()));
    let queue = NotificationQueue::new();

    let reconciler = WebhookReconciler::new(
        ledger.clone(),
        FlowGraphResolver::new(flows.clone()),
        notifier.clone(),
    )
    .with_retry_queue(queue.clone());

    let state = AppState {
        payments: Arc::new(PaymentService::new(registry.clone(), ledger)),
        reconciler: Arc::new(reconciler),
        registry,
        flows: flows.clone(),
        health: HealthChecker::new(ledger_store, bot.clone(), flows),
    };

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let retry_worker = NotificationRetryWorker::new(queue, notifier, &config.notifications);
    let retry_handle = tokio::spawn(retry_worker.run(worker_shutdown_rx));

    let app = api::router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id()),
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "Server listening");
    info!(
        efi = %config.gateways.webhook_url("efi"),
        suitpay = %config.gateways.webhook_url("suitpay"),
        openpix = %config.gateways.webhook_url("openpix"),
        "Gateway webhook endpoints"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Err(e) = retry_handle.await {
        error!(error = %e, "notification retry worker ended abnormally");
    }
    if let Some(bot) = bot {
        bot.stop().await;
    }

    info!("Server stopped");
    Ok(())
}
