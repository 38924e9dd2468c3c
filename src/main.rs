use plantcare_backend::api::{self, payments::PaymentState};
use plantcare_backend::config::AppConfig;
use plantcare_backend::database::{
    init_pool_from_config,
    ledger::{InMemoryLedger, PaymentLedger},
    payment_order_repository::PaymentOrderRepository,
};
use plantcare_backend::health::HealthChecker;
use plantcare_backend::logging::init_tracing;
use plantcare_backend::payments::{CallbackValidator, PaymentRequestBuilder, Signer};
use plantcare_backend::services::{
    EntitlementService, LoggingEntitlementService, PaymentOrderService, PgEntitlementService,
    ReconciliationCoordinator,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);

    config.validate().map_err(|e| {
        error!("❌ Invalid configuration: {}", e);
        e
    })?;

    info!(
        merchant_code = %config.gateway.merchant_code,
        pay_url = %config.gateway.pay_url,
        expire_minutes = config.gateway.expire_minutes,
        "Gateway configuration loaded"
    );

    let db_pool = if config.server.skip_externals {
        info!("⏭️  Skipping database initialization (SKIP_EXTERNALS=true)");
        None
    } else {
        info!("📊 Initializing database connection pool...");
        let pool = init_pool_from_config(&config.database).await.map_err(|e| {
            error!("❌ Failed to initialize database pool: {}", e);
            e
        })?;
        info!("✅ Database connection pool initialized");
        Some(pool)
    };

    let (ledger, entitlements): (Arc<dyn PaymentLedger>, Arc<dyn EntitlementService>) =
        match db_pool.clone() {
            Some(pool) => (
                Arc::new(PaymentOrderRepository::new(pool.clone())),
                Arc::new(PgEntitlementService::new(pool)),
            ),
            None => {
                warn!("Payment ledger is in memory; orders are lost on restart");
                (
                    Arc::new(InMemoryLedger::new()),
                    Arc::new(LoggingEntitlementService::new()),
                )
            }
        };

    let timezone = config.gateway.timezone()?;
    let validator = CallbackValidator::new(
        Signer::new(config.gateway.hash_secret.clone()),
        timezone,
    );
    let builder = PaymentRequestBuilder::new(config.gateway.clone(), ledger.clone())?;
    let coordinator = ReconciliationCoordinator::new(validator, ledger.clone(), entitlements);

    let payment_state = Arc::new(PaymentState {
        builder: Arc::new(builder),
        coordinator: Arc::new(coordinator),
        orders: PaymentOrderService::new(ledger),
    });

    let app = api::build_router(payment_state, HealthChecker::new(db_pool));
    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("👋 Server shutdown complete");

    Ok(())
}
