use std::net::SocketAddr;
use std::sync::Arc;

use taquilla_api::{app, state::{AppState, AuthConfig}, worker};
use taquilla_order::{
    CheckoutService, MockPaymentAdapter, PaymentReconciler, ReservationSweeper, TicketIssuer,
};
use taquilla_store::{
    DbClient, PgCatalogRepository, PgInventoryLedger, PgOrderRepository, PgTicketRepository,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taquilla_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = taquilla_store::app_config::Config::load().expect("Failed to load config");
    tracing::info!("Starting Taquilla API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url)
        .await
        .expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");

    let hold_window = chrono::Duration::seconds(config.business_rules.reservation_hold_seconds as i64);

    let catalog = Arc::new(PgCatalogRepository::new(db.pool.clone()));
    let ledger = Arc::new(PgInventoryLedger::new(db.pool.clone(), hold_window));
    let orders = Arc::new(PgOrderRepository::new(db.pool.clone()));
    let tickets = Arc::new(PgTicketRepository::new(db.pool.clone()));

    // Only the mock provider ships in this tree; real providers implement
    // PaymentAdapter behind the same config key.
    if config.payment.provider != "mock" {
        tracing::warn!(
            "Unknown payment provider '{}', falling back to mock",
            config.payment.provider
        );
    }
    let payments = Arc::new(MockPaymentAdapter::with_checkout_base(
        config.payment.checkout_base_url.clone(),
    ));

    let issuer = Arc::new(TicketIssuer::new(
        tickets.clone(),
        orders.clone(),
        catalog.clone(),
    ));
    let reconciler = Arc::new(PaymentReconciler::new(
        orders.clone(),
        ledger.clone(),
        issuer.clone(),
    ));
    let checkout = Arc::new(CheckoutService::new(
        catalog.clone(),
        ledger.clone(),
        orders.clone(),
        payments.clone(),
    ));
    let sweeper = Arc::new(ReservationSweeper::new(orders.clone(), ledger.clone()));

    tokio::spawn(worker::start_sweep_worker(
        sweeper,
        config.business_rules.sweep_interval_seconds,
    ));

    let app_state = AppState {
        checkout,
        reconciler,
        issuer,
        payments,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
        },
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
