use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use storefront_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration is validated up front; a missing processor secret or
    // signing key must stop the server here, never mid-request.
    let cfg = api::config::load_config().context("configuration is incomplete")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await?;
    }
    let db = Arc::new(db_pool);

    // Event channel for pipeline lifecycle events
    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    // Identity directory + elevation adapter
    let directory = Arc::new(api::auth::HttpIdentityDirectory::new(
        cfg.identity.base_url.clone(),
        cfg.identity.service_key.clone(),
    ));
    let identity = api::auth::IdentityService::new(directory);

    // Payment processors
    let stripe: Arc<dyn api::payments::PaymentProcessor> =
        Arc::new(api::payments::stripe::StripeProcessor::new(
            cfg.stripe.secret_key.clone(),
            cfg.checkout_success_url.clone(),
            cfg.checkout_cancel_url.clone(),
        ));
    let paypal: Arc<dyn api::payments::PaymentProcessor> =
        Arc::new(api::payments::paypal::PaypalProcessor::new(
            cfg.paypal.client_id.clone(),
            cfg.paypal.client_secret.clone(),
            cfg.paypal.base_url.clone(),
        ));

    // Notification dispatcher
    let mailer: Arc<dyn api::services::notifications::Mailer> =
        match api::services::notifications::SmtpMailer::new(&cfg.smtp) {
            Ok(mailer) => Arc::new(mailer),
            Err(err) => {
                warn!(
                    "SMTP transport unavailable, falling back to console mailer: {}",
                    err
                );
                Arc::new(api::services::notifications::ConsoleMailer)
            }
        };
    let notifications = Arc::new(api::services::NotificationService::new(
        mailer,
        cfg.smtp.from.clone(),
        cfg.admin_email.clone(),
    ));

    let event_sender_arc = Arc::new(event_sender.clone());
    let checkout = api::services::CheckoutService::new(
        identity.clone(),
        event_sender_arc.clone(),
        cfg.currency.clone(),
        cfg.allow_anonymous_checkout,
    );
    let reconciliation = api::services::ReconciliationService::new(
        db.clone(),
        event_sender_arc,
        notifications.clone(),
    );
    let delivery = api::services::DeliveryService::new(db.clone());

    let services = api::handlers::AppServices::new(
        checkout,
        reconciliation,
        identity,
        delivery,
        notifications,
        vec![stripe, paypal],
    );

    let state = Arc::new(api::AppState {
        db,
        config: cfg.clone(),
        event_sender,
        services,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = api::app(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port configuration")?;
    info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!("failed to install shutdown signal handler: {}", e);
        return;
    }
    info!("shutdown signal received");
}
