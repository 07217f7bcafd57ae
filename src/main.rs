use std::{net::SocketAddr, sync::Arc};

use tokio::{signal, sync::mpsc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use storefront_api as api;

use api::services::notifications::{DisabledNotifier, HttpEmailNotifier, NotificationService};
use api::services::payment_gateway::{HostedCheckoutClient, PaymentGateway};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    // External collaborators, constructed once and handed to the services
    let gateway: Arc<dyn PaymentGateway> = Arc::new(HostedCheckoutClient::new(
        cfg.payment_api_base.clone(),
        cfg.payment_secret_key.clone(),
        cfg.checkout_success_url.clone(),
        cfg.checkout_cancel_url.clone(),
    ));

    let notifier: Arc<dyn NotificationService> = match cfg.email_api_key.clone() {
        Some(key) => Arc::new(HttpEmailNotifier::new(
            cfg.email_api_url.clone(),
            key,
            cfg.email_from.clone(),
        )),
        None => {
            info!("email API key not configured; confirmation email disabled");
            Arc::new(DisabledNotifier)
        }
    };

    let services = api::handlers::AppServices::new(
        db_arc.clone(),
        gateway,
        notifier,
        Arc::new(event_sender.clone()),
        &cfg.currency,
    );

    let state = api::AppState {
        db: db_arc,
        config: cfg.clone(),
        event_sender,
        services,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = api::app_router(state).layer(cors);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!(%addr, environment = %cfg.environment, "starting server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

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

    info!("shutdown signal received");
}
