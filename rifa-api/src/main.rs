use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rifa_api::{app_with_origins, worker, AppState};
use rifa_core::notifier::Notifier;
use rifa_core::repository::{TicketRepository, WebhookLogRepository};
use rifa_gateway::{LogNotifier, MercadoPagoClient, SmtpNotifier, SmtpSettings};
use rifa_store::app_config::Config;
use rifa_store::{DbClient, InMemoryStore, PostgresTicketRepository, PostgresWebhookLogRepository, RedisClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rifa_api=debug,rifa_raffle=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Rifa API on port {}", config.server.port);

    let (tickets, webhooks) = open_store(&config).await?;

    let redis = match &config.redis {
        Some(redis) => Some(Arc::new(
            RedisClient::new(&redis.url).await.context("Failed to connect to Redis")?,
        )),
        None => {
            tracing::info!("Redis not configured, rate limiting disabled");
            None
        }
    };

    let gateway = Arc::new(
        MercadoPagoClient::new(
            config.gateway.access_token.clone(),
            config.gateway.api_base.clone(),
            Duration::from_secs(config.gateway.timeout_seconds),
        )
        .context("Failed to build Mercado Pago client")?,
    );

    let notifier: Arc<dyn Notifier> = match &config.smtp {
        Some(smtp) => Arc::new(
            SmtpNotifier::new(
                SmtpSettings {
                    host: smtp.host.clone(),
                    port: smtp.port,
                    username: smtp.username.clone(),
                    password: smtp.password.clone(),
                    from_email: smtp.from_email.clone(),
                    from_name: smtp.from_name.clone(),
                },
                config.business_rules.raffle_name.clone(),
                config.business_rules.currency.clone(),
            )
            .context("Failed to build SMTP notifier")?,
        ),
        None => {
            tracing::warn!("SMTP not configured, buyer e-mails will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let placeholders = config.placeholder_secrets();
    if !placeholders.is_empty() {
        if std::env::var("RUN_MODE").as_deref() == Ok("production") {
            anyhow::bail!("Refusing to start in production with placeholder secrets: {}", placeholders.join(", "));
        }
        tracing::warn!("Placeholder secrets in use, set them before going live: {}", placeholders.join(", "));
    }

    if config.gateway.webhook_secret.as_deref().unwrap_or_default().is_empty() {
        tracing::warn!("gateway.webhook_secret not set, webhook signatures are not verified");
    }

    let app_state = AppState::new(&config, tickets, webhooks, gateway, notifier, redis)
        .context("Failed to register metrics")?;

    let rules = &config.business_rules;
    if rules.claim_ttl_seconds > 0 {
        let reaper = app_state.claim_reaper(Duration::from_secs(rules.claim_ttl_seconds));
        let every = Duration::from_secs(rules.reaper_interval_seconds.max(1));
        tokio::spawn(worker::start_claim_reaper(reaper, every));
    } else {
        tracing::info!("claim_ttl_seconds = 0, unpaid claims never expire");
    }

    let app = app_with_origins(app_state, &config.server.allowed_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn open_store(
    config: &Config,
) -> anyhow::Result<(Arc<dyn TicketRepository>, Arc<dyn WebhookLogRepository>)> {
    match &config.database.url {
        Some(url) => {
            let db = DbClient::new(url, config.database.max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            let tickets: Arc<dyn TicketRepository> = Arc::new(PostgresTicketRepository::new(db.pool.clone()));
            let webhooks: Arc<dyn WebhookLogRepository> = Arc::new(PostgresWebhookLogRepository::new(db.pool));
            Ok((tickets, webhooks))
        }
        None => {
            tracing::warn!("database.url not set, using the in-memory store; data is lost on restart");
            let store = Arc::new(InMemoryStore::new());
            let tickets: Arc<dyn TicketRepository> = store.clone();
            let webhooks: Arc<dyn WebhookLogRepository> = store;
            Ok((tickets, webhooks))
        }
    }
}
