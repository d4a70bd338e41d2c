use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use reqwest::Client;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    api::{self, EventApi},
    clients::{
        database::DatabaseClient,
        memory_queue::MemoryQueue,
        pubsub::{MemoryPubSub, PubSub},
        queue::NotificationQueue,
        redis::RedisPubSub,
        sqs::SqsQueue,
        store::{EventStore, MemoryStore, ReceiverStore, StaticDirectory},
    },
    config::{Config, Role},
    dispatcher::Dispatcher,
    events::EventManager,
    fanout::{NotificationBuilder, ReceiverResolver},
    gateway::Gateway,
    metrics,
    models::{event::ReceiverType, retry::BackoffConfig},
    producer::BatchProducer,
    rate_limit::RateLimiter,
    senders::{
        BrowserSender, EmailSender, OpsGenieSender, PagerDutySender, SenderRegistry, SlackSender,
        StackdriverSender,
    },
};

const MEMORY_URL: &str = "memory://";

/// Runs the roles selected by `config` until SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<(), Error> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("TLS crypto provider already installed");
    }

    metrics::init_metrics();

    let queue = connect_queue(&config).await?;
    let pubsub = connect_pubsub(&config).await?;

    if config.role != Role::All
        && (config.queue_url == MEMORY_URL || config.pubsub_url == MEMORY_URL)
    {
        warn!(role = ?config.role, "In-memory transports are not shared between processes");
    }

    let event_manager = if config.role.runs_event_manager() {
        Some(build_event_manager(&config, queue.clone()).await?)
    } else {
        None
    };

    let (dispatcher, gateway) = if config.role.runs_sender() {
        let senders = build_senders(&config, pubsub.clone()).await?;
        (
            Some(Dispatcher::new(queue.clone(), senders)),
            Some(Gateway::new(pubsub.clone(), config.browser_ping_period())),
        )
    } else {
        (None, None)
    };

    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit_per_second,
        config.rate_limit_burst,
    ));

    let event_api = event_manager.clone().map(|manager| EventApi {
        manager,
        directory: Arc::new(StaticDirectory::default()),
        ui_url: config.ui_url.clone(),
    });

    let app = api::router(event_api, gateway, limiter);

    let cancel = CancellationToken::new();
    let dispatch_task = dispatcher.map(|dispatcher| {
        let cancel = cancel.clone();
        tokio::spawn(async move { dispatcher.run(cancel).await })
    });

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow!("cannot bind {}: {}", addr, e))?;

    info!(address = %addr, role = ?config.role, "Notification service started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();

    if let Some(task) = dispatch_task {
        task.await
            .map_err(|e| anyhow!("dispatcher task failed: {}", e))?;
    }

    if let Some(manager) = event_manager {
        manager.wait().await;
    }

    info!("Notification service stopped");
    Ok(())
}

async fn connect_queue(config: &Config) -> Result<Arc<dyn NotificationQueue>, Error> {
    if config.queue_url == MEMORY_URL {
        info!("Using in-memory notification queue");
        return Ok(Arc::new(MemoryQueue::new(
            config.queue_wait_time(),
            config.queue_visibility_timeout(),
        )));
    }

    Ok(Arc::new(SqsQueue::connect(config).await?))
}

async fn connect_pubsub(config: &Config) -> Result<Arc<dyn PubSub>, Error> {
    if config.pubsub_url == MEMORY_URL {
        info!("Using in-memory pub-sub");
        return Ok(Arc::new(MemoryPubSub::new()));
    }

    Ok(Arc::new(RedisPubSub::connect(&config.pubsub_url).await?))
}

async fn build_event_manager(
    config: &Config,
    queue: Arc<dyn NotificationQueue>,
) -> Result<EventManager, Error> {
    let (receivers, events): (Arc<dyn ReceiverStore>, Arc<dyn EventStore>) =
        match &config.database_url {
            Some(url) => {
                let database = Arc::new(DatabaseClient::connect(url).await?);
                database.health_check().await?;
                (database.clone() as Arc<dyn ReceiverStore>, database as Arc<dyn EventStore>)
            }
            None => {
                warn!("DATABASE_URL not set, receivers and events are kept in memory");
                let store = Arc::new(MemoryStore::new());
                (store.clone() as Arc<dyn ReceiverStore>, store as Arc<dyn EventStore>)
            }
        };

    let builder = NotificationBuilder::new(ReceiverResolver::new(receivers));
    let producer = BatchProducer::new(queue, config.batch_size);

    Ok(EventManager::new(events, builder, producer))
}

async fn build_senders(config: &Config, pubsub: Arc<dyn PubSub>) -> Result<SenderRegistry, Error> {
    let http_client = Client::new();

    let email = EmailSender::from_uri(
        &config.email_uri,
        &config.email_from,
        config.email_reply_to.as_deref(),
    )?;
    email.validate(&BackoffConfig::default()).await?;

    let registry = SenderRegistry::builder()
        .register(ReceiverType::Browser, BrowserSender::new(pubsub))
        .register(ReceiverType::Email, email)
        .register(
            ReceiverType::Slack,
            SlackSender::new(http_client.clone(), config.slack_username.clone()),
        )
        .register(
            ReceiverType::Stackdriver,
            StackdriverSender::new(
                http_client,
                config.stackdriver_endpoint.clone(),
                config.stackdriver_log_id.clone(),
            ),
        )
        .register(
            ReceiverType::Opsgenie,
            OpsGenieSender::new(&config.opsgenie_url, config.opsgenie_backoff())?,
        )
        .register(
            ReceiverType::Pagerduty,
            PagerDutySender::new(config.pagerduty_url.clone(), config.pagerduty_timeout())?,
        )
        .build();

    info!(senders = ?registry.receiver_types(), "Senders registered");

    Ok(registry)
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
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

    info!("Shutdown signal received");
    cancel.cancel();
}
