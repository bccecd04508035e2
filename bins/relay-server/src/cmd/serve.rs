use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use relay_api::{LifecycleObserver, MessageHandler};
use relay_engine::config::RelayConfig;
use relay_engine::{
    ConcurrentConsumer, FlowControlledSink, MemoryBroker, OrderedBatchProducer, QueueOptions,
    SimulatedHandler, TracingObserver, spawn_periodic,
};

use crate::config::ServeArgs;
use crate::error::ServerError;

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("relay-server starting");

    // --- Load config ---
    let config = RelayConfig::load_or_default(&args.config)?;
    tracing::info!(config = %args.config, "loaded config");

    let token = CancellationToken::new();

    // --- Broker ---
    let broker = MemoryBroker::new();
    let outbox = broker.declare(
        &config.outbound.queue,
        config.outbound.queue_options(&config.broker),
    );
    let inbox = broker.declare(
        &config.inbound.queue,
        QueueOptions {
            max_depth: config.broker.max_depth,
            ..QueueOptions::default()
        },
    );
    if config.broker.loopback {
        broker.route(&config.outbound.queue, &config.inbound.queue)?;
    }

    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    // --- Inbound: concurrent consumer ---
    let handler: Arc<dyn MessageHandler> = Arc::new(SimulatedHandler);
    let observer: Arc<dyn LifecycleObserver> = Arc::new(TracingObserver);
    let consumer = ConcurrentConsumer::new(
        handler,
        Box::new(config.consumer.delay_strategy()),
        observer,
        config.consumer.options(),
    );
    let consumer_token = token.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = consumer.run(&*inbox, consumer_token).await {
            tracing::error!(error = %e, "consumer error");
        }
    }));
    tracing::info!(
        queue = %config.inbound.queue,
        min_delay = config.consumer.min_delay,
        max_delay = config.consumer.max_delay,
        max_in_flight = ?config.consumer.max_in_flight,
        "spawned consumer"
    );

    // --- Outbound: periodic ordered batches ---
    let sink = Arc::new(FlowControlledSink::new(outbox, config.outbound.sink_options()));
    let producer = Arc::new(OrderedBatchProducer::new(sink, config.producer.options()));
    handles.push(spawn_periodic(producer, config.producer.interval(), token.clone()));
    tracing::info!(
        queue = %config.outbound.queue,
        interval_secs = config.producer.interval_secs,
        batch_size = config.producer.batch_size,
        group_mode = ?config.producer.group_mode,
        "spawned producer"
    );

    tracing::info!(loopback = config.broker.loopback, queues = ?broker.queues(), "relay ready");

    // --- Wait for Ctrl+C ---
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");

    token.cancel();

    // Drain, then abort whatever is still running.
    tokio::time::sleep(Duration::from_secs(args.grace_secs)).await;
    for h in &handles {
        if !h.is_finished() {
            h.abort();
        }
    }
    for h in handles {
        let _ = h.await;
    }

    tracing::info!("shutdown complete");
    Ok(())
}
