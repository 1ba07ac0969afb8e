use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use esteira_amqp::AmqpTransport;
use esteira_core::{
    AuditStore, CircuitBreaker, ErrorLog, LocalQueue, Message, PipelineConfig, ProcessOutcome,
    RetryPolicy, SnapshotStore, SqliteSink, Transport, TransportError, Worker,
};

#[derive(Parser)]
#[command(name = "esteira", about = "Esteira message pipeline CLI")]
struct Cli {
    /// Path to a TOML configuration file (defaults to esteira.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish the scripted demo batch through the selected transport
    Publish(TransportArgs),

    /// Drain the queue, printing per-message results and the audit summary
    Process(TransportArgs),
}

#[derive(Args)]
struct TransportArgs {
    /// Use the RabbitMQ transport instead of the local snapshot hand-off
    #[arg(long)]
    rabbitmq: bool,
}

fn main() {
    esteira_core::telemetry::init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());

    let code = match cli.command {
        Commands::Publish(args) => cmd_publish(&config, args.rabbitmq),
        Commands::Process(args) => cmd_process(&config, args.rabbitmq),
    };
    process::exit(code);
}

fn load_config(explicit: Option<&std::path::Path>) -> PipelineConfig {
    let loaded = match explicit {
        Some(path) => PipelineConfig::from_file(path),
        None => PipelineConfig::load(),
    };
    match loaded {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err}");
            process::exit(1);
        }
    }
}

/// The demo batch: a few valid messages, one that fails validation, and one
/// duplicate id that the dedup layer must reject.
fn demo_batch() -> Vec<Message> {
    let mut batch = vec![
        Message::new("OrderService", "order-created 1001"),
        Message::new("OrderService", "order-created 1002"),
        Message::new("BillingService", "invoice-issued 77"),
        Message::new("", "message with no source system"),
        Message::new("InventoryService", "stock-adjusted 9"),
    ];
    let duplicate = batch[0].clone();
    batch.push(duplicate);
    batch
}

fn cmd_publish(config: &PipelineConfig, rabbitmq: bool) -> i32 {
    if rabbitmq {
        let transport = match AmqpTransport::connect(&config.amqp.uri, &config.amqp.queue) {
            Ok(transport) => transport,
            Err(err) => {
                eprintln!("Error: cannot connect to broker at {}: {err}", config.amqp.uri);
                return 1;
            }
        };
        for message in demo_batch() {
            let id = message.id;
            match transport.enqueue(message) {
                Ok(()) => println!("published {id}"),
                Err(err) => {
                    eprintln!("Error: publish failed for {id}: {err}");
                    return 1;
                }
            }
        }
        return 0;
    }

    // Local mode: the snapshot file is the durable hand-off between the
    // publisher and processor processes. Dedup happens here, upstream of
    // the transport.
    let snapshot = match SnapshotStore::new(&config.paths.snapshot) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            eprintln!("Error: {err}");
            return 1;
        }
    };
    let mut pending = match snapshot.load() {
        Ok(pending) => pending,
        Err(err) => {
            eprintln!("Error: {err}");
            return 1;
        }
    };

    for message in demo_batch() {
        if pending.iter().any(|m| m.id == message.id) {
            warn!(msg_id = %message.id, "duplicate id, skipping");
            println!("skipped duplicate {}", message.id);
            continue;
        }
        println!("queued {}", message.id);
        pending.push(message);
    }

    if let Err(err) = snapshot.save(&pending) {
        eprintln!("Error: {err}");
        return 1;
    }
    info!(count = pending.len(), path = %snapshot.path().display(), "batch persisted");
    0
}

fn cmd_process(config: &PipelineConfig, rabbitmq: bool) -> i32 {
    let transport: Arc<dyn Transport> = if rabbitmq {
        match AmqpTransport::connect(&config.amqp.uri, &config.amqp.queue) {
            Ok(transport) => Arc::new(transport),
            Err(err) => {
                eprintln!("Error: cannot connect to broker at {}: {err}", config.amqp.uri);
                return 1;
            }
        }
    } else {
        match local_queue_from_snapshot(config) {
            Ok(queue) => queue,
            Err(code) => return code,
        }
    };

    let worker = match build_worker(config, Arc::clone(&transport)) {
        Ok(worker) => worker,
        Err(code) => return code,
    };

    drain(&worker, transport.as_ref());

    if !rabbitmq {
        // The visible batch is drained; truncate the hand-off file.
        match SnapshotStore::new(&config.paths.snapshot).and_then(|s| s.save(&[])) {
            Ok(()) => {}
            Err(err) => eprintln!("Warning: could not truncate snapshot: {err}"),
        }
    }

    print_summary(&worker, transport.as_ref());
    0
}

fn local_queue_from_snapshot(config: &PipelineConfig) -> Result<Arc<dyn Transport>, i32> {
    let snapshot = SnapshotStore::new(&config.paths.snapshot).map_err(|err| {
        eprintln!("Error: {err}");
        1
    })?;
    let pending = snapshot.load().map_err(|err| {
        eprintln!("Error: {err}");
        1
    })?;

    let queue = Arc::new(LocalQueue::new());
    for message in pending {
        match queue.enqueue(message) {
            Ok(()) => {}
            Err(TransportError::Duplicate(id)) => warn!(msg_id = %id, "duplicate in snapshot, dropped"),
            Err(err) => {
                eprintln!("Error: {err}");
                return Err(1);
            }
        }
    }
    Ok(queue)
}

fn build_worker(config: &PipelineConfig, transport: Arc<dyn Transport>) -> Result<Worker, i32> {
    let sink = SqliteSink::open(&config.paths.sink_db).map_err(|err| {
        eprintln!("Error: {err}");
        1
    })?;
    let audit = AuditStore::open(&config.paths.audit_db).map_err(|err| {
        eprintln!("Error: {err}");
        1
    })?;
    let error_log = ErrorLog::open(&config.paths.error_log).map_err(|err| {
        eprintln!("Error: {err}");
        1
    })?;
    let breaker = CircuitBreaker::new(config.breaker.failure_threshold, config.breaker.timeout())
        .map_err(|err| {
        eprintln!("Error: {err}");
        1
    })?;
    let retry = RetryPolicy::new(config.retry.max_retries)
        .with_base_delay(config.retry.base_delay())
        .with_observer(|retry, delay| {
            info!(retry, delay_ms = delay.as_millis() as u64, "retrying commit");
        });

    Ok(Worker::new(transport, Arc::new(sink))
        .with_retry(retry)
        .with_breaker(breaker)
        .with_error_log(error_log)
        .with_audit(audit))
}

/// Drain the batch visible now, one message per line. Per-message errors are
/// recorded and the loop keeps going; the drain itself always completes.
fn drain(worker: &Worker, transport: &dyn Transport) {
    let depth = match transport.depth() {
        Ok(depth) => depth,
        Err(err) => {
            eprintln!("Error: cannot read queue depth: {err}");
            return;
        }
    };

    for n in 1..=depth {
        match worker.process_one() {
            Ok(ProcessOutcome::Completed) => println!("message {n}/{depth}: completed"),
            Ok(ProcessOutcome::Failed) => println!("message {n}/{depth}: failed (quarantined)"),
            Ok(ProcessOutcome::NoWork) => break,
            Err(err) => println!("message {n}/{depth}: error ({err})"),
        }
    }
}

fn print_summary(worker: &Worker, transport: &dyn Transport) {
    if let Ok(dlq_depth) = transport.dlq_depth() {
        println!("DLQ depth: {dlq_depth}");
    }

    let Some(audit) = worker.audit() else { return };
    match audit.statistics() {
        Ok(stats) => {
            println!("Audit summary:");
            println!("  Total:        {}", stats.total);
            println!("  Completed:    {}", stats.success);
            println!("  Failed:       {}", stats.failure);
            println!("  Success rate: {:.1}%", stats.success_rate);
            println!(
                "  Duration ms:  avg {:.2}, min {:.2}, max {:.2}",
                stats.avg_duration_ms, stats.min_duration_ms, stats.max_duration_ms
            );
        }
        Err(err) => eprintln!("Warning: cannot read audit statistics: {err}"),
    }
}
