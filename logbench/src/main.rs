use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use logbench::{
    BenchmarkConfig, BenchmarkRun, Broadcaster, LogbenchConfig, ReportCollector, RunContext,
    StreamServer,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "logbench", version, about = "Benchmark a producer | agent | syslog pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one benchmark and exit
    Execute(ExecuteArgs),
    /// Stream metric events over TCP and run benchmarks on request
    Serve {
        /// Listen address, overrides LOGBENCH_LISTEN_ADDRESS
        #[arg(long)]
        listen: Option<String>,
    },
}

#[derive(Args)]
struct ExecuteArgs {
    #[arg(short = 'q', long = "logger-queue-size", default_value_t = 100)]
    queue_size: u64,

    #[arg(short = 'm', long, default_value_t = 100)]
    message_length: u64,

    /// Delay between messages, in seconds
    #[arg(short = 'r', long, default_value_t = 0.0005)]
    message_rate: f64,

    /// Seconds to measure for
    #[arg(short = 't', long, default_value_t = 10)]
    test_length: u64,

    #[arg(short = 'b', long, default_value_t = 64)]
    input_buffer_size: u64,

    /// Print a per-source summary as JSON when the run ends
    #[arg(long)]
    print_metrics: bool,
}

impl From<&ExecuteArgs> for BenchmarkConfig {
    fn from(args: &ExecuteArgs) -> Self {
        Self {
            message_length: args.message_length,
            message_rate: args.message_rate,
            queue_size: args.queue_size,
            input_buffer_size: args.input_buffer_size,
            test_length: args.test_length,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = LogbenchConfig::from_env();

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = Arc::new(config);
    let broadcaster = Arc::new(Broadcaster::new(config.subscriber_capacity));
    let ctx = RunContext::system(config.clone(), broadcaster.clone());

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal, stopping...");
                on_signal.cancel();
            }
            Err(e) => warn!("Failed to listen for ctrl-c: {}", e),
        }
    });

    match cli.command {
        Command::Execute(args) => execute(ctx, &args, shutdown).await,
        Command::Serve { listen } => {
            let address = listen.unwrap_or_else(|| config.listen_address.clone());
            let listener = StreamServer::bind(&address).await?;
            Arc::new(StreamServer::new(ctx, shutdown)).serve(listener).await
        }
    }
}

async fn execute(ctx: RunContext, args: &ExecuteArgs, shutdown: CancellationToken) -> Result<()> {
    let collector = if args.print_metrics {
        Some(ReportCollector::start(ctx.broadcaster.subscribe().await))
    } else {
        None
    };

    let mut run = BenchmarkRun::new(BenchmarkConfig::from(args), ctx).with_cancellation(shutdown);
    let result = run.execute().await.context("Benchmark run failed")?;

    info!(
        "Run {} took {:.3}s{}",
        result.run_id,
        result.elapsed_seconds,
        if result.cancelled { " (cancelled)" } else { "" }
    );

    if let Some(collector) = collector {
        let report = collector.finish().await.with_run(result);
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{json}");
    }

    Ok(())
}
