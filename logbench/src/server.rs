use crate::broadcast::{Broadcaster, Subscription};
use crate::config::BenchmarkConfig;
use crate::run::{BenchmarkRun, RunContext};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Newline-delimited TCP boundary: events go out as JSON lines, each line
/// received is a query-string trigger for one run.
pub struct StreamServer {
    ctx: RunContext,
    run_lock: Arc<Mutex<()>>,
    shutdown: CancellationToken,
}

impl StreamServer {
    pub fn new(ctx: RunContext, shutdown: CancellationToken) -> Self {
        Self {
            ctx,
            run_lock: Arc::new(Mutex::new(())),
            shutdown,
        }
    }

    pub async fn bind(address: &str) -> Result<TcpListener> {
        TcpListener::bind(address)
            .await
            .with_context(|| format!("Failed to bind stream server to {address}"))
    }

    /// Accepts connections until the shutdown token fires, then waits for
    /// an active run to finish tearing down.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let local = listener
            .local_addr()
            .context("Failed to read listener address")?;
        info!("Streaming metrics on {}", local);

        loop {
            let (stream, peer) = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, peer).await {
                    warn!("Connection {} ended with error: {:#}", peer, e);
                }
            });
        }

        // in-flight runs hold the lock until their teardown is done
        let _idle = self.run_lock.lock().await;
        info!("Stream server stopped");
        Ok(())
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        info!("Client {} connected", peer);

        let (read_half, write_half) = stream.into_split();
        let subscription = self.ctx.broadcaster.subscribe().await;
        let writer_stop = CancellationToken::new();
        let writer = tokio::spawn(forward_events(
            self.ctx.broadcaster.clone(),
            subscription,
            write_half,
            writer_stop.clone(),
        ));

        let mut lines = BufReader::new(read_half).lines();
        let outcome = loop {
            let line = tokio::select! {
                _ = self.shutdown.cancelled() => break Ok(()),
                line = lines.next_line() => line,
            };

            match line {
                Ok(Some(line)) => self.trigger(line.trim(), peer),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e).context("Failed to read trigger"),
            }
        };

        writer_stop.cancel();
        if let Err(e) = writer.await {
            error!("Event writer for {} panicked: {}", peer, e);
        }

        info!("Client {} disconnected", peer);
        outcome
    }

    fn trigger(&self, query: &str, peer: SocketAddr) {
        if query.is_empty() {
            return;
        }

        let config = match BenchmarkConfig::from_query(query) {
            Ok(config) => config,
            Err(e) => {
                warn!("Rejected trigger from {}: {}", peer, e);
                return;
            }
        };

        let guard = match self.run_lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Ignoring trigger from {}: a run is already active", peer);
                return;
            }
        };

        let mut run = BenchmarkRun::new(config, self.ctx.clone())
            .with_cancellation(self.shutdown.child_token());
        info!("Client {} triggered run {}", peer, run.id());

        tokio::spawn(async move {
            let _guard = guard;
            match run.execute().await {
                Ok(result) => info!(
                    "Run {} completed in {:.3}s",
                    result.run_id, result.elapsed_seconds
                ),
                Err(e) => error!("Run {} failed: {}", run.id(), e),
            }
        });
    }
}

/// Writes every payload as one line until `stop` fires or a write fails,
/// then removes the subscription.
async fn forward_events<W>(
    broadcaster: Arc<Broadcaster>,
    mut subscription: Subscription,
    mut writer: W,
    stop: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let payload = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            payload = subscription.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };

        let mut line = String::with_capacity(payload.len() + 1);
        line.push_str(&payload);
        line.push('\n');

        if let Err(e) = writer.write_all(line.as_bytes()).await {
            debug!("Subscriber {} write failed: {}", subscription.id(), e);
            break;
        }
    }

    broadcaster.unsubscribe(subscription).await;
    let _ = writer.shutdown().await;
}
