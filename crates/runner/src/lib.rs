//! Concurrent process runner with graceful shutdown.
//!
//! Orchestrates the service's long-running processes (consumers, servers,
//! background jobs) and cleanup functions:
//! - named processes run concurrently until one fails or a shutdown signal
//!   arrives
//! - SIGTERM/SIGINT cancel every process through a shared token
//! - closers run afterward regardless of outcome, under a timeout

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A long-running process: receives the shared cancellation token and runs
/// until it completes or the token fires.
pub type AppProcess = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>>
        + Send,
>;

/// A cleanup function executed after every process has stopped.
pub type Closer =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>> + Send>;

pub struct Runner {
    processes: Vec<(String, AppProcess)>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Add a process under a name used in logs and error reports
    pub fn with_named_process(mut self, name: impl Into<String>, process: AppProcess) -> Self {
        self.processes.push((name.into(), process));
        self
    }

    /// Add a process from a plain closure
    pub fn with_process<F, Fut>(self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.with_named_process(name, Box::new(|token| Box::pin(process(token))))
    }

    /// Add a cleanup function. Closers all run after the processes stop,
    /// even when some of them fail.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Run everything to completion, then exit the process. The exit code
    /// is 1 when any process returned an error, 0 otherwise.
    pub async fn run(self) {
        let closer_timeout = self.closer_timeout;
        let closers = self.closers;

        let first_error =
            Self::run_processes(self.processes, self.cancellation_token.clone()).await;

        if !closers.is_empty() {
            info!(timeout_ms = closer_timeout.as_millis() as u64, "running closers");
            match tokio::time::timeout(closer_timeout, Self::run_closers(closers)).await {
                Ok(()) => info!("all closers completed"),
                Err(_) => error!("closers timed out"),
            }
        }

        if let Some((name, err)) = first_error {
            error!(process = %name, error = format!("{err:#}"), "exiting with error");
            std::process::exit(1);
        }
        info!("exiting normally");
        std::process::exit(0);
    }

    /// Drive every process until all have stopped. Returns the first
    /// process failure, if any.
    async fn run_processes(
        processes: Vec<(String, AppProcess)>,
        token: CancellationToken,
    ) -> Option<(String, anyhow::Error)> {
        let token = Arc::new(token);
        let mut join_set = JoinSet::new();

        for (name, process) in processes {
            let process_token = (*token).clone();
            join_set.spawn(async move {
                let result = process(process_token).await;
                (name, result)
            });
        }

        let signal_token = Arc::clone(&token);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("received shutdown signal");
                    signal_token.cancel();
                }
                Err(err) => {
                    error!(error = %err, "error installing signal handler");
                }
            }
        });

        #[cfg(unix)]
        {
            let sigterm_token = Arc::clone(&token);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                        info!("received SIGTERM");
                        sigterm_token.cancel();
                    }
                    Err(err) => {
                        error!(error = %err, "error installing SIGTERM handler");
                    }
                }
            });
        }

        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    debug!(process = %name, "process completed");
                }
                Ok((name, Err(err))) => {
                    if first_error.is_none() {
                        error!(process = %name, error = format!("{err:#}"), "process failed");
                        first_error = Some((name, err));
                    }
                    token.cancel();
                }
                Err(err) => {
                    error!(error = %err, "process panicked");
                    token.cancel();
                }
            }
        }

        first_error
    }

    async fn run_closers(closers: Vec<Closer>) {
        let mut closer_set = JoinSet::new();

        for closer in closers {
            closer_set.spawn(async move { closer().await });
        }

        while let Some(joined) = closer_set.join_next().await {
            match joined {
                Ok(Ok(())) => debug!("closer completed"),
                Ok(Err(err)) => error!(error = format!("{err:#}"), "closer failed"),
                Err(err) => error!(error = %err, "closer panicked"),
            }
        }
    }
}
