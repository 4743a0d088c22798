//! Acceptor and worker execution pools.
//!
//! # Design Decisions
//! - Two independent multi-thread runtimes: a slow or saturated worker pool
//!   never delays accepting
//! - Pools are built only after the listening socket is bound

use std::time::Duration;

use tokio::runtime::{Builder, Runtime};

use crate::config::ServerConfig;

pub struct ExecutionPools {
    acceptor: Runtime,
    worker: Runtime,
}

impl ExecutionPools {
    pub fn new(config: &ServerConfig) -> std::io::Result<Self> {
        let acceptor = Builder::new_multi_thread()
            .worker_threads(config.acceptor_threads)
            .thread_name("ws-acceptor")
            .enable_all()
            .build()?;

        let mut worker = Builder::new_multi_thread();
        worker.thread_name("ws-worker").enable_all();
        if let Some(threads) = config.worker_threads {
            worker.worker_threads(threads);
        }
        let worker = worker.build()?;

        tracing::debug!(
            acceptor_threads = config.acceptor_threads,
            worker_threads = ?config.worker_threads,
            "Execution pools created"
        );
        Ok(Self { acceptor, worker })
    }

    /// Get the runtime that runs the accept loop.
    pub fn acceptor(&self) -> &Runtime {
        &self.acceptor
    }

    /// Get the runtime that runs connection tasks.
    pub fn worker(&self) -> &Runtime {
        &self.worker
    }

    /// Shut both pools down, dropping any task still running after `timeout`.
    ///
    /// The worker pool gets the whole budget; the acceptor pool has nothing
    /// left to run once the accept loop has stopped and is released at once.
    /// Blocks; must not be called from inside an async context.
    pub fn shutdown(self, timeout: Duration) {
        self.worker.shutdown_timeout(timeout);
        self.acceptor.shutdown_timeout(Duration::ZERO);
        tracing::debug!("Execution pools shut down");
    }
}

impl std::fmt::Debug for ExecutionPools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPools").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pools_run_tasks_on_named_threads() {
        let config = ServerConfig {
            worker_threads: Some(2),
            ..ServerConfig::default()
        };
        let pools = ExecutionPools::new(&config).unwrap();

        let name = pools
            .worker()
            .block_on(pools.worker().spawn(async {
                std::thread::current().name().map(str::to_owned)
            }))
            .unwrap();
        assert_eq!(name.as_deref(), Some("ws-worker"));

        pools.shutdown(Duration::from_millis(100));
    }

    #[test]
    fn shutdown_is_bounded_by_one_budget() {
        let config = ServerConfig {
            worker_threads: Some(1),
            ..ServerConfig::default()
        };
        let pools = ExecutionPools::new(&config).unwrap();
        // Both pools stuck on a blocking task that ignores shutdown.
        pools.worker().spawn(async {
            std::thread::sleep(Duration::from_secs(5));
        });
        pools.acceptor().spawn(async {
            std::thread::sleep(Duration::from_secs(5));
        });
        std::thread::sleep(Duration::from_millis(50));

        let started = std::time::Instant::now();
        pools.shutdown(Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_millis(1800));
    }
}
