//! Server lifecycle: start, stop, state.
//!
//! # Responsibilities
//! - Bind the listening socket, then build the execution pools
//! - Spawn the accept loop and expose the [`ListeningHandle`]
//! - Stop: close the listener, signal every connection, wait out the grace
//!   period, then tear the pools down
//!
//! # Design Decisions
//! - Teardown blocks on the pools' runtimes, so it always runs on a helper
//!   thread; `stop()` is safe to call from async code and from `Drop`
//! - A stop that times out still ends in `Stopped`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::lifecycle::error::{StartError, StopError};
use crate::lifecycle::pools::ExecutionPools;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::state::ServerState;
use crate::net::{self, Acceptor, ConnectionTracker, Listener};
use crate::pipeline::PipelineBuilder;
use crate::rpc::{JsonFormatter, ResponseFormatter, RpcHandler};

/// Pool teardown gets at least this long, even when the grace period is spent.
const MIN_POOL_SHUTDOWN: Duration = Duration::from_millis(100);

/// The bound listening socket, from a successful `start()` until `stop()`.
#[derive(Debug)]
pub struct ListeningHandle {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl ListeningHandle {
    /// The address actually bound (resolves port `0`).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the accept loop is still running.
    pub fn is_accepting(&self) -> bool {
        !self.accept_task.is_finished()
    }
}

struct Running {
    handle: ListeningHandle,
    pools: ExecutionPools,
    shutdown: Shutdown,
    tracker: ConnectionTracker,
}

impl Running {
    /// Blocking; call through [`off_runtime`].
    fn shutdown(self, grace: Duration) -> Result<(), StopError> {
        let started = Instant::now();
        let Running {
            handle,
            pools,
            shutdown,
            tracker,
        } = self;

        shutdown.trigger();

        // Waits are timed on the acceptor pool; connection work never runs there.
        let accept_task = handle.accept_task;
        let accepted = pools
            .acceptor()
            .block_on(async { tokio::time::timeout(grace, accept_task).await });
        match accepted {
            Ok(Ok(())) => tracing::debug!(address = %handle.local_addr, "Listening socket closed"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Accept loop ended abnormally"),
            Err(_) => tracing::warn!("Accept loop did not stop within the grace period"),
        }

        let remaining = grace.saturating_sub(started.elapsed());
        let drained = pools
            .acceptor()
            .block_on(async { tokio::time::timeout(remaining, tracker.wait_until_idle()).await })
            .is_ok();
        let open_connections = tracker.active_count();

        pools.shutdown(grace.saturating_sub(started.elapsed()).max(MIN_POOL_SHUTDOWN));

        if drained {
            Ok(())
        } else {
            tracing::warn!(
                open_connections,
                grace_secs = grace.as_secs_f64(),
                "Connections still open after grace period, dropped"
            );
            Err(StopError::ShutdownTimeout { open_connections })
        }
    }
}

/// A WebSocket JSON-RPC server.
///
/// ```no_run
/// use std::sync::Arc;
/// use ws_rpc_server::{MethodRegistry, ServerConfig, WebSocketServer};
///
/// let mut server = WebSocketServer::new(ServerConfig::default(), Arc::new(MethodRegistry::standard()));
/// let addr = server.start()?.local_addr();
/// println!("listening on ws://{}/websocket", addr);
/// server.stop()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct WebSocketServer {
    config: ServerConfig,
    handler: Arc<dyn RpcHandler>,
    formatter: Arc<dyn ResponseFormatter>,
    state: ServerState,
    running: Option<Running>,
}

impl WebSocketServer {
    /// A stopped server that answers with JSON text frames.
    pub fn new(config: ServerConfig, handler: Arc<dyn RpcHandler>) -> Self {
        Self {
            config,
            handler,
            formatter: Arc::new(JsonFormatter),
            state: ServerState::Stopped,
            running: None,
        }
    }

    /// Replace the response formatter. Takes effect on the next `start()`.
    pub fn with_formatter(mut self, formatter: Arc<dyn ResponseFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    /// Get the configuration this server starts with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Get the listening handle while the server is running.
    pub fn listening(&self) -> Option<&ListeningHandle> {
        self.running.as_ref().map(|running| &running.handle)
    }

    /// Get the bound address while the server is running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listening().map(ListeningHandle::local_addr)
    }

    /// Live connections; zero when stopped.
    pub fn active_connections(&self) -> usize {
        self.running
            .as_ref()
            .map_or(0, |running| running.tracker.active_count())
    }

    /// Bind and begin accepting.
    ///
    /// Returns once the socket is bound and the accept loop is spawned. On
    /// failure nothing is left running and the state is back to `Stopped`.
    pub fn start(&mut self) -> Result<&ListeningHandle, StartError> {
        if let Some(running) = &self.running {
            return Err(StartError::AlreadyRunning {
                addr: running.handle.local_addr,
            });
        }
        self.transition(ServerState::Starting);

        match self.launch() {
            Ok(running) => {
                tracing::info!(
                    address = %running.handle.local_addr,
                    path = %self.config.upgrade_path,
                    "WebSocket server listening"
                );
                self.transition(ServerState::Running);
                Ok(&self.running.insert(running).handle)
            }
            Err(e) => {
                tracing::error!(
                    host = %self.config.bind_host,
                    port = self.config.bind_port,
                    error = %e,
                    "Server failed to start"
                );
                self.transition(ServerState::Stopped);
                Err(e)
            }
        }
    }

    fn launch(&self) -> Result<Running, StartError> {
        let socket = net::bind(&self.config).map_err(StartError::BindFailed)?;
        let local_addr = socket.local_addr().map_err(StartError::BindFailed)?;

        let pools = ExecutionPools::new(&self.config).map_err(StartError::Runtime)?;

        let shutdown = Shutdown::new();
        let tracker = ConnectionTracker::new();
        let builder = PipelineBuilder::new(
            &self.config,
            Arc::clone(&self.handler),
            Arc::clone(&self.formatter),
        );

        let spawned = {
            let _enter = pools.acceptor().enter();
            Listener::new(socket, self.config.max_connections).map(|listener| {
                let acceptor = Acceptor::new(
                    listener,
                    builder,
                    self.config.idle_timeout(),
                    tracker.clone(),
                    shutdown.subscribe(),
                    pools.worker().handle().clone(),
                );
                pools.acceptor().spawn(acceptor.run())
            })
        };
        let accept_task = match spawned {
            Ok(task) => task,
            Err(e) => {
                off_runtime(move || pools.shutdown(Duration::ZERO));
                return Err(StartError::BindFailed(e));
            }
        };

        Ok(Running {
            handle: ListeningHandle {
                local_addr,
                accept_task,
            },
            pools,
            shutdown,
            tracker,
        })
    }

    /// Stop accepting, close every connection, release the pools.
    ///
    /// Live connections are sent a `1001 Going Away` close and given
    /// `shutdown_grace_secs` to finish. Calling `stop()` on a stopped server
    /// does nothing.
    pub fn stop(&mut self) -> Result<(), StopError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        self.transition(ServerState::Stopping);

        let grace = self.config.shutdown_grace();
        let result = off_runtime(move || running.shutdown(grace));

        self.transition(ServerState::Stopped);
        tracing::info!("WebSocket server stopped");
        result
    }

    fn transition(&mut self, next: ServerState) {
        let previous = self.state;
        if !previous.can_transition_to(next) {
            tracing::warn!(from = %previous, to = %next, "Unexpected server state transition");
        }
        self.state = next;
        tracing::info!(from = %previous, to = %next, "Server state changed");
    }
}

impl Drop for WebSocketServer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "Server stopped on drop with connections still open");
        }
    }
}

impl std::fmt::Debug for WebSocketServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketServer")
            .field("state", &self.state)
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}

/// Run blocking runtime teardown on a scoped helper thread, outside any
/// runtime context the caller may be in.
fn off_runtime<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    std::thread::scope(|scope| match scope.spawn(f).join() {
        Ok(value) => value,
        Err(panic) => std::panic::resume_unwind(panic),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::MethodRegistry;

    fn server() -> WebSocketServer {
        let config = ServerConfig {
            bind_port: 0,
            worker_threads: Some(1),
            shutdown_grace_secs: 1,
            ..ServerConfig::default()
        };
        WebSocketServer::new(config, Arc::new(MethodRegistry::standard()))
    }

    #[test]
    fn start_then_stop() {
        let mut server = server();
        assert_eq!(server.state(), ServerState::Stopped);

        let addr = server.start().unwrap().local_addr();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.state(), ServerState::Running);
        assert!(server.listening().is_some());

        server.stop().unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.listening().is_none());
        std::net::TcpListener::bind(addr).unwrap();
    }

    #[test]
    fn second_start_is_rejected() {
        let mut server = server();
        let addr = server.start().unwrap().local_addr();

        match server.start() {
            Err(StartError::AlreadyRunning { addr: running }) => assert_eq!(running, addr),
            other => panic!("expected AlreadyRunning, got {:?}", other.map(|h| h.local_addr())),
        }
        assert_eq!(server.state(), ServerState::Running);
    }

    #[test]
    fn stop_when_stopped_is_noop() {
        let mut server = server();
        server.stop().unwrap();
        server.stop().unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn stop_from_async_context() {
        let mut server = server();
        server.start().unwrap();
        server.stop().unwrap();
        assert_eq!(server.active_connections(), 0);
    }

    #[test]
    fn bind_failure_leaves_server_stopped() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut server = WebSocketServer::new(
            ServerConfig {
                bind_port: occupied.local_addr().unwrap().port(),
                ..ServerConfig::default()
            },
            Arc::new(MethodRegistry::new()),
        );

        assert!(matches!(server.start(), Err(StartError::BindFailed(_))));
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.listening().is_none());
    }
}
