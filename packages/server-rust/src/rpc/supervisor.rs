//! Supervision of the RPC listener.
//!
//! The listener lives on a dedicated OS thread that owns a runtime built for
//! the configured [`ServerStrategy`](super::ServerStrategy). Inside it,
//! [`supervise`] runs one server generation at a time; a generation that
//! errors, panics or returns without being asked to stop is replaced at
//! once by a new instance bound to the same port. Restarts are unbounded
//! and only paced by the optional `restart_delay`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::config::RpcConfig;
use super::connection::ConnectionRegistry;
use super::handler::JsonApiHandler;
use super::server::RpcServer;
use crate::registry::ApiRegistry;

// ---------------------------------------------------------------------------
// SupervisorState
// ---------------------------------------------------------------------------

/// Address published by a live generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub generation: u64,
    pub addr: SocketAddr,
}

/// Counters and the current binding, shared between the supervisor thread
/// and observers.
#[derive(Debug, Default)]
pub struct SupervisorState {
    generation: AtomicU64,
    restarts: AtomicU64,
    running: AtomicBool,
    binding: ArcSwapOption<Binding>,
}

impl SupervisorState {
    /// Number of server instances started so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Number of abnormal terminations that led to a restart.
    #[must_use]
    pub fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Address of the live generation, if one is bound.
    #[must_use]
    pub fn binding(&self) -> Option<Binding> {
        self.binding.load_full().map(|binding| *binding)
    }

    fn begin_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Publishes `addr` unless a newer generation has already started.
    fn publish(&self, generation: u64, addr: SocketAddr) {
        if generation == self.generation() {
            self.binding
                .store(Some(Arc::new(Binding { generation, addr })));
        }
    }

    /// Clears the binding if it still belongs to `generation`.
    fn retire(&self, generation: u64) {
        self.binding.rcu(|current| match current {
            Some(binding) if binding.generation == generation => None,
            other => other.clone(),
        });
    }
}

// ---------------------------------------------------------------------------
// supervise
// ---------------------------------------------------------------------------

/// Runs `factory` generation after generation until `cancel` fires.
///
/// Each generation gets its number and a child token of `cancel`; the child
/// is cancelled once the generation ends so anything it spawned stops with
/// it. Generations run on their own task, so a panic is observed as a
/// failure instead of tearing down the loop. A generation that returns
/// `Ok(())` while `cancel` is still live is treated as a failure too.
pub async fn supervise<F, Fut>(
    name: &str,
    state: Arc<SupervisorState>,
    cancel: CancellationToken,
    restart_delay: Duration,
    mut factory: F,
) where
    F: FnMut(u64, CancellationToken) -> Fut + Send,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    state.running.store(true, Ordering::Release);

    while !cancel.is_cancelled() {
        let generation = state.begin_generation();
        let generation_token = cancel.child_token();
        info!(name, generation, "starting supervised server");

        let outcome = tokio::spawn(factory(generation, generation_token.clone())).await;
        generation_token.cancel();
        state.retire(generation);

        if cancel.is_cancelled() {
            if let Ok(Err(err)) = &outcome {
                warn!(name, generation, error = %err, "server failed while stopping");
            }
            break;
        }

        match outcome {
            Ok(Ok(())) => warn!(name, generation, "server loop exited without a stop request"),
            Ok(Err(err)) => error!(name, generation, error = %err, "server crashed"),
            Err(join_err) => error!(name, generation, error = %join_err, "server panicked"),
        }

        let restarts = state.restarts.fetch_add(1, Ordering::AcqRel) + 1;
        warn!(name, restarts, delay_ms = restart_delay.as_millis(), "restarting server");

        if !restart_delay.is_zero() {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(restart_delay) => {}
            }
        }
    }

    state.running.store(false, Ordering::Release);
    info!(name, "supervision ended");
}

// ---------------------------------------------------------------------------
// RpcSupervisor
// ---------------------------------------------------------------------------

/// Read-only view of the RPC listener for health reporting.
#[derive(Clone)]
pub struct RpcMonitor {
    state: Arc<SupervisorState>,
    connections: Arc<ConnectionRegistry>,
}

impl RpcMonitor {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.generation()
    }

    #[must_use]
    pub fn restart_count(&self) -> u64 {
        self.state.restart_count()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.count()
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.binding().map(|binding| binding.addr)
    }
}

struct Worker {
    cancel: CancellationToken,
    done: oneshot::Receiver<()>,
    thread: JoinHandle<()>,
}

/// Lifecycle of the listener thread. `Starting` reserves the slot so only
/// one `start()` can spawn a thread.
enum Slot {
    Idle,
    Starting,
    Running(Worker),
}

/// Owns the RPC listener thread and restarts the server when it dies.
pub struct RpcSupervisor {
    config: Arc<RpcConfig>,
    handler: JsonApiHandler,
    connections: Arc<ConnectionRegistry>,
    state: Arc<SupervisorState>,
    slot: Mutex<Slot>,
}

impl RpcSupervisor {
    #[must_use]
    pub fn new(config: RpcConfig, registry: Arc<ApiRegistry>) -> Self {
        Self {
            config: Arc::new(config),
            handler: JsonApiHandler::new(registry),
            connections: Arc::new(ConnectionRegistry::new()),
            state: Arc::new(SupervisorState::default()),
            slot: Mutex::new(Slot::Idle),
        }
    }

    #[must_use]
    pub fn monitor(&self) -> RpcMonitor {
        RpcMonitor {
            state: Arc::clone(&self.state),
            connections: Arc::clone(&self.connections),
        }
    }

    #[must_use]
    pub fn state(&self) -> Arc<SupervisorState> {
        Arc::clone(&self.state)
    }

    /// Spawns the listener thread and waits until the first generation is
    /// bound. Returns the bound address.
    ///
    /// # Errors
    ///
    /// Fails if the supervisor is already running, the runtime cannot be
    /// built or the first bind fails. Nothing keeps running on failure.
    pub async fn start(&self) -> anyhow::Result<SocketAddr> {
        {
            let mut slot = self.slot.lock();
            if !matches!(*slot, Slot::Idle) {
                anyhow::bail!("rpc supervisor already started");
            }
            *slot = Slot::Starting;
        }

        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let context = ThreadContext {
            config: Arc::clone(&self.config),
            handler: self.handler.clone(),
            connections: Arc::clone(&self.connections),
            state: Arc::clone(&self.state),
            cancel: cancel.clone(),
        };

        let spawned = std::thread::Builder::new()
            .name("frontapi-rpc-supervisor".to_string())
            .spawn(move || context.run(ready_tx, done_tx));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(err) => {
                self.release_reservation();
                return Err(err.into());
            }
        };

        let ready = ready_rx.await;
        let mut slot = self.slot.lock();
        let addr = match ready {
            Ok(Ok(addr)) if matches!(*slot, Slot::Starting) => addr,
            Ok(Ok(_)) => {
                cancel.cancel();
                anyhow::bail!("rpc supervisor destroyed while starting");
            }
            Ok(Err(err)) => {
                cancel.cancel();
                Self::release(&mut slot);
                return Err(err);
            }
            Err(_) => {
                cancel.cancel();
                Self::release(&mut slot);
                anyhow::bail!("rpc supervisor thread exited before binding");
            }
        };

        *slot = Slot::Running(Worker {
            cancel,
            done: done_rx,
            thread,
        });
        Ok(addr)
    }

    fn release_reservation(&self) {
        Self::release(&mut self.slot.lock());
    }

    fn release(slot: &mut Slot) {
        if matches!(*slot, Slot::Starting) {
            *slot = Slot::Idle;
        }
    }

    /// Stops the listener: no further restarts, open connections closed,
    /// thread joined. Idempotent.
    pub async fn destroy(&self) {
        let Slot::Running(worker) = std::mem::replace(&mut *self.slot.lock(), Slot::Idle) else {
            return;
        };

        worker.cancel.cancel();
        let _ = worker.done.await;
        let thread = worker.thread;
        if let Ok(Err(_)) = tokio::task::spawn_blocking(move || thread.join()).await {
            warn!("rpc supervisor thread panicked");
        }
        info!(
            generations = self.state.generation(),
            restarts = self.state.restart_count(),
            "rpc supervisor destroyed"
        );
    }
}

impl Drop for RpcSupervisor {
    fn drop(&mut self) {
        if let Slot::Running(worker) = self.slot.get_mut() {
            worker.cancel.cancel();
        }
    }
}

/// What the supervisor thread needs, moved in at spawn.
struct ThreadContext {
    config: Arc<RpcConfig>,
    handler: JsonApiHandler,
    connections: Arc<ConnectionRegistry>,
    state: Arc<SupervisorState>,
    cancel: CancellationToken,
}

impl ThreadContext {
    fn run(
        self,
        ready: oneshot::Sender<anyhow::Result<SocketAddr>>,
        done: oneshot::Sender<()>,
    ) {
        let runtime = match self.config.strategy.build_runtime(&self.config) {
            Ok(runtime) => runtime,
            Err(err) => {
                let _ = ready.send(Err(err.into()));
                return;
            }
        };

        runtime.block_on(self.supervise_listener(ready));
        drop(runtime);
        let _ = done.send(());
    }

    async fn supervise_listener(self, ready: oneshot::Sender<anyhow::Result<SocketAddr>>) {
        let first = match RpcServer::bind(
            Arc::clone(&self.config),
            self.handler.clone(),
            Arc::clone(&self.connections),
        )
        .await
        {
            Ok(server) => server,
            Err(err) => {
                let _ = ready.send(Err(err.into()));
                return;
            }
        };
        let addr = match first.local_addr() {
            Ok(addr) => addr,
            Err(err) => {
                let _ = ready.send(Err(err.into()));
                return;
            }
        };

        // Later generations rebind the port the first one got, even when
        // the configured port was 0.
        let pinned = Arc::new(RpcConfig {
            port: addr.port(),
            ..(*self.config).clone()
        });
        let restart_delay = self.config.restart_delay;
        let ThreadContext {
            handler,
            connections,
            state,
            cancel,
            ..
        } = self;

        // The first generation reuses the probe bind and reports readiness
        // once its address is published.
        let mut first = Some((first, ready));
        let factory_state = Arc::clone(&state);

        supervise("rpc", state, cancel, restart_delay, move |generation, token| {
            let prebound = first.take();
            let config = Arc::clone(&pinned);
            let handler = handler.clone();
            let connections = Arc::clone(&connections);
            let state = Arc::clone(&factory_state);
            async move {
                let (server, ready) = match prebound {
                    Some((server, ready)) => (server, Some(ready)),
                    None => (RpcServer::bind(config, handler, connections).await?, None),
                };
                let addr = server.local_addr()?;
                state.publish(generation, addr);
                if let Some(ready) = ready {
                    let _ = ready.send(Ok(addr));
                }
                server.serve(generation, token).await?;
                anyhow::Ok(())
            }
        })
        .await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use frontapi_core::{handler_fn, ApiCall, ApiResult, ApiStatus};
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use super::*;
    use crate::client::{ApiClient, RpcApiClient};
    use crate::rpc::ServerStrategy;

    async fn free_port() -> SocketAddr {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        probe.local_addr().unwrap()
    }

    #[tokio::test]
    async fn crashed_generation_is_rebuilt_on_same_port() {
        let addr = free_port().await;
        let state = Arc::new(SupervisorState::default());
        let cancel = CancellationToken::new();
        let (bound_tx, mut bound_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(supervise(
            "test",
            Arc::clone(&state),
            cancel.clone(),
            Duration::ZERO,
            move |generation, token| {
                let bound_tx = bound_tx.clone();
                async move {
                    let listener = TcpListener::bind(addr).await?;
                    bound_tx.send((generation, listener.local_addr()?))?;
                    if generation == 1 {
                        anyhow::bail!("simulated crash");
                    }
                    token.cancelled().await;
                    anyhow::Ok(())
                }
            },
        ));

        let (first_gen, first_addr) = bound_rx.recv().await.unwrap();
        let (second_gen, second_addr) = bound_rx.recv().await.unwrap();
        assert_eq!((first_gen, second_gen), (1, 2));
        assert_eq!(first_addr, second_addr);
        assert_eq!(state.restart_count(), 1);

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(state.generation(), 2);
        assert!(!state.is_running());
    }

    #[tokio::test]
    async fn panic_and_silent_exit_both_restart() {
        let state = Arc::new(SupervisorState::default());
        let cancel = CancellationToken::new();
        let (gen_tx, mut gen_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(supervise(
            "test",
            Arc::clone(&state),
            cancel.clone(),
            Duration::ZERO,
            move |generation, token| {
                let gen_tx = gen_tx.clone();
                async move {
                    gen_tx.send(generation)?;
                    match generation {
                        1 => panic!("generation one exploded"),
                        2 => anyhow::Ok(()),
                        _ => {
                            token.cancelled().await;
                            anyhow::Ok(())
                        }
                    }
                }
            },
        ));

        for expected in 1..=3 {
            assert_eq!(gen_rx.recv().await, Some(expected));
        }
        assert_eq!(state.restart_count(), 2);

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(state.generation(), 3);
    }

    async fn restart_gaps(restart_delay: Duration) -> Vec<Duration> {
        let state = Arc::new(SupervisorState::default());
        let cancel = CancellationToken::new();
        let (start_tx, mut start_rx) = mpsc::unbounded_channel();

        let stopper = cancel.clone();
        let task = tokio::spawn(supervise(
            "test",
            Arc::clone(&state),
            cancel,
            restart_delay,
            move |generation, _| {
                start_tx.send(tokio::time::Instant::now()).ok();
                if generation == 4 {
                    stopper.cancel();
                }
                async { Err::<(), _>(anyhow::anyhow!("always fails")) }
            },
        ));
        task.await.unwrap();
        assert_eq!(state.restart_count(), 3);

        let mut starts = Vec::new();
        while let Ok(started) = start_rx.try_recv() {
            starts.push(started);
        }
        starts.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_crashes_restart_immediately() {
        assert_eq!(restart_gaps(Duration::ZERO).await, vec![Duration::ZERO; 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_delay_paces_every_restart() {
        let delay = Duration::from_millis(250);
        for gap in restart_gaps(delay).await {
            assert!(gap >= delay && gap < delay * 2, "{gap:?}");
        }
    }

    #[tokio::test]
    async fn no_restart_after_cancel() {
        let state = Arc::new(SupervisorState::default());
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();

        supervise("test", Arc::clone(&state), cancel, Duration::ZERO, move |_, _| {
            stopper.cancel();
            async { Err::<(), _>(anyhow::anyhow!("failed during shutdown")) }
        })
        .await;

        assert_eq!(state.generation(), 1);
        assert_eq!(state.restart_count(), 0);
    }

    #[test]
    fn stale_generation_cannot_clobber_binding() {
        let state = SupervisorState::default();
        let old = SocketAddr::from(([127, 0, 0, 1], 1));
        let new = SocketAddr::from(([127, 0, 0, 1], 2));

        assert_eq!(state.begin_generation(), 1);
        state.publish(1, old);
        assert_eq!(state.begin_generation(), 2);
        state.publish(2, new);

        state.publish(1, old);
        state.retire(1);
        assert_eq!(
            state.binding(),
            Some(Binding {
                generation: 2,
                addr: new
            })
        );

        state.retire(2);
        assert_eq!(state.binding(), None);
    }

    fn echo_registry() -> Arc<ApiRegistry> {
        let registry = Arc::new(ApiRegistry::new());
        registry.register(
            "demo",
            "ping",
            handler_fn(|call: ApiCall| async move { anyhow::Ok(call.params) }),
        );
        registry
    }

    fn local_config(strategy: ServerStrategy) -> RpcConfig {
        RpcConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            strategy,
            ..RpcConfig::default()
        }
    }

    #[tokio::test]
    async fn serves_ping_under_every_strategy() {
        for strategy in [
            ServerStrategy::Threaded,
            ServerStrategy::NonBlocking,
            ServerStrategy::HalfSyncHalfAsync,
        ] {
            let supervisor = RpcSupervisor::new(local_config(strategy), echo_registry());
            let addr = supervisor.start().await.unwrap();
            let monitor = supervisor.monitor();
            assert!(monitor.is_running());
            assert_eq!(monitor.generation(), 1);

            let client = RpcApiClient::new("127.0.0.1", addr.port());
            let result = client.call(None, "demo", "ping", &json!("demo")).await;
            assert_eq!(result, ApiResult::ok(json!("demo")), "{strategy}");

            supervisor.destroy().await;
            assert!(!monitor.is_running());
        }
    }

    #[tokio::test]
    async fn destroy_stops_serving_and_restarting() {
        let supervisor = RpcSupervisor::new(local_config(ServerStrategy::NonBlocking), echo_registry());
        let addr = supervisor.start().await.unwrap();
        assert_eq!(supervisor.monitor().local_addr(), Some(addr));

        supervisor.destroy().await;
        supervisor.destroy().await;

        let state = supervisor.state();
        assert_eq!(state.generation(), 1);
        assert_eq!(state.restart_count(), 0);
        assert_eq!(state.binding(), None);

        let client = RpcApiClient::new("127.0.0.1", addr.port());
        let result = client.call(None, "demo", "ping", &json!(1)).await;
        assert_eq!(result.status, ApiStatus::ServerError);
    }

    #[tokio::test]
    async fn failed_listener_is_replaced_on_same_port_until_destroyed() {
        let config = local_config(ServerStrategy::NonBlocking);
        let fault = Arc::clone(&config.accept_fault);
        let supervisor = RpcSupervisor::new(config, echo_registry());
        let addr = supervisor.start().await.unwrap();
        let monitor = supervisor.monitor();

        fault.notify_one();
        tokio::time::timeout(Duration::from_secs(5), async {
            while monitor.generation() < 2 || monitor.local_addr().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(monitor.local_addr(), Some(addr));
        assert_eq!(monitor.restart_count(), 1);

        let client = RpcApiClient::new("127.0.0.1", addr.port());
        let result = client.call(None, "demo", "ping", &json!("again")).await;
        assert_eq!(result, ApiResult::ok(json!("again")));

        supervisor.destroy().await;
        fault.notify_one();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(monitor.generation(), 2);
        assert_eq!(monitor.restart_count(), 1);
        assert!(!monitor.is_running());
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_starts_spawn_one_listener() {
        let supervisor = RpcSupervisor::new(local_config(ServerStrategy::NonBlocking), echo_registry());
        let (first, second) = tokio::join!(supervisor.start(), supervisor.start());
        assert!(first.is_ok() != second.is_ok());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let monitor = supervisor.monitor();
        assert!(monitor.is_running());
        assert_eq!(monitor.generation(), 1);

        supervisor.destroy().await;
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let supervisor = RpcSupervisor::new(local_config(ServerStrategy::NonBlocking), echo_registry());
        supervisor.start().await.unwrap();
        assert!(supervisor.start().await.is_err());
        supervisor.destroy().await;
    }

    #[tokio::test]
    async fn bind_failure_is_reported_by_start() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = RpcConfig {
            port: taken.local_addr().unwrap().port(),
            ..local_config(ServerStrategy::Threaded)
        };
        let supervisor = RpcSupervisor::new(config, echo_registry());
        assert!(supervisor.start().await.is_err());
        assert!(!supervisor.monitor().is_running());
    }
}
