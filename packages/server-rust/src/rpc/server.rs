//! One generation of the RPC listener.
//!
//! Wire format: every frame is a 4-byte big-endian length followed by a
//! named `MsgPack` map (`RpcRequest` in, `RpcResponse` out). A connection
//! carries any number of request/response exchanges in order.
//!
//! Per-connection rules:
//! - a length prefix above `max_frame_size` closes the connection;
//! - no complete frame within `client_timeout` closes the connection;
//! - a frame that does not decode as a request is answered with a
//!   `ServerError` response and the connection stays open;
//! - request bytes held across all connections are capped by
//!   `max_read_buffer_size`. The budget is taken from the length prefix
//!   before the payload is read, so a frame waits unread until it fits.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use frontapi_core::{RpcRequest, RpcResponse};
use futures_util::SinkExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::codec::{FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::config::RpcConfig;
use super::connection::{ConnectionGuard, ConnectionRegistry};
use super::error::RpcError;
use super::handler::{error_response, JsonApiHandler};
use super::strategy::ServerStrategy;

/// Length-prefixed codec with the given frame cap.
#[must_use]
pub fn frame_codec(max_frame_size: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_size)
        .new_codec()
}

/// Everything a connection of one server instance shares.
struct ServerShared {
    config: Arc<RpcConfig>,
    handler: JsonApiHandler,
    connections: Arc<ConnectionRegistry>,
    read_budget: Arc<Semaphore>,
    dispatch_slots: Option<Semaphore>,
}

/// A bound RPC listener, ready to [`serve`](Self::serve).
pub struct RpcServer {
    listener: TcpListener,
    shared: Arc<ServerShared>,
}

impl RpcServer {
    /// Binds `config.host:config.port` and prepares the strategy's pools.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Io`] if the address cannot be bound.
    pub async fn bind(
        config: Arc<RpcConfig>,
        handler: JsonApiHandler,
        connections: Arc<ConnectionRegistry>,
    ) -> Result<Self, RpcError> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        let dispatch_slots = config
            .strategy
            .dispatch_permits(&config)
            .map(Semaphore::new);
        let read_budget = Arc::new(Semaphore::new(config.max_read_buffer_size));

        Ok(Self {
            listener,
            shared: Arc::new(ServerShared {
                config,
                handler,
                connections,
                read_budget,
                dispatch_slots,
            }),
        })
    }

    /// # Errors
    ///
    /// Returns the socket error if the local address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, RpcError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `cancel` fires.
    ///
    /// Returns `Ok(())` only on cancellation. An accept failure ends the
    /// loop with an error so the supervisor can replace this instance.
    /// Connections observe `cancel` and close when it fires.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Io`] when accepting fails.
    pub async fn serve(self, generation: u64, cancel: CancellationToken) -> Result<(), RpcError> {
        info!(
            addr = %self.local_addr()?,
            generation,
            strategy = %self.shared.config.strategy,
            "rpc server accepting connections"
        );

        loop {
            let (stream, peer) = tokio::select! {
                () = cancel.cancelled() => {
                    info!(generation, "rpc server stopped");
                    return Ok(());
                }
                accepted = self.accept() => accepted?,
            };

            let session = Session {
                shared: Arc::clone(&self.shared),
                cancel: cancel.clone(),
                generation,
            };

            match self.shared.config.strategy {
                ServerStrategy::Threaded => spawn_connection_thread(session, stream, peer),
                ServerStrategy::NonBlocking | ServerStrategy::HalfSyncHalfAsync => {
                    tokio::spawn(session.run(stream, peer));
                }
            }
        }
    }

    #[cfg(not(test))]
    async fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await
    }

    #[cfg(test)]
    async fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr)> {
        tokio::select! {
            () = self.shared.config.accept_fault.notified() => {
                Err(std::io::Error::other("injected accept failure"))
            }
            accepted = self.listener.accept() => accepted,
        }
    }
}

/// Moves the socket onto a dedicated OS thread with its own runtime.
fn spawn_connection_thread(session: Session, stream: TcpStream, peer: SocketAddr) {
    let std_stream = match stream.into_std() {
        Ok(stream) => stream,
        Err(err) => {
            warn!(peer = %peer, error = %err, "failed to detach connection");
            return;
        }
    };

    let spawned = std::thread::Builder::new()
        .name(format!("frontapi-rpc-conn-{}", peer.port()))
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    warn!(peer = %peer, error = %err, "failed to build connection runtime");
                    return;
                }
            };
            runtime.block_on(async move {
                match TcpStream::from_std(std_stream) {
                    Ok(stream) => session.run(stream, peer).await,
                    Err(err) => warn!(peer = %peer, error = %err, "failed to attach connection"),
                }
            });
        });

    if let Err(err) = spawned {
        warn!(peer = %peer, error = %err, "failed to spawn connection thread");
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct Session {
    shared: Arc<ServerShared>,
    cancel: CancellationToken,
    generation: u64,
}

impl Session {
    async fn run(self, stream: TcpStream, peer: SocketAddr) {
        let guard = self.shared.connections.register(peer, self.generation);
        let span = info_span!(
            "rpc_connection",
            id = guard.info().id.0,
            peer = %peer,
            generation = self.generation,
        );

        async move {
            debug!("connection opened");
            match self.exchange(stream, &guard).await {
                Ok(()) => debug!(
                    requests = guard.info().request_count(),
                    open_for = ?guard.info().connected_at.elapsed(),
                    "connection closed"
                ),
                Err(RpcError::Timeout(idle)) => debug!(?idle, "idle connection closed"),
                Err(err) => warn!(error = %err, "connection closed"),
            }
        }
        .instrument(span)
        .await;
    }

    /// Reads requests and writes responses until the peer hangs up.
    async fn exchange(&self, stream: TcpStream, guard: &ConnectionGuard) -> Result<(), RpcError> {
        let config = &self.shared.config;
        let (mut reader, writer) = stream.into_split();
        let mut sink = FramedWrite::new(writer, frame_codec(config.max_frame_size));

        loop {
            let Some(len) = self.idle_read(read_length(&mut reader)).await?.flatten() else {
                return Ok(());
            };
            if len > config.max_frame_size {
                return Err(RpcError::FrameTooLarge {
                    len,
                    max: config.max_frame_size,
                });
            }

            let permit = tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                permit = self.reserve(len) => permit?,
            };
            let mut frame = vec![0; len];
            if self.idle_read(read_payload(&mut reader, &mut frame)).await?.is_none() {
                return Ok(());
            }

            guard.info().record_request();
            let response = self.dispatch(&frame).await;
            drop(permit);

            sink.send(Bytes::from(response.to_bytes()?)).await?;
        }
    }

    /// Runs a read under the idle timeout. `None` means the connection is
    /// being closed by cancellation.
    async fn idle_read<T>(
        &self,
        read: impl std::future::Future<Output = Result<T, RpcError>>,
    ) -> Result<Option<T>, RpcError> {
        let idle = self.shared.config.client_timeout;
        tokio::select! {
            () = self.cancel.cancelled() => Ok(None),
            read = tokio::time::timeout(idle, read) => match read {
                Err(_elapsed) => Err(RpcError::Timeout(idle)),
                Ok(read) => read.map(Some),
            },
        }
    }

    /// Holds `len` bytes of the shared read budget while a frame is read
    /// and processed.
    async fn reserve(&self, len: usize) -> Result<Option<OwnedSemaphorePermit>, RpcError> {
        let budget = self.shared.config.max_read_buffer_size;
        let permits = match u32::try_from(len) {
            Ok(permits) if len <= budget => permits,
            _ => return Err(RpcError::FrameExceedsBudget { len, budget }),
        };
        if permits == 0 {
            return Ok(None);
        }
        Ok(Arc::clone(&self.shared.read_budget)
            .acquire_many_owned(permits)
            .await
            .ok())
    }

    async fn dispatch(&self, frame: &[u8]) -> RpcResponse {
        let request = match RpcRequest::from_bytes(frame) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "undecodable request frame");
                return error_response(format!("malformed request frame: {err}"));
            }
        };

        let _slot = match &self.shared.dispatch_slots {
            Some(slots) => slots.acquire().await.ok(),
            None => None,
        };
        self.shared.handler.call_api(request).await
    }
}

/// Reads the 4-byte big-endian length prefix. A clean end of stream before
/// the prefix is `Ok(None)`.
async fn read_length<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<usize>, RpcError> {
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => Ok(Some(
            usize::try_from(u32::from_be_bytes(prefix)).unwrap_or(usize::MAX),
        )),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(err) => Err(err.into()),
    }
}

async fn read_payload<R: AsyncRead + Unpin>(reader: &mut R, frame: &mut [u8]) -> Result<(), RpcError> {
    match reader.read_exact(frame).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(RpcError::ConnectionClosed)
        }
        Err(err) => Err(err.into()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use frontapi_core::{handler_fn, ApiCall};
    use futures_util::StreamExt;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::Framed;

    use super::*;
    use crate::registry::ApiRegistry;

    fn echo_registry() -> Arc<ApiRegistry> {
        let registry = Arc::new(ApiRegistry::new());
        registry.register(
            "demo",
            "ping",
            handler_fn(|call: ApiCall| async move { anyhow::Ok(call.params) }),
        );
        registry
    }

    struct Running {
        addr: SocketAddr,
        cancel: CancellationToken,
        connections: Arc<ConnectionRegistry>,
        task: tokio::task::JoinHandle<Result<(), RpcError>>,
    }

    async fn start(config: RpcConfig) -> Running {
        let config = Arc::new(RpcConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..config
        });
        let connections = Arc::new(ConnectionRegistry::new());
        let server = RpcServer::bind(
            config,
            JsonApiHandler::new(echo_registry()),
            Arc::clone(&connections),
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(server.serve(1, cancel.clone()));
        Running {
            addr,
            cancel,
            connections,
            task,
        }
    }

    async fn connect(addr: SocketAddr) -> Framed<TcpStream, LengthDelimitedCodec> {
        let stream = TcpStream::connect(addr).await.unwrap();
        Framed::new(stream, frame_codec(1_048_576))
    }

    async fn exchange(
        framed: &mut Framed<TcpStream, LengthDelimitedCodec>,
        payload: Vec<u8>,
    ) -> RpcResponse {
        framed.send(Bytes::from(payload)).await.unwrap();
        let frame = framed.next().await.unwrap().unwrap();
        RpcResponse::from_bytes(&frame).unwrap()
    }

    fn ping(input: &str) -> Vec<u8> {
        RpcRequest::new(None, "demo", "ping", input).to_bytes().unwrap()
    }

    #[tokio::test]
    async fn serves_multiple_calls_per_connection() {
        for strategy in [
            ServerStrategy::Threaded,
            ServerStrategy::NonBlocking,
            ServerStrategy::HalfSyncHalfAsync,
        ] {
            let running = start(RpcConfig {
                strategy,
                ..RpcConfig::default()
            })
            .await;
            let mut framed = connect(running.addr).await;

            let first = exchange(&mut framed, ping(r#""demo""#)).await;
            assert_eq!(first, RpcResponse::new(200, r#""demo""#), "{strategy}");
            let second = exchange(&mut framed, ping(&json!({"n": 2}).to_string())).await;
            assert_eq!(second.json_output, r#"{"n":2}"#, "{strategy}");

            running.cancel.cancel();
            running.task.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn undecodable_frame_gets_error_and_connection_survives() {
        let running = start(RpcConfig::default()).await;
        let mut framed = connect(running.addr).await;

        let garbage = exchange(&mut framed, vec![0xc1, 0x00, 0xff]).await;
        assert_eq!(garbage.status, 500);

        let ok = exchange(&mut framed, ping("1")).await;
        assert_eq!(ok.status, 200);
        running.cancel.cancel();
    }

    #[tokio::test]
    async fn oversized_frame_closes_connection() {
        let running = start(RpcConfig {
            max_frame_size: 64,
            ..RpcConfig::default()
        })
        .await;
        let mut framed = connect(running.addr).await;

        let padding = format!("\"{}\"", "x".repeat(256));
        framed.send(Bytes::from(ping(&padding))).await.unwrap();
        let next = tokio::time::timeout(Duration::from_secs(5), framed.next())
            .await
            .unwrap();
        assert!(matches!(next, None | Some(Err(_))));
        running.cancel.cancel();
    }

    #[tokio::test]
    async fn frame_larger_than_read_budget_closes_connection() {
        let running = start(RpcConfig {
            max_read_buffer_size: 8,
            ..RpcConfig::default()
        })
        .await;
        let mut framed = connect(running.addr).await;

        framed.send(Bytes::from(ping("\"too big\""))).await.unwrap();
        let next = tokio::time::timeout(Duration::from_secs(5), framed.next())
            .await
            .unwrap();
        assert!(matches!(next, None | Some(Err(_))));
        running.cancel.cancel();
    }

    #[tokio::test]
    async fn partially_sent_frame_holds_read_budget() {
        let request = ping("1");
        let len = request.len();
        let running = start(RpcConfig {
            max_read_buffer_size: len + len / 2,
            ..RpcConfig::default()
        })
        .await;

        // Announce a whole frame but send only half of it.
        let mut slow = TcpStream::connect(running.addr).await.unwrap();
        let prefix = u32::try_from(len).unwrap().to_be_bytes();
        slow.write_all(&prefix).await.unwrap();
        slow.write_all(&request[..len / 2]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut waiting = connect(running.addr).await;
        waiting.send(Bytes::from(ping("2"))).await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(300), waiting.next()).await;
        assert!(blocked.is_err(), "second frame read while the budget was held");

        slow.write_all(&request[len / 2..]).await.unwrap();
        let mut slow = Framed::new(slow, frame_codec(1_048_576));
        let first = slow.next().await.unwrap().unwrap();
        assert_eq!(RpcResponse::from_bytes(&first).unwrap().json_output, "1");

        let second = tokio::time::timeout(Duration::from_secs(5), waiting.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(RpcResponse::from_bytes(&second).unwrap().json_output, "2");
        running.cancel.cancel();
    }

    #[tokio::test]
    async fn idle_connection_is_closed_after_client_timeout() {
        let running = start(RpcConfig {
            client_timeout: Duration::from_millis(100),
            ..RpcConfig::default()
        })
        .await;
        let mut framed = connect(running.addr).await;

        let next = tokio::time::timeout(Duration::from_secs(5), framed.next())
            .await
            .unwrap();
        assert!(matches!(next, None | Some(Err(_))));
        running.cancel.cancel();
    }

    #[tokio::test]
    async fn connections_are_tracked_until_closed() {
        let running = start(RpcConfig::default()).await;
        let mut framed = connect(running.addr).await;
        exchange(&mut framed, ping("null")).await;
        assert_eq!(running.connections.count(), 1);
        assert_eq!(running.connections.connections()[0].request_count(), 1);

        drop(framed);
        tokio::time::timeout(Duration::from_secs(5), async {
            while running.connections.count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        running.cancel.cancel();
    }

    #[tokio::test]
    async fn cancel_closes_open_connections() {
        let running = start(RpcConfig::default()).await;
        let mut framed = connect(running.addr).await;
        exchange(&mut framed, ping("null")).await;

        running.cancel.cancel();
        running.task.await.unwrap().unwrap();
        let next = tokio::time::timeout(Duration::from_secs(5), framed.next())
            .await
            .unwrap();
        assert!(matches!(next, None | Some(Err(_))));
    }
}
