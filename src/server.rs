//! TCP server for the newline-delimited JSON key-value protocol.
//!
//! Accepts connections, frames and decodes requests, and executes them
//! against the shared keyspace store. One task per connection; total
//! concurrency is bounded by a semaphore, and connections beyond the bound
//! queue in the OS accept backlog.

use crate::config::Config;
use crate::protocol::{self, Request, Response};
use crate::storage::Store;
use bytes::BytesMut;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

/// Read buffer size
const BUFFER_SIZE: usize = 16 * 1024;

/// Server instance
pub struct Server {
    config: Config,
    store: Arc<Store>,
    listener: TcpListener,
}

impl Server {
    /// Bind the listening socket and initialize the store.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(config: Config) -> io::Result<Self> {
        let listener = build_listener(&config.listen, config.accept_backlog)?;
        let store = Store::new(config.shards);
        Ok(Server {
            config,
            store,
            listener,
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and serve connections until the shutdown future resolves,
    /// then drain in-flight connections within the configured grace period.
    pub async fn run_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            config,
            store,
            listener,
        } = self;

        info!(address = %listener.local_addr()?, "Server listening");

        let connection_limit = Arc::new(Semaphore::new(config.max_connections));
        let (drain_tx, drain_rx) = watch::channel(false);
        let mut handlers = JoinSet::new();
        let limits = ConnectionLimits::from_config(&config);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received, stopping accept loop");
                    break;
                }

                // Reap finished handlers so the join set does not grow
                // without bound across many short connections.
                Some(_) = handlers.join_next(), if !handlers.is_empty() => {}

                slot = acquire_and_accept(&connection_limit, &listener) => {
                    match slot {
                        Ok((permit, stream, addr)) => {
                            debug!(peer = %addr, "New connection");
                            let store = Arc::clone(&store);
                            let drain = drain_rx.clone();
                            handlers.spawn(async move {
                                if let Err(e) =
                                    handle_connection(stream, store, limits, drain).await
                                {
                                    debug!(peer = %addr, error = %e, "Connection error");
                                }
                                drop(permit);
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        // Stop accepting before signalling the drain; connections still in
        // the backlog are reset when the listener drops.
        drop(listener);
        let _ = drain_tx.send(true);

        if !handlers.is_empty() {
            info!(active = handlers.len(), "Draining connections");
            let grace = Duration::from_secs(config.shutdown_grace);
            let drained = timeout(grace, async {
                while handlers.join_next().await.is_some() {}
            })
            .await;

            if drained.is_err() {
                warn!(
                    remaining = handlers.len(),
                    "Drain grace period expired, aborting remaining connections"
                );
                handlers.abort_all();
                while handlers.join_next().await.is_some() {}
            }
        }

        let stats = store.stats();
        info!(
            keys = stats.keys,
            puts = stats.puts,
            gets = stats.gets,
            hits = stats.hits,
            "Server stopped"
        );
        Ok(())
    }

    /// Run until SIGINT.
    pub async fn run_until_ctrl_c(self) -> io::Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to install ctrl-c handler");
            }
        })
        .await
    }
}

/// Wait for a connection slot, then for a connection.
async fn acquire_and_accept(
    limit: &Arc<Semaphore>,
    listener: &TcpListener,
) -> io::Result<(OwnedSemaphorePermit, TcpStream, SocketAddr)> {
    let permit = limit
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "connection limit semaphore closed"))?;
    let (stream, addr) = listener.accept().await?;
    Ok((permit, stream, addr))
}

/// Build the listening socket with an explicit accept backlog.
fn build_listener(addr: &str, backlog: u32) -> io::Result<TcpListener> {
    let addr: SocketAddr = addr.parse().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid listen address '{addr}': {e}"),
        )
    })?;

    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;

    TcpListener::from_std(socket.into())
}

/// Per-connection protocol limits, copied out of the config
#[derive(Debug, Clone, Copy)]
struct ConnectionLimits {
    max_frame_bytes: usize,
    max_key_bytes: usize,
    max_value_bytes: usize,
    idle_timeout: Option<Duration>,
}

impl ConnectionLimits {
    fn from_config(config: &Config) -> Self {
        Self {
            max_frame_bytes: config.max_frame_bytes,
            max_key_bytes: config.max_key_bytes,
            max_value_bytes: config.max_value_bytes,
            idle_timeout: match config.idle_timeout {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

/// Handle a single client connection.
///
/// Reads frames, dispatches them to the store, and writes responses in
/// request order. A malformed frame gets an ERROR response and the
/// connection stays open; an oversized frame gets an ERROR response and the
/// connection is closed. When the drain signal fires, frames already
/// buffered are answered before the connection closes.
async fn handle_connection<S>(
    mut stream: S,
    store: Arc<Store>,
    limits: ConnectionLimits,
    mut drain: watch::Receiver<bool>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
    let mut draining = *drain.borrow();

    loop {
        // Answer every complete frame already buffered, in arrival order.
        loop {
            match protocol::split_frame(&mut buffer, limits.max_frame_bytes) {
                Ok(Some(line)) => {
                    if line.is_empty() {
                        continue;
                    }
                    let response = match Request::decode(&line) {
                        Ok(request) => execute(request, &store, &limits),
                        Err(e) => {
                            warn!(error = %e, "Malformed request");
                            Response::error(e.to_string())
                        }
                    };
                    write_response(&mut stream, &response).await?;
                }
                Ok(None) => break,
                Err(e) => {
                    // Protocol violation: answer once, then close to bound
                    // per-connection buffering.
                    warn!(error = %e, "Oversized frame, closing connection");
                    let _ = write_response(&mut stream, &Response::error(e.to_string())).await;
                    return Ok(());
                }
            }
        }

        if draining {
            debug!("Closing connection for shutdown");
            return Ok(());
        }

        tokio::select! {
            changed = drain.changed() => {
                // A dropped sender counts as a shutdown signal too.
                let _ = changed;
                draining = true;
            }
            read = read_more(&mut stream, &mut buffer, limits.idle_timeout) => {
                match read? {
                    Some(0) => {
                        trace!("Connection closed by client");
                        return Ok(());
                    }
                    Some(_) => {}
                    None => {
                        debug!("Closing idle connection");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Read more bytes into the buffer, bounded by the idle timeout when one is
/// configured. `Ok(None)` means the idle timeout expired.
async fn read_more<S>(
    stream: &mut S,
    buffer: &mut BytesMut,
    idle: Option<Duration>,
) -> io::Result<Option<usize>>
where
    S: AsyncRead + Unpin,
{
    match idle {
        Some(limit) => match timeout(limit, stream.read_buf(buffer)).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        },
        None => stream.read_buf(buffer).await.map(Some),
    }
}

/// Encode and write one response frame.
async fn write_response<S>(stream: &mut S, response: &Response) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let line = response
        .to_line()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    stream.write_all(&line).await
}

/// Execute a decoded request against the store.
fn execute(request: Request, store: &Store, limits: &ConnectionLimits) -> Response {
    if request.key().len() > limits.max_key_bytes {
        return Response::error(format!(
            "key exceeds maximum length of {} bytes",
            limits.max_key_bytes
        ));
    }

    match request {
        Request::Put { key, value } => {
            if value.len() > limits.max_value_bytes {
                return Response::error(format!(
                    "value exceeds maximum length of {} bytes",
                    limits.max_value_bytes
                ));
            }
            store.put(key, value);
            Response::ok()
        }
        Request::Get { key } => match store.get(&key) {
            Some(value) => Response::with_value(value),
            None => Response::not_found(),
        },
    }
}
