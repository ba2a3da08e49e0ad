//! Socket ingestion server.
//!
//! Accepts WebSocket connections, dispatches every text message as a command
//! line, and writes the reply back to the connection it came from.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::client_registry::{ClientId, ClientRegistry, Outbound};
use crate::dispatcher::Dispatcher;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("socket server is disabled (port 0)")]
    Disabled,

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub bind: String,
    pub port: u16,
}

impl ServerOptions {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// A running server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    registry: Arc<ClientRegistry>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Closes every client, stops accepting, and waits for all connection
    /// tasks to finish.
    pub async fn shutdown(self) {
        let closed = self.registry.close_all();
        info!(closed, "Shutting down socket server");
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            warn!(error = %err, "Socket server task ended abnormally");
        }
    }
}

/// Starts the server on the configured endpoint. Port 0 means disabled.
pub async fn start_server(
    options: &ServerOptions,
    dispatcher: Dispatcher,
    registry: Arc<ClientRegistry>,
    cancel: &CancellationToken,
) -> Result<ServerHandle, ServerError> {
    if options.port == 0 {
        return Err(ServerError::Disabled);
    }
    listen(&options.address(), dispatcher, registry, cancel).await
}

/// Binds `addr` exactly as given (port 0 picks an ephemeral port) and serves.
pub async fn listen(
    addr: &str,
    dispatcher: Dispatcher,
    registry: Arc<ClientRegistry>,
    cancel: &CancellationToken,
) -> Result<ServerHandle, ServerError> {
    let bind_error = |source| ServerError::Bind {
        addr: addr.to_string(),
        source,
    };
    let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
    let local_addr = listener.local_addr().map_err(bind_error)?;
    info!(%local_addr, "Socket server listening");

    let cancel = cancel.child_token();
    let task = tokio::spawn(accept_loop(
        listener,
        dispatcher,
        Arc::clone(&registry),
        cancel.clone(),
    ));

    Ok(ServerHandle {
        local_addr,
        registry,
        cancel,
        task,
    })
}

async fn accept_loop(
    listener: TcpListener,
    dispatcher: Dispatcher,
    registry: Arc<ClientRegistry>,
    cancel: CancellationToken,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        dispatcher.clone(),
                        Arc::clone(&registry),
                        cancel.clone(),
                    ));
                }
                Err(err) => warn!(error = %err, "Failed to accept socket connection"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    while connections.join_next().await.is_some() {}
    debug!("Socket server stopped");
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    registry: Arc<ClientRegistry>,
    cancel: CancellationToken,
) {
    let socket = match tokio_tungstenite::accept_async(stream).await {
        Ok(socket) => socket,
        Err(err) => {
            warn!(%peer, error = %err, "WebSocket handshake failed");
            return;
        }
    };

    let id = ClientId::generate();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let clients = registry.add(id, tx.clone());
    info!(client = %id, %peer, clients, "Socket client connected");

    let (mut sink, mut source) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Text(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    if let Err(err) = sink.send(Message::Close(None)).await {
                        trace!(client = %id, error = %err, "Close frame not sent");
                    }
                    break;
                }
            }
        }
        if let Err(err) = sink.close().await {
            trace!(client = %id, error = %err, "Socket already closed");
        }
    });

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    debug!(client = %id, line = %text, "Socket message");
                    dispatcher.dispatch(&text, Some(&tx));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => dispatcher.dispatch(&text, Some(&tx)),
                    Err(_) => warn!(client = %id, "Ignoring non UTF-8 binary message"),
                },
                // tungstenite queues the pong reply itself.
                Some(Ok(Message::Ping(_))) => debug!(client = %id, "Ping"),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(client = %id, error = %err, "Socket read error");
                    break;
                }
            }
        }
    }

    registry.remove(id);
    info!(client = %id, clients = registry.len(), "Socket client disconnected");

    drop(tx);
    if let Err(err) = writer.await {
        warn!(client = %id, error = %err, "Socket writer ended abnormally");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SimulatedEngine;
    use crate::request_id::RequestIdAllocator;

    #[tokio::test]
    async fn test_port_zero_is_disabled() {
        let dispatcher = Dispatcher::new(
            Arc::new(SimulatedEngine::new()),
            Arc::new(RequestIdAllocator::new()),
        );
        let options = ServerOptions {
            bind: "127.0.0.1".into(),
            port: 0,
        };
        let err = start_server(
            &options,
            dispatcher,
            Arc::new(ClientRegistry::new()),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::Disabled));
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let dispatcher = Dispatcher::new(
            Arc::new(SimulatedEngine::new()),
            Arc::new(RequestIdAllocator::new()),
        );
        let cancel = CancellationToken::new();
        let first = listen(
            "127.0.0.1:0",
            dispatcher.clone(),
            Arc::new(ClientRegistry::new()),
            &cancel,
        )
        .await
        .unwrap();

        let taken = first.local_addr().to_string();
        let err = listen(&taken, dispatcher, Arc::new(ClientRegistry::new()), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));

        first.shutdown().await;
    }
}
