//! Query endpoint: Unix domain socket with length-prefixed JSON messages
//!
//! One request per connection: the client connects, writes a single framed
//! message, reads the framed response. The serve loop hands each connection
//! to its own task, bounded by a connection semaphore, and shuts down on
//! ctrl-c or an explicit stop message.

use crate::error::{BraidError, Result};
use crate::service::{QueryRequest, QueryService};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Notify, Semaphore};

/// Maximum message size (10MB)
const MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;

/// Messages accepted by the query endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Run a query through the full pipeline
    Query {
        query: String,
        user_id: String,
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        domains: Option<Vec<String>>,
    },
    /// Liveness/readiness check; does not exercise backends
    Health,
    /// List configured domains and their backend endpoints
    Domains,
    /// Shut the server down
    Stop,
}

/// Response sent back to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ServerResponse {
    /// Create a successful response
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Create a successful response with data
    pub fn success_with_data(data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    /// Create an error response
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

/// Read a length-prefixed message from a Unix stream
pub async fn read_message(stream: &mut UnixStream) -> Result<ServerMessage> {
    let length = stream.read_u32().await.map_err(|e| BraidError::Io {
        source: e,
        context: "Failed to read message length".to_string(),
    })?;

    if length > MAX_MESSAGE_SIZE {
        return Err(BraidError::Server(format!(
            "Message too large: {} bytes",
            length
        )));
    }

    let mut buffer = vec![0u8; length as usize];
    stream
        .read_exact(&mut buffer)
        .await
        .map_err(|e| BraidError::Io {
            source: e,
            context: "Failed to read message body".to_string(),
        })?;

    serde_json::from_slice(&buffer).map_err(|e| BraidError::Json {
        source: e,
        context: "Failed to parse message".to_string(),
    })
}

/// Write a length-prefixed response to a Unix stream
pub async fn write_response(stream: &mut UnixStream, response: &ServerResponse) -> Result<()> {
    let body = serde_json::to_vec(response).map_err(|e| BraidError::Json {
        source: e,
        context: "Failed to serialize response".to_string(),
    })?;

    stream
        .write_u32(body.len() as u32)
        .await
        .map_err(|e| BraidError::Io {
            source: e,
            context: "Failed to write response length".to_string(),
        })?;
    stream.write_all(&body).await.map_err(|e| BraidError::Io {
        source: e,
        context: "Failed to write response body".to_string(),
    })?;
    stream.flush().await.map_err(|e| BraidError::Io {
        source: e,
        context: "Failed to flush response".to_string(),
    })?;

    Ok(())
}

/// Bind the socket, removing any stale file first
fn bind(socket_path: &Path) -> Result<UnixListener> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path).map_err(|e| BraidError::Io {
            source: e,
            context: format!("Failed to remove existing socket: {:?}", socket_path),
        })?;
    }

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| BraidError::Io {
            source: e,
            context: format!("Failed to create socket directory: {:?}", parent),
        })?;
    }

    UnixListener::bind(socket_path).map_err(|e| BraidError::Io {
        source: e,
        context: format!("Failed to bind to socket: {:?}", socket_path),
    })
}

/// Run the serve loop until ctrl-c or a stop message
pub async fn serve(
    service: Arc<QueryService>,
    socket_path: &Path,
    max_connections: usize,
) -> Result<()> {
    let listener = bind(socket_path)?;
    let shutdown = Arc::new(Notify::new());
    let permits = Arc::new(Semaphore::new(max_connections));

    tracing::info!("Query endpoint listening on {:?}", socket_path);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received ctrl-c, shutting down");
                break;
            }
            _ = shutdown.notified() => {
                tracing::info!("Received stop message, shutting down");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let service = service.clone();
                        let shutdown = shutdown.clone();
                        let permits = permits.clone();

                        tokio::spawn(async move {
                            let Ok(_permit) = permits.acquire().await else {
                                return;
                            };
                            handle_connection(stream, service, shutdown).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                    }
                }
            }
        }
    }

    if socket_path.exists() {
        let _ = std::fs::remove_file(socket_path);
    }

    Ok(())
}

async fn handle_connection(
    mut stream: UnixStream,
    service: Arc<QueryService>,
    shutdown: Arc<Notify>,
) {
    let request_id = uuid::Uuid::new_v4();

    let message = match read_message(&mut stream).await {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("[{}] Bad message: {}", request_id, e);
            let _ = write_response(&mut stream, &ServerResponse::error(e.to_string())).await;
            return;
        }
    };

    let response = dispatch(message, &service, &shutdown).await;

    if let Err(e) = write_response(&mut stream, &response).await {
        tracing::warn!("[{}] Failed to write response: {}", request_id, e);
    }
}

async fn dispatch(
    message: ServerMessage,
    service: &QueryService,
    shutdown: &Notify,
) -> ServerResponse {
    match message {
        ServerMessage::Query {
            query,
            user_id,
            session_id,
            domains,
        } => {
            let request = QueryRequest {
                query,
                user_id,
                session_id,
                domains,
            };

            match service.handle(request).await {
                Ok(envelope) => match serde_json::to_value(&envelope) {
                    Ok(data) => ServerResponse::success_with_data(data),
                    Err(e) => ServerResponse::error(format!("Serialization failed: {}", e)),
                },
                Err(e) => ServerResponse::error(e.to_string()),
            }
        }
        ServerMessage::Health => match serde_json::to_value(service.health()) {
            Ok(data) => ServerResponse::success_with_data(data),
            Err(e) => ServerResponse::error(format!("Serialization failed: {}", e)),
        },
        ServerMessage::Domains => match serde_json::to_value(service.domains()) {
            Ok(data) => ServerResponse::success_with_data(data),
            Err(e) => ServerResponse::error(format!("Serialization failed: {}", e)),
        },
        ServerMessage::Stop => {
            shutdown.notify_waiters();
            ServerResponse::success("Shutting down")
        }
    }
}

/// Client side of the query endpoint
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Send one message and wait for its response
    pub async fn send(&self, message: &ServerMessage) -> Result<ServerResponse> {
        let mut stream =
            UnixStream::connect(&self.socket_path)
                .await
                .map_err(|e| BraidError::Io {
                    source: e,
                    context: format!("Failed to connect to {:?} (is the server running?)", self.socket_path),
                })?;

        let body = serde_json::to_vec(message).map_err(|e| BraidError::Json {
            source: e,
            context: "Failed to serialize message".to_string(),
        })?;

        stream
            .write_u32(body.len() as u32)
            .await
            .map_err(|e| BraidError::Io {
                source: e,
                context: "Failed to write message length".to_string(),
            })?;
        stream.write_all(&body).await.map_err(|e| BraidError::Io {
            source: e,
            context: "Failed to write message body".to_string(),
        })?;
        stream.flush().await.map_err(|e| BraidError::Io {
            source: e,
            context: "Failed to flush message".to_string(),
        })?;

        let length = stream.read_u32().await.map_err(|e| BraidError::Io {
            source: e,
            context: "Failed to read response length".to_string(),
        })?;

        if length > MAX_MESSAGE_SIZE {
            return Err(BraidError::Server(format!(
                "Response too large: {} bytes",
                length
            )));
        }

        let mut buffer = vec![0u8; length as usize];
        stream
            .read_exact(&mut buffer)
            .await
            .map_err(|e| BraidError::Io {
                source: e,
                context: "Failed to read response body".to_string(),
            })?;

        serde_json::from_slice(&buffer).map_err(|e| BraidError::Json {
            source: e,
            context: "Failed to parse response".to_string(),
        })
    }
}
