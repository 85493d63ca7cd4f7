//! HTTP front for [`UploadHandler`].
//!
//! One tokio task per connection, HTTP/1.1 only. Bodies are buffered in
//! full (up to the configured limit) before the multipart parser runs.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::HeaderValue;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{ALLOW, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::{ConfigError, ServerConfig};
use crate::upload::{UploadError, UploadHandler, UploadResponse};

/// Paths the upload endpoint answers on.
pub const UPLOAD_PATHS: [&str; 2] = ["/upload", "/api/upload"];

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);
/// How long open connections get to finish after shutdown is requested.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

pub struct UploadServer {
    handler: UploadHandler,
    max_body_size: usize,
}

impl UploadServer {
    pub fn new(handler: UploadHandler, max_body_size: usize) -> Self {
        Self {
            handler,
            max_body_size,
        }
    }

    /// Build the backend named in `config` and wrap a handler around it.
    pub fn from_config(config: &ServerConfig) -> Result<Self, ConfigError> {
        let backend = config.backend.build()?;
        let handler = UploadHandler::new(config.upload.clone(), backend);
        Ok(Self::new(handler, config.max_body_size))
    }

    /// Route one request.
    pub async fn handle_request<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>, Infallible>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let started = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_owned();

        let response = if UPLOAD_PATHS.contains(&path.as_str()) {
            if method == Method::POST {
                self.upload(req).await
            } else {
                let mut resp = json_response(
                    UploadError::MethodNotAllowed.status(),
                    UploadError::MethodNotAllowed.to_response().to_json(),
                );
                resp.headers_mut()
                    .insert(ALLOW, HeaderValue::from_static("POST"));
                resp
            }
        } else if path == "/health" && method == Method::GET {
            json_response(StatusCode::OK, r#"{"status":"ok"}"#.to_owned())
        } else {
            json_response(
                StatusCode::NOT_FOUND,
                UploadResponse::failure("Not found", None).to_json(),
            )
        };

        info!(
            %method,
            %path,
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request completed"
        );
        Ok(response)
    }

    async fn upload<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let declared = req
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<usize>().ok());
        if let Some(len) = declared.filter(|&len| len > self.max_body_size) {
            warn!(declared = len, limit = self.max_body_size, "body too large");
            return self.too_large();
        }

        let body = match Limited::new(req.into_body(), self.max_body_size)
            .collect()
            .await
        {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => {
                warn!(limit = self.max_body_size, "body too large");
                return self.too_large();
            }
            Err(e) => {
                warn!(error = %e, "failed to read request body");
                return json_response(
                    StatusCode::BAD_REQUEST,
                    UploadResponse::failure("Failed to read request body", None).to_json(),
                );
            }
        };

        let (status, response) = self.handler.respond(content_type.as_deref(), &body).await;
        json_response(status, response.to_json())
    }

    fn too_large(&self) -> Response<Full<Bytes>> {
        json_response(
            StatusCode::BAD_REQUEST,
            UploadResponse::failure(
                "Request body too large",
                Some(format!("limit is {} bytes", self.max_body_size)),
            )
            .to_json(),
        )
    }

    /// Accept connections on `listener` until `shutdown` resolves, then let
    /// open connections finish their current request.
    pub async fn serve<F>(self: Arc<Self>, listener: TcpListener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
                () = &mut shutdown => break,
            };

            while connections.try_join_next().is_some() {}

            let server = Arc::clone(&self);
            let io = TokioIo::new(stream);
            let mut stop = stop_rx.clone();

            connections.spawn(async move {
                let service = service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move { server.handle_request(req).await }
                });

                let conn = http1::Builder::new().serve_connection(io, service);
                tokio::pin!(conn);

                let result = tokio::select! {
                    result = conn.as_mut() => result,
                    _ = stop.changed() => {
                        conn.as_mut().graceful_shutdown();
                        conn.await
                    }
                };
                if let Err(e) = result {
                    warn!(%peer, error = %e, "connection error");
                }
            });
        }

        info!(open = connections.len(), "shutting down");
        let _ = stop_tx.send(true);

        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(open = connections.len(), "drain timed out, aborting connections");
            connections.abort_all();
        }
    }
}

/// Bind `config.listen` and serve until Ctrl-C.
pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let server = Arc::new(UploadServer::from_config(&config)?);

    let listener = TcpListener::bind(config.listen)
        .await
        .map_err(|source| ServerError::Bind {
            addr: config.listen,
            source,
        })?;

    info!(
        addr = %config.listen,
        backend = ?config.backend,
        max_body_size = config.max_body_size,
        "listening"
    );

    server
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from(body)));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}
