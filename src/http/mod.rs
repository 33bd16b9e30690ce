//! HTTP API for fragments
//!
//! - `GET /` - Health check, no credentials needed
//! - `GET /v1/fragments[?expand=1]` - List the caller's fragments
//! - `POST /v1/fragments` - Create a fragment from the request body
//! - `GET /v1/fragments/{id}` - Raw fragment data
//! - `GET /v1/fragments/{id}.{ext}` - Fragment data converted to `ext`
//! - `GET /v1/fragments/{id}/info` - Fragment metadata
//! - `PUT /v1/fragments/{id}` - Replace fragment data
//! - `DELETE /v1/fragments/{id}` - Delete a fragment
//!
//! Everything under `/v1` needs HTTP Basic credentials.
//!
//! ## Example Usage
//!
//! ```bash
//! curl -u user1@email.com:password1 -H "Content-Type: text/plain" \
//!      --data-binary "hello" http://localhost:8080/v1/fragments
//!
//! curl -u user1@email.com:password1 http://localhost:8080/v1/fragments?expand=1
//! ```

pub mod response;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::convert::Infallible;
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::config::Config;
use crate::convert;
use crate::error::FragmentError;
use crate::fragment::{Fragment, FragmentStore, NewFragment};

type BoxError = Box<dyn StdError + Send + Sync>;

/// Query string of `GET /v1/fragments`
#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    expand: Option<String>,
}

impl ListQuery {
    fn expand(&self) -> bool {
        matches!(self.expand.as_deref(), Some("1") | Some("true"))
    }
}

/// Request body read failures the router answers differently
enum BodyError {
    TooLarge,
    Read(String),
}

/// HTTP server state
pub struct HttpServer {
    store: FragmentStore,
    auth: Authenticator,
    bind_addr: SocketAddr,
    api_url: Option<String>,
    max_body_bytes: usize,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(store: FragmentStore, auth: Authenticator, bind_addr: SocketAddr) -> Self {
        Self {
            store,
            auth,
            bind_addr,
            api_url: None,
            max_body_bytes: 5 * 1024 * 1024,
        }
    }

    /// Server configured from a [`Config`]
    pub fn from_config(store: FragmentStore, config: &Config) -> Result<Self, FragmentError> {
        let bind_addr: SocketAddr = format!("{}:{}", config.bind_host, config.http_port)
            .parse()
            .map_err(|e| FragmentError::Config(format!("Invalid bind address: {}", e)))?;

        Ok(Self::new(store, Authenticator::from_config(config), bind_addr)
            .with_api_url(config.api_url.clone())
            .with_max_body_bytes(config.max_body_bytes))
    }

    /// Base URL for `Location` headers
    pub fn with_api_url(mut self, api_url: Option<String>) -> Self {
        self.api_url = api_url.map(|url| url.trim_end_matches('/').to_string());
        self
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), FragmentError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { Ok::<_, Infallible>(server.handle_request(req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Route a request to its handler
    pub async fn handle_request<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let path = req.uri().path().to_string();
        let method = req.method().clone();

        debug!(method = %method, path = %path, "Incoming request");

        match (method, path.as_str()) {
            (Method::GET, "/") => self.handle_health(),
            (_, "/") => response::method_not_allowed(),
            (method, p) if p == "/v1/fragments" || p.starts_with("/v1/fragments/") => {
                let authorization = req
                    .headers()
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok());
                let owner_id = match self.auth.authenticate(authorization) {
                    Ok(owner_id) => owner_id,
                    Err(e) => {
                        debug!(error = %e, "Rejected request");
                        return response::unauthorized();
                    }
                };

                let rest = p.trim_start_matches("/v1/fragments").trim_start_matches('/');
                match self.route_fragments(req, method, rest, &owner_id).await {
                    Ok(response) => response,
                    Err(e) => response::error_response(e),
                }
            }
            _ => response::not_found("Not found"),
        }
    }

    async fn route_fragments<B>(
        &self,
        req: Request<B>,
        method: Method,
        rest: &str,
        owner_id: &str,
    ) -> Result<Response<Full<Bytes>>, FragmentError>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        if rest.is_empty() {
            return match method {
                Method::GET => self.handle_list(&req, owner_id).await,
                Method::POST => self.handle_create(req, owner_id).await,
                _ => Ok(response::method_not_allowed()),
            };
        }

        if let Some(id) = rest.strip_suffix("/info") {
            return match method {
                Method::GET => self.handle_info(owner_id, id).await,
                _ => Ok(response::method_not_allowed()),
            };
        }

        if rest.contains('/') {
            return Ok(response::not_found("Not found"));
        }

        match method {
            Method::GET => match rest.rsplit_once('.') {
                Some((id, ext)) => self.handle_convert(owner_id, id, ext).await,
                None => self.handle_get(owner_id, rest).await,
            },
            Method::PUT => self.handle_update(req, owner_id, rest).await,
            Method::DELETE => self.handle_delete(owner_id, rest).await,
            _ => Ok(response::method_not_allowed()),
        }
    }

    /// Health check endpoint
    fn handle_health(&self) -> Response<Full<Bytes>> {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let mut response = response::ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "author": env!("CARGO_PKG_AUTHORS"),
            "githubUrl": env!("CARGO_PKG_REPOSITORY"),
            "hostname": hostname,
        }));
        response.headers_mut().insert(
            header::CACHE_CONTROL,
            header::HeaderValue::from_static("no-cache"),
        );
        response
    }

    /// GET /v1/fragments
    async fn handle_list<B>(
        &self,
        req: &Request<B>,
        owner_id: &str,
    ) -> Result<Response<Full<Bytes>>, FragmentError> {
        let query: ListQuery = match req.uri().query() {
            Some(q) => serde_urlencoded::from_str(q)
                .map_err(|e| FragmentError::Validation(format!("Invalid query string: {}", e)))?,
            None => ListQuery::default(),
        };

        let fragments = Fragment::by_user(&self.store, owner_id, query.expand()).await?;
        debug!(owner = %owner_id, count = fragments.len(), "Listing fragments");

        Ok(response::ok(serde_json::json!({ "fragments": fragments })))
    }

    /// POST /v1/fragments
    async fn handle_create<B>(
        &self,
        req: Request<B>,
        owner_id: &str,
    ) -> Result<Response<Full<Bytes>>, FragmentError>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let content_type = content_type(&req).unwrap_or_default();
        if !Fragment::is_supported_type(&content_type) {
            return Err(FragmentError::UnsupportedMediaType(format!(
                "Cannot create fragments of type {:?}",
                content_type
            )));
        }

        let location_base = self.location_base(&req);
        let data = match self.read_body(req).await {
            Ok(data) => data,
            Err(BodyError::TooLarge) => return Ok(response::payload_too_large(self.max_body_bytes)),
            Err(BodyError::Read(msg)) => return Err(FragmentError::Validation(msg)),
        };

        let mut fragment = Fragment::new(NewFragment::new(owner_id, content_type))?;
        fragment.set_data(&self.store, data).await?;

        info!(owner = %owner_id, id = %fragment.id(), size = fragment.size(), "Created fragment");

        let location = format!("{}/v1/fragments/{}", location_base, fragment.id());
        Ok(response::created(
            &location,
            serde_json::json!({ "fragment": fragment }),
        ))
    }

    /// GET /v1/fragments/{id}
    async fn handle_get(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<Response<Full<Bytes>>, FragmentError> {
        let fragment = Fragment::by_id(&self.store, owner_id, id).await?;
        let data = fragment.get_data(&self.store).await?.unwrap_or_default();

        debug!(owner = %owner_id, id = %id, size = data.len(), "Serving fragment");
        Ok(response::data_response(fragment.content_type(), data))
    }

    /// GET /v1/fragments/{id}.{ext}
    async fn handle_convert(
        &self,
        owner_id: &str,
        id: &str,
        ext: &str,
    ) -> Result<Response<Full<Bytes>>, FragmentError> {
        if convert::mime_for_extension(ext).is_none() {
            return Err(FragmentError::UnsupportedMediaType(format!(
                "Unsupported extension: .{}",
                ext
            )));
        }

        let fragment = Fragment::by_id(&self.store, owner_id, id).await?;
        let data = fragment.get_data(&self.store).await?.unwrap_or_default();

        let converted = convert::convert(&fragment.mime_type()?, data, ext).await?;
        debug!(
            owner = %owner_id,
            id = %id,
            target = %converted.mime_type,
            size = converted.payload.len(),
            "Serving converted fragment"
        );

        Ok(response::converted_response(converted))
    }

    /// GET /v1/fragments/{id}/info
    async fn handle_info(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<Response<Full<Bytes>>, FragmentError> {
        let fragment = Fragment::by_id(&self.store, owner_id, id).await?;
        Ok(response::ok(serde_json::json!({ "fragment": fragment })))
    }

    /// PUT /v1/fragments/{id}
    async fn handle_update<B>(
        &self,
        req: Request<B>,
        owner_id: &str,
        id: &str,
    ) -> Result<Response<Full<Bytes>>, FragmentError>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let mut fragment = Fragment::by_id(&self.store, owner_id, id).await?;

        let content_type = content_type(&req).unwrap_or_default();
        if !content_type.eq_ignore_ascii_case(fragment.content_type()) {
            return Err(FragmentError::Validation(format!(
                "Content-Type {:?} does not match the fragment's type {:?}",
                content_type,
                fragment.content_type()
            )));
        }

        let data = match self.read_body(req).await {
            Ok(data) => data,
            Err(BodyError::TooLarge) => return Ok(response::payload_too_large(self.max_body_bytes)),
            Err(BodyError::Read(msg)) => return Err(FragmentError::Validation(msg)),
        };

        fragment.set_data(&self.store, data).await?;
        info!(owner = %owner_id, id = %id, size = fragment.size(), "Updated fragment");

        Ok(response::ok(serde_json::json!({ "fragment": fragment })))
    }

    /// DELETE /v1/fragments/{id}
    async fn handle_delete(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<Response<Full<Bytes>>, FragmentError> {
        Fragment::delete(&self.store, owner_id, id).await?;
        Ok(response::ok(serde_json::json!({})))
    }

    /// Scheme and authority `Location` headers are built from
    fn location_base<B>(&self, req: &Request<B>) -> String {
        if let Some(api_url) = &self.api_url {
            return api_url.clone();
        }
        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("localhost");
        format!("http://{}", host)
    }

    async fn read_body<B>(&self, req: Request<B>) -> Result<Bytes, BodyError>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        match Limited::new(req.into_body(), self.max_body_bytes).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(BodyError::TooLarge),
            Err(e) => Err(BodyError::Read(format!("Failed to read body: {}", e))),
        }
    }
}

fn content_type<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
}
