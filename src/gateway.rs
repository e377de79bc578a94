//! Pingora front end
//!
//! `OfflineGateway` implements Pingora's `ProxyHttp` hooks on top of the
//! [`Router`]. Requests the router answers are written straight back from
//! `request_filter`. Everything that falls through is proxied unmodified to
//! the configured origin.
//!
//! ```text
//! Client ──> request_filter ──> Router ──┬──> response written locally
//!                                         │
//!                                         └──> fall through ──> origin
//! ```

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result as ProxyResult};
use crate::models::{InterceptedRequest, ProxyResponse};
use crate::router::{Handled, Route, Router};
use async_trait::async_trait;
use bytes::BytesMut;
use http::{header, Method};
use pingora::http::ResponseHeader;
use pingora::prelude::*;
use pingora_proxy::{ProxyHttp, Session};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Where fall-through traffic is sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginTarget {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    /// Path prefix of the origin base URL, without trailing slash
    pub base_path: String,
    /// Value of the Host header sent upstream
    pub host_header: String,
}

impl OriginTarget {
    pub fn parse(origin_url: &str) -> ProxyResult<Self> {
        let url = reqwest::Url::parse(origin_url)
            .map_err(|e| ProxyError::ConfigError(format!("Invalid origin_url {}: {}", origin_url, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| ProxyError::ConfigError(format!("origin_url {} has no host", origin_url)))?
            .to_string();
        let tls = url.scheme() == "https";
        let port = url
            .port_or_known_default()
            .unwrap_or(if tls { 443 } else { 80 });
        let host_header = match url.port() {
            Some(explicit) => format!("{}:{}", host, explicit),
            None => host.clone(),
        };

        Ok(OriginTarget {
            host,
            port,
            tls,
            base_path: url.path().trim_end_matches('/').to_string(),
            host_header,
        })
    }

    /// Absolute origin URL for a client path and query
    pub fn url_for(&self, path_and_query: &str) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}{}{}", scheme, self.host_header, self.base_path, path_and_query)
    }
}

/// Per-request state
#[derive(Debug)]
pub struct GatewayContext {
    url: String,
    route: Option<Route>,
    served_locally: bool,
    started: Instant,
}

impl Default for GatewayContext {
    fn default() -> Self {
        GatewayContext {
            url: String::new(),
            route: None,
            served_locally: false,
            started: Instant::now(),
        }
    }
}

impl GatewayContext {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn route(&self) -> Option<Route> {
        self.route
    }

    pub fn is_served_locally(&self) -> bool {
        self.served_locally
    }
}

/// Pingora service wrapping the router
pub struct OfflineGateway {
    router: Arc<Router>,
    origin: OriginTarget,
}

impl OfflineGateway {
    pub fn new(router: Arc<Router>, origin: OriginTarget) -> Self {
        OfflineGateway { router, origin }
    }

    pub fn from_config(router: Arc<Router>, config: &ProxyConfig) -> ProxyResult<Self> {
        Ok(Self::new(router, OriginTarget::parse(&config.origin_url)?))
    }

    pub fn origin(&self) -> &OriginTarget {
        &self.origin
    }

    async fn read_body(session: &mut Session) -> Result<BytesMut> {
        let mut body = BytesMut::new();
        while let Some(chunk) = session.read_request_body().await? {
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    async fn write_response(session: &mut Session, response: ProxyResponse) -> Result<()> {
        let head_only = session.req_header().method == Method::HEAD;
        let resp = to_response_header(&response)?;

        if head_only || response.body.is_empty() {
            session.write_response_header(Box::new(resp), true).await?;
        } else {
            session.write_response_header(Box::new(resp), false).await?;
            session.write_response_body(Some(response.body), true).await?;
        }
        Ok(())
    }
}

/// Convert a router response into a Pingora response header
pub fn to_response_header(response: &ProxyResponse) -> Result<ResponseHeader> {
    let mut resp = ResponseHeader::build(response.status, Some(response.headers.len() + 1))?;
    for (name, value) in response.headers.iter() {
        resp.append_header(name.clone(), value.clone())?;
    }
    // An empty body with a declared length is a HEAD answer; keep its length
    if !response.body.is_empty() || !response.headers.contains_key(header::CONTENT_LENGTH) {
        resp.insert_header(header::CONTENT_LENGTH, response.body.len().to_string())?;
    }
    Ok(resp)
}

#[async_trait]
impl ProxyHttp for OfflineGateway {
    type CTX = GatewayContext;

    fn new_ctx(&self) -> Self::CTX {
        GatewayContext::default()
    }

    /// Route the request; `Ok(true)` when the response was written here
    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        let req = session.req_header();
        let path_and_query = req
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let mut request = InterceptedRequest::new(req.method.clone(), self.origin.url_for(&path_and_query));
        request.headers = req.headers.clone();
        request.headers.remove(header::HOST);

        let route = self.router.classify(&request);
        ctx.url = request.url.clone();
        ctx.route = Some(route);

        // Only writes consume the body; fall-through requests keep theirs for upstream
        if route == Route::Write {
            request.body = Self::read_body(session).await?.freeze();
        }

        match self.router.handle_as(route, &request).await {
            Handled::Response(response) => {
                debug!("{} {} answered locally with {}", request.method, ctx.url, response.status);
                ctx.served_locally = true;
                Self::write_response(session, response).await?;
                Ok(true)
            }
            Handled::FallThrough => {
                debug!("{} {} falls through to origin", request.method, ctx.url);
                Ok(false)
            }
        }
    }

    async fn upstream_peer(&self, _session: &mut Session, _ctx: &mut Self::CTX) -> Result<Box<HttpPeer>> {
        let peer = Box::new(HttpPeer::new(
            (self.origin.host.as_str(), self.origin.port),
            self.origin.tls,
            self.origin.host.clone(),
        ));
        Ok(peer)
    }

    async fn upstream_request_filter(
        &self,
        _session: &mut Session,
        upstream_request: &mut RequestHeader,
        _ctx: &mut Self::CTX,
    ) -> Result<()> {
        upstream_request.insert_header(header::HOST, self.origin.host_header.as_str())?;

        if !self.origin.base_path.is_empty() {
            let path_and_query = upstream_request
                .uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string());
            let rewritten = format!("{}{}", self.origin.base_path, path_and_query);
            let uri = rewritten
                .parse::<http::Uri>()
                .or_err(ErrorType::InvalidHTTPHeader, "rewriting upstream path")?;
            upstream_request.set_uri(uri);
        }
        Ok(())
    }

    fn fail_to_connect(
        &self,
        _session: &mut Session,
        _peer: &HttpPeer,
        ctx: &mut Self::CTX,
        e: Box<Error>,
    ) -> Box<Error> {
        warn!("Cannot reach origin for {}: {}", ctx.url, e);
        e
    }

    fn error_while_proxy(
        &self,
        _peer: &HttpPeer,
        _session: &mut Session,
        e: Box<Error>,
        ctx: &mut Self::CTX,
        _client_reused: bool,
    ) -> Box<Error> {
        error!("Error while proxying {}: {:?}", ctx.url, e.etype());
        e
    }

    async fn logging(&self, session: &mut Session, e: Option<&Error>, ctx: &mut Self::CTX)
    where
        Self::CTX: Send + Sync,
    {
        let route = ctx.route.map(|r| r.as_str()).unwrap_or("unrouted");
        let status = session
            .response_written()
            .map(|resp| resp.status.as_u16())
            .unwrap_or(0);

        match e {
            Some(error) => error!(
                "{} [{}] failed after {:?}: {}",
                ctx.url,
                route,
                ctx.started.elapsed(),
                error
            ),
            None => info!(
                "{} [{}] {} {} in {:?}",
                ctx.url,
                route,
                status,
                if ctx.served_locally { "local" } else { "origin" },
                ctx.started.elapsed()
            ),
        }
    }
}
