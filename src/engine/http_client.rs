use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde_json::{Map, Value};
use tracing::warn;
use url::form_urlencoded;

use crate::error::RequestError;
use crate::utils::estimate_headers_size;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// A fully resolved scripted call.
#[derive(Debug, Clone, Default)]
pub struct ApiRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: HashMap<String, String>,
    pub form: HashMap<String, String>,
    pub bearer: Option<&'a str>,
}

#[derive(Debug, Clone, Default)]
pub struct ApiResponse {
    /// Parsed body of a 200 response, `None` for empty bodies and redirects
    pub json: Option<Map<String, Value>>,
    pub duration: Duration,
    pub size: u64,
}

/// Pooled client shared by every worker. Cheap to clone.
#[derive(Clone)]
pub struct HttpClient {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    server: String,
    timeout: Duration,
}

impl HttpClient {
    /// `pool_size`: maximum idle connections kept per host
    pub fn new(server: impl Into<String>, timeout: Duration, pool_size: usize) -> Self {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_nodelay(true);

        let builder = match HttpsConnectorBuilder::new().with_native_roots() {
            Ok(builder) => builder,
            Err(e) => {
                warn!(error = %e, "native root certificates unavailable, using bundled roots");
                HttpsConnectorBuilder::new().with_webpki_roots()
            }
        };
        let https = builder
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(pool_size)
            .build(https);

        Self {
            client,
            server: server.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn url_for(&self, path: &str, query: &HashMap<String, String>) -> String {
        let mut url = format!("{}{}", self.server, path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&encode_form(query));
        }
        url
    }

    /// Issue one call, bounded by the request timeout. Duration covers the
    /// time until response headers arrive.
    pub async fn execute(&self, req: ApiRequest<'_>) -> Result<ApiResponse, RequestError> {
        let mut builder = Request::builder()
            .method(req.method)
            .uri(self.url_for(req.path, &req.query));
        if req.method == "POST" {
            builder = builder.header(CONTENT_TYPE, FORM_CONTENT_TYPE);
        }
        if let Some(token) = req.bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = builder.body(Full::new(Bytes::from(encode_form(&req.form))))?;

        match tokio::time::timeout(self.timeout, self.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(RequestError::Timeout(self.timeout)),
        }
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> Result<ApiResponse, RequestError> {
        let start = Instant::now();
        let response = self.client.request(request).await?;
        let duration = start.elapsed();

        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();
        let headers_size = estimate_headers_size(&parts.headers) as u64;

        match parts.status {
            StatusCode::OK => {
                let json = if body.is_empty() {
                    None
                } else {
                    let parsed = serde_json::from_slice::<Map<String, Value>>(&body).map_err(
                        |source| RequestError::Json {
                            source,
                            body: String::from_utf8_lossy(&body).into_owned(),
                        },
                    )?;
                    Some(parsed)
                };
                Ok(ApiResponse {
                    json,
                    duration,
                    size: body.len() as u64 + headers_size,
                })
            }
            StatusCode::MOVED_PERMANENTLY | StatusCode::TEMPORARY_REDIRECT => {
                let declared = parts
                    .headers
                    .get(CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(0);
                Ok(ApiResponse {
                    json: None,
                    duration,
                    size: declared + headers_size,
                })
            }
            status => Err(RequestError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            }),
        }
    }
}

/// Form-encode with keys in sorted order.
fn encode_form(fields: &HashMap<String, String>) -> String {
    let sorted: BTreeMap<_, _> = fields.iter().collect();
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(sorted)
        .finish()
}
