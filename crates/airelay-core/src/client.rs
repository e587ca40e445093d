use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use wreq::{Client, Method, Proxy};

use crate::error::{TransportErrorKind, UpstreamFailure};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const STREAM_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A fully constructed upstream attempt. The timeout is per-request because
/// providers may override the dialect default.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub is_stream: bool,
    pub timeout: Duration,
}

pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(mpsc::Receiver<Bytes>),
}

pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: UpstreamBody,
}

pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, UpstreamFailure>> + Send + 'a>>;
}

/// wreq-backed upstream client. Each attempt owns its own connection from the
/// shared pool; a streaming body is bridged through an mpsc channel so the
/// response can be handed to the HTTP layer while bytes are still arriving.
pub struct WreqUpstreamClient {
    client: Client,
}

impl WreqUpstreamClient {
    pub fn new(proxy: Option<&str>) -> Result<Self, wreq::Error> {
        let mut builder = Client::builder().connect_timeout(CONNECT_TIMEOUT);
        if let Some(proxy) = proxy.map(str::trim).filter(|p| !p.is_empty()) {
            builder = builder.proxy(Proxy::all(proxy)?);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

impl UpstreamClient for WreqUpstreamClient {
    fn send<'a>(
        &'a self,
        req: OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, UpstreamFailure>> + Send + 'a>>
    {
        Box::pin(async move {
            let method = match req.method {
                HttpMethod::Get => Method::GET,
                HttpMethod::Post => Method::POST,
            };
            let mut builder = self
                .client
                .request(method, &req.url)
                .timeout(req.timeout);
            for (name, value) in &req.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = req.body {
                builder = builder.body(body);
            }

            let resp = builder.send().await.map_err(map_transport_error)?;
            convert_response(resp, req.is_stream).await
        })
    }
}

async fn convert_response(
    resp: wreq::Response,
    want_stream: bool,
) -> Result<UpstreamResponse, UpstreamFailure> {
    let status = resp.status().as_u16();
    let headers = collect_headers(resp.headers());

    let is_success = (200..300).contains(&status);
    if !is_success || !want_stream || !is_event_stream(&headers) {
        let body = resp.bytes().await.map_err(map_transport_error)?;
        return Ok(UpstreamResponse {
            status,
            headers,
            body: UpstreamBody::Bytes(body),
        });
    }

    let (tx, rx) = mpsc::channel::<Bytes>(STREAM_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut stream = resp.bytes_stream();
        while let Some(item) = stream.next().await {
            let Ok(chunk) = item else {
                break;
            };
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
    });

    Ok(UpstreamResponse {
        status,
        headers,
        body: UpstreamBody::Stream(rx),
    })
}

pub(crate) fn is_event_stream(headers: &[(String, String)]) -> bool {
    headers.iter().any(|(name, value)| {
        name.eq_ignore_ascii_case("content-type")
            && value.to_ascii_lowercase().contains("text/event-stream")
    })
}

fn collect_headers(map: &wreq::header::HeaderMap) -> Vec<(String, String)> {
    let mut out = Vec::with_capacity(map.len());
    for (name, value) in map {
        if let Ok(value) = value.to_str() {
            out.push((name.as_str().to_string(), value.to_string()));
        }
    }
    out
}

fn map_transport_error(err: wreq::Error) -> UpstreamFailure {
    UpstreamFailure::Transport {
        kind: classify_transport_error(&err),
        message: err.to_string(),
    }
}

fn classify_transport_error(err: &wreq::Error) -> TransportErrorKind {
    let message = err.to_string().to_ascii_lowercase();
    if err.is_timeout() {
        return TransportErrorKind::Timeout;
    }
    if err.is_connect() {
        if message.contains("dns") || message.contains("resolve") {
            return TransportErrorKind::Dns;
        }
        if message.contains("tls") || message.contains("ssl") {
            return TransportErrorKind::Tls;
        }
        return TransportErrorKind::Connect;
    }
    if message.contains("tls") || message.contains("ssl") {
        return TransportErrorKind::Tls;
    }
    TransportErrorKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_stream_detection_is_case_insensitive() {
        let headers = vec![(
            "Content-Type".to_string(),
            "text/event-stream; charset=utf-8".to_string(),
        )];
        assert!(is_event_stream(&headers));

        let json = vec![("content-type".to_string(), "application/json".to_string())];
        assert!(!is_event_stream(&json));
    }
}
