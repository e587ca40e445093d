#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Dns,
    Tls,
    Timeout,
    Other,
}

/// Why one upstream attempt failed. The excerpt of an HTTP failure body is
/// bounded and surfaced to the operator only; it is never forwarded to the
/// client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamFailure {
    #[error("{message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
    #[error("HTTP {status}: {excerpt}")]
    Http { status: u16, excerpt: String },
}

impl UpstreamFailure {
    /// Retry policy: every transport error may heal; 429 may clear; the
    /// well-known request-shaped 4xx statuses never will.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Http { status, .. } => match *status {
                429 => true,
                400 | 401 | 403 | 404 | 413 => false,
                s if s >= 500 => true,
                s if s >= 400 => true,
                _ => false,
            },
        }
    }

    /// Status recorded in the request log; transport failures carry no
    /// upstream status and log as 0.
    pub fn http_code(&self) -> i32 {
        match self {
            Self::Transport { .. } => 0,
            Self::Http { status, .. } => i32::from(*status),
        }
    }
}
