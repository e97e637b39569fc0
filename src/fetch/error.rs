use std::{fmt::Display, time::Duration};

#[derive(Debug)]
pub enum Error {
    /// A non-success status other than 429.
    Status(u16),
    RateLimited { retry_after: Option<Duration> },
    Timeout(String),
    Connect(String),
    /// Any other transport failure (bad body, redirect loop, TLS).
    Transport(String),
    /// The retry budget ran out; `last` is the final attempt's error.
    Exhausted { attempts: u32, last: Box<Error> },
}

impl Error {
    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Self {
        if status == 429 {
            Self::RateLimited { retry_after }
        } else {
            Self::Status(status)
        }
    }

    /// 429, 408, 5xx, timeouts and refused connections are worth another try.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Status(status) => *status == 408 || *status >= 500,
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Connect(_) => true,
            Self::Transport(_) | Self::Exhausted { .. } => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status(status) => write!(f, "HTTP status {status}"),
            Self::RateLimited {
                retry_after: Some(after),
            } => write!(f, "rate limited, retry after {after:?}"),
            Self::RateLimited { retry_after: None } => write!(f, "rate limited"),
            Self::Timeout(msg) => write!(f, "timed out: {msg}"),
            Self::Connect(msg) => write!(f, "connection failed: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Exhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts: {last}")
            }
        }
    }
}

impl std::error::Error for Error {}
