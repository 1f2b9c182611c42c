use std::fmt;

#[derive(Debug)]
pub enum RouterError {
    Config(String),
    Sidecar(String),
    Upstream(String),
    UpstreamTimeout,
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::Config(msg) => write!(f, "config error: {}", msg),
            RouterError::Sidecar(msg) => write!(f, "{}", msg),
            RouterError::Upstream(msg) => write!(f, "upstream error: {}", msg),
            RouterError::UpstreamTimeout => write!(f, "upstream timeout"),
        }
    }
}

impl std::error::Error for RouterError {}
