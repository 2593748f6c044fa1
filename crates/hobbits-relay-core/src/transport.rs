use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

const TCP_SCHEME: &str = "tcp://";

/// A `host:port` location the relay binds to or dials.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let rest = match trimmed.split_once("://") {
            Some(_) if trimmed.starts_with(TCP_SCHEME) => &trimmed[TCP_SCHEME.len()..],
            Some((scheme, _)) => {
                return Err(Error::Config(format!(
                    "unsupported scheme {scheme} in {trimmed}"
                )))
            }
            None => trimmed,
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| Error::Config(format!("missing port in {trimmed}")))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(Error::Config(format!("missing host in {trimmed}")));
        }
        if host.contains(':') && !rest.starts_with('[') {
            return Err(Error::Config(format!(
                "ipv6 host must be bracketed in {trimmed}"
            )));
        }
        let port: u16 = port
            .parse()
            .map_err(|e| Error::Config(format!("invalid port in {trimmed}: {e}")))?;
        Ok(Endpoint::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

pub async fn bind(endpoint: &Endpoint) -> Result<TcpListener> {
    TcpListener::bind((endpoint.host(), endpoint.port()))
        .await
        .map_err(|source| Error::Bind {
            addr: endpoint.to_string(),
            source,
        })
}

pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<TcpStream> {
    let dial = TcpStream::connect((endpoint.host(), endpoint.port()));
    let stream = match tokio::time::timeout(timeout, dial).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            return Err(Error::Dial {
                addr: endpoint.to_string(),
                reason: err.to_string(),
            })
        }
        Err(_) => {
            return Err(Error::Dial {
                addr: endpoint.to_string(),
                reason: format!("timed out after {}ms", timeout.as_millis()),
            })
        }
    };
    stream.set_nodelay(true).map_err(Error::Io)?;
    Ok(stream)
}
