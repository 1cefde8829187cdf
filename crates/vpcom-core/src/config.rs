//! Bridge configuration

use crate::dialect::Dialect;
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Body encoding and framing used on the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WireFormat {
    /// MPF's line-based BCP: `name?key=value&...\n`
    #[default]
    Bcp,
    /// 4-byte little-endian length prefix + JSON object
    Json,
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bcp" => Ok(WireFormat::Bcp),
            "json" => Ok(WireFormat::Json),
            other => Err(format!("unknown wire format '{other}'")),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Bcp => f.write_str("bcp"),
            WireFormat::Json => f.write_str("json"),
        }
    }
}

/// Configuration for the bridge connection
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Host to connect to (default: localhost)
    pub host: String,
    /// BCP port of the peer (default: 5051)
    pub port: u16,
    /// Bound on opening the socket
    pub connect_timeout: Duration,
    /// Bound on every blocking call
    pub response_timeout: Duration,
    /// Body encoding and framing
    pub wire_format: WireFormat,
    /// Operation naming on the wire
    pub dialect: Dialect,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5051,
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(2),
            wire_format: WireFormat::default(),
            dialect: Dialect::default(),
        }
    }
}

impl BridgeConfig {
    /// `host:port` string for connecting
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Build a config from command line flags, starting from the defaults
    ///
    /// Accepts `--host`, `--port`, `--format`, `--dialect`, `--timeout-ms`
    /// and `--connect-timeout-ms`, each followed by its value.
    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::default();
        let mut args = args.into_iter();

        while let Some(flag) = args.next() {
            let flag = flag.as_ref().to_string();
            let value = args
                .next()
                .ok_or_else(|| BridgeError::Config(format!("{flag} needs a value")))?;
            let value = value.as_ref();

            match flag.as_str() {
                "--host" => config.host = value.to_string(),
                "--port" => config.port = parse_number(&flag, value)?,
                "--format" => config.wire_format = value.parse().map_err(BridgeError::Config)?,
                "--dialect" => config.dialect = value.parse().map_err(BridgeError::Config)?,
                "--timeout-ms" => {
                    config.response_timeout = Duration::from_millis(parse_number(&flag, value)?)
                }
                "--connect-timeout-ms" => {
                    config.connect_timeout = Duration::from_millis(parse_number(&flag, value)?)
                }
                _ => return Err(BridgeError::Config(format!("unknown flag {flag}"))),
            }
        }

        Ok(config)
    }
}

fn parse_number<T: FromStr>(flag: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| BridgeError::Config(format!("invalid value for {flag}: {value}")))
}
