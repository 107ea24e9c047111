//! Device session
//!
//! Connect/read/close capability over Modbus. The poll cycle only depends
//! on [`DeviceSession`]; [`ModbusSession`] is the production transport.

use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use tokio::time::timeout;
use tokio_modbus::prelude::*;
use tracing::debug;

use crate::error::{PollError, Result};

/// Default Modbus TCP port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Default serial line speed for RTU endpoints
pub const DEFAULT_BAUD_RATE: u32 = 19200;

/// Register-read capability consumed by the poll cycle
#[async_trait]
pub trait DeviceSession: Send {
    /// Establish the transport; called at the start of every cycle
    async fn open(&mut self) -> anyhow::Result<()>;

    /// Release the transport. Safe to call when already closed.
    async fn close(&mut self);

    /// Address subsequent reads to `unit_id`
    fn select_unit(&mut self, unit_id: u8);

    /// Read `count` holding registers starting at `address`
    async fn read_holding_registers(&mut self, address: u16, count: u16)
        -> anyhow::Result<Vec<u16>>;

    /// Human readable endpoint, for logs
    fn describe(&self) -> String;
}

/// Parsed `--target` endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `tcp://host[:port]`
    Tcp { host: String, port: u16 },
    /// `rtu://<serial device>`
    Rtu { path: String },
}

impl Endpoint {
    pub fn parse(target: &str) -> Result<Self> {
        let target = target.trim();
        let (scheme, rest) = target.split_once("://").ok_or_else(|| {
            PollError::config(format!(
                "invalid target '{target}': expected tcp://host[:port] or rtu://<device>"
            ))
        })?;

        match scheme.to_ascii_lowercase().as_str() {
            "tcp" => Self::parse_tcp(target, rest),
            "rtu" => {
                if rest.is_empty() {
                    return Err(PollError::config(format!(
                        "invalid target '{target}': missing serial device path"
                    )));
                }
                Ok(Endpoint::Rtu {
                    path: rest.to_string(),
                })
            },
            other => Err(PollError::config(format!(
                "invalid target '{target}': unsupported scheme '{other}'"
            ))),
        }
    }

    fn parse_tcp(target: &str, rest: &str) -> Result<Self> {
        let rest = rest.trim_end_matches('/');
        if rest.is_empty() {
            return Err(PollError::config(format!(
                "invalid target '{target}': missing host"
            )));
        }

        // Bracketed IPv6 literal, e.g. tcp://[::1]:502
        if let Some(stripped) = rest.strip_prefix('[') {
            let (host, tail) = stripped.split_once(']').ok_or_else(|| {
                PollError::config(format!("invalid target '{target}': unterminated '['"))
            })?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(target, port)?,
                None if tail.is_empty() => DEFAULT_TCP_PORT,
                None => {
                    return Err(PollError::config(format!(
                        "invalid target '{target}': unexpected '{tail}'"
                    )))
                },
            };
            return Ok(Endpoint::Tcp {
                host: host.to_string(),
                port,
            });
        }

        match rest.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => Ok(Endpoint::Tcp {
                host: host.to_string(),
                port: parse_port(target, port)?,
            }),
            Some(_) => Err(PollError::config(format!(
                "invalid target '{target}': missing host"
            ))),
            None => Ok(Endpoint::Tcp {
                host: rest.to_string(),
                port: DEFAULT_TCP_PORT,
            }),
        }
    }
}

fn parse_port(target: &str, port: &str) -> Result<u16> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(PollError::config(format!(
            "invalid target '{target}': bad port '{port}'"
        ))),
        Ok(port) => Ok(port),
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } if host.contains(':') => {
                write!(f, "tcp://[{host}]:{port}")
            },
            Endpoint::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Endpoint::Rtu { path } => write!(f, "rtu://{path}"),
        }
    }
}

/// Modbus client session over TCP or an RTU serial line
pub struct ModbusSession {
    endpoint: Endpoint,
    timeout: Duration,
    baud_rate: u32,
    unit: Slave,
    ctx: Option<client::Context>,
}

impl ModbusSession {
    pub fn new(endpoint: Endpoint, timeout: Duration, baud_rate: u32) -> Self {
        Self {
            endpoint,
            timeout,
            baud_rate,
            unit: Slave(1),
            ctx: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ctx.is_some()
    }

    async fn connect_tcp(
        host: &str,
        port: u16,
        unit: Slave,
        limit: Duration,
    ) -> anyhow::Result<client::Context> {
        let addr = timeout(limit, tokio::net::lookup_host((host, port)))
            .await
            .map_err(|_| anyhow!("resolving {host} timed out"))??
            .next()
            .ok_or_else(|| anyhow!("{host} did not resolve to any address"))?;

        debug!("Connecting to Modbus TCP server at {}", addr);
        let ctx = timeout(limit, tcp::connect_slave(addr, unit))
            .await
            .map_err(|_| anyhow!("connect to {addr} timed out after {:?}", limit))??;
        Ok(ctx)
    }

    fn connect_rtu(&self, path: &str) -> anyhow::Result<client::Context> {
        debug!("Opening serial port {} at {} baud", path, self.baud_rate);
        let builder = tokio_serial::new(path, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .timeout(self.timeout);
        let port = tokio_serial::SerialStream::open(&builder)
            .map_err(|e| anyhow!("open serial port {path}: {e}"))?;
        Ok(rtu::attach_slave(port, self.unit))
    }
}

#[async_trait]
impl DeviceSession for ModbusSession {
    async fn open(&mut self) -> anyhow::Result<()> {
        if self.ctx.is_some() {
            return Ok(());
        }
        let ctx = match self.endpoint.clone() {
            Endpoint::Tcp { host, port } => {
                Self::connect_tcp(&host, port, self.unit, self.timeout).await?
            },
            Endpoint::Rtu { path } => self.connect_rtu(&path)?,
        };
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            if let Err(e) = ctx.disconnect().await {
                debug!("Disconnect from {} failed: {}", self.endpoint, e);
            }
        }
    }

    fn select_unit(&mut self, unit_id: u8) {
        self.unit = Slave(unit_id);
        if let Some(ctx) = self.ctx.as_mut() {
            ctx.set_slave(self.unit);
        }
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> anyhow::Result<Vec<u16>> {
        let Some(ctx) = self.ctx.as_mut() else {
            bail!("session is not open");
        };
        match timeout(self.timeout, ctx.read_holding_registers(address, count)).await {
            Err(_) => bail!("timed out after {:?}", self.timeout),
            Ok(Err(e)) => bail!("transport error: {e}"),
            Ok(Ok(Err(exception))) => bail!("modbus exception: {exception}"),
            Ok(Ok(Ok(words))) => Ok(words),
        }
    }

    fn describe(&self) -> String {
        self.endpoint.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_with_port() {
        assert_eq!(
            Endpoint::parse("tcp://192.168.1.50:1502").unwrap(),
            Endpoint::Tcp {
                host: "192.168.1.50".into(),
                port: 1502
            }
        );
    }

    #[test]
    fn test_parse_tcp_default_port() {
        let ep = Endpoint::parse("tcp://inverter.local").unwrap();
        assert_eq!(
            ep,
            Endpoint::Tcp {
                host: "inverter.local".into(),
                port: DEFAULT_TCP_PORT
            }
        );
        assert_eq!(ep.to_string(), "tcp://inverter.local:502");
    }

    #[test]
    fn test_parse_ipv6() {
        let ep = Endpoint::parse("tcp://[::1]:5020").unwrap();
        assert_eq!(
            ep,
            Endpoint::Tcp {
                host: "::1".into(),
                port: 5020
            }
        );
        assert_eq!(ep.to_string(), "tcp://[::1]:5020");
    }

    #[test]
    fn test_parse_rtu() {
        assert_eq!(
            Endpoint::parse("rtu:///dev/ttyUSB0").unwrap(),
            Endpoint::Rtu {
                path: "/dev/ttyUSB0".into()
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_targets() {
        for target in [
            "192.168.1.50",
            "udp://host:502",
            "tcp://",
            "tcp://:502",
            "tcp://host:notaport",
            "tcp://host:0",
            "rtu://",
        ] {
            let err = Endpoint::parse(target).unwrap_err();
            assert!(
                matches!(err, PollError::ConfigError(_)),
                "{target} -> {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_read_without_open_fails() {
        let mut session = ModbusSession::new(
            Endpoint::parse("tcp://127.0.0.1:502").unwrap(),
            Duration::from_millis(100),
            DEFAULT_BAUD_RATE,
        );
        session.select_unit(247);
        let err = session.read_holding_registers(30009, 1).await.unwrap_err();
        assert!(err.to_string().contains("not open"));

        // close on a never-opened session is a no-op
        session.close().await;
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_open_and_read_run_on_spawned_task() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut session = ModbusSession::new(
            Endpoint::Tcp {
                host: "127.0.0.1".into(),
                port,
            },
            Duration::from_millis(200),
            DEFAULT_BAUD_RATE,
        );

        // The server accepts but never answers
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let (session, read) = tokio::spawn(async move {
            session.open().await.unwrap();
            session.select_unit(247);
            let read = session.read_holding_registers(30009, 1).await;
            (session, read)
        })
        .await
        .unwrap();

        assert!(session.is_open());
        assert!(read.unwrap_err().to_string().contains("timed out"));
        server.abort();
    }

    #[tokio::test]
    async fn test_open_refused_on_spawned_task() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut session = ModbusSession::new(
            Endpoint::Tcp {
                host: "127.0.0.1".into(),
                port,
            },
            Duration::from_millis(200),
            DEFAULT_BAUD_RATE,
        );
        let result = tokio::spawn(async move { session.open().await.map(|()| session.is_open()) })
            .await
            .unwrap();
        assert!(result.is_err());
    }
}
