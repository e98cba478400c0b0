//! Line-protocol session to a controller gateway over TCP.
//!
//! The gateway bridges the controller's variables to plain text:
//!
//! ```text
//! -> SUBSCRIBE ns=2;s=LINE.PLC1.STEP
//! -> PING
//! <- ns=2;s=LINE.PLC1.STEP 12.0
//! <- PONG
//! ```
//!
//! Every line the gateway sends is a `<variable> <value>` data change, the
//! `PONG` answer to a probe, or an acknowledgement, which is ignored.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use stepcam_core::{ControllerConnector, ControllerSession, LinkError, Notification, VariableId};

const NOTIFICATION_BUFFER: usize = 256;
const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Parses a `<variable> <value>` line. Acknowledgements and blank lines
/// yield `None`.
pub fn parse_line(line: &str) -> Option<(VariableId, f64)> {
    let line = line.trim();
    if line.is_empty() || matches!(line, "PONG" | "OK") {
        return None;
    }
    let (variable, value) = line.rsplit_once(char::is_whitespace)?;
    let value = value.parse::<f64>().ok()?;
    Some((VariableId::new(variable.trim_end()), value))
}

#[derive(Debug, Clone)]
pub struct LineGatewayConnector {
    endpoint: String,
    address: String,
    reply_timeout: Duration,
}

impl LineGatewayConnector {
    /// Accepts `tcp://host:port` or `opc.tcp://host:port`.
    pub fn new(endpoint: &str) -> Result<Self, LinkError> {
        let address = endpoint
            .strip_prefix("tcp://")
            .or_else(|| endpoint.strip_prefix("opc.tcp://"))
            .map(|rest| rest.trim_end_matches('/'))
            .filter(|rest| rest.contains(':'))
            .ok_or_else(|| LinkError::Endpoint(endpoint.to_string()))?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            address: address.to_string(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        })
    }

    /// How long a probe waits for the gateway's `PONG`.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl ControllerConnector for LineGatewayConnector {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> Result<Box<dyn ControllerSession>, LinkError> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| LinkError::Connect {
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let (pongs_tx, pongs) = watch::channel(0);

        Ok(Box::new(LineGatewaySession {
            reader: Some((BufReader::new(reader), pongs_tx)),
            writer,
            reader_task: None,
            pongs,
            reply_timeout: self.reply_timeout,
        }))
    }
}

pub struct LineGatewaySession {
    reader: Option<(BufReader<OwnedReadHalf>, watch::Sender<u64>)>,
    writer: OwnedWriteHalf,
    reader_task: Option<JoinHandle<()>>,
    /// Count of `PONG` replies seen by the reader task.
    pongs: watch::Receiver<u64>,
    reply_timeout: Duration,
}

impl LineGatewaySession {
    async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }
}

async fn read_notifications(
    mut reader: BufReader<OwnedReadHalf>,
    tx: mpsc::Sender<Notification>,
    pongs: watch::Sender<u64>,
) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("[Gateway] connection closed by peer");
                break;
            }
            Ok(_) => {
                if line.trim() == "PONG" {
                    pongs.send_modify(|count| *count += 1);
                    continue;
                }
                let Some((variable, value)) = parse_line(&line) else {
                    continue;
                };
                if tx.send(Notification::new(variable, value)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("[Gateway] read failed: {}", e);
                break;
            }
        }
    }
}

#[async_trait]
impl ControllerSession for LineGatewaySession {
    async fn subscribe(
        &mut self,
        variables: &[VariableId],
    ) -> Result<mpsc::Receiver<Notification>, LinkError> {
        let (reader, pongs) = self
            .reader
            .take()
            .ok_or_else(|| LinkError::Subscribe("session already subscribed".into()))?;

        for variable in variables {
            self.send_line(&format!("SUBSCRIBE {}", variable))
                .await
                .map_err(|e| LinkError::Subscribe(e.to_string()))?;
        }

        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        self.reader_task = Some(tokio::spawn(read_notifications(reader, tx, pongs)));
        Ok(rx)
    }

    /// Sends `PING` and waits for the next `PONG`.
    async fn probe(&mut self) -> Result<(), LinkError> {
        if self.reader.is_some() {
            return Err(LinkError::Probe("session is not subscribed".into()));
        }
        if self.reader_task.as_ref().is_some_and(|t| t.is_finished()) {
            return Err(LinkError::Probe("gateway stopped sending".into()));
        }

        self.pongs.borrow_and_update();
        self.send_line("PING")
            .await
            .map_err(|e| LinkError::Probe(e.to_string()))?;

        match tokio::time::timeout(self.reply_timeout, self.pongs.changed()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(LinkError::Probe("gateway stopped sending".into())),
            Err(_) => Err(LinkError::Probe(format!(
                "no reply within {:?}",
                self.reply_timeout
            ))),
        }
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        self.writer.shutdown().await?;
        Ok(())
    }
}

impl Drop for LineGatewaySession {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}
