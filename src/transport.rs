//! # Transport Module
//!
//! The narrow seam between the link manager and whatever carries the
//! bytes. The pipeline only ever needs four things from a radio link:
//! open it, close it, ask whether it is alive, and await the next chunk.
//! Everything else (GATT subscriptions, adapters, retries) stays behind
//! this trait.
//!
//! `ReplayTransport` feeds a recorded capture back through the pipeline
//! at a configurable pace, which is how the binary runs without a radio
//! attached and how demos work on machines with no BLE stack. The real
//! device transport lives in `ble.rs` behind the `transport_ble` feature.

use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

/// Minimal contract a radio link must satisfy.
///
/// Implementations own their platform handles and must release them on
/// `disconnect`; the link manager guarantees it calls `disconnect` on
/// every exit path.
#[async_trait]
pub trait Transport: Send {
    async fn connect(&mut self) -> Result<(), TransportError>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Await the next raw chunk.
    ///
    /// `Ok(None)` means the stream ended cleanly; an error means the
    /// connection is no longer usable and the caller should reconnect.
    async fn recv_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

/// Replays a recorded byte capture as paced chunks.
///
/// Splits the capture into radio-sized chunks so the frame decoder sees
/// the same mid-record fragmentation a live link produces.
pub struct ReplayTransport {
    chunks: VecDeque<Vec<u8>>,
    pace: Duration,
    connected: bool,
}

impl ReplayTransport {
    /// Typical BLE notification payload size.
    pub const DEFAULT_CHUNK_LEN: usize = 20;

    pub fn new(data: &[u8], chunk_len: usize, pace: Duration) -> Self {
        let chunks = data
            .chunks(chunk_len.max(1))
            .map(|c| c.to_vec())
            .collect();
        Self {
            chunks,
            pace,
            connected: false,
        }
    }

    /// Load a capture file for replay.
    pub fn from_file(
        path: impl AsRef<Path>,
        chunk_len: usize,
        pace: Duration,
    ) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        Ok(Self::new(&data, chunk_len, pace))
    }

    #[allow(dead_code)]
    pub fn remaining(&self) -> usize {
        self.chunks.len()
    }
}

#[async_trait]
impl Transport for ReplayTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn recv_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        match self.chunks.pop_front() {
            Some(chunk) => {
                tokio::time::sleep(self.pace).await;
                Ok(Some(chunk))
            }
            None => {
                // Capture exhausted: behave like a quiet link rather than
                // ending, so the session keeps running until stopped.
                loop {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
            }
        }
    }
}

/// One step of a scripted transport session.
#[cfg(test)]
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Deliver a chunk
    Chunk(Vec<u8>),
    /// Fail the read and drop the connection (mid-stream disconnect)
    Fail(&'static str),
}

/// Test double driven by a fixed script, with optional connect failures.
#[cfg(test)]
pub struct ScriptedTransport {
    steps: VecDeque<ScriptStep>,
    connected: bool,
    /// Number of leading `connect` calls that should fail
    pub connect_failures: usize,
}

#[cfg(test)]
impl ScriptedTransport {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: steps.into(),
            connected: false,
            connect_failures: 0,
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.connect_failures > 0 {
            self.connect_failures -= 1;
            return Err(TransportError::ConnectFailed("scripted failure".to_string()));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn recv_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        match self.steps.pop_front() {
            Some(ScriptStep::Chunk(chunk)) => Ok(Some(chunk)),
            Some(ScriptStep::Fail(reason)) => {
                self.connected = false;
                Err(TransportError::ReadFailed(reason.to_string()))
            }
            None => {
                // Script exhausted: idle until the session stops us
                loop {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
            }
        }
    }
}
