//! Oracle call trace capture for sort runs.

use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc;
use std::time::{SystemTime, UNIX_EPOCH};

/// One oracle call made by the Chunk Sweeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleCallTrace {
    pub timestamp_ms: i64,
    pub iteration: usize,
    pub window: usize,
    pub batch_len: usize,
    pub window_len: usize,
    pub carried_top: usize,
    pub carried_bottom: usize,
    pub criterion_hash: String,
    pub batch_hash: String,
    pub batch_top: Vec<String>,
    pub batch_bottom: Vec<String>,
    /// Items this call pushed out of the running poles.
    pub displaced_top: Vec<String>,
    pub displaced_bottom: Vec<String>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("trace channel closed")]
    Closed,
    #[error("trace worker failed: {0}")]
    Join(String),
}

pub trait TraceSink: Send + Sync {
    fn record(&self, event: OracleCallTrace) -> Result<(), TraceError>;
}

#[derive(Clone)]
pub struct JsonlTraceSink {
    sender: mpsc::Sender<OracleCallTrace>,
}

pub struct TraceWorker {
    handle: Option<std::thread::JoinHandle<Result<(), TraceError>>>,
}

impl TraceWorker {
    /// Wait for the writer thread. Drop every sink clone first.
    pub fn join(mut self) -> Result<(), TraceError> {
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(TraceError::Join("trace worker panicked".to_string())),
            },
            None => Ok(()),
        }
    }
}

impl JsonlTraceSink {
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, TraceWorker), TraceError> {
        let file = std::fs::File::create(path)?;
        let (sender, receiver) = mpsc::channel::<OracleCallTrace>();
        let handle = std::thread::spawn(move || write_trace_loop(file, receiver));
        Ok((
            Self { sender },
            TraceWorker {
                handle: Some(handle),
            },
        ))
    }
}

impl TraceSink for JsonlTraceSink {
    fn record(&self, event: OracleCallTrace) -> Result<(), TraceError> {
        self.sender.send(event).map_err(|_| TraceError::Closed)
    }
}

fn write_trace_loop(
    file: std::fs::File,
    receiver: mpsc::Receiver<OracleCallTrace>,
) -> Result<(), TraceError> {
    let mut writer = BufWriter::new(file);
    for event in receiver {
        let line = serde_json::to_string(&event).map_err(|e| TraceError::Serde(e.to_string()))?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn hash_text(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Order-sensitive hash of a batch.
pub fn hash_items(items: &[String]) -> String {
    let mut hasher = blake3::Hasher::new();
    for item in items {
        hasher.update(&(item.len() as u64).to_le_bytes());
        hasher.update(item.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn batch_hash_is_order_and_boundary_sensitive() {
        assert_ne!(hash_items(&v(&["a", "b"])), hash_items(&v(&["b", "a"])));
        assert_ne!(hash_items(&v(&["ab", "c"])), hash_items(&v(&["a", "bc"])));
        assert_eq!(hash_items(&v(&["a", "b"])), hash_items(&v(&["a", "b"])));
        assert_eq!(hash_text("x").len(), 64);
    }
}
