//! Extraction of the scanned document from a spooled message, and the
//! bounded pool that runs it off the session's command loop.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Local};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::AttachmentError;
use crate::spool::Spool;

const MARKER_LINE: &str = "Content-Transfer-Encoding: base64";

/// What a single pass over a spooled message found.
#[derive(Debug, PartialEq, Eq)]
pub enum Payload {
    Decoded(Vec<u8>),
    /// No `Content-Transfer-Encoding: base64` line.
    MissingMarker,
    /// The marker was seen but no blank line ever opened the body.
    MissingBody,
    /// The base64 block was never closed by a blank line.
    Unterminated,
}

enum Scan {
    SeekingMarker,
    SkippingHeaders,
    Accumulating,
}

/// Finds the first base64 section of a raw message and decodes it.
///
/// Lines are compared as raw bytes; header text in any charset is skipped.
pub fn extract_payload<R: BufRead>(mut reader: R) -> Result<Payload, AttachmentError> {
    let mut state = Scan::SeekingMarker;
    let mut encoded = Vec::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = strip_line_ending(&buf);

        match state {
            Scan::SeekingMarker if line == MARKER_LINE.as_bytes() => state = Scan::SkippingHeaders,
            Scan::SeekingMarker => {}
            Scan::SkippingHeaders if line.is_empty() => state = Scan::Accumulating,
            Scan::SkippingHeaders => {}
            Scan::Accumulating if line.is_empty() => {
                return Ok(Payload::Decoded(STANDARD.decode(&encoded)?));
            }
            Scan::Accumulating => encoded.extend_from_slice(line),
        }
    }

    Ok(match state {
        Scan::SeekingMarker => Payload::MissingMarker,
        Scan::SkippingHeaders => Payload::MissingBody,
        Scan::Accumulating => Payload::Unterminated,
    })
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

pub fn scan_file_name(now: &DateTime<Local>) -> String {
    now.format("%Y-%m-%d %H-%M-%S - Scan.pdf").to_string()
}

/// Writes `data` into `dir`, creating the folder tree first.
///
/// Never overwrites: a second scan within the same second gets a ` (2)`,
/// ` (3)`... suffix.
pub fn save_scan(dir: &Path, data: &[u8], now: &DateTime<Local>) -> Result<PathBuf, AttachmentError> {
    fs::create_dir_all(dir).map_err(|source| AttachmentError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let base = scan_file_name(now);
    let stem = base.trim_end_matches(".pdf");
    let mut attempt = 1;
    loop {
        let path = if attempt == 1 {
            dir.join(&base)
        } else {
            dir.join(format!("{} ({}).pdf", stem, attempt))
        };

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(data)
                    .and_then(|_| file.sync_all())
                    .map_err(|source| AttachmentError::Write {
                        path: path.clone(),
                        source,
                    })?;
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(source) => return Err(AttachmentError::Write { path, source }),
        }
    }
}

/// One completed DATA block waiting to be turned into a file.
pub struct AttachmentJob {
    pub spool: Spool,
    pub destination: PathBuf,
}

/// Bounded pool for attachment processing.
///
/// A session only waits for a free slot, never for the decode itself.
#[derive(Clone)]
pub struct AttachmentWorkers {
    slots: Arc<Semaphore>,
    size: u32,
}

impl AttachmentWorkers {
    pub fn new(size: usize) -> Self {
        let size = size.clamp(1, Semaphore::MAX_PERMITS.min(u32::MAX as usize)) as u32;
        Self {
            slots: Arc::new(Semaphore::new(size as usize)),
            size,
        }
    }

    pub async fn dispatch(&self, job: AttachmentJob) {
        let permit = match self.slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Attachment workers closed, dropping message.");
                return;
            }
        };

        tokio::spawn(async move {
            let destination = job.destination.clone();
            let reader = match job.spool.into_reader().await {
                Ok(reader) => reader,
                Err(e) => {
                    warn!(error = %e, "Failed to rewind spool.");
                    return;
                }
            };

            let outcome = tokio::task::spawn_blocking(move || process(reader, &destination)).await;
            if let Err(e) = outcome {
                warn!(error = %e, "Attachment task panicked.");
            }
            drop(permit);
        });
    }

    /// Waits until every dispatched job has finished.
    pub async fn drain(&self) {
        if let Ok(all) = self.slots.acquire_many(self.size).await {
            drop(all);
        }
    }
}

fn process<R: BufRead>(reader: R, destination: &Path) {
    match extract_payload(reader) {
        Ok(Payload::Decoded(data)) => match save_scan(destination, &data, &Local::now()) {
            Ok(path) => info!(path = %path.display(), bytes = data.len(), "Saved attachment."),
            Err(e) => warn!(error = %e, "Failed to save attachment."),
        },
        Ok(Payload::MissingMarker) => warn!("Message has no base64 section, nothing saved."),
        Ok(Payload::MissingBody) => warn!("Base64 section has no body, nothing saved."),
        Ok(Payload::Unterminated) => warn!("Base64 section never ended, nothing saved."),
        Err(AttachmentError::Decode(e)) => warn!(error = %e, "Failed to decode base64 data."),
        Err(e) => warn!(error = %e, "Failed to process message."),
    }
    debug!(folder = %destination.display(), "Attachment processing done.");
}
