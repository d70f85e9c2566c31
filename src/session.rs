use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::attachment::{AttachmentJob, AttachmentWorkers};
use crate::spool::Spool;
use crate::utils::{clean_email_string, recipient_folder_name, safe_log_string, UNKNOWN_FOLDER};

pub const GREETING: &str = "220 localhost -- Knightware proxy server\r\n";
pub const OK: &str = "250 OK\r\n";
pub const START_MAIL_INPUT: &str = "354 Start mail input; end with <CR><LF>.<CR><LF>\r\n";
pub const LOCAL_ERROR: &str = "451 Requested action aborted: local error in processing\r\n";

/// State shared by every session of one relay.
#[derive(Clone)]
pub struct SessionContext {
    pub output_root: PathBuf,
    pub running: Arc<AtomicBool>,
    pub workers: AttachmentWorkers,
}

impl SessionContext {
    /// Folder a finished message is written to.
    pub fn destination(&self, folder: Option<&str>) -> PathBuf {
        let folder = match folder {
            // "." and ".." survive separator replacement but still escape the root
            Some(".") | Some("..") | None => UNKNOWN_FOLDER,
            Some(name) => name,
        };
        self.output_root.join(folder)
    }
}

enum Capture {
    Complete(Spool),
    /// The body was read to its terminator but could not be stored.
    Failed,
    Abandoned,
}

pub struct RelaySession<R, W: AsyncWrite> {
    pub client_addr: SocketAddr,
    reader: R,
    writer: BufWriter<W>,
    context: SessionContext,
    recipient_folder: Option<String>,
}

impl<R, W> RelaySession<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, client_addr: SocketAddr, context: SessionContext) -> Self {
        Self {
            client_addr,
            reader,
            writer: BufWriter::new(writer),
            context,
            recipient_folder: None,
        }
    }

    /// Drives the exchange until QUIT, end of stream, a transport error or
    /// relay shutdown.
    pub async fn run(mut self) {
        info!(client = %self.client_addr, "Client connected.");

        if let Err(e) = self.reply(GREETING).await {
            warn!(client = %self.client_addr, error = %e, "Failed to send greeting.");
            return;
        }

        let mut buf = Vec::new();
        while self.context.running.load(Ordering::Acquire) {
            buf.clear();
            match self.reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(client = %self.client_addr, error = %e, "Failed to read from client.");
                    break;
                }
            }

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end();

            if line.eq_ignore_ascii_case("QUIT") {
                info!(client = %self.client_addr, "Closing connection.");
                break;
            }

            if let Err(e) = self.dispatch(line).await {
                warn!(client = %self.client_addr, error = %e, "Failed to write response.");
                break;
            }
        }

        info!(client = %self.client_addr, "Client disconnected.");
    }

    async fn dispatch(&mut self, line: &str) -> io::Result<()> {
        if let Some(name) = line.strip_prefix("EHLO") {
            debug!(client = %self.client_addr, helo = %safe_log_string(name.trim()), "EHLO");
            self.reply(OK).await
        } else if line.starts_with("RCPT TO:") {
            let to = clean_email_string(line, "RCPT TO:");
            debug!(client = %self.client_addr, to = %safe_log_string(to), "RCPT TO");
            self.recipient_folder = Some(recipient_folder_name(to));
            self.reply(OK).await
        } else if line.starts_with("MAIL FROM:") {
            let from = clean_email_string(line, "MAIL FROM:");
            debug!(client = %self.client_addr, from = %safe_log_string(from), "MAIL FROM");
            self.reply(OK).await
        } else if line.starts_with("DATA") {
            self.data().await
        } else {
            warn!(client = %self.client_addr, line = %safe_log_string(line), "Unrecognized command.");
            Ok(())
        }
    }

    async fn data(&mut self) -> io::Result<()> {
        let spool = match Spool::create().await {
            Ok(spool) => spool,
            Err(e) => {
                warn!(client = %self.client_addr, error = %e, "Failed to create spool.");
                return self.reply(LOCAL_ERROR).await;
            }
        };

        self.reply(START_MAIL_INPUT).await?;

        let spool = match self.capture(spool).await {
            Capture::Complete(spool) => spool,
            Capture::Failed => return self.reply(LOCAL_ERROR).await,
            Capture::Abandoned => return Ok(()),
        };

        self.reply(OK).await?;

        debug!(client = %self.client_addr, bytes = spool.len(), "Message received.");
        let destination = self.context.destination(self.recipient_folder.as_deref());
        self.context
            .workers
            .dispatch(AttachmentJob { spool, destination })
            .await;
        Ok(())
    }

    /// Reads body lines up to the lone `.` terminator, undoing dot-stuffing.
    ///
    /// After a spool write error the rest of the body is still consumed, so
    /// none of it is taken for a command.
    async fn capture(&mut self, mut spool: Spool) -> Capture {
        let mut line = Vec::new();
        let mut stored_ok = true;
        loop {
            line.clear();
            match self.reader.read_until(b'\n', &mut line).await {
                Ok(0) => {
                    warn!(client = %self.client_addr, "Client closed connection during DATA.");
                    return Capture::Abandoned;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(client = %self.client_addr, error = %e, "Failed to read DATA from client.");
                    return Capture::Abandoned;
                }
            }

            if line.trim_ascii() == b"." {
                if !stored_ok {
                    return Capture::Failed;
                }
                return match spool.flush().await {
                    Ok(()) => Capture::Complete(spool),
                    Err(e) => {
                        warn!(client = %self.client_addr, error = %e, "Failed to write to spool.");
                        Capture::Failed
                    }
                };
            }

            if !stored_ok {
                continue;
            }

            let stored = if line.starts_with(b"..") { &line[1..] } else { &line[..] };
            if let Err(e) = spool.append(stored).await {
                warn!(client = %self.client_addr, error = %e, "Failed to write to spool.");
                stored_ok = false;
            }
        }
    }

    async fn reply(&mut self, response: &str) -> io::Result<()> {
        self.writer.write_all(response.as_bytes()).await?;
        self.writer.flush().await
    }
}
