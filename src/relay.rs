use crate::attachment::AttachmentWorkers;
use crate::config::Opt;
use crate::error::RelayError;
use crate::session::{RelaySession, SessionContext};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct PrinterRelay {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    stop: Arc<Notify>,
    workers: AttachmentWorkers,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl PrinterRelay {
    /// Binds the listening socket and starts accepting connections.
    pub async fn startup(opt: Opt) -> Result<Self, RelayError> {
        let addr = opt.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| RelayError::Bind { addr: addr.clone(), source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| RelayError::Bind { addr, source })?;

        let running = Arc::new(AtomicBool::new(true));
        let stop = Arc::new(Notify::new());
        let workers = AttachmentWorkers::new(opt.workers);
        let context = SessionContext {
            output_root: opt.output_path,
            running: running.clone(),
            workers: workers.clone(),
        };

        info!(addr = %local_addr, "Listening for SMTP requests.");
        let accept_task = tokio::spawn(accept_connections(listener, context, stop.clone()));

        Ok(Self {
            local_addr,
            running,
            stop,
            workers,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn workers(&self) -> &AttachmentWorkers {
        &self.workers
    }

    /// Stops accepting and releases the listening socket.
    ///
    /// Open sessions are left to finish on their own.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.stop.notify_one();

        let task = match self.accept_task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Accept loop ended abnormally.");
            }
        }
    }
}

async fn accept_connections(listener: TcpListener, context: SessionContext, stop: Arc<Notify>) {
    loop {
        let accepted = tokio::select! {
            _ = stop.notified() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, client_addr)) => {
                tokio::spawn(handle_client(stream, client_addr, context.clone()));
            }
            Err(e) => {
                if !context.running.load(Ordering::Acquire) {
                    break;
                }
                warn!(error = %e, "Failed to accept connection.");
            }
        }
    }
    info!("Listener closed.");
}

async fn handle_client(stream: TcpStream, client_addr: SocketAddr, context: SessionContext) {
    let (reader, writer) = stream.into_split();
    RelaySession::new(BufReader::new(reader), writer, client_addr, context)
        .run()
        .await;
}
