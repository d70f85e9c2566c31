//! End-to-end tests against a listening relay.

use std::fs;
use std::path::Path;
use std::time::Duration;

use printer_relay::{Opt, PrinterRelay};
use structopt::StructOpt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

async fn start_relay(root: &Path) -> PrinterRelay {
    let opt = Opt::from_iter_safe(&[
        "printer-relay",
        "--address",
        "127.0.0.1",
        "--port",
        "0",
        "--outputpath",
        root.to_str().unwrap(),
    ])
    .unwrap();
    PrinterRelay::startup(opt).await.unwrap()
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(relay: &PrinterRelay) -> Self {
        let stream = TcpStream::connect(relay.local_addr()).await.unwrap();
        let (reader, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(reader),
            writer,
        };
        assert_eq!(client.read_line().await, "220 localhost -- Knightware proxy server");
        client
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(format!("{}\r\n", line).as_bytes()).await.unwrap();
    }

    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for reply")
            .unwrap();
        line.trim_end().to_string()
    }

    async fn command(&mut self, line: &str) -> String {
        self.send(line).await;
        self.read_line().await
    }

    async fn send_scan(&mut self, recipient: &str, payload_b64: &str) {
        assert_eq!(self.command(&format!("RCPT TO:{}", recipient)).await, "250 OK");
        assert!(self.command("DATA").await.starts_with("354 "));
        self.send("Content-Type: application/pdf").await;
        self.send("Content-Transfer-Encoding: base64").await;
        self.send("").await;
        self.send(payload_b64).await;
        self.send("").await;
        assert_eq!(self.command(".").await, "250 OK");
    }
}

fn folder_contents(dir: &Path) -> Vec<Vec<u8>> {
    match fs::read_dir(dir) {
        Ok(entries) => entries.map(|e| fs::read(e.unwrap().path()).unwrap()).collect(),
        Err(_) => Vec::new(),
    }
}

/// The reply to `.` goes out before the job is handed to a worker, so poll.
async fn wait_for_scan(dir: &Path) -> Vec<Vec<u8>> {
    for _ in 0..100 {
        let contents = folder_contents(dir);
        if !contents.is_empty() && contents.iter().all(|c| !c.is_empty()) {
            return contents;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("no scan written to {:?}", dir);
}

#[tokio::test]
async fn printer_scan_is_saved_under_recipient_folder() {
    let root = tempfile::tempdir().unwrap();
    let relay = start_relay(root.path()).await;
    let mut client = Client::connect(&relay).await;

    assert_eq!(client.command("EHLO test").await, "250 OK");
    assert_eq!(client.command("MAIL FROM:<a@b.com>").await, "250 OK");
    assert_eq!(client.command("RCPT TO:<c@d.com>").await, "250 OK");
    assert_eq!(
        client.command("DATA").await,
        "354 Start mail input; end with <CR><LF>.<CR><LF>"
    );
    client.send("Content-Transfer-Encoding: base64").await;
    client.send("").await;
    client.send("aGk=").await;
    client.send("").await;
    assert_eq!(client.command(".").await, "250 OK");
    client.send("QUIT").await;

    assert_eq!(wait_for_scan(&root.path().join("c@d.com")).await, vec![b"hi".to_vec()]);
    relay.shutdown().await;
}

#[tokio::test]
async fn quit_closes_the_connection() {
    let root = tempfile::tempdir().unwrap();
    let relay = start_relay(root.path()).await;
    let mut client = Client::connect(&relay).await;

    client.send("QUIT").await;
    let mut rest = String::new();
    let n = client.reader.read_line(&mut rest).await.unwrap();
    assert_eq!(n, 0);
    relay.shutdown().await;
}

#[tokio::test]
async fn malformed_base64_leaves_session_usable() {
    let root = tempfile::tempdir().unwrap();
    let relay = start_relay(root.path()).await;
    let mut client = Client::connect(&relay).await;

    client.send_scan("broken@home", "%%% not base64 %%%").await;
    assert_eq!(client.command("EHLO still-here").await, "250 OK");
    client.send_scan("fixed@home", "aGk=").await;

    assert_eq!(wait_for_scan(&root.path().join("fixed@home")).await, vec![b"hi".to_vec()]);
    relay.workers().drain().await;
    assert!(folder_contents(&root.path().join("broken@home")).is_empty());
    relay.shutdown().await;
}

#[tokio::test]
async fn overlapping_sessions_write_to_their_own_folders() {
    let root = tempfile::tempdir().unwrap();
    let relay = start_relay(root.path()).await;
    let mut first = Client::connect(&relay).await;
    let mut second = Client::connect(&relay).await;

    assert_eq!(first.command("RCPT TO:office@home").await, "250 OK");
    assert_eq!(second.command("RCPT TO:kitchen@home").await, "250 OK");
    assert!(first.command("DATA").await.starts_with("354 "));
    assert!(second.command("DATA").await.starts_with("354 "));
    for client in [&mut first, &mut second] {
        client.send("Content-Transfer-Encoding: base64").await;
        client.send("").await;
    }
    first.send("b2ZmaWNl").await;
    second.send("a2l0Y2hlbg==").await;
    for client in [&mut second, &mut first] {
        client.send("").await;
        assert_eq!(client.command(".").await, "250 OK");
    }

    assert_eq!(wait_for_scan(&root.path().join("office@home")).await, vec![b"office".to_vec()]);
    assert_eq!(wait_for_scan(&root.path().join("kitchen@home")).await, vec![b"kitchen".to_vec()]);
    relay.shutdown().await;
}

#[tokio::test]
async fn shutdown_releases_the_listener() {
    let root = tempfile::tempdir().unwrap();
    let relay = start_relay(root.path()).await;
    let addr = relay.local_addr();
    assert!(relay.is_running());

    relay.shutdown().await;

    assert!(!relay.is_running());
    assert!(TcpStream::connect(addr).await.is_err());
}
