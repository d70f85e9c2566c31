use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt, Clone)]
#[structopt(
    name = "printer-relay",
    about = "Receives scans emailed by network printers and saves them to disk",
    author = "2026, Philippe TEMESI <https://www.tems.be>",
    version = "0.1.0"
)]
pub struct Opt {
    /// Listening port
    #[structopt(short = "p", long = "port", env = "SMTP_PORT", default_value = "25")]
    pub port: u16,

    /// Listening address
    #[structopt(short = "a", long = "address", env = "SMTP_ADDRESS", default_value = "0.0.0.0")]
    pub address: String,

    /// Root directory scans are saved under, one sub-folder per recipient
    #[structopt(
        short = "o",
        long = "outputpath",
        env = "SMTP_OUTPUTPATH",
        default_value = "/attachments/",
        parse(from_os_str)
    )]
    pub output_path: PathBuf,

    /// Maximum number of attachments decoded at the same time
    #[structopt(long = "workers", env = "SMTP_WORKERS", default_value = "4")]
    pub workers: usize,

    /// Log file path
    #[structopt(long = "logs", parse(from_os_str))]
    pub log_file: Option<PathBuf>,

    /// Emit log lines as JSON
    #[structopt(long = "json")]
    pub json: bool,

    /// Verbose mode - log every SMTP command
    #[structopt(short = "v", long = "verbose")]
    pub verbose: bool,
}

impl Opt {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
