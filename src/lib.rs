//! SMTP relay for network scanners.
//!
//! Printers that can only "scan to email" talk to this relay instead of a
//! mail server. Each message's base64 attachment is decoded and written to
//! `<output root>/<recipient>/YYYY-MM-DD HH-MM-SS - Scan.pdf`.

pub mod attachment;
pub mod config;
pub mod error;
pub mod logging;
pub mod relay;
pub mod session;
pub mod spool;
pub mod utils;

pub use config::Opt;
pub use error::{AttachmentError, RelayError};
pub use relay::PrinterRelay;
