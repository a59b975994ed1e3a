//! Library entrypoint for embedding mail delivery inside other binaries (the
//! API process sends inline through [`HttpMailTransport`]). The binary in
//! `main.rs` runs the outbox retry worker on its own.

pub mod payment_codes;
pub mod transport;
pub mod worker;

pub use payment_codes::UpiQrCodes;
pub use transport::{HttpMailTransport, MailAddress, SendMailRequest};
pub use worker::{drain_outbox, run_outbox, MailerError, OutboxPass};
