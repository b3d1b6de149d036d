use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailboxError {
    #[error("failed to reach mail server: {0}")]
    Connect(#[from] std::io::Error),

    #[error("TLS negotiation failed: {0}")]
    Tls(#[from] async_native_tls::Error),

    #[error("mailbox login rejected: {0}")]
    Auth(String),

    #[error("IMAP protocol error: {0}")]
    Imap(#[from] async_imap::error::Error),
}
