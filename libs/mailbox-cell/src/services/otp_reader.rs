use async_imap::Session;
use async_native_tls::{TlsConnector, TlsStream};
use async_trait::async_trait;
use futures::TryStreamExt;
use mail_parser::MessageParser;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::net::TcpStream;
use tracing::debug;

use shared_config::AppConfig;

use crate::error::MailboxError;

/// Address the road-test service sends verification codes from.
pub const OTP_SENDER: &str = "roadtests-donotreply@icbc.com";

const IMAPS_PORT: u16 = 993;

// The code arrives inside an <h2> heading of the HTML body.
static OTP_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<h2[^>]*>(\d{6})</h2>").expect("valid OTP pattern"));

type TlsSession = Session<TlsStream<TcpStream>>;

/// Anything that can produce the latest one-time passcode.
///
/// The booking pipeline polls through this seam, so tests can feed codes
/// without a mail server.
#[async_trait]
pub trait OtpSource: Send + Sync {
    /// The most recent passcode available right now, if any.
    async fn fetch_latest_code(&self) -> Result<Option<String>, MailboxError>;
}

/// Reads one-time passcodes from an IMAP mailbox.
///
/// Each call opens a fresh connection, reads the newest message from the
/// known sender, and logs out before returning.
pub struct ImapOtpReader {
    host: String,
    address: String,
    app_password: String,
    sender: String,
}

impl ImapOtpReader {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            host: config.imap_host.clone(),
            address: config.mailbox_address.clone(),
            app_password: config.mailbox_app_password.clone(),
            sender: OTP_SENDER.to_string(),
        }
    }

    async fn connect(&self) -> Result<TlsSession, MailboxError> {
        let tcp = TcpStream::connect((self.host.as_str(), IMAPS_PORT)).await?;
        let tls_stream = TlsConnector::new().connect(&self.host, tcp).await?;

        let client = async_imap::Client::new(tls_stream);
        client
            .login(&self.address, &self.app_password)
            .await
            .map_err(|(e, _client)| MailboxError::Auth(e.to_string()))
    }

    async fn latest_message_from_sender(
        session: &mut TlsSession,
        sender: &str,
    ) -> Result<Option<Vec<u8>>, MailboxError> {
        session.select("INBOX").await?;

        let matches = session.search(format!("FROM \"{sender}\"")).await?;
        let Some(latest) = matches.iter().max().copied() else {
            return Ok(None);
        };

        let fetches: Vec<_> = session
            .fetch(latest.to_string(), "RFC822")
            .await?
            .try_collect()
            .await?;
        Ok(fetches
            .iter()
            .find_map(|fetch| fetch.body().map(|body| body.to_vec())))
    }
}

#[async_trait]
impl OtpSource for ImapOtpReader {
    async fn fetch_latest_code(&self) -> Result<Option<String>, MailboxError> {
        let mut session = self.connect().await?;
        let result = Self::latest_message_from_sender(&mut session, &self.sender).await;

        // Release the session on every path; a failed logout must not mask
        // the read result.
        if let Err(e) = session.logout().await {
            debug!("IMAP logout failed: {e}");
        }

        match result? {
            Some(raw) => Ok(extract_code(&raw)),
            None => {
                debug!("no message from {} in INBOX", self.sender);
                Ok(None)
            }
        }
    }
}

/// Pull the six-digit passcode out of a raw RFC 822 message.
///
/// Returns `None` when the message has no HTML part or the heading pattern
/// does not match.
pub fn extract_code(raw: &[u8]) -> Option<String> {
    let message = MessageParser::default().parse(raw)?;
    let html = message.body_html(0)?;
    OTP_PATTERN
        .captures(html.as_ref())
        .map(|captures| captures[1].to_string())
}
