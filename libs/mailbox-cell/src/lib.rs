pub mod error;
pub mod services;

pub use error::MailboxError;
pub use services::*;
