//! Outbound alert email: the transport contract and the built-in templates.

pub mod mailer;
pub mod templates;

pub use mailer::{HttpApiMailer, Mailer, MailerError, OutgoingEmail};
