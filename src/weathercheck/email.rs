// Weathercheck - Weather station recorder and MQTT scraper
//
// Copyright 2025 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::config::EmailConfig;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::error::Error;
use std::fmt::{self, Formatter};
use std::fs;
use std::path::Path;

const ATTACHMENT_TYPE: &str = "image/svg+xml";

/// Potential kinds of errors sending an alert
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum AlertErrorKind {
    Auth,
    Connection,
    RecipientsRejected,
    Rejected,
    Message,
    Attachment,
}

impl AlertErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            AlertErrorKind::Auth => "auth",
            AlertErrorKind::Connection => "connection",
            AlertErrorKind::RecipientsRejected => "recipients_rejected",
            AlertErrorKind::Rejected => "rejected",
            AlertErrorKind::Message => "message",
            AlertErrorKind::Attachment => "attachment",
        }
    }
}

/// Error building or delivering an alert
#[derive(Debug)]
pub enum AlertError {
    KindMsg(AlertErrorKind, &'static str),
    KindMsgCause(AlertErrorKind, &'static str, Box<dyn Error + Send + Sync>),
}

impl AlertError {
    pub fn kind(&self) -> AlertErrorKind {
        match self {
            AlertError::KindMsg(kind, _) => *kind,
            AlertError::KindMsgCause(kind, _, _) => *kind,
        }
    }
}

impl fmt::Display for AlertError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AlertError::KindMsg(_, msg) => msg.fmt(f),
            AlertError::KindMsgCause(_, msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for AlertError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AlertError::KindMsgCause(_, _, ref e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Categorize an SMTP reply code from a server that rejected an alert.
pub fn classify_reply_code(code: &str) -> AlertErrorKind {
    match code {
        "530" | "534" | "535" | "538" => AlertErrorKind::Auth,
        "450" | "451" | "452" | "550" | "551" | "552" | "553" | "554" => AlertErrorKind::RecipientsRejected,
        _ => AlertErrorKind::Rejected,
    }
}

/// Destination for emergency alerts: a message and, when one could be written,
/// an attached plot sent to recipients.
pub trait AlertSink {
    fn send(&self, attachment: Option<&Path>, message: &str, recipients: &[String]) -> Result<(), AlertError>;
}

/// Send alerts as email via an SMTP relay using STARTTLS and password authentication.
#[derive(Debug, Clone)]
pub struct SmtpAlertSink {
    config: EmailConfig,
}

impl SmtpAlertSink {
    pub fn new(config: EmailConfig) -> Self {
        SmtpAlertSink { config }
    }

    /// Build an email with `message` as the body and the plot at `attachment`, if any.
    pub fn build_message(
        &self,
        attachment: Option<&Path>,
        message: &str,
        recipients: &[String],
    ) -> Result<Message, AlertError> {
        if recipients.is_empty() {
            return Err(AlertError::KindMsg(AlertErrorKind::Message, "no recipients for alert"));
        }

        let from: Mailbox = self
            .config
            .username
            .parse()
            .map_err(|e| AlertError::KindMsgCause(AlertErrorKind::Message, "invalid sender address", Box::new(e)))?;

        let mut builder = Message::builder().from(from).subject(self.config.subject.clone());
        for r in recipients {
            let to: Mailbox = r.parse().map_err(|e| {
                AlertError::KindMsgCause(AlertErrorKind::Message, "invalid recipient address", Box::new(e))
            })?;
            builder = builder.to(to);
        }

        let text = SinglePart::plain(message.to_owned());
        let email = match attachment {
            Some(path) => {
                let body = fs::read(path).map_err(|e| {
                    AlertError::KindMsgCause(AlertErrorKind::Attachment, "unable to read alert attachment", Box::new(e))
                })?;
                let content_type = ContentType::parse(ATTACHMENT_TYPE).map_err(|e| {
                    AlertError::KindMsgCause(AlertErrorKind::Attachment, "invalid attachment content type", Box::new(e))
                })?;
                let filename = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("plot.svg")
                    .to_owned();

                builder.multipart(
                    MultiPart::mixed()
                        .singlepart(text)
                        .singlepart(Attachment::new(filename).body(body, content_type)),
                )
            }
            None => builder.singlepart(text),
        };

        email.map_err(|e| AlertError::KindMsgCause(AlertErrorKind::Message, "unable to build alert email", Box::new(e)))
    }
}

impl AlertSink for SmtpAlertSink {
    fn send(&self, attachment: Option<&Path>, message: &str, recipients: &[String]) -> Result<(), AlertError> {
        let email = self.build_message(attachment, message, recipients)?;
        let mailer = SmtpTransport::starttls_relay(&self.config.smtp_server)
            .map_err(|e| AlertError::KindMsgCause(AlertErrorKind::Connection, "unable to configure SMTP relay", Box::new(e)))?
            .port(self.config.smtp_port)
            .credentials(Credentials::new(
                self.config.username.clone(),
                self.config.passkey.clone(),
            ))
            .build();

        mailer.send(&email).map(|_| ()).map_err(|e| {
            let (kind, msg) = match e.status() {
                Some(code) => {
                    let kind = classify_reply_code(&code.to_string());
                    let msg = match kind {
                        AlertErrorKind::Auth => "SMTP server rejected credentials",
                        AlertErrorKind::RecipientsRejected => "SMTP server refused recipients",
                        _ => "SMTP server rejected alert",
                    };
                    (kind, msg)
                }
                None => (AlertErrorKind::Connection, "unable to connect to SMTP server"),
            };

            AlertError::KindMsgCause(kind, msg, Box::new(e))
        })
    }
}

#[cfg(test)]
mod test {
    use super::{classify_reply_code, AlertErrorKind, SmtpAlertSink};
    use crate::config::EmailConfig;
    use std::fs;

    fn config() -> EmailConfig {
        EmailConfig {
            username: "station@example.com".to_owned(),
            passkey: "hunter2".to_owned(),
            subject: "Cold weather".to_owned(),
            message: "It's cold".to_owned(),
            recipients: vec!["one@example.com".to_owned()],
            smtp_server: "localhost".to_owned(),
            smtp_port: 2525,
        }
    }

    #[test]
    fn test_classify_reply_code() {
        assert_eq!(AlertErrorKind::Auth, classify_reply_code("535"));
        assert_eq!(AlertErrorKind::RecipientsRejected, classify_reply_code("550"));
        assert_eq!(AlertErrorKind::Rejected, classify_reply_code("421"));
    }

    #[test]
    fn test_build_message_with_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let plot = dir.path().join("Emergency_Plot2025-01-01T00:00:00.svg");
        fs::write(&plot, "<svg></svg>").unwrap();

        let sink = SmtpAlertSink::new(config());
        let recipients = vec!["one@example.com".to_owned(), "two@example.com".to_owned()];
        let message = sink.build_message(Some(&plot), "It's cold", &recipients).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("Subject: Cold weather"), "{}", raw);
        assert!(raw.contains("two@example.com"), "{}", raw);
        assert!(raw.contains("image/svg+xml"), "{}", raw);
        assert!(raw.contains("Emergency_Plot2025"), "{}", raw);
    }

    #[test]
    fn test_build_message_bad_recipient() {
        let dir = tempfile::tempdir().unwrap();
        let plot = dir.path().join("plot.svg");
        fs::write(&plot, "<svg></svg>").unwrap();

        let sink = SmtpAlertSink::new(config());
        let err = sink
            .build_message(Some(&plot), "It's cold", &["not an address".to_owned()])
            .unwrap_err();
        assert_eq!(AlertErrorKind::Message, err.kind());
    }

    #[test]
    fn test_build_message_missing_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SmtpAlertSink::new(config());
        let err = sink
            .build_message(
                Some(&dir.path().join("missing.svg")),
                "It's cold",
                &["one@example.com".to_owned()],
            )
            .unwrap_err();
        assert_eq!(AlertErrorKind::Attachment, err.kind());
    }

    #[test]
    fn test_build_message_without_attachment() {
        let sink = SmtpAlertSink::new(config());
        let message = sink
            .build_message(None, "It's cold", &["one@example.com".to_owned()])
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("Subject: Cold weather"), "{}", raw);
        assert!(raw.contains("It's cold"), "{}", raw);
        assert!(!raw.contains("image/svg+xml"), "{}", raw);
    }
}
