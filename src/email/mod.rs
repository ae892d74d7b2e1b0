use anyhow::{Context, Result};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use tracing::info;

use crate::config::SmtpConfig;

/// Outbound mail collaborator. Owns the SMTP settings; when none are
/// configured the send becomes a logged no-op so local setups work without
/// a relay.
pub struct Mailer {
    smtp: Option<SmtpConfig>,
}

impl Mailer {
    pub fn new(smtp: Option<SmtpConfig>) -> Self {
        Self { smtp }
    }

    pub fn send_reset_link(&self, to: &str, reset_link: &str) -> Result<()> {
        let Some(cfg) = &self.smtp else {
            info!(%to, "SMTP not configured, skipping password reset email");
            return Ok(());
        };

        let from: Mailbox = cfg.from.parse().context("invalid EMAIL_FROM address")?;
        let to_mailbox: Mailbox = to.parse().context("invalid recipient address")?;

        let body = format!(
            r#"<h2>Password Reset</h2>
<p>You requested to reset your password.</p>
<p>Click the link below to reset your password:</p>
<a href="{reset_link}">{reset_link}</a>
<p>This link will expire in 1 hour.</p>"#
        );

        let message = Message::builder()
            .from(from)
            .to(to_mailbox)
            .subject("Password Reset Request")
            .header(ContentType::TEXT_HTML)
            .body(body)
            .context("failed to build reset email")?;

        let mut builder = SmtpTransport::builder_dangerous(&cfg.host).port(cfg.port);
        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        let transport = builder.build();

        transport
            .send(&message)
            .context("failed to send reset email")?;
        info!(%to, "password reset email sent");
        Ok(())
    }
}
