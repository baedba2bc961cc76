//! Transactional email over SMTP, using the email section of the main
//! config file. When SMTP is not configured, sends are skipped.

use anyhow::Result;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::EmailConfig;

pub struct Mailer {
    config: EmailConfig,
}

impl Mailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_configured()
    }

    /// Greeting mail sent right after signup.
    pub async fn send_welcome(&self, to_email: &str, name: &str) -> Result<()> {
        if !self.is_enabled() {
            tracing::warn!("Email not configured, skipping welcome email to {}", to_email);
            return Ok(());
        }

        let subject = "Welcome to the Wayfarer family!";
        let text_body = format!(
            "Hi {name},\n\nWelcome to Wayfarer, we're glad to have you!\n\n\
             Browse our tours and book your next adventure.\n"
        );
        let html_body = format!(
            "<h2>Hi {name},</h2>\
             <p>Welcome to Wayfarer, we're glad to have you!</p>\
             <p>Browse our tours and book your next adventure.</p>"
        );

        self.send_email(to_email, subject, &html_body, &text_body).await
    }

    /// Password reset link; the token in the URL expires after ten minutes.
    pub async fn send_password_reset(
        &self,
        to_email: &str,
        name: &str,
        reset_url: &str,
    ) -> Result<()> {
        if !self.is_enabled() {
            tracing::warn!(
                "Email not configured, skipping password reset email to {}",
                to_email
            );
            return Ok(());
        }

        let subject = "Your password reset token (valid for only 10 minutes)";
        let text_body = format!(
            "Hi {name},\n\nForgot your password? Submit a PATCH request with your new \
             password to: {reset_url}\n\nIf you didn't forget your password, please \
             ignore this email.\n"
        );
        let html_body = format!(
            "<h2>Hi {name},</h2>\
             <p>Forgot your password? <a href=\"{reset_url}\">Reset it here</a> \
             within the next 10 minutes.</p>\
             <p>If you didn't forget your password, please ignore this email.</p>"
        );

        self.send_email(to_email, subject, &html_body, &text_body).await
    }

    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<()> {
        let smtp_host = self
            .config
            .smtp_host
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("SMTP host not configured"))?;
        let from_address = self
            .config
            .from_address
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("From address not configured"))?;

        let from: Mailbox = format!("{} <{}>", self.config.from_name, from_address).parse()?;
        let to: Mailbox = to_email.parse()?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )?;

        let transport = if self.config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        }
        .port(self.config.smtp_port);

        let transport = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            transport.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            transport
        };

        transport.build().send(email).await?;
        tracing::info!("Sent '{}' email to {}", subject, to_email);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_mailer_is_disabled() {
        let mailer = Mailer::new(EmailConfig::default());
        assert!(!mailer.is_enabled());
    }

    #[tokio::test]
    async fn disabled_mailer_skips_sends() {
        let mailer = Mailer::new(EmailConfig::default());
        assert!(mailer.send_welcome("user@example.com", "User").await.is_ok());
        assert!(mailer
            .send_password_reset("user@example.com", "User", "http://localhost/reset")
            .await
            .is_ok());
    }
}
