use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::config::SmtpConfig;

#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: OutgoingMail) -> anyhow::Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> anyhow::Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
            .with_context(|| format!("smtp relay {}", cfg.host))?
            .port(cfg.port);
        if !cfg.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                cfg.username.clone(),
                cfg.password.expose_secret().clone(),
            ));
        }
        let from = cfg
            .from
            .parse::<Mailbox>()
            .with_context(|| format!("parse SMTP_FROM {:?}", cfg.from))?;
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: OutgoingMail) -> anyhow::Result<()> {
        let to = mail
            .to
            .parse::<Mailbox>()
            .with_context(|| format!("parse recipient {:?}", mail.to))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(mail.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body)
            .context("build message")?;
        self.transport.send(message).await.context("smtp send")?;
        debug!(to = %mail.to, "mail sent");
        Ok(())
    }
}

/// Development mailer: writes the message to the log.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: OutgoingMail) -> anyhow::Result<()> {
        info!(to = %mail.to, subject = %mail.subject, body = %mail.body, "mail (not sent, SMTP not configured)");
        Ok(())
    }
}

pub fn otp_mail(to: &str, purpose: &str, code: &str, ttl_minutes: i64) -> OutgoingMail {
    let (subject, action) = match purpose {
        "password_reset" => ("Your password reset code", "reset your password"),
        _ => ("Verify your email", "finish creating your account"),
    };
    OutgoingMail {
        to: to.to_string(),
        subject: subject.to_string(),
        body: format!(
            "Use the code {code} to {action}.\n\nThe code expires in {ttl_minutes} minutes and can be used once.\n"
        ),
    }
}
