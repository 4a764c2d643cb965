use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, info};

use crate::checker::Run;
use crate::config::{Config, EmailConfig, SmtpConfig};

/// Whether this run warrants an email at all.
pub fn should_send(run: &Run, config: &EmailConfig) -> bool {
    config.enabled && (config.always_send || run.has_changes())
}

pub fn message(config: &EmailConfig, html: String) -> crate::Result<Message> {
    let from = config
        .from
        .as_deref()
        .ok_or("Email is enabled but no sender address is configured")?;
    if config.to.is_empty() && config.cc.is_empty() && config.bcc.is_empty() {
        return Err("Email is enabled but no recipients are configured".into());
    }

    let mut builder = Message::builder()
        .from(from.parse()?)
        .subject(&config.subject);
    for to in &config.to {
        builder = builder.to(to.parse()?);
    }
    for cc in &config.cc {
        builder = builder.cc(cc.parse()?);
    }
    for bcc in &config.bcc {
        builder = builder.bcc(bcc.parse()?);
    }

    Ok(builder.header(ContentType::TEXT_HTML).body(html)?)
}

#[tracing::instrument(level = "debug", skip_all, fields(server = %smtp.server))]
pub async fn send(smtp: &SmtpConfig, message: Message) -> crate::Result<()> {
    let transport = if smtp.ssl {
        AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.server)?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.server)
    };
    let mut transport = transport.port(smtp.port());
    if let Some(username) = &smtp.username {
        transport = transport.credentials(Credentials::new(
            username.clone(),
            smtp.password.clone().unwrap_or_default(),
        ));
    }

    let response = transport.build().send(message).await?;
    debug!(code = %response.code(), "SMTP server accepted message");
    Ok(())
}

/// Build, send, and optionally keep a copy of the report email.
pub async fn deliver(config: &Config, html: String) -> crate::Result<()> {
    let message = message(&config.email, html)?;
    let formatted = message.formatted();

    send(&config.smtp, message).await?;
    info!(server = %config.smtp.server, "Sent report email");

    if let Some(path) = &config.output.email {
        std::fs::write(path, formatted)
            .map_err(|e| format!("Cannot write email copy {}: {}", path.display(), e))?;
    }
    Ok(())
}
