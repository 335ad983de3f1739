//! Outbound email. Delivery is fire-and-forget: callers hand a message to
//! [`Notifier`], which sends it on a background task and only logs failures.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{info, warn};

use crate::config::{MailConfig, SmtpConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: EmailMessage) -> anyhow::Result<()>;
}

/// Logs messages instead of delivering them.
#[derive(Clone, Debug)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: EmailMessage) -> anyhow::Result<()> {
        info!(to = %message.to, subject = %message.subject, "email send stub");
        Ok(())
    }
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig, from: &str) -> anyhow::Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
            .context("configure smtp relay")?
            .port(cfg.port);
        if let (Some(username), Some(password)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }
        let from = from.parse::<Mailbox>().context("parse EMAIL_FROM")?;
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: EmailMessage) -> anyhow::Result<()> {
        let to = message.to.parse::<Mailbox>().context("parse recipient")?;
        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject)
            .header(ContentType::TEXT_HTML)
            .body(message.html)
            .context("build email")?;
        self.transport.send(email).await.context("smtp send")?;
        Ok(())
    }
}

pub fn mailer_from_config(cfg: &MailConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    match &cfg.smtp {
        Some(smtp) => Ok(Arc::new(SmtpMailer::new(smtp, &cfg.from)?)),
        None => {
            warn!("SMTP_HOST not set; emails will only be logged");
            Ok(Arc::new(LogMailer))
        }
    }
}

/// Renders the account emails and dispatches them without blocking the caller.
#[derive(Clone)]
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    app_name: String,
    app_url: String,
}

impl Notifier {
    pub fn new(mailer: Arc<dyn Mailer>, cfg: &MailConfig) -> Self {
        Self {
            mailer,
            app_name: cfg.app_name.clone(),
            app_url: cfg.app_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn verification_email(&self, to: &str, first_name: &str, token: &str) -> EmailMessage {
        let url = format!("{}/verify-email?token={}", self.app_url, token);
        EmailMessage {
            to: to.to_string(),
            subject: format!("Verify Your Email - {}", self.app_name),
            html: render(
                &self.app_name,
                first_name,
                &format!(
                    "Thanks for signing up. Please confirm {to} within 24 hours to activate your account."
                ),
                "Verify Email",
                &url,
            ),
        }
    }

    pub fn password_reset_email(&self, to: &str, first_name: &str, token: &str) -> EmailMessage {
        let url = format!("{}/reset-password?token={}", self.app_url, token);
        EmailMessage {
            to: to.to_string(),
            subject: format!("Reset Your Password - {}", self.app_name),
            html: render(
                &self.app_name,
                first_name,
                "We received a request to reset your password. The link expires in 1 hour. \
                 If you did not ask for this, ignore this email.",
                "Reset Password",
                &url,
            ),
        }
    }

    pub fn welcome_email(&self, to: &str, first_name: &str) -> EmailMessage {
        let url = format!("{}/dashboard", self.app_url);
        EmailMessage {
            to: to.to_string(),
            subject: format!("Welcome to {}!", self.app_name),
            html: render(
                &self.app_name,
                first_name,
                "Your email has been verified and your account is ready.",
                "Go to Dashboard",
                &url,
            ),
        }
    }

    /// Spawns delivery; the outcome is only logged.
    pub fn dispatch(&self, kind: &'static str, message: EmailMessage) {
        let mailer = Arc::clone(&self.mailer);
        tokio::spawn(async move {
            let to = message.to.clone();
            match mailer.send(message).await {
                Ok(()) => info!(%to, kind, "email sent"),
                Err(e) => warn!(error = %e, %to, kind, "email delivery failed"),
            }
        });
    }
}

/// Escapes text for HTML element content and quoted attribute values.
fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn render(app_name: &str, first_name: &str, body: &str, action: &str, url: &str) -> String {
    let app_name = escape_html(app_name);
    let first_name = escape_html(first_name);
    let body = escape_html(body);
    let action = escape_html(action);
    let url = escape_html(url);
    format!(
        r#"<!DOCTYPE html>
<html>
  <body style="font-family: Arial, sans-serif; color: #1f2937;">
    <h2>{app_name}</h2>
    <p>Hi {first_name},</p>
    <p>{body}</p>
    <p>
      <a href="{url}" style="background-color: #2563eb; color: white; padding: 15px 30px; text-decoration: none; border-radius: 5px; display: inline-block;">{action}</a>
    </p>
    <p>Or paste this link into your browser: {url}</p>
  </body>
</html>
"#
    )
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingMailer;
    use super::*;

    fn config() -> MailConfig {
        MailConfig {
            smtp: None,
            from: "noreply@test.local".into(),
            app_name: "Acme".into(),
            app_url: "https://app.acme.test/".into(),
        }
    }

    #[test]
    fn verification_email_links_token() {
        let notifier = Notifier::new(Arc::new(LogMailer), &config());
        let msg = notifier.verification_email("jane@x.com", "Jane", "abc123");
        assert_eq!(msg.to, "jane@x.com");
        assert_eq!(msg.subject, "Verify Your Email - Acme");
        assert!(msg
            .html
            .contains("https://app.acme.test/verify-email?token=abc123"));
        assert!(msg.html.contains("Hi Jane"));
    }

    #[test]
    fn reset_and_welcome_subjects() {
        let notifier = Notifier::new(Arc::new(LogMailer), &config());
        let reset = notifier.password_reset_email("jane@x.com", "Jane", "tok");
        assert_eq!(reset.subject, "Reset Your Password - Acme");
        assert!(reset
            .html
            .contains("https://app.acme.test/reset-password?token=tok"));
        let welcome = notifier.welcome_email("jane@x.com", "Jane");
        assert_eq!(welcome.subject, "Welcome to Acme!");
        assert!(welcome.html.contains("https://app.acme.test/dashboard"));
    }

    #[tokio::test]
    async fn dispatch_delivers_in_background() {
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = Notifier::new(mailer.clone(), &config());
        notifier.dispatch("welcome", notifier.welcome_email("jane@x.com", "Jane"));

        for _ in 0..50 {
            if !mailer.sent.lock().await.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let sent = mailer.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Welcome to Acme!");
    }

    #[test]
    fn user_supplied_text_is_escaped() {
        let notifier = Notifier::new(Arc::new(LogMailer), &config());
        let name = r#"<a href="https://evil.example">Claim</a>"#;
        let msg = notifier.verification_email("a<b>\"c\"@x.com", name, "tok");
        assert!(!msg.html.contains("<a href=\"https://evil.example\""));
        assert!(msg
            .html
            .contains("Hi &lt;a href=&quot;https://evil.example&quot;&gt;Claim&lt;/a&gt;,"));
        assert!(msg.html.contains("a&lt;b&gt;&quot;c&quot;@x.com"));

        let welcome = notifier.welcome_email("jane@x.com", "Tom & 'Jerry'");
        assert!(welcome.html.contains("Hi Tom &amp; &#x27;Jerry&#x27;,"));
    }

    #[test]
    fn escape_html_leaves_plain_text_alone() {
        assert_eq!(escape_html("Jane Doe"), "Jane Doe");
        assert_eq!(escape_html("<&>\"'"), "&lt;&amp;&gt;&quot;&#x27;");
    }

    #[test]
    fn log_mailer_selected_without_smtp() {
        assert!(mailer_from_config(&config()).is_ok());
    }
}
