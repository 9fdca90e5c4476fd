// src/notify/email.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::Notifier;
use crate::config::EmailConfig;
use crate::engine::DiscoveryEvent;
use crate::model::{plain_text, Item};

pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailNotifier {
    pub fn from_config(cfg: &EmailConfig) -> Result<Self> {
        let creds = Credentials::new(cfg.login.clone(), cfg.password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host)
            .with_context(|| format!("invalid SMTP host {}", cfg.host))?
            .port(cfg.port)
            .credentials(creds)
            .build();

        let from = cfg
            .from
            .parse()
            .with_context(|| format!("invalid sender address {}", cfg.from))?;
        let to = cfg
            .to
            .parse()
            .with_context(|| format!("invalid recipient address {}", cfg.to))?;

        Ok(Self { mailer, from, to })
    }
}

pub(crate) fn subject_and_body(item: &Item) -> (String, String) {
    let subject = format!("New work: {}", item.headline());
    let caption = plain_text(&item.caption);
    let body = format!(
        "Title: {}\nArtist: {} (@{})\nTags: {}\nCaption: {}\nLink: {}\nCreated: {}\n",
        item.title,
        item.owner.name,
        item.owner.handle,
        item.tag_string(),
        if caption.is_empty() { "-" } else { caption.as_str() },
        item.link(),
        item.create_timestamp.to_rfc3339()
    );
    (subject, body)
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, ev: &DiscoveryEvent) -> Result<()> {
        let DiscoveryEvent::ItemDiscovered { item } = ev else {
            return Ok(());
        };
        let (subject, body) = subject_and_body(item);

        let msg = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(body)
            .context("build email")?;

        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::sample_item;

    #[test]
    fn body_contains_plain_caption_and_link() {
        let mut it = sample_item(9, "2024-01-01T00:00:00Z");
        it.caption = "hello<br />world".into();
        let (subject, body) = subject_and_body(&it);
        assert_eq!(subject, "New work: 'work 9' by Artist (@artist)");
        assert!(body.contains("Caption: hello world"));
        assert!(body.contains("/artworks/9"));
    }
}
