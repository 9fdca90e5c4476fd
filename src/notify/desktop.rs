// src/notify/desktop.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use super::Notifier;
use crate::engine::DiscoveryEvent;

/// Desktop toast through `notify-send`, one per new item.
pub struct DesktopNotifier {
    program: String,
}

impl DesktopNotifier {
    pub fn new() -> Self {
        Self {
            program: "notify-send".into(),
        }
    }
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for DesktopNotifier {
    fn name(&self) -> &'static str {
        "desktop"
    }

    async fn send(&self, ev: &DiscoveryEvent) -> Result<()> {
        let DiscoveryEvent::ItemDiscovered { item } = ev else {
            return Ok(());
        };
        let mut message = item.headline();
        if item.sensitive() {
            message.push_str(" [R-18]");
        }
        let child = Command::new(&self.program)
            .args(["-i", "dialog-information", "artwatch alert!"])
            .arg(format!("{message}\n{}", item.link()))
            .args(["-t", "0"])
            .spawn()
            .with_context(|| format!("running {}", self.program))?;
        super::hook::reap(child, self.program.clone());
        Ok(())
    }
}
