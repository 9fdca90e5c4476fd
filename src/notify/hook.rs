// src/notify/hook.rs
//! User supplied commands run for every new item.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::process::{Child, Command};

use super::Notifier;
use crate::engine::DiscoveryEvent;
use crate::model::Item;

pub struct HookNotifier {
    program: String,
    args: Vec<String>,
}

impl HookNotifier {
    pub fn new(mut command: Vec<String>) -> Result<Self> {
        if command.is_empty() {
            return Err(anyhow!("hook command is empty"));
        }
        let program = command.remove(0);
        Ok(Self {
            program,
            args: command,
        })
    }

    /// Fixed arguments followed by
    /// `id title caption tags owner_id owner_name owner_handle`.
    pub fn argv(&self, item: &Item) -> Vec<String> {
        let mut argv = self.args.clone();
        argv.extend([
            item.id.to_string(),
            item.title.clone(),
            item.caption.clone(),
            item.tag_string(),
            item.owner.id.to_string(),
            item.owner.name.clone(),
            item.owner.handle.clone(),
        ]);
        argv
    }
}

impl std::fmt::Display for HookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hook({} {})", self.program, self.args.join(" "))
    }
}

#[async_trait]
impl Notifier for HookNotifier {
    fn name(&self) -> &'static str {
        "hook"
    }

    async fn send(&self, ev: &DiscoveryEvent) -> Result<()> {
        let DiscoveryEvent::ItemDiscovered { item } = ev else {
            return Ok(());
        };
        tracing::info!(hook = %self, item = item.id, "running hook");
        let child = Command::new(&self.program)
            .args(self.argv(item))
            .spawn()
            .with_context(|| format!("spawning {self}"))?;
        reap(child, self.to_string());
        Ok(())
    }
}

/// Wait for a detached child in the background so it never becomes a zombie.
pub(crate) fn reap(mut child: Child, label: String) {
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) if status.success() => {}
            Ok(status) => tracing::warn!(command = %label, %status, "notification command failed"),
            Err(e) => tracing::warn!(command = %label, error = %e, "could not wait for notification command"),
        }
    });
}
