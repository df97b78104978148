//! Side effects for extracted links: clipboard and browser hand-off.

use async_trait::async_trait;
use tracing::{info, warn};

/// Receives the first acceptable link from each processed message.
#[async_trait]
pub trait LinkConsumer: Send + Sync {
    async fn consume(&self, url: &str) -> anyhow::Result<()>;
}

/// Default consumer: copies the link to the clipboard and opens it in a
/// browser.
pub struct SystemLinkConsumer {
    /// Browser command override; `None` means the platform default handler.
    browser: Option<String>,
}

impl SystemLinkConsumer {
    pub fn new(browser: Option<String>) -> Self {
        Self { browser }
    }
}

#[async_trait]
impl LinkConsumer for SystemLinkConsumer {
    async fn consume(&self, url: &str) -> anyhow::Result<()> {
        let url = normalize_url(url);

        copy_to_clipboard(&url);

        match &self.browser {
            Some(command) => {
                let mut parts = command.split_whitespace();
                let Some(program) = parts.next() else {
                    anyhow::bail!("browser command is empty");
                };
                tokio::process::Command::new(program)
                    .args(parts)
                    .arg(&url)
                    .stdout(std::process::Stdio::null())
                    .stderr(std::process::Stdio::null())
                    .spawn()
                    .map_err(|err| anyhow::anyhow!("failed to launch {program}: {err}"))?;
                info!(%url, browser = %command, "opened link in configured browser");
            }
            None => {
                open::that_detached(&url)
                    .map_err(|err| anyhow::anyhow!("failed to open link: {err}"))?;
                info!(%url, "opened link in default browser");
            }
        }
        Ok(())
    }
}

/// Copies `text` to the system clipboard; a failure is logged, never fatal.
pub fn copy_to_clipboard(text: &str) {
    // Headless environments routinely have no clipboard.
    if let Err(err) = cli_clipboard::set_contents(text.to_string()) {
        warn!(error = %err, "clipboard unavailable");
    } else {
        info!("copied to clipboard");
    }
}

/// Prefixes schemeless candidates so browsers treat them as URLs.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}
