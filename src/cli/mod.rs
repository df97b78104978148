//! Command-line interface.
//!
//! Four subcommands: `new` provisions a mailbox and watches it, `use`
//! restores one from history and watches it, `list` shows the history, and
//! `services` shows the available providers.

use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::config::Config;
use crate::domain::Account;
use crate::extract::LinkExtractor;
use crate::providers::{CreateOptions, MailProvider, ProviderRegistry};
use crate::services::{
    copy_to_clipboard, run_monitor, MonitorOptions, MonitorOutcome, SystemLinkConsumer,
};
use crate::storage::AccountStore;

const DEFAULT_SERVICE: &str = "mailtm";
const POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Parser)]
#[command(name = "tmpmail", version, about = "Disposable mailboxes with automatic link extraction")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a new disposable mailbox and watch it for links
    New {
        /// Mail service to provision on
        #[arg(default_value = DEFAULT_SERVICE)]
        service: String,
        /// Requested local part of the address
        #[arg(short, long)]
        name: Option<String>,
        /// Requested domain (TempMail.Plus only)
        #[arg(short, long)]
        domain: Option<String>,
        /// Link pattern to extract (regex)
        #[arg(short, long)]
        pattern: Option<String>,
        /// Monitoring window in seconds, 0 for unbounded
        #[arg(short, long, default_value_t = 300)]
        timeout: u64,
    },
    /// List saved mailboxes, newest first
    List {
        /// Only show mailboxes from this service
        service: Option<String>,
        /// Number of entries to show
        #[arg(short, long, default_value_t = 10)]
        count: usize,
    },
    /// Restore a saved mailbox by index and watch it for links
    Use {
        /// 1-based index into the history, newest first
        index: usize,
        /// Interpret the index within this service's mailboxes only
        #[arg(short, long)]
        service: Option<String>,
        /// Link pattern to extract (regex)
        #[arg(short, long)]
        pattern: Option<String>,
        /// Monitoring window in seconds, 0 for unbounded
        #[arg(short, long, default_value_t = 300)]
        timeout: u64,
    },
    /// List the supported mail services
    Services,
}

/// Executes the parsed command.
pub async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let registry = ProviderRegistry::builtin();
    let store = AccountStore::open_default()?;

    match cli.command {
        Command::New {
            service,
            name,
            domain,
            pattern,
            timeout,
        } => {
            let mut provider = registry.create(&service)?;
            let options = CreateOptions { name, domain };
            let account = provider.create_account(&options).await?;

            store.save(&account)?;
            announce(&account);

            watch(provider.as_mut(), &account, pattern, timeout, &config).await
        }
        Command::Use {
            index,
            service,
            pattern,
            timeout,
        } => {
            let record = store
                .get_by_index(index, service.as_deref())?
                .with_context(|| format!("no saved mailbox at index {index}"))?;
            let saved = record.into_account()?;

            let mut provider = registry.create(&saved.service)?;
            let account = provider.restore_account(saved).await?;

            // Restoration may have renewed credentials or swapped addresses.
            store.save(&account)?;
            announce(&account);

            watch(provider.as_mut(), &account, pattern, timeout, &config).await
        }
        Command::List { service, count } => {
            let records = store.get_recent(count, service.as_deref())?;
            if records.is_empty() {
                println!("No saved mailboxes.");
                return Ok(());
            }
            for (position, record) in records.iter().enumerate() {
                println!(
                    "{:>3}. {:<40} {:<14} created {}",
                    position + 1,
                    record.address,
                    record.service,
                    record.created_at.format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }
        Command::Services => {
            for (name, description) in registry.list() {
                println!("{name:<16} {description}");
            }
            Ok(())
        }
    }
}

fn announce(account: &Account) {
    println!("{}", account.address);
    copy_to_clipboard(&account.address);
}

async fn watch(
    provider: &mut dyn MailProvider,
    account: &Account,
    pattern: Option<String>,
    timeout_secs: u64,
    config: &Config,
) -> anyhow::Result<()> {
    let pattern = pattern.or_else(|| config.link_pattern.clone());
    let extractor = LinkExtractor::new(pattern.as_deref())
        .context("invalid link pattern")?;
    let consumer = SystemLinkConsumer::new(config.browser.clone());
    let options = MonitorOptions {
        interval: POLL_INTERVAL,
        timeout: Duration::from_secs(timeout_secs),
    };

    let result = run_monitor(&*provider, account, &extractor, &consumer, &options).await;
    provider.close().await;

    match result? {
        MonitorOutcome::TimedOut => {
            println!("Monitoring window elapsed.");
        }
        MonitorOutcome::Interrupted => {
            println!("Stopped.");
        }
        MonitorOutcome::Completed => {
            warn!("monitoring ended before the window elapsed");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn new_defaults_are_applied() {
        let cli = Cli::parse_from(["tmpmail", "new"]);
        match cli.command {
            Command::New {
                service, timeout, ..
            } => {
                assert_eq!(service, DEFAULT_SERVICE);
                assert_eq!(timeout, 300);
            }
            _ => panic!("expected new subcommand"),
        }
    }

    #[test]
    fn new_accepts_positional_service() {
        let cli = Cli::parse_from(["tmpmail", "new", "guerrillamail", "--name", "frog"]);
        match cli.command {
            Command::New { service, name, .. } => {
                assert_eq!(service, "guerrillamail");
                assert_eq!(name.as_deref(), Some("frog"));
            }
            _ => panic!("expected new subcommand"),
        }
    }

    #[test]
    fn use_requires_an_index() {
        assert!(Cli::try_parse_from(["tmpmail", "use"]).is_err());
        let cli = Cli::parse_from(["tmpmail", "use", "2", "--service", "mailtm"]);
        match cli.command {
            Command::Use { index, service, .. } => {
                assert_eq!(index, 2);
                assert_eq!(service.as_deref(), Some("mailtm"));
            }
            _ => panic!("expected use subcommand"),
        }
    }

    #[test]
    fn zero_timeout_means_unbounded() {
        let cli = Cli::parse_from(["tmpmail", "new", "--timeout", "0"]);
        match cli.command {
            Command::New { timeout, .. } => assert_eq!(timeout, 0),
            _ => panic!("expected new subcommand"),
        }
    }

    #[test]
    fn list_count_short_flag() {
        let cli = Cli::parse_from(["tmpmail", "list", "-c", "3"]);
        match cli.command {
            Command::List { count, .. } => assert_eq!(count, 3),
            _ => panic!("expected list subcommand"),
        }
    }
}
