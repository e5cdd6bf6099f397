use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;

use receipt_tally::auth::{token_manager::TokenManager, token_store};
use receipt_tally::config::{Config, Provider, load_config};
use receipt_tally::mail::gmail::{DEFAULT_API_BASE, GmailClient};
use receipt_tally::mail::imap_client::ImapClient;
use receipt_tally::mail::provider::MailProvider;
use receipt_tally::{AggregateError, Aggregator, AggregatorOptions, CancelToken, SenderFilter, report};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "receipt_tally")]
#[command(about = "Sum the receipts a sender mailed you", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan the inbox and print the total of all receipts
    Total {
        /// Address the From header must contain (overrides config)
        #[arg(long)]
        sender: Option<String>,

        /// Raw provider query (overrides config)
        #[arg(long)]
        query: Option<String>,

        /// Concurrent fetches
        #[arg(long)]
        workers: Option<usize>,

        /// Give up on stragglers after this many seconds
        #[arg(long)]
        deadline: Option<u64>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sign in interactively and cache the tokens
    Login,

    /// Forget cached and stored tokens
    Logout,

    /// Store the OAuth client secret in keyring
    SetClientSecret {
        #[arg(long)]
        client_id: String,
    },
}

fn build_provider(cfg: &Config) -> Result<Arc<dyn MailProvider>> {
    let provider: Arc<dyn MailProvider> = match cfg.provider {
        Provider::Gmail => {
            let base = cfg.api_base.as_deref().unwrap_or(DEFAULT_API_BASE);
            Arc::new(GmailClient::new(base, HTTP_TIMEOUT)?)
        }
        Provider::Imap => Arc::new(ImapClient::new(cfg.imap_server())),
    };
    Ok(provider)
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::SetClientSecret { client_id } => {
            eprintln!("Paste client secret (end with Ctrl-D):");
            let mut secret = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut secret)?;
            token_store::save_client_secret(&client_id, secret.trim())?;
            println!("Saved client secret for client_id {}", client_id);
            Ok(())
        }

        Command::Login => {
            let cfg = load_config().map_err(|e| anyhow!("Configuration error: {e}"))?;
            let credential = TokenManager::from_config(&cfg)?.login()?;
            println!("Signed in as {}", credential.user);
            Ok(())
        }

        Command::Logout => {
            let cfg = load_config().map_err(|e| anyhow!("Configuration error: {e}"))?;
            TokenManager::from_config(&cfg)?.logout()?;
            println!("Signed out");
            Ok(())
        }

        Command::Total {
            sender,
            query,
            workers,
            deadline,
            json,
        } => {
            let mut cfg = load_config().map_err(|e| anyhow!("Configuration error: {e}"))?;
            if sender.is_some() {
                cfg.sender = sender;
            }
            if query.is_some() {
                cfg.query = query;
            }

            let credential = TokenManager::from_config(&cfg)?.credential()?;
            let provider = build_provider(&cfg)?;

            let mut options = AggregatorOptions::default();
            if let Some(w) = workers.or(cfg.workers) {
                options.workers = w;
            }
            options.deadline = deadline.map(Duration::from_secs).or(cfg.deadline());

            let aggregator = Aggregator::new(provider, SenderFilter::new(cfg.sender()), options);

            let cancel = CancelToken::new();
            let c2 = cancel.clone();
            ctrlc::set_handler(move || c2.cancel())?;

            match aggregator.aggregate_with_cancel(&credential, &cfg.query(), &cancel) {
                Ok(result) => {
                    if json {
                        println!("{}", report::render_json(&result)?);
                    } else {
                        println!("{}", report::render(&result));
                    }
                    if result.failures() > 0 {
                        log::warn!("{} messages could not be read", result.failures());
                    }
                    Ok(())
                }
                Err(AggregateError::AuthExpired) => Err(anyhow!(
                    "credential was rejected; run `receipt_tally login` and try again"
                )),
                Err(e) => Err(e.into()),
            }
        }
    }
}
