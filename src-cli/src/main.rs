mod commands;

use api::{http::HttpClient, mock::MockApi, ExpenseApi};
use clap::{Parser, Subcommand};
use config::AppConfig;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "splitdebt")]
#[command(about = "Track shared expenses and settle debts between event participants", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[command(about = "List events, or create and delete them")]
    Events {
        #[command(subcommand)]
        command: Option<EventCommand>,

        /// Include completed events.
        #[arg(long)]
        all: bool,
    },

    #[command(about = "Show the debts of an event as seen by the signed-in user")]
    Debts { event_id: String },

    #[command(about = "Mark a debt you owe as paid")]
    Send { event_id: String, debt_id: String },

    #[command(about = "Confirm that a debt owed to you was paid")]
    Confirm { event_id: String, debt_id: String },

    #[command(about = "Manage event participants")]
    Participants {
        event_id: String,

        #[command(subcommand)]
        command: Option<ParticipantCommand>,

        /// Only participants linked to the signed-in account.
        #[arg(long)]
        mine: bool,
    },

    #[command(about = "Manage purchases of an event")]
    Purchase {
        #[command(subcommand)]
        command: PurchaseCommand,
    },

    #[command(about = "Sign in and remember the current account")]
    Login {
        /// Access token to store in the OS keychain.
        #[arg(long)]
        token: Option<String>,
    },

    #[command(about = "Forget the current account and its token")]
    Logout,

    #[command(about = "Show the remembered account")]
    Whoami,

    #[command(about = "Show or change settings")]
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
}

#[derive(Subcommand)]
pub enum EventCommand {
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// RFC 3339 start time; defaults to now.
        #[arg(long)]
        starts_at: Option<String>,
        #[arg(long)]
        ends_at: Option<String>,
    },
    Delete {
        event_id: String,
    },
}

#[derive(Subcommand)]
pub enum ParticipantCommand {
    Add {
        name: String,
        #[arg(long)]
        user_id: Option<String>,
    },
    Remove {
        participant_id: String,
    },
}

#[derive(Subcommand)]
pub enum PurchaseCommand {
    Show {
        event_id: String,
        purchase_id: String,
    },
    Add {
        event_id: String,
        name: String,
        #[arg(long)]
        cost: f64,
        #[arg(long)]
        buyer: String,
        /// `participant_id[:share]`, repeatable.
        #[arg(long = "usage")]
        usages: Vec<String>,
    },
    Delete {
        event_id: String,
        purchase_id: String,
    },
}

#[derive(Subcommand)]
pub enum SettingsCommand {
    Show,
    Set { key: String, value: String },
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(env_filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn create_api_client(cfg: &AppConfig) -> anyhow::Result<Arc<dyn ExpenseApi>> {
    match cfg.api.kind.as_str() {
        "http" => {
            let client = HttpClient::new(cfg.api.base_url.clone())?;
            match config::access_token() {
                Some(token) => {
                    tracing::info!(base_url = %cfg.api.base_url, "Using HTTP API with stored token");
                    client.set_token(token).await;
                }
                None => {
                    tracing::warn!(base_url = %cfg.api.base_url, "Using HTTP API without a token")
                }
            }
            Ok(client)
        }
        _ => {
            tracing::info!("Using mock API");
            Ok(MockApi::demo().into_shared())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg = config::load().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "falling back to default config");
        AppConfig::default()
    });
    // the client reads the token at construction
    if let Command::Login {
        token: Some(token), ..
    } = &cli.command
    {
        config::store_secret(config::ACCESS_TOKEN_KEY, token)?;
    }
    let api = create_api_client(&cfg).await?;
    let ctx = commands::Context::new(api, cfg, cli.json)?;
    ctx.run(cli.command).await
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
    fn parses_purchase_usages() {
        let cli = Cli::parse_from([
            "splitdebt", "purchase", "add", "ev", "Продукты", "--cost", "900", "--buyer", "p1",
            "--usage", "p1", "--usage", "p2:2",
        ]);
        match cli.command {
            Command::Purchase {
                command: PurchaseCommand::Add { usages, cost, .. },
            } => {
                assert_eq!(usages, vec!["p1", "p2:2"]);
                assert_eq!(cost, 900.0);
            }
            _ => panic!("wrong command"),
        }
    }
}
