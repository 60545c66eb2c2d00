use crate::{Command, EventCommand, ParticipantCommand, PurchaseCommand, SettingsCommand};
use anyhow::{anyhow, bail, Context as _, Result};
use api::{EventFilter, ExpenseApi};
use chrono::{DateTime, Utc};
use config::session::SessionStore;
use config::AppConfig;
use serde::Serialize;
use splitdebt_core::debt::DebtAction;
use splitdebt_core::models::{EventDraft, NewParticipant, PurchaseDraft, PurchaseUsage};
use splitdebt_core::money::format_rub;
use splitdebt_core::validation::validate_purchase;
use std::sync::Arc;
use sync::{DebtBoard, EventPages, FetchOutcome, Loader, PageSource, ParticipantPages};

pub struct Context {
    api: Arc<dyn ExpenseApi>,
    cfg: AppConfig,
    json: bool,
    sessions: SessionStore,
}

impl Context {
    pub fn new(api: Arc<dyn ExpenseApi>, cfg: AppConfig, json: bool) -> Result<Self> {
        Ok(Self {
            api,
            cfg,
            json,
            sessions: SessionStore::open_default()?,
        })
    }

    pub async fn run(self, command: Command) -> Result<()> {
        match command {
            Command::Events { command: None, all } => self.list_events(all).await,
            Command::Events {
                command:
                    Some(EventCommand::Create {
                        name,
                        description,
                        starts_at,
                        ends_at,
                    }),
                ..
            } => {
                self.create_event(name, description, starts_at, ends_at)
                    .await
            }
            Command::Events {
                command: Some(EventCommand::Delete { event_id }),
                ..
            } => {
                self.api.delete_event(&event_id).await?;
                tracing::info!(%event_id, "event deleted");
                Ok(())
            }
            Command::Debts { event_id } => self.list_debts(&event_id).await,
            Command::Send { event_id, debt_id } => {
                self.settle(&event_id, &debt_id, DebtAction::Send).await
            }
            Command::Confirm { event_id, debt_id } => {
                self.settle(&event_id, &debt_id, DebtAction::Confirm).await
            }
            Command::Participants {
                event_id,
                command: None,
                mine,
            } => self.list_participants(&event_id, mine).await,
            Command::Participants {
                event_id,
                command: Some(ParticipantCommand::Add { name, user_id }),
                ..
            } => {
                let created = self
                    .api
                    .create_participant(
                        &event_id,
                        &NewParticipant {
                            display_name: Some(name.trim().to_string()),
                            user_id,
                        },
                    )
                    .await?;
                self.emit(&created, || format!("added participant {}", created.id))
            }
            Command::Participants {
                event_id,
                command: Some(ParticipantCommand::Remove { participant_id }),
                ..
            } => {
                self.api
                    .delete_participant(&event_id, &participant_id)
                    .await?;
                tracing::info!(%event_id, %participant_id, "participant removed");
                Ok(())
            }
            Command::Purchase { command } => self.purchase(command).await,
            Command::Login { .. } => self.login().await,
            Command::Logout => self.logout(),
            Command::Whoami => {
                let session = self.sessions.load_session()?;
                match session.user() {
                    Some(user) => self.emit(user, || {
                        format!("{} ({})", user.name.as_deref().unwrap_or("—"), user.id)
                    }),
                    None => {
                        println!("not signed in");
                        Ok(())
                    }
                }
            }
            Command::Settings {
                command: SettingsCommand::Show,
            } => self.emit(&self.cfg, || format!("{:#?}", self.cfg)),
            Command::Settings {
                command: SettingsCommand::Set { key, value },
            } => {
                let mut cfg = self.cfg.clone();
                cfg.set(&key, &value)?;
                config::store(&cfg)?;
                tracing::info!(%key, %value, "Settings updated");
                Ok(())
            }
        }
    }

    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text());
        }
        Ok(())
    }

    async fn list_events(&self, all: bool) -> Result<()> {
        let filter = EventFilter {
            active_only: self.cfg.events.active_only && !all,
        };
        let loader = Loader::new(
            EventPages::new(Arc::clone(&self.api), filter),
            self.cfg.paging.page_size,
        );
        load_all(&loader).await?;
        let events = loader.items();
        self.emit(&events, || {
            if events.is_empty() {
                return "no events".to_string();
            }
            events
                .iter()
                .map(|e| {
                    let done = if e.is_completed { "  [завершено]" } else { "" };
                    format!(
                        "{}  {}  {}{done}",
                        e.id,
                        e.starts_at.format("%d.%m.%Y"),
                        e.name
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
    }

    async fn create_event(
        &self,
        name: String,
        description: Option<String>,
        starts_at: Option<String>,
        ends_at: Option<String>,
    ) -> Result<()> {
        if name.trim().is_empty() {
            bail!("event name is required");
        }
        let draft = EventDraft {
            name,
            description,
            starts_at: match starts_at {
                Some(raw) => parse_time(&raw)?,
                None => Utc::now(),
            },
            ends_at: ends_at.as_deref().map(parse_time).transpose()?,
        };
        let event = self.api.create_event(&draft).await?;
        tracing::info!(event_id = %event.id, "event created");
        self.emit(&event, || format!("created event {}", event.id))
    }

    async fn board(&self, event_id: &str) -> Result<DebtBoard> {
        let session = self.sessions.load_session()?;
        let board = DebtBoard::new(
            Arc::clone(&self.api),
            event_id,
            session,
            self.cfg.paging.page_size,
        );
        load_all(board.loader()).await?;
        Ok(board)
    }

    async fn list_debts(&self, event_id: &str) -> Result<()> {
        let board = self.board(event_id).await?;
        if let Some(banner) = board.banner() {
            eprintln!("{}", banner.message);
        }
        let rows = board.rows();
        self.emit(&rows, || {
            if rows.is_empty() {
                return "no debts".to_string();
            }
            rows.iter()
                .map(|row| {
                    let action = row
                        .view
                        .action
                        .map(|a| format!("  [{}]", a.caption()))
                        .unwrap_or_default();
                    format!(
                        "{}  {}  {}  {}{action}",
                        row.debt.id, row.view.headline, row.amount, row.view.label
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
    }

    async fn settle(&self, event_id: &str, debt_id: &str, action: DebtAction) -> Result<()> {
        let board = self.board(event_id).await?;
        board
            .perform(debt_id, action)
            .await
            .map_err(|err| anyhow!(err.to_notice().message))?;
        let row = board
            .rows()
            .into_iter()
            .find(|r| r.debt.id == debt_id)
            .ok_or_else(|| anyhow!("debt {debt_id} disappeared"))?;
        self.emit(&row, || format!("{}: {}", row.debt.id, row.view.label))
    }

    async fn list_participants(&self, event_id: &str, mine: bool) -> Result<()> {
        let mut source = ParticipantPages::new(Arc::clone(&self.api), event_id);
        if mine {
            let session = self.sessions.load_session()?;
            let user_id = session
                .viewer_id()
                .ok_or_else(|| anyhow!("sign in first to list your participants"))?;
            source = source.for_user(user_id);
        }
        let loader = Loader::new(source, self.cfg.paging.participant_page_size);
        load_all(&loader).await?;
        let people = loader.items();
        self.emit(&people, || {
            people
                .iter()
                .map(|p| format!("{}  {}", p.id, p.display_name.as_deref().unwrap_or("—")))
                .collect::<Vec<_>>()
                .join("\n")
        })
    }

    async fn purchase(&self, command: PurchaseCommand) -> Result<()> {
        match command {
            PurchaseCommand::Show {
                event_id,
                purchase_id,
            } => {
                let purchase = self.api.get_purchase(&event_id, &purchase_id).await?;
                self.emit(&purchase, || {
                    let done = if purchase.is_complete { "" } else { "  (не распределено)" };
                    format!(
                        "{}  {}  {}{done}",
                        purchase.id,
                        purchase.name,
                        format_rub(Some(purchase.cost))
                    )
                })
            }
            PurchaseCommand::Add {
                event_id,
                name,
                cost,
                buyer,
                usages,
            } => {
                let draft = PurchaseDraft {
                    name,
                    cost,
                    buyer_participant_id: buyer,
                    usages: usages
                        .iter()
                        .map(String::as_str)
                        .map(parse_usage)
                        .collect::<Result<_>>()?,
                };
                if let Err(errs) = validate_purchase(&draft) {
                    bail!(errs.join("; "));
                }
                let purchase = self.api.create_purchase(&event_id, &draft).await?;
                self.emit(&purchase, || format!("created purchase {}", purchase.id))
            }
            PurchaseCommand::Delete {
                event_id,
                purchase_id,
            } => {
                self.api.delete_purchase(&event_id, &purchase_id).await?;
                tracing::info!(%event_id, %purchase_id, "purchase deleted");
                Ok(())
            }
        }
    }

    async fn login(&self) -> Result<()> {
        let user = self
            .api
            .account()
            .await
            .map_err(|err| anyhow!(api::error_message(&err, "Не удалось войти")))?;
        self.sessions.begin(user.clone())?;
        self.emit(&user, || {
            format!("signed in as {}", user.name.as_deref().unwrap_or(&user.id))
        })
    }

    fn logout(&self) -> Result<()> {
        self.sessions.end()?;
        if let Err(err) = config::delete_secret(config::ACCESS_TOKEN_KEY) {
            tracing::debug!(error = %err, "no token to remove");
        }
        Ok(())
    }
}

/// Keeps requesting pages until the collection is exhausted.
pub async fn load_all<S: PageSource>(loader: &Loader<S>) -> Result<()> {
    loop {
        match loader.request_next_page().await {
            FetchOutcome::Appended { .. } | FetchOutcome::Stale => continue,
            FetchOutcome::Failed(message) => bail!(message),
            FetchOutcome::Skipped(_) => return Ok(()),
        }
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid date: {raw}"))?
        .with_timezone(&Utc))
}

/// `participant_id` or `participant_id:share`; the share defaults to 1.
fn parse_usage(raw: &str) -> Result<PurchaseUsage> {
    let (id, share) = match raw.split_once(':') {
        Some((id, share)) => (
            id,
            share
                .parse::<f64>()
                .with_context(|| format!("invalid share in {raw}"))?,
        ),
        None => (raw, 1.0),
    };
    Ok(PurchaseUsage {
        participant_id: id.trim().to_string(),
        share,
    })
}
