use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use jobdash::api::{HttpApi, RemoteApi};
use jobdash::config::Config;
use jobdash::dispatch::Dispatcher;
use jobdash::merge::FetchMode;
use jobdash::models::{
    Application, CompanyUpdate, EmploymentType, EntityId, JobLevel, NewApplication, NewCompany, WorkMode,
};
use jobdash::mutation::{MutationManager, MutationStatus, Outcome, Ticket};
use jobdash::store::{CollectionKey, Store};

#[derive(Parser)]
#[command(name = "jobdash")]
#[command(about = "Track companies and job applications on the dashboard backend")]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage companies
    Companies {
        #[command(subcommand)]
        command: CompanyCommands,
    },

    /// Manage applications
    Applications {
        #[command(subcommand)]
        command: ApplicationCommands,
    },
}

#[derive(Subcommand)]
enum CompanyCommands {
    /// List companies
    List {
        /// Only favorited companies
        #[arg(short, long)]
        favorites: bool,
    },

    /// Add a company
    Add {
        /// Company name
        name: String,

        /// Careers or home page
        #[arg(short, long)]
        webpage: Option<String>,
    },

    /// Mark a company as favorite
    Favorite {
        /// Company ID
        id: i64,

        /// Remove the favorite instead
        #[arg(long)]
        off: bool,
    },
}

#[derive(Subcommand)]
enum ApplicationCommands {
    /// List applications, for one company or across all of them
    List {
        /// Company ID
        #[arg(short, long)]
        company: Option<i64>,
    },

    /// Record a submitted application
    Add {
        /// Company ID
        company_id: i64,

        /// Job title
        #[arg(short, long)]
        title: String,

        /// Submission date, YYYY-MM-DD (defaults to today)
        #[arg(short, long)]
        date: Option<NaiveDate>,

        #[arg(long, value_enum)]
        level: Option<JobLevel>,

        #[arg(long, value_enum)]
        employment_type: Option<EmploymentType>,

        #[arg(long, value_enum)]
        work_mode: Option<WorkMode>,

        /// Job posting URL
        #[arg(long)]
        url: Option<String>,

        /// Employer's requisition number
        #[arg(long)]
        external_id: Option<String>,
    },

    /// Delete an application
    Delete {
        /// Application ID
        id: i64,
    },
}

/// Local state plus the machinery that keeps it in step with the server.
struct Session {
    store: Store,
    manager: MutationManager,
    dispatcher: Dispatcher,
}

impl Session {
    fn new(api: Arc<dyn RemoteApi>, fetch_mode: FetchMode) -> Self {
        Self {
            store: Store::new(),
            manager: MutationManager::new(fetch_mode),
            dispatcher: Dispatcher::new(api),
        }
    }

    fn fetch(&mut self, key: CollectionKey) {
        if let Some(ticket) = self.manager.fetch(&mut self.store, key) {
            self.dispatcher.submit(ticket);
        }
    }

    fn submit(&mut self, ticket: Ticket) {
        self.dispatcher.submit(ticket);
    }

    /// Settle everything in flight. Failures become errors once all have settled.
    async fn settle(&mut self) -> Result<Vec<Outcome>> {
        let outcomes = self.dispatcher.drain(&mut self.manager, &mut self.store).await;
        let mut failure = None;
        for outcome in &outcomes {
            match outcome {
                Outcome::SessionExpired => {
                    bail!("Session expired. Update the token in your config or set JOBDASH_TOKEN.")
                }
                Outcome::FetchFailed { message, .. }
                | Outcome::Resolved { error: Some(message), .. } => {
                    failure.get_or_insert_with(|| message.clone());
                }
                _ => {}
            }
        }
        match failure {
            Some(message) => Err(anyhow!(message)),
            None => Ok(outcomes),
        }
    }
}

fn confirmed_target(outcomes: &[Outcome]) -> Option<EntityId> {
    outcomes.iter().rev().find_map(|outcome| match outcome {
        Outcome::Resolved { target, status: MutationStatus::Confirmed, .. } => Some(*target),
        _ => None,
    })
}

async fn run(command: Commands, api: Arc<dyn RemoteApi>, fetch_mode: FetchMode) -> Result<()> {
    let mut session = Session::new(api, fetch_mode);
    // Aggregates live on companies, so every command starts from them.
    session.fetch(CollectionKey::Companies);

    match command {
        Commands::Companies { command } => match command {
            CompanyCommands::List { favorites } => {
                session.settle().await?;
                let companies: Vec<_> = session
                    .store
                    .companies()
                    .items()
                    .iter()
                    .filter(|c| !favorites || c.favorited)
                    .collect();
                if companies.is_empty() {
                    println!("No companies found.");
                } else {
                    println!("{:<6} {:<3} {:<30} {:>5} {:<12} {:<30}", "ID", "FAV", "NAME", "APPS", "LAST", "WEBPAGE");
                    println!("{}", "-".repeat(91));
                    for company in companies {
                        println!(
                            "{:<6} {:<3} {:<30} {:>5} {:<12} {:<30}",
                            company.id,
                            if company.favorited { "*" } else { "" },
                            truncate(&company.name, 28),
                            company.applications_count,
                            format_date(company.last_application_date),
                            truncate(company.webpage.as_deref().unwrap_or("-"), 28)
                        );
                    }
                }
            }

            CompanyCommands::Add { name, webpage } => {
                let ticket = session
                    .manager
                    .create_company(&mut session.store, NewCompany { name: name.clone(), webpage });
                session.submit(ticket);
                let outcomes = session.settle().await?;
                match confirmed_target(&outcomes) {
                    Some(id) => println!("Added company #{} ({})", id, name),
                    None => println!("Company '{}' submitted.", name),
                }
            }

            CompanyCommands::Favorite { id, off } => {
                session.settle().await?;
                if session.store.company(id).is_none() {
                    bail!("Company #{} not found.", id);
                }
                let ticket = session
                    .manager
                    .update_company(&mut session.store, id, CompanyUpdate::favorite(!off));
                session.submit(ticket);
                session.settle().await?;
                if let Some(company) = session.store.company(id) {
                    let verb = if company.favorited { "Favorited" } else { "Unfavorited" };
                    println!("{} '{}'.", verb, company.name);
                }
            }
        },

        Commands::Applications { command } => match command {
            ApplicationCommands::List { company } => {
                let key = company.map_or(CollectionKey::AllApplications, CollectionKey::Applications);
                session.fetch(key);
                session.settle().await?;
                let applications = match key {
                    CollectionKey::Applications(id) => session
                        .store
                        .applications(id)
                        .map(|c| c.items())
                        .unwrap_or_default(),
                    _ => session.store.all_applications().items(),
                };
                print_applications(&session.store, applications);
            }

            ApplicationCommands::Add {
                company_id,
                title,
                date,
                level,
                employment_type,
                work_mode,
                url,
                external_id,
            } => {
                session.fetch(CollectionKey::Applications(company_id));
                session.settle().await?;
                if session.store.company(company_id).is_none() {
                    bail!("Company #{} not found.", company_id);
                }

                let mut new = NewApplication::new(title.clone(), date.unwrap_or_else(|| Local::now().date_naive()));
                new.job_level = level;
                new.employment_type = employment_type.unwrap_or_default();
                new.work_mode = work_mode.unwrap_or_default();
                new.job_posting_url = url;
                new.job_external_id = external_id;

                let ticket = session.manager.create_application(&mut session.store, company_id, new);
                session.submit(ticket);
                let outcomes = session.settle().await?;

                let id = confirmed_target(&outcomes).context("Application was not confirmed")?;
                println!("Added application #{} ({})", id, title);
                if let Some(company) = session.store.company(company_id) {
                    println!(
                        "{}: {} application(s), last on {}",
                        company.name,
                        company.applications_count,
                        format_date(company.last_application_date)
                    );
                }
            }

            ApplicationCommands::Delete { id } => {
                // Locate the parent so its counter can be corrected afterwards.
                session.fetch(CollectionKey::AllApplications);
                session.settle().await?;
                let ticket = session.manager.delete_application(&mut session.store, id);
                session.submit(ticket);
                session.settle().await?;
                println!("Deleted application #{}", id);
            }
        },
    }

    Ok(())
}

fn print_applications(store: &Store, applications: &[Application]) {
    if applications.is_empty() {
        println!("No applications found.");
        return;
    }
    println!("{:<6} {:<12} {:<30} {:<20} {:<10} {:<12} {:<8}", "ID", "DATE", "TITLE", "COMPANY", "LEVEL", "TYPE", "MODE");
    println!("{}", "-".repeat(104));
    for app in applications {
        let company = app
            .company
            .as_ref()
            .map(|c| c.name.clone())
            .or_else(|| app.company_id.and_then(|id| store.company(id)).map(|c| c.name.clone()))
            .unwrap_or_default();
        println!(
            "{:<6} {:<12} {:<30} {:<20} {:<10} {:<12} {:<8}",
            app.id,
            app.date_submitted.to_string(),
            truncate(&app.title, 28),
            truncate(&company, 18),
            app.job_level.map_or_else(|| "-".to_string(), |level| level.to_string()),
            app.employment_type,
            app.work_mode
        );
    }
}

fn format_date(date: Option<NaiveDate>) -> String {
    date.map_or_else(|| "-".to_string(), |d| d.to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jobdash=warn"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    // The blocking HTTP client must be built and dropped outside the runtime.
    let api: Arc<dyn RemoteApi> = Arc::new(HttpApi::new(&config.api)?);
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let result = runtime.block_on(run(cli.command, Arc::clone(&api), config.sync.fetch_mode));
    drop(runtime);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Acme", 10), "Acme");
        assert_eq!(truncate("Platform Engineering Lead", 10), "Platfor...");
        assert_eq!(truncate("Société Générale", 8), "Socié...");
    }

    #[test]
    fn test_cli_parses_application_add() {
        let cli = Cli::try_parse_from([
            "jobdash",
            "applications",
            "add",
            "7",
            "--title",
            "SRE",
            "--date",
            "2025-10-24",
            "--employment-type",
            "contractor",
            "--work-mode",
            "remote",
        ])
        .unwrap();
        match cli.command {
            Commands::Applications {
                command: ApplicationCommands::Add { company_id, date, employment_type, work_mode, .. },
            } => {
                assert_eq!(company_id, 7);
                assert_eq!(date, NaiveDate::from_ymd_opt(2025, 10, 24));
                assert_eq!(employment_type, Some(EmploymentType::Contractor));
                assert_eq!(work_mode, Some(WorkMode::Remote));
            }
            _ => panic!("expected applications add"),
        }
    }

    #[test]
    fn test_cli_global_config_flag() {
        let cli = Cli::try_parse_from(["jobdash", "companies", "list", "--config", "/tmp/x.toml", "-f"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/x.toml")));
    }

    #[test]
    fn test_confirmed_target_picks_last_confirmation() {
        let outcomes = vec![
            Outcome::Fetched { key: CollectionKey::Companies, items: 2 },
            Outcome::Resolved {
                kind: jobdash::mutation::MutationKind::Create,
                target: EntityId::Confirmed(42),
                status: MutationStatus::Confirmed,
                error: None,
            },
        ];
        assert_eq!(confirmed_target(&outcomes), Some(EntityId::Confirmed(42)));
        assert_eq!(confirmed_target(&outcomes[..1]), None);
    }
}
