use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use q4mig_core::SiteEntry;
use q4mig_ops::{
    DrainConfig, MatchConfig, OpContext, Operation, Orchestrator, RetryPolicy, RunConfig,
};
use q4mig_screens::{ChromeLauncher, Credentials};
use q4mig_storage::{
    load_site_registry, HttpClientConfig, HttpFetcher, JsonFileStatePersistence, SnapshotStore,
    StatePersistence, StateStore,
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "q4mig")]
#[command(about = "Q4 admin content migrator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List every operation id.
    Operations,
    /// Run one operation on the selected sites (all registered sites by default).
    Run {
        operation: String,
        #[arg(long = "site")]
        sites: Vec<String>,
    },
    /// Print the run-state file.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    fmt().with_env_filter(log_filter(rust_log.as_deref())).init();

    let cli = Cli::parse();
    let config = RunConfig::from_env();

    match cli.command.unwrap_or(Commands::Operations) {
        Commands::Operations => {
            for op in Operation::catalog() {
                let side = op
                    .side()
                    .map(|s| format!("{s:?}").to_ascii_lowercase())
                    .unwrap_or_else(|| "local".to_string());
                println!(
                    "{:<34} {:<8} {:<12} {}",
                    op.id(),
                    op.group().to_string(),
                    side,
                    op.description()
                );
            }
        }
        Commands::Run { operation, sites } => {
            let operation = operation
                .parse::<Operation>()
                .map_err(anyhow::Error::msg)?;
            let credentials = match Credentials::from_env() {
                Ok(credentials) => credentials,
                Err(err) => {
                    eprintln!("{err}");
                    std::process::exit(1);
                }
            };
            let registry = load_site_registry(&config.sites_file)?;
            let selected = select_sites(registry, &sites)?;
            run(config, credentials, operation, selected).await?;
        }
        Commands::Status => {
            let persistence = JsonFileStatePersistence::new(config.state_file.clone());
            match persistence.load().await? {
                Some(state) => println!(
                    "{}",
                    serde_json::to_string_pretty(&state).context("rendering run-state")?
                ),
                None => println!("no run-state at {}", config.state_file.display()),
            }
        }
    }

    Ok(())
}

/// `RUST_LOG` directives, or `info` when unset or unparsable.
fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Keep registry order; names match either the site name or its destination subdomain.
fn select_sites(registry: Vec<SiteEntry>, wanted: &[String]) -> Result<Vec<SiteEntry>> {
    if wanted.is_empty() {
        return Ok(registry);
    }
    let is_named = |site: &SiteEntry, name: &str| {
        site.name.eq_ignore_ascii_case(name) || site.destination.eq_ignore_ascii_case(name)
    };
    if let Some(unknown) = wanted
        .iter()
        .find(|name| !registry.iter().any(|site| is_named(site, name.as_str())))
    {
        bail!("site {unknown:?} is not in the registry");
    }
    Ok(registry
        .into_iter()
        .filter(|site| wanted.iter().any(|name| is_named(site, name.as_str())))
        .collect())
}

async fn run(
    config: RunConfig,
    credentials: Credentials,
    operation: Operation,
    sites: Vec<SiteEntry>,
) -> Result<()> {
    let persistence: Arc<dyn StatePersistence> =
        Arc::new(JsonFileStatePersistence::new(config.state_file.clone()));
    let state = StateStore::open(persistence)
        .await
        .with_context(|| format!("opening run-state {}", config.state_file.display()))?;
    let launcher = ChromeLauncher {
        headless: config.headless,
        wait_timeout: config.wait_timeout,
        step_delay: config.step_delay,
        ..ChromeLauncher::default()
    };
    let photos = HttpFetcher::new(HttpClientConfig {
        user_agent: Some(format!("q4mig/{}", env!("CARGO_PKG_VERSION"))),
        ..HttpClientConfig::default()
    })?;

    let ctx = OpContext {
        snapshots: SnapshotStore::new(config.data_dir.clone()),
        retry: RetryPolicy {
            delay: config.step_delay,
            ..RetryPolicy::default()
        },
        drain: DrainConfig::default(),
        matching: MatchConfig::default(),
        state: Arc::new(state),
        launcher: Arc::new(launcher),
        credentials,
        photos: Arc::new(photos),
        config,
    };

    info!(operation = %operation, sites = sites.len(), "run requested");
    let outcomes = Orchestrator::new(Arc::new(ctx)).run(operation, sites).await;

    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(report) => {
                println!(
                    "{} ok: created={} deleted={} skipped={} failed={}",
                    outcome.site.name, report.created, report.deleted, report.skipped, report.failed
                );
                for note in &report.notes {
                    println!("  - {note}");
                }
            }
            Err(err) => {
                failed += 1;
                println!("{} failed: {err}", outcome.site.name);
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} sites failed", outcomes.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, destination: &str) -> SiteEntry {
        SiteEntry {
            name: name.to_string(),
            source: format!("{destination}-old"),
            destination: destination.to_string(),
        }
    }

    #[test]
    fn log_filter_defaults_to_info() {
        assert_eq!(log_filter(None).to_string(), "info");
        assert_eq!(
            log_filter(Some("q4mig_ops=debug")).to_string(),
            "q4mig_ops=debug"
        );
    }

    #[test]
    fn empty_selection_keeps_whole_registry() {
        let registry = vec![entry("Acme", "acme2"), entry("Globex", "globex")];
        let selected = select_sites(registry.clone(), &[]).unwrap();
        assert_eq!(selected, registry);
    }

    #[test]
    fn selection_matches_name_or_destination_in_registry_order() {
        let registry = vec![
            entry("Acme", "acme2"),
            entry("Globex", "globex"),
            entry("Initech", "initech"),
        ];
        let wanted = vec!["initech".to_string(), "ACME".to_string()];
        let selected = select_sites(registry, &wanted).unwrap();
        let names = selected.iter().map(|s| s.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Acme", "Initech"]);
    }

    #[test]
    fn unknown_site_is_rejected() {
        let err = select_sites(vec![entry("Acme", "acme2")], &["umbrella".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("umbrella"));
    }
}
