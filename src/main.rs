use anyhow::{Context, Result};
use backlog_sync::cli::{
    ApplyConfig, Args, ConfigDiscovery, ConnectionConfig, ExecutionMode, FetchConfig, PlanConfig,
    SyncConfig,
};
use backlog_sync::{BacklogSync, CancelToken, DesiredState, MutationPlan, TaskTree};
use std::path::Path;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Configuration, desired-state or fetch failure; nothing was applied
const EXIT_ABORTED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_ABORTED);
        }
    };

    init_logging(verbose(&mode));
    info!("Starting backlog-sync {}", env!("CARGO_PKG_VERSION"));

    let result = match mode {
        ExecutionMode::Plan(config) => run_plan(config).await,
        ExecutionMode::Apply(config) => run_apply(config).await,
        ExecutionMode::Fetch(config) => run_fetch(config).await,
        ExecutionMode::ShowConfig => {
            ConfigDiscovery::show_discovery_info();
            Ok(0)
        }
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_ABORTED)
        }
    }
}

fn verbose(mode: &ExecutionMode) -> bool {
    match mode {
        ExecutionMode::Plan(config) => config.connection.verbose,
        ExecutionMode::Apply(config) => config.connection.verbose,
        ExecutionMode::Fetch(config) => config.connection.verbose,
        ExecutionMode::ShowConfig => false,
    }
}

/// `RUST_LOG` wins; otherwise info, or debug with `--verbose`
fn init_logging(verbose: bool) {
    let default = if verbose {
        "backlog_sync=debug"
    } else {
        "backlog_sync=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(connection: &ConnectionConfig) -> Result<SyncConfig> {
    let config = ConfigDiscovery::load(connection.config_override.as_deref())
        .context("Failed to load configuration")?;
    Ok(config.with_collection(connection.collection_override.clone()))
}

fn load_desired(path: &Path) -> Result<DesiredState> {
    let desired = DesiredState::from_file(path)
        .with_context(|| format!("Failed to load desired state from {}", path.display()))?;
    info!(
        "Loaded {} desired items ({} top level) from {}",
        desired.len(),
        desired.items.len(),
        path.display()
    );
    Ok(desired)
}

/// Cancel the token on Ctrl-C; the executor stops before its next operation
fn install_ctrl_c(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current operation");
            cancel.cancel();
        }
    });
}

fn dump_plan(path: &Path, plan: &MutationPlan) -> Result<()> {
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    let content = if is_toml {
        toml::to_string_pretty(plan).context("Failed to encode plan as TOML")?
    } else {
        serde_json::to_string_pretty(plan).context("Failed to encode plan as JSON")?
    };
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write plan to {}", path.display()))?;
    info!("Plan written to {}", path.display());
    Ok(())
}

fn print_plan(plan: &MutationPlan) {
    if plan.is_empty() {
        println!("Nothing to do: remote already matches the desired state");
    } else {
        println!("Plan ({}):", plan.summary());
        for (i, operation) in plan.operations().iter().enumerate() {
            println!("  {:>3}. {}", i + 1, operation);
        }
    }

    if !plan.retained().is_empty() {
        println!();
        println!("Retained:");
        for item in plan.retained() {
            println!("  - {} \"{}\": {}", item.id, item.name, item.reason);
        }
    }
}

async fn run_plan(config: PlanConfig) -> Result<u8> {
    let sync_config = load_config(&config.connection)?;
    let desired = load_desired(&config.desired_file)?;

    let sync = BacklogSync::new(sync_config.build_api()?, sync_config.sync_options(true, false));
    let (tree, plan) = sync.plan(&desired).await?;
    info!("Fetched {} remote items", tree.len());

    if let Some(path) = &config.dump_plan {
        dump_plan(path, &plan)?;
    }
    print_plan(&plan);
    Ok(0)
}

async fn run_apply(config: ApplyConfig) -> Result<u8> {
    let sync_config = load_config(&config.connection)?;
    let desired = load_desired(&config.desired_file)?;

    let cancel = CancelToken::new();
    install_ctrl_c(cancel.clone());

    let sync = BacklogSync::new(
        sync_config.build_api()?,
        sync_config.sync_options(config.dry_run, config.verify),
    )
    .with_cancel_token(cancel);

    let report = match &config.dump_plan {
        Some(path) => {
            let (tree, plan) = sync.plan(&desired).await?;
            dump_plan(path, &plan)?;
            sync.run_with_plan(&desired, &tree, &plan).await
        }
        None => sync.run(&desired).await?,
    };

    if config.report_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to encode report")?
        );
    } else {
        println!("{}", report.summary());
        for failure in &report.failures {
            println!(
                "  ✗ {} {} \"{}\": {}",
                failure.kind, failure.identifier, failure.name, failure.error
            );
        }
    }

    let code = report.exit_code();
    Ok(u8::try_from(code).unwrap_or(1))
}

async fn run_fetch(config: FetchConfig) -> Result<u8> {
    let sync_config = load_config(&config.connection)?;
    let sync = BacklogSync::new(sync_config.build_api()?, sync_config.sync_options(true, false));

    let tree = sync.fetch_tree().await?;

    if config.json {
        let items: Vec<_> = tree.items().collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&items).context("Failed to encode items")?
        );
        return Ok(0);
    }

    let stats = tree.statistics();
    println!(
        "Collection {}: {} items ({} epics, {} stories, {} closed, depth {})",
        sync.api().collection_id(),
        stats.total,
        stats.epics,
        stats.stories,
        stats.closed,
        stats.max_depth
    );
    if !stats.by_status.is_empty() {
        let counts: Vec<String> = stats
            .by_status
            .iter()
            .map(|(status, count)| format!("{}: {}", status, count))
            .collect();
        println!("Statuses: {}", counts.join(", "));
    }
    for root in tree.roots() {
        print_subtree(&tree, root, 1);
    }
    Ok(0)
}

fn print_subtree(tree: &TaskTree, id: &str, depth: usize) {
    if let Some(item) = tree.get(id) {
        println!(
            "{}{} [{}] {}",
            "  ".repeat(depth),
            item.id,
            item.status,
            item.name
        );
    }
    for child in tree.children(id) {
        print_subtree(tree, child, depth + 1);
    }
}
