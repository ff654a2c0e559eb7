mod cli;

use meshledger::{
    batch::Manifest,
    config::{self, Config},
    engine::{check_engine, CommandEngine},
    project::ProjectLayout,
    reset::{self, Confirmation, Cutoff, ResetPlan},
    runner::{RunOptions, StageRunner},
};
use meshledger_common::Stage;
use meshledger_ledger::{schema::complete_column, LedgerStore, Schema, StageGate};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, ResetCommands};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "meshledger=trace,meshledger_ledger=debug,meshledger_common=debug".to_string()
        } else {
            "meshledger=info,meshledger_ledger=info".to_string()
        }
    });

    // Logs go to stderr; stdout carries plans, tables and tallies.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => {
            let (_, layout) = open_project(&cli.project, cli.config.as_deref())?;
            init(&layout)
        }
        Commands::Run { stage, limit } => {
            let (config, layout) = open_project(&cli.project, cli.config.as_deref())?;
            run_stage(&config, &layout, stage, limit)
        }
        Commands::Status { stage } => {
            let (_, layout) = open_project(&cli.project, cli.config.as_deref())?;
            status(&layout, stage)
        }
        Commands::Manifest { stage } => {
            let (_, layout) = open_project(&cli.project, cli.config.as_deref())?;
            manifest(&layout, stage)
        }
        Commands::Reset(ResetCommands::Selective {
            items,
            stages,
            dry_run,
            force,
        }) => {
            let (_, layout) = open_project(&cli.project, cli.config.as_deref())?;
            reset_selective(&layout, &items, &stages, dry_run, force)
        }
        Commands::Reset(ResetCommands::Staged {
            target,
            dry_run,
            force,
        }) => {
            let (config, layout) = open_project(&cli.project, cli.config.as_deref())?;
            reset_staged(&config, &layout, &target, dry_run, force)
        }
        Commands::Validate => validate(&cli.project, cli.config.as_deref()),
        Commands::CheckEngine => {
            let (config, _) = open_project(&cli.project, cli.config.as_deref())?;
            check_engine_cmd(&config)
        }
        Commands::Version => {
            println!("meshledger {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn open_project(project: &Path, config_path: Option<&Path>) -> Result<(Config, ProjectLayout)> {
    if !project.is_dir() {
        anyhow::bail!("Project directory does not exist: {:?}", project);
    }
    let config = config::load_config_or_default(config_path, project)?;
    let layout = ProjectLayout::new(project, &config);
    tracing::debug!("Project {} at {:?}", layout.name(), layout.root());
    Ok((config, layout))
}

fn schema() -> Arc<Schema> {
    Arc::new(Schema::standard())
}

fn open_ledger(layout: &ProjectLayout) -> Result<LedgerStore> {
    let store = LedgerStore::open(layout.ledger_path(), schema())
        .with_context(|| format!("Failed to open ledger {:?}", layout.ledger_path()))?;
    if !store.report().is_clean() {
        tracing::warn!(
            "Ledger {:?} was repaired on open ({} row(s) dropped)",
            layout.ledger_path(),
            store.report().rows_dropped
        );
    }
    Ok(store)
}

fn parse_stage(number: u8) -> Result<Stage> {
    Ok(Stage::from_number(number)?)
}

fn init(layout: &ProjectLayout) -> Result<()> {
    layout.ensure_dirs()?;
    if config::write_default_if_missing(&layout.config_path(), layout.name())? {
        println!("Wrote {}", layout.relative(&layout.config_path()));
    }
    let mut store = open_ledger(layout)?;
    store.ensure_header()?;
    println!(
        "Initialized project {} (ledger {})",
        layout.name(),
        layout.relative(layout.ledger_path())
    );
    Ok(())
}

fn run_stage(config: &Config, layout: &ProjectLayout, stage: u8, limit: Option<usize>) -> Result<()> {
    let stage = parse_stage(stage)?;
    layout.ensure_dirs()?;

    let mut engine = CommandEngine::from_config(&config.engine)?.with_log_dir(layout.logs());
    let mut gate = StageGate::new(open_ledger(layout)?);

    let options = RunOptions { limit };
    let summary = StageRunner::new(config, layout, &mut gate, &mut engine).run(stage, &options)?;

    for (item, reason) in &summary.failures {
        println!("  failed {}: {}", item, reason);
    }
    println!("{}", summary);
    Ok(())
}

fn status(layout: &ProjectLayout, stage: Option<u8>) -> Result<()> {
    let filter = stage.map(parse_stage).transpose()?;
    let store = LedgerStore::open_read_only(layout.ledger_path(), schema())?;

    let flags: Vec<String> = Stage::all().iter().map(|&s| complete_column(s)).collect();
    let width = store.ids().map(str::len).max().unwrap_or(8).max(8);

    println!("{:<width$}  0 1 2 3 4  Status", "Model ID", width = width);
    let mut shown = 0;
    for record in store.records() {
        if let Some(stage) = filter {
            if record.flag_set(&complete_column(stage)) {
                continue;
            }
        }
        let marks: Vec<&str> = flags
            .iter()
            .map(|c| if record.flag_set(c) { "✓" } else { "·" })
            .collect();
        println!(
            "{:<width$}  {}  {}",
            record.id(),
            marks.join(" "),
            record.status(),
            width = width
        );
        shown += 1;
    }
    println!("\n{} of {} item(s)", shown, store.len());
    Ok(())
}

fn manifest(layout: &ProjectLayout, stage: u8) -> Result<()> {
    let stage = parse_stage(stage)?;
    let store = LedgerStore::open_read_only(layout.ledger_path(), schema())?;
    let manifest = Manifest::from_ledger(&store, stage);
    let path = layout.manifest_path(stage);
    std::fs::create_dir_all(layout.processing())?;
    manifest.write_csv(&path)?;

    for (container, items) in manifest.containers() {
        println!("{} ({} item(s))", container, items.len());
    }
    println!("Wrote {}", layout.relative(&path));
    Ok(())
}

fn reset_selective(
    layout: &ProjectLayout,
    items: &[String],
    stages: &[u8],
    dry_run: bool,
    force: bool,
) -> Result<()> {
    let stages = stages
        .iter()
        .map(|&n| parse_stage(n))
        .collect::<Result<Vec<_>>>()?;

    // Nothing is opened for writing until the plan is confirmed.
    let store = LedgerStore::open_read_only(layout.ledger_path(), schema())?;
    let plan = ResetPlan::Selective(reset::plan_selective(&store, items, &stages)?);
    finish_reset(plan, dry_run, force, || open_ledger(layout))
}

fn reset_staged(
    config: &Config,
    layout: &ProjectLayout,
    target: &str,
    dry_run: bool,
    force: bool,
) -> Result<()> {
    let cutoff: Cutoff = target.parse()?;
    let plan = ResetPlan::Staged(reset::plan_staged(
        cutoff,
        layout,
        config,
        &Schema::standard(),
    )?);
    finish_reset(plan, dry_run, force, || open_ledger(layout))
}

/// Show the plan, confirm, then execute against the writable ledger.
fn finish_reset(
    plan: ResetPlan,
    dry_run: bool,
    force: bool,
    ledger: impl FnOnce() -> Result<LedgerStore>,
) -> Result<()> {
    print!("{}", plan);
    if dry_run {
        println!("[DRY RUN] Nothing changed");
        return Ok(());
    }
    if !force && !confirm(plan.confirmation())? {
        println!("Reset cancelled");
        return Ok(());
    }

    let report = plan.execute(ledger()?)?;
    for (path, error) in &report.failures {
        println!("  could not remove {}: {}", path.display(), error);
    }
    println!("Reset complete: {}", report);
    Ok(())
}

fn confirm(confirmation: Confirmation) -> Result<bool> {
    print!("{}", confirmation.prompt());
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(confirmation.accepts(&answer))
}

fn check_engine_cmd(config: &Config) -> Result<()> {
    println!("Checking engine...\n");

    let Some(command) = config.engine.command.as_deref() else {
        println!("✗ engine.command is not set in {}", config::CONFIG_FILE);
        return Ok(());
    };
    let expanded = shellexpand::full(command)
        .map(|c| c.to_string())
        .unwrap_or_else(|_| command.to_string());
    let info = check_engine(&expanded);

    let mark = if info.available { "✓" } else { "✗" };
    print!("{} {}", mark, info.command);
    if let Some(ref path) = info.path {
        print!(" - {}", path.display());
    }
    println!();

    if !info.available {
        println!("\nThe engine executable was not found. Install it or fix engine.command.");
    }
    Ok(())
}

fn validate(project: &Path, config_path: Option<&Path>) -> Result<()> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| project.join(config::CONFIG_FILE));

    if !path.exists() {
        println!("No config file at {:?}, using defaults", path);
        let config = Config::default();
        println!("  Batch capacity: {}", config.batch.capacity);
        return Ok(());
    }

    println!("Validating config: {:?}", path);
    let config = config::load_config(&path)?;
    println!("✓ Configuration is valid");
    println!(
        "  Project: {}",
        config.project.name.as_deref().unwrap_or("(directory name)")
    );
    println!("  Batch capacity: {}", config.batch.capacity);
    println!(
        "  Engine: {}",
        config.engine.command.as_deref().unwrap_or("(not set)")
    );
    for &stage in Stage::all() {
        println!("  {}: {:?}", stage, config.policy_for(stage));
    }
    println!("  Preserved on reset: {}", config.reset.preserve.join(", "));
    Ok(())
}
