//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use docstitch_core::pipeline::{Pipeline, PipelineReport, ProgressReporter};
use docstitch_core::validate_layout;
use docstitch_shared::{
    BuildResult, BuildStatus, CONFIG_FILE_NAME, ConfigOverrides, FailurePolicy, SiteConfig, Stage,
    config_base_dir, duration_label, init_config, load_config_from, tail_lines,
};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docstitch: stitch many documentation builds into one published site.
#[derive(Parser)]
#[command(
    name = "docstitch",
    version,
    about = "Build documentation from several toolchains, merge it into one site, and publish it.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = CONFIG_FILE_NAME, env = "DOCSTITCH_CONFIG", global = true)]
    pub config: PathBuf,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Build every source, assemble the site, and publish it.
    Run {
        /// Stop after assembling the site.
        #[arg(long)]
        skip_publish: bool,

        /// Print the run report as JSON instead of a summary.
        #[arg(long)]
        json: bool,

        /// Failure policy: required or best-effort.
        #[arg(long)]
        policy: Option<FailurePolicy>,

        /// Per-source build timeout in seconds (0 disables it).
        #[arg(long)]
        timeout: Option<u64>,

        /// Directory the site is assembled into.
        #[arg(long)]
        site_root: Option<String>,

        /// Branch that receives the published site.
        #[arg(long)]
        branch: Option<String>,

        /// Maximum concurrent builds.
        #[arg(long)]
        concurrency: Option<u32>,
    },

    /// Validate the configuration and mount layout without building.
    Check,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Write a starter docstitch.toml.
    Init,
    /// Print the effective configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docstitch=info",
        1 => "docstitch=debug",
        _ => "docstitch=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command routing
// ---------------------------------------------------------------------------

/// Route a parsed CLI command to its handler.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            skip_publish,
            json,
            policy,
            timeout,
            site_root,
            branch,
            concurrency,
        } => {
            let overrides = ConfigOverrides {
                policy,
                timeout_secs: timeout,
                concurrency,
                site_root,
                branch,
            };
            cmd_run(&cli.config, &overrides, skip_publish, json).await
        }
        Command::Check => cmd_check(&cli.config),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(&cli.config),
            ConfigAction::Show => cmd_config_show(&cli.config),
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn load(path: &Path) -> Result<(SiteConfig, PathBuf)> {
    let config = load_config_from(path)?;
    let base_dir = config_base_dir(path)?;
    Ok((config, base_dir))
}

async fn cmd_run(
    config_path: &Path,
    overrides: &ConfigOverrides,
    skip_publish: bool,
    json: bool,
) -> Result<()> {
    let (mut config, base_dir) = load(config_path)?;
    config.apply_overrides(overrides);
    config.validate()?;

    let sources = config.resolve_sources(&base_dir);
    let settings = config.pipeline_settings(&base_dir);
    info!(
        sources = sources.len(),
        policy = ?settings.policy,
        site_root = %settings.site_root.display(),
        "starting run"
    );

    let mut pipeline = Pipeline::new(sources, settings);
    if !skip_publish {
        let publisher = docstitch_publish::publisher_from_config(&config.publish, &base_dir)?;
        pipeline = pipeline.with_publisher(publisher);
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            let _ = cancel_tx.send(true);
        }
    });
    let pipeline = pipeline.with_cancellation(cancel_rx);

    let reporter = CliProgress::new();
    let report = pipeline.run(&reporter).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    match report.into_result() {
        Ok(_) => Ok(()),
        Err((_, failure)) => Err(failure.into()),
    }
}

fn print_summary(report: &PipelineReport) {
    println!();
    println!("  Run:      {}", report.run_id);
    println!("  State:    {}", report.state);
    for build in &report.builds {
        println!(
            "  Source:   {:<16} {:<24} {:.1}s",
            build.source,
            status_label(&build.status),
            build.duration_ms as f64 / 1000.0
        );
    }
    if let Some(plan) = &report.plan {
        for mount in &plan.mounts {
            println!("  Mount:    {} -> {}", mount.source, mount.destination);
        }
        if let Some(primary) = plan.primary_mount() {
            println!("  Primary:  {} (index -> {})", primary.source, plan.index_target);
        }
        if !plan.skipped.is_empty() {
            println!("  Skipped:  {}", plan.skipped.join(", "));
        }
    }
    if let Some(site) = &report.site {
        println!("  Site:     {} ({} files)", site.root.display(), site.file_count);
        println!("  Digest:   {}", site.digest);
    }
    if let Some(publish) = &report.publish {
        println!("  Target:   {}", publish.target);
        if let Some(commit) = &publish.commit {
            println!("  Commit:   {commit}");
        }
    }
    println!("  Time:     {:.1}s", report.elapsed_ms as f64 / 1000.0);
    println!();
}

fn status_label(status: &BuildStatus) -> String {
    match status {
        BuildStatus::Succeeded => "ok".to_string(),
        BuildStatus::Failed {
            exit_code: Some(code),
        } => format!("failed (exit {code})"),
        BuildStatus::Failed { exit_code: None } => "failed (signal)".to_string(),
        BuildStatus::TimedOut { after_ms } => format!("timed out after {}", duration_label(*after_ms)),
        BuildStatus::SpawnFailed { .. } => "could not start".to_string(),
        BuildStatus::OutputMissing { .. } => "no output".to_string(),
    }
}

fn cmd_check(config_path: &Path) -> Result<()> {
    let (config, base_dir) = load(config_path)?;
    config.validate()?;
    let sources = config.resolve_sources(&base_dir);
    validate_layout(&sources).map_err(|e| eyre!("invalid mount layout: {e}"))?;

    println!();
    for source in &sources {
        let marker = if source.primary { " (primary)" } else { "" };
        println!("  {:<16} {}{marker}", source.name, source.mount);
        println!("  {:<16} {}", "", source.command.describe());
    }
    match docstitch_publish::publisher_from_config(&config.publish, &base_dir) {
        Ok(publisher) => println!("  Publish:  {}", publisher.target()),
        Err(e) => println!("  Publish:  unavailable ({e})"),
    }
    println!();
    println!("  Configuration OK");
    Ok(())
}

fn cmd_config_init(path: &Path) -> Result<()> {
    let path = init_config(path)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: &Path) -> Result<()> {
    let config = load_config_from(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn stage(&self, stage: Stage) {
        let label = match stage {
            Stage::BuildingSources => "Building sources",
            Stage::Planning => "Planning mounts",
            Stage::Assembling => "Assembling site",
            Stage::Publishing => "Publishing",
        };
        self.spinner.set_message(label);
    }

    fn source_started(&self, name: &str) {
        self.spinner.set_message(format!("Building {name}"));
    }

    fn source_finished(&self, result: &BuildResult, done: usize, total: usize) {
        self.spinner.set_message(format!(
            "Built [{done}/{total}] {}",
            result.source.name
        ));
        if !result.succeeded() {
            self.spinner.println(format!(
                "  {} {}",
                result.source.name,
                status_label(&result.status)
            ));
            let tail = tail_lines(&result.stderr, 5);
            if !tail.is_empty() {
                self.spinner.println(tail);
            }
        }
    }

    fn done(&self, _report: &PipelineReport) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse_into_overrides() {
        let cli = Cli::try_parse_from([
            "docstitch",
            "--config",
            "docs/docstitch.toml",
            "run",
            "--policy",
            "best-effort",
            "--timeout",
            "60",
            "--skip-publish",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("docs/docstitch.toml"));
        match cli.command {
            Command::Run {
                skip_publish,
                policy,
                timeout,
                branch,
                ..
            } => {
                assert!(skip_publish);
                assert_eq!(policy, Some(FailurePolicy::BestEffort));
                assert_eq!(timeout, Some(60));
                assert!(branch.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(Cli::try_parse_from(["docstitch", "run", "--policy", "sometimes"]).is_err());
    }

    #[test]
    fn status_labels() {
        assert_eq!(status_label(&BuildStatus::Succeeded), "ok");
        assert_eq!(
            status_label(&BuildStatus::Failed { exit_code: Some(2) }),
            "failed (exit 2)"
        );
        assert_eq!(
            status_label(&BuildStatus::TimedOut { after_ms: 30_000 }),
            "timed out after 30s"
        );
    }

    #[test]
    fn check_accepts_starter_layout() {
        let dir = std::env::temp_dir().join(format!("ds-cli-test-{}", std::process::id()));
        let path = dir.join(CONFIG_FILE_NAME);
        let _ = std::fs::remove_dir_all(&dir);
        init_config(&path).unwrap();

        cmd_check(&path).unwrap();
        assert!(cmd_config_init(&path).is_err());

        std::fs::remove_dir_all(&dir).ok();
    }
}
