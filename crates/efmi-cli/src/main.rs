//! eFMI compliance checker CLI
//!
//! - `parse`: build one Algorithm Code file and summarize (or dump) its AST
//! - `check`: audit one representation (manifest + Algorithm Code files)
//! - `reconcile`: compare the interface variables of two manifests
//! - `audit`: audit an unpacked eFMU directory through `__content.xml`

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use efmi_alg::build_algorithm_code;
use efmi_manifest::{
    audit_container, audit_representation, reconcile_manifests, AuditConfig, AuditOutcome,
    OutputFormat,
};

mod report;

use report::AuditReportV1;

#[derive(Parser)]
#[command(name = "efmi-check")]
#[command(author, version, about = "eFMI Algorithm Code compliance checker")]
struct Cli {
    /// JSON configuration file (command-line flags take precedence).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Output format: text|json
    #[arg(long, global = true)]
    format: Option<String>,
    /// Output report path (defaults to stdout).
    #[arg(short, long, global = true)]
    out: Option<PathBuf>,
    /// Do not fail the process even if errors are found (always exit 0).
    #[arg(long, global = true)]
    no_fail: bool,
    /// Debug logging on stderr (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and build one `.alg` file.
    Parse {
        input: PathBuf,
        /// Print the built AST as JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },

    /// Check Algorithm Code against its manifest.
    ///
    /// Without `--alg` the `.alg` files listed in the manifest are checked.
    Check {
        /// Algorithm Code manifest.
        #[arg(long)]
        manifest: PathBuf,
        /// Algorithm Code file (repeatable).
        #[arg(long = "alg")]
        alg: Vec<PathBuf>,
        /// Second manifest to reconcile interface variables against.
        #[arg(long)]
        against: Option<PathBuf>,
    },

    /// Reconcile interface variables of two manifests.
    Reconcile { first: PathBuf, second: PathBuf },

    /// Audit an unpacked eFMU directory.
    Audit {
        /// Directory containing `__content.xml`.
        dir: PathBuf,
        /// Skip the Algorithm Code / Equation Code reconciliation.
        #[arg(long)]
        no_cross_check: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_format(format: &str) -> Result<OutputFormat> {
    match format.trim().to_ascii_lowercase().as_str() {
        "text" => Ok(OutputFormat::Text),
        "json" => Ok(OutputFormat::Json),
        other => Err(anyhow!("unknown --format `{other}` (expected text|json)")),
    }
}

fn load_config(cli: &Cli) -> Result<AuditConfig> {
    let mut config = match &cli.config {
        Some(path) => AuditConfig::load(path)?,
        None => AuditConfig::default(),
    };
    if let Some(format) = &cli.format {
        config.format = parse_format(format)?;
    }
    Ok(config)
}

fn emit(rendered: &str, out: Option<&PathBuf>) -> Result<()> {
    match out {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("{} {}", "wrote".green().bold(), path.display().to_string().bold());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

fn finish(command: &str, outcome: AuditOutcome, config: &AuditConfig, cli: &Cli) -> Result<()> {
    let fails = config.fails(&outcome.diagnostics);
    if cli.out.is_some() {
        colored::control::set_override(false);
    }
    let report = AuditReportV1::from_outcome(command, outcome);
    let rendered = match config.format {
        OutputFormat::Json => report::render_json(&report)?,
        OutputFormat::Text => report::render_text(&report),
    };
    emit(&rendered, cli.out.as_ref())?;

    if fails && !cli.no_fail {
        return Err(anyhow!(
            "{command} found {} error(s) and {} warning(s)",
            report.summary.error_count,
            report.summary.warning_count
        ));
    }
    Ok(())
}

fn cmd_parse(input: &PathBuf, json: bool, cli: &Cli) -> Result<()> {
    let text = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let module = build_algorithm_code(&text).map_err(|err| anyhow!("{}: {err}", input.display()))?;

    if json {
        return emit(&serde_json::to_string_pretty(&module)?, cli.out.as_ref());
    }

    let mut rendered = format!(
        "{} {}: block={} variables={} protected={} functions={} bindings={} issues={}",
        "ok".green().bold(),
        input.display(),
        module.name,
        module.block_variables.len(),
        module.protected_variables.len(),
        module.functions.len(),
        module.binding_count(),
        module.issues.len()
    );
    for issue in &module.issues {
        rendered.push_str(&format!("\n  {issue}"));
    }
    emit(&rendered, cli.out.as_ref())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let mut config = load_config(&cli)?;
    debug!(?config, "configuration loaded");

    match &cli.command {
        Commands::Parse { input, json } => cmd_parse(input, *json, &cli),
        Commands::Check {
            manifest,
            alg,
            against,
        } => {
            let mut outcome = audit_representation(manifest, alg, &config);
            if let Some(other) = against {
                if config.cross_check {
                    outcome.merge(reconcile_manifests(manifest, other, &config));
                }
            }
            finish("check", outcome, &config, &cli)
        }
        Commands::Reconcile { first, second } => {
            let outcome = reconcile_manifests(first, second, &config);
            finish("reconcile", outcome, &config, &cli)
        }
        Commands::Audit {
            dir,
            no_cross_check,
        } => {
            if *no_cross_check {
                config.cross_check = false;
            }
            let outcome = audit_container(dir, &config);
            finish("audit", outcome, &config, &cli)
        }
    }
}
