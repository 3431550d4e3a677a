use anyhow::{anyhow, bail, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use skill_harness::config::HarnessConfig;
use skill_harness::plan::ActionPlan;

fn print_help() {
    println!(
        "\
skill-harness v{}

Replays a recorded skill action plan through the execution harness and
prints which actions were permitted, plus the resulting audit summary.

USAGE:
    skill-harness [OPTIONS] PLAN_PATH

ARGUMENTS:
    PLAN_PATH    Path to a JSON action plan

OPTIONS:
    -c, --config PATH    TOML harness configuration [default: built-in defaults]
    -h, --help           Print this help message and exit
    -V, --version        Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG    Log level filter for tracing, overrides [logging] filter
                (e.g. debug, skill_harness=debug,warn)

EXAMPLES:
    skill-harness plan.json
    skill-harness --config config/harness.toml plan.json
    RUST_LOG=skill_harness=debug skill-harness plan.json",
        env!("CARGO_PKG_VERSION"),
    );
}

struct Args {
    config_path: Option<String>,
    plan_path: String,
}

fn parse_args() -> Result<Args> {
    let mut config_path = None;
    let mut plan_path = None;
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("skill-harness v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--config" | "-c" => {
                config_path = Some(args.next().ok_or_else(|| anyhow!("--config requires a path"))?);
            }
            other if other.starts_with('-') => bail!("Unknown option: {other} (see --help)"),
            other => {
                if plan_path.replace(other.to_string()).is_some() {
                    bail!("Only one PLAN_PATH may be given");
                }
            }
        }
    }

    Ok(Args {
        config_path,
        plan_path: plan_path.ok_or_else(|| anyhow!("Missing PLAN_PATH (see --help)"))?,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;

    let config = match &args.config_path {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };

    // Logs go to stderr so stdout stays a clean JSON report
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .init();

    if let Some(path) = &args.config_path {
        info!("Loaded configuration from {path}");
    }

    let plan = ActionPlan::load(&args.plan_path)?;
    info!(
        "Replaying {} actions for trigger run {} ({}:{})",
        plan.actions.len(),
        plan.trigger_run.id,
        plan.trigger_run.source_type,
        plan.trigger_run.source_id
    );

    // The harness blocks on repository and network calls
    let report = tokio::task::spawn_blocking(move || plan.replay(&config)).await??;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
