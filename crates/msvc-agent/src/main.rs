use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use msvc_agent::{load_catalog, load_snapshot, run_plan, LocalNode, PlanInput};
use msvc_model::{decode_reason_code, VersionRange};
use msvc_upgrade::EngineConfig;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn node_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("state")
            .long("state")
            .required(true)
            .value_parser(value_parser!(PathBuf))
            .help("Node state snapshot (JSON)"),
    )
    .arg(
        Arg::new("catalog")
            .long("catalog")
            .required(true)
            .value_parser(value_parser!(PathBuf))
            .help("Registry catalog (JSON array of {org, microservice})"),
    )
    .arg(
        Arg::new("config")
            .long("config")
            .value_parser(value_parser!(PathBuf))
            .help("Engine configuration (TOML)"),
    )
    .arg(
        Arg::new("node-org")
            .long("node-org")
            .default_value("")
            .help("Organization the node belongs to"),
    )
}

fn cli() -> Command {
    Command::new("msvc-agent")
        .version(msvc_agent::VERSION)
        .about("Microservice upgrade and rollback engine")
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("text")
                .value_parser(["text", "json"])
                .help("Log output format"),
        )
        .subcommand_required(true)
        .subcommand(
            node_args(Command::new("plan").about("Run one reconciliation cycle and report"))
                .arg(
                    Arg::new("now")
                        .long("now")
                        .value_parser(value_parser!(u64))
                        .help("Pin the clock to this unix timestamp"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(node_args(
            Command::new("serve").about("Reconcile periodically until interrupted"),
        ))
        .subcommand(
            Command::new("decode-reason")
                .about("Describe an upgrade failure reason code")
                .arg(
                    Arg::new("code")
                        .required(true)
                        .value_parser(value_parser!(u64)),
                ),
        )
        .subcommand(
            Command::new("check-range")
                .about("Test whether a version falls inside a range expression")
                .arg(Arg::new("range").required(true))
                .arg(Arg::new("version").required(true)),
        )
}

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn plan_input(args: &ArgMatches) -> anyhow::Result<PlanInput> {
    let state = args
        .get_one::<PathBuf>("state")
        .context("--state is required")?;
    let catalog = args
        .get_one::<PathBuf>("catalog")
        .context("--catalog is required")?;
    let config = match args.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    Ok(PlanInput {
        snapshot: load_snapshot(state)?,
        catalog: load_catalog(catalog)?,
        config,
        now: args.try_get_one::<u64>("now").ok().flatten().copied(),
        node_org: args
            .get_one::<String>("node-org")
            .cloned()
            .unwrap_or_default(),
    })
}

async fn serve(input: PlanInput) -> anyhow::Result<()> {
    let mut node = LocalNode::new(input);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for interrupt");
        }
        let _ = shutdown_tx.send(true);
    });

    node.engine.run(shutdown_rx).await;

    let (policies, removals) = node.drain_events();
    info!(
        published = policies.len(),
        removed = removals.len(),
        "policy changes while serving"
    );
    println!("{}", serde_json::to_string_pretty(&node.store.snapshot())?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    let log_format = matches
        .get_one::<String>("log-format")
        .map_or("text", String::as_str);
    init_tracing(log_format);

    match matches.subcommand() {
        Some(("plan", args)) => {
            let output = run_plan(plan_input(args)?).await?;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                print!("{}", output.render_text());
            }
            if !output.failures.is_empty() {
                std::process::exit(2);
            }
        }
        Some(("serve", args)) => serve(plan_input(args)?).await?,
        Some(("decode-reason", args)) => {
            let code = *args.get_one::<u64>("code").context("code is required")?;
            println!("{code}: {}", decode_reason_code(code));
        }
        Some(("check-range", args)) => {
            let expr = args.get_one::<String>("range").context("range is required")?;
            let version = args
                .get_one::<String>("version")
                .context("version is required")?;
            let range: VersionRange = expr
                .parse()
                .with_context(|| format!("parsing range {expr}"))?;
            let inside = range
                .contains_str(version)
                .with_context(|| format!("parsing version {version}"))?;
            println!("{version} {} {}", if inside { "is in" } else { "is not in" }, range.expression());
            if !inside {
                std::process::exit(1);
            }
        }
        Some((other, _)) => bail!("unknown command {other}"),
        None => bail!("no command given"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn plan_requires_state_and_catalog() {
        let err = cli()
            .try_get_matches_from(["msvc-agent", "plan", "--state", "s.json"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let matches = cli()
            .try_get_matches_from([
                "msvc-agent", "plan", "--state", "s.json", "--catalog", "c.json", "--now", "42",
            ])
            .unwrap();
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "plan");
        assert_eq!(args.get_one::<u64>("now"), Some(&42));
        assert_eq!(args.get_one::<String>("log-format").map(String::as_str), Some("text"));
    }
}
