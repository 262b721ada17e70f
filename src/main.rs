use clap::{Parser, Subcommand};
use release_specs::boards::{NodeSpec, BOARD_ARCHI_MAP};
use release_specs::config::{Config, ConfigLoader};
use release_specs::firmware::MakeFirmware;
use release_specs::orchestrator::{self, gather, NodeSet, Orchestrator, OrchestratorSettings, SessionRegistry};
use release_specs::release::{self, SkipReason};
use release_specs::testbed::{Credentials, ExperimentClient, RestTestbed};
use release_specs::{logging, EnvOverrides, HarnessError, Ifconfig, LogContext};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    name = "riot-release",
    version,
    about = "Release-test harness for RIOT nodes on native, local boards and IoT-LAB.",
    long_about = "Acquires RIOT nodes (native instances, local boards or reserved IoT-LAB nodes), drives them through their shell and always releases them again, even when interrupted."
)]
struct Args {
    /// Use only local boards, never reserve IoT-LAB nodes.
    #[arg(long, global = true)]
    local: bool,

    /// Do not log node terminal output.
    #[arg(long, global = true)]
    hide_output: bool,

    /// Space separated boards or IoT-LAB node addresses, one per node.
    #[arg(long, global = true)]
    boards: Option<String>,

    /// Run even if the RIOT version under test is not a release candidate.
    #[arg(long = "non-RC", global = true)]
    non_rc: bool,

    /// Terminal log file template with `{module}`, `{function}`, `{node}`
    /// and `{time}`; without value `./{module}-{function}-{node}-{time}.log`.
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "")]
    log_file_fmt: Option<String>,

    /// IoT-LAB site to reserve nodes on.
    #[arg(long, global = true)]
    site: Option<String>,

    /// Experiment duration in minutes.
    #[arg(long, global = true)]
    duration: Option<u32>,

    /// Configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the board to IoT-LAB architecture map.
    Boards,
    /// Report which kinds of tests would be skipped on this machine.
    Check,
    /// Start every node and print its interfaces as JSON.
    Probe {
        /// Application directory, relative to RIOTBASE unless absolute.
        #[arg(long)]
        app: String,
        /// Seconds allowed for building, flashing and attaching.
        #[arg(long, default_value_t = 600)]
        timeout: u64,
    },
    /// Run one shell command on one node.
    Exec {
        #[arg(long)]
        app: String,
        /// Index of the node in `--boards`.
        #[arg(long, default_value_t = 0)]
        node: usize,
        /// Extra modules (USEMODULE), space separated.
        #[arg(long)]
        modules: Option<String>,
        #[arg(long)]
        cflags: Option<String>,
        #[arg(long, default_value_t = 600)]
        timeout: u64,
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?.into_config(),
        None => ConfigLoader::load()?.into_config(),
    };
    if let Some(site) = &args.site {
        config.iotlab.site = site.clone();
    }
    if let Some(duration) = args.duration {
        config.iotlab.experiment_duration_min = duration;
    }
    logging::init(&config.logging, args.verbose);

    match &args.command {
        Command::Boards => print_boards(),
        Command::Check => check(&args, &config)?,
        Command::Probe { app, timeout } => {
            let start_timeout = Duration::from_secs(*timeout);
            let app_dir = config.riot.app_dir(app);
            let body = move |nodes: NodeSet| async move {
                nodes.configure(&app_dir, &EnvOverrides::default());
                nodes.start_all(start_timeout).await?;
                let ops = nodes.iter().cloned().map(|ctrl| {
                    move || {
                        let mut ctrl = ctrl.lock();
                        let name = ctrl.name();
                        ctrl.ifconfig_list(None).map(|netifs| (name, netifs))
                    }
                });
                let mut report = serde_json::Map::new();
                for listed in gather(ops, start_timeout).await.into_results()? {
                    let (name, netifs) = listed?;
                    report.insert(name, serde_json::to_value(netifs)?);
                }
                println!("{}", serde_json::to_string_pretty(&report)?);
                Ok::<(), HarnessError>(())
            };
            run(&args, &config, "probe", "ifconfig", body).await?;
        }
        Command::Exec {
            app,
            node,
            modules,
            cflags,
            timeout,
            command,
        } => {
            let index = *node;
            let start_timeout = Duration::from_secs(*timeout);
            let app_dir = config.riot.app_dir(app);
            let line = command.join(" ");
            let mut overrides = EnvOverrides::default();
            if modules.is_some() {
                overrides = overrides.modules(release::list_from_string(modules.as_deref()));
            }
            if let Some(cflags) = cflags {
                overrides = overrides.cflags(cflags.clone());
            }
            let body = move |nodes: NodeSet| async move {
                let ctrl = nodes
                    .get(index)
                    .cloned()
                    .ok_or_else(|| HarnessError::Task(format!("no node {index} in --boards")))?;
                ctrl.lock().configure(&app_dir, &overrides);
                nodes.start_node(index).await?;
                let sent = line.clone();
                let mut outputs = gather([move || ctrl.lock().cmd(&sent)], start_timeout)
                    .await
                    .into_results()?;
                let output = outputs.pop().ok_or_else(|| HarnessError::Task("no output".into()))??;
                print!("{output}");
                match release_specs::parse_output(&line, &output) {
                    Some(Ok(parsed)) => println!("{}", serde_json::to_string_pretty(&parsed)?),
                    Some(Err(e)) => warn!("{e}"),
                    None => {}
                }
                Ok::<(), HarnessError>(())
            };
            run(&args, &config, "exec", "cmd", body).await?;
        }
    }

    Ok(())
}

fn print_boards() {
    println!("{:<16} {:<20} {}", "BOARD", "ARCHI", "ADDRESS PREFIX");
    for entry in BOARD_ARCHI_MAP {
        println!("{:<16} {:<20} {}-", entry.board, entry.archi(), entry.name);
    }
}

fn credentials_path(config: &Config) -> Option<PathBuf> {
    config
        .iotlab
        .credentials_file
        .clone()
        .or_else(Credentials::default_path)
}

fn check(args: &Args, config: &Config) -> Result<(), HarnessError> {
    let riotbase = match &config.riot.base {
        Some(base) => base.clone(),
        None => PathBuf::from(release::required_env("RIOTBASE")?),
    };
    println!("RIOTBASE: {}", riotbase.display());

    let mut skips: Vec<(&str, SkipReason)> = Vec::new();
    if let Some(reason) = release::check_rc(!args.non_rc, &riotbase)? {
        skips.push(("rc_only", reason));
    }
    if let Some(reason) = release::check_local(args.local) {
        skips.push(("local_only", reason));
    }
    if let Some(path) = credentials_path(config) {
        if let Some(reason) = release::check_credentials(args.local, &path, &config.iotlab.site) {
            skips.push(("iotlab_creds", reason));
        }
    }
    if let Some(reason) = release::check_sudo() {
        skips.push(("sudo_only", reason));
    }

    if skips.is_empty() {
        println!("all tests can run");
    }
    for (mark, reason) in skips {
        println!("skip {mark}: {reason}");
    }
    Ok(())
}

fn specs(args: &Args) -> Result<Vec<NodeSpec>, HarnessError> {
    let mut boards = release::list_from_string(args.boards.as_deref());
    if boards.is_empty() {
        boards.push("native".to_string());
    }
    Ok(boards
        .iter()
        .map(|value| NodeSpec::from_cli(value, args.local))
        .collect::<Result<Vec<_>, _>>()?)
}

fn orchestrator(args: &Args, config: &Config, registry: Arc<SessionRegistry>) -> Result<Orchestrator, HarnessError> {
    let settings = OrchestratorSettings {
        local: args.local,
        hide_output: args.hide_output,
        log_file_fmt: release::log_file_fmt(args.log_file_fmt.as_deref())?,
        log_dir: std::env::current_dir()?,
        ..OrchestratorSettings::from_config(config)
    };
    let firmware = Arc::new(MakeFirmware::new(
        config.riot.make.clone(),
        config.riot.attach,
        config.riot.serial_baud,
    ));
    let mut orch = Orchestrator::new(settings, firmware, registry);

    if !args.local {
        match credentials_path(config).map(|path| Credentials::load(&path)) {
            Some(Ok(credentials)) => {
                let api = RestTestbed::new(
                    config.iotlab.api_url.clone(),
                    credentials,
                    config.iotlab.request_timeout(),
                )?;
                orch = orch.with_testbed(Arc::new(ExperimentClient::new(
                    Arc::new(api),
                    config.iotlab.poll_interval(),
                    config.iotlab.wait_timeout(),
                )));
            }
            Some(Err(e)) => warn!("IoT-LAB unavailable: {e}"),
            None => warn!("IoT-LAB unavailable: no home directory for ~/.iotlabrc"),
        }
    }
    Ok(orch)
}

async fn run<F, Fut>(
    args: &Args,
    config: &Config,
    module: &str,
    function: &str,
    body: F,
) -> Result<(), HarnessError>
where
    F: FnOnce(NodeSet) -> Fut,
    Fut: std::future::Future<Output = Result<(), HarnessError>>,
{
    let registry = SessionRegistry::new();
    let orch = orchestrator(args, config, registry.clone())?;
    let test = LogContext::now(module, function);

    let result = orch.run_until(&test, &specs(args)?, body, shutdown_signal()).await;

    // Anything the run could not release itself.
    let report = registry.sweep().await;
    if report.controllers + report.experiments > 0 {
        info!(
            controllers = report.controllers,
            experiments = report.experiments,
            "released leftover nodes"
        );
    }
    result
}

// --- Graceful Shutdown Handler ---
async fn shutdown_signal() {
    let ctrl_c = orchestrator::interrupt_signal();

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, releasing nodes");
}
