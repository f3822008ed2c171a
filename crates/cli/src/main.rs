mod workspace;

use std::{path::PathBuf, sync::Arc};

use {
    clap::{Parser, Subcommand},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    ploinky_common::logfile::{JsonlLayer, read_from, read_last},
    ploinky_config::{WorkspaceConfig, WorkspacePaths},
    ploinky_registry::{AgentRegistry, RoutingTable},
    ploinky_router::{AllowAll, AuthGate, BearerTokenGate, RouterState, serve},
    ploinky_runtime::ContainerDriver,
    ploinky_supervisor::{
        ContainerMonitor, FsManifestSource, Watchdog, WatchdogConfig, monitor_channel,
    },
};

#[derive(Parser)]
#[command(name = "ploinky", about = "ploinky — workspace agent control plane")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Workspace directory (the one containing `.ploinky/`).
    #[arg(long, global = true, env = "PLOINKY_WORKSPACE")]
    workspace: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the watchdog: router, container monitor, declared agents.
    Start,
    /// Stop running agents and signal the watchdog.
    Stop,
    /// Stop the watchdog, then start fresh.
    Restart,
    /// Refresh a running agent (recreates on env change).
    Refresh {
        #[command(subcommand)]
        target: RefreshTarget,
    },
    /// Tear agents down.
    Destroy {
        #[command(subcommand)]
        target: DestroyTarget,
    },
    /// Show router and agent state.
    Status,
    /// Read the router log.
    Logs {
        #[command(subcommand)]
        action: LogsAction,
    },
    /// Run the router in the foreground (spawned by the watchdog).
    #[command(hide = true)]
    Router,
}

#[derive(Subcommand)]
enum RefreshTarget {
    Agent { name: String },
}

#[derive(Subcommand)]
enum DestroyTarget {
    /// One agent by name.
    Agent { name: String },
    /// Every container recorded for this workspace.
    Workspace,
    /// Every ploinky container on this host, foreign ones included.
    All,
}

#[derive(Subcommand)]
enum LogsAction {
    /// Follow appended records.
    Tail,
    /// Print the last N records.
    Last { count: usize },
}

/// Initialise tracing: fmt to stderr plus the JSONL file layer when the
/// command owns a log file.
fn init_telemetry(cli: &Cli, jsonl: Option<JsonlLayer>) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter).with(jsonl);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Router listen port: `PORT` env, then the persisted routing table, then
/// the default.
fn resolve_port(paths: &WorkspacePaths) -> u16 {
    if let Ok(raw) = std::env::var("PORT")
        && let Ok(port) = raw.parse()
    {
        return port;
    }
    RoutingTable::load(&paths.routing_json())
        .map(|t| t.port)
        .unwrap_or(ploinky_registry::routing::DEFAULT_ROUTER_PORT)
}

fn auth_gate(paths: &WorkspacePaths, config: &WorkspaceConfig) -> Arc<dyn AuthGate> {
    if config.sso.enabled {
        let secrets = ploinky_config::FileSecretStore::load(&paths.secrets_file());
        use ploinky_config::SecretResolver;
        if let Some(token) = secrets.resolve_var_value("PLOINKY_ROUTER_TOKEN") {
            return Arc::new(BearerTokenGate::new(token));
        }
        warn!("sso.enabled is set but no PLOINKY_ROUTER_TOKEN secret exists; router is open");
    }
    Arc::new(AllowAll)
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let workspace = cli
        .workspace
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let paths = match WorkspacePaths::new(workspace) {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("cannot resolve workspace: {e}");
            std::process::exit(ploinky_supervisor::EXIT_CONFIG);
        },
    };

    // Long-running commands own a JSONL log file.
    let jsonl = match &cli.command {
        Commands::Start | Commands::Restart => JsonlLayer::open(paths.watchdog_log()).ok(),
        Commands::Router => JsonlLayer::open(paths.router_log()).ok(),
        _ => None,
    };
    init_telemetry(&cli, jsonl);

    let code = run(cli, paths).await;
    std::process::exit(code);
}

async fn run(cli: Cli, paths: WorkspacePaths) -> i32 {
    match &cli.command {
        Commands::Start => cmd_start(&cli, &paths).await,
        Commands::Restart => {
            signal_watchdog(&paths);
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            cmd_start(&cli, &paths).await
        },
        Commands::Router => cmd_router(&paths).await,
        Commands::Stop => cmd_stop(&paths).await,
        Commands::Refresh {
            target: RefreshTarget::Agent { name },
        } => cmd_refresh(&paths, name).await,
        Commands::Destroy { target } => cmd_destroy(&paths, target).await,
        Commands::Status => cmd_status(&paths).await,
        Commands::Logs { action } => cmd_logs(&paths, action).await,
    }
}

async fn cmd_start(cli: &Cli, paths: &WorkspacePaths) -> i32 {
    let port = resolve_port(paths);

    let router_command = router_command(cli, paths);
    let mut config = WatchdogConfig::from_env(port, router_command);
    if config.pid_file.is_none() {
        config.pid_file = Some(workspace::pid_file(paths));
    }

    if std::env::var("PLOINKY_WATCHDOG_TEST_MODE").as_deref() == Ok("1") {
        // Test mode: expose configuration, start nothing.
        println!("{config:#?}");
        return 0;
    }

    let driver = match ContainerDriver::detect() {
        Ok(driver) => driver,
        Err(e) => {
            eprintln!("no container runtime: {e}");
            return 1;
        },
    };
    let manager = workspace::build_manager(paths, driver);

    // Bring declared agents up before supervision begins.
    let manifests = workspace::discover_manifests(paths);
    if manifests.is_empty() {
        warn!("no agent manifests found under .ploinky/repos");
    }
    for (repo, manifest) in &manifests {
        match manager.ensure_agent_service(manifest, repo).await {
            Ok(outcome) => info!(
                agent = %manifest.name,
                container = %outcome.container_name,
                host_port = outcome.host_port,
                "agent up"
            ),
            Err(e) => {
                warn!(agent = %manifest.name, error = %e, "agent failed to start");
            },
        }
    }

    let (control, paused) = monitor_channel();
    let monitor = ContainerMonitor::new(
        Arc::clone(&manager),
        Arc::new(FsManifestSource::new(paths.clone())),
        paused,
    );
    tokio::spawn(monitor.run());

    let mut watchdog = Watchdog::new(config, Some(control));
    let code = watchdog.run().await;

    // Supervisor exit means nothing should resurrect containers behind the
    // operator's back.
    manager.mark_all_stopped().await;
    code
}

fn router_command(cli: &Cli, paths: &WorkspacePaths) -> Vec<String> {
    let exe = std::env::current_exe()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "ploinky".into());
    vec![
        exe,
        "router".into(),
        "--workspace".into(),
        paths.root().to_string_lossy().into_owned(),
        "--log-level".into(),
        cli.log_level.clone(),
    ]
}

async fn cmd_router(paths: &WorkspacePaths) -> i32 {
    let port = resolve_port(paths);

    // Persist the listen port so tooling and agents can find the router.
    match RoutingTable::load(&paths.routing_json()) {
        Ok(mut table) => {
            table.port = port;
            if let Err(e) = table.save() {
                warn!(error = %e, "could not persist router port");
            }
        },
        Err(e) => warn!(error = %e, "could not read routing table"),
    }

    let config = WorkspaceConfig::load(&paths.config_json());
    let state = RouterState::new(paths.clone(), auth_gate(paths, &config));

    match serve(state, port).await {
        Ok(()) => 0,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            eprintln!("port {port} is already in use");
            ploinky_supervisor::EXIT_CONFIG
        },
        Err(e) => {
            eprintln!("router failed: {e}");
            1
        },
    }
}

fn signal_watchdog(paths: &WorkspacePaths) -> bool {
    let Some(pid) = workspace::read_pid(paths) else {
        return false;
    };
    let result = nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid),
        nix::sys::signal::Signal::SIGTERM,
    );
    match result {
        Ok(()) => {
            println!("watchdog (pid {pid}) signalled to stop");
            true
        },
        Err(e) => {
            warn!(pid, error = %e, "could not signal watchdog");
            false
        },
    }
}

async fn cmd_stop(paths: &WorkspacePaths) -> i32 {
    signal_watchdog(paths);

    let driver = match ContainerDriver::detect() {
        Ok(driver) => driver,
        Err(e) => {
            eprintln!("no container runtime: {e}");
            return 1;
        },
    };
    let manager = workspace::build_manager(paths, driver);

    let registry = match AgentRegistry::load(&paths.agents_json()) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("cannot read agent registry: {e}");
            return 1;
        },
    };
    let mut failures = 0;
    for record in registry.records.values() {
        match manager.stop(&record.agent_name).await {
            Ok(()) => println!("stopped {}", record.agent_name),
            Err(e) => {
                eprintln!("failed to stop {}: {e}", record.agent_name);
                failures += 1;
            },
        }
    }
    i32::from(failures > 0)
}

async fn cmd_refresh(paths: &WorkspacePaths, agent: &str) -> i32 {
    let Some((repo, manifest)) = workspace::find_manifest(paths, agent) else {
        eprintln!("no manifest found for agent '{agent}'");
        return ploinky_supervisor::EXIT_CONFIG;
    };

    let driver = match ContainerDriver::detect() {
        Ok(driver) => driver,
        Err(e) => {
            eprintln!("no container runtime: {e}");
            return 1;
        },
    };
    let manager = workspace::build_manager(paths, driver);

    match manager.refresh(&manifest, &repo).await {
        Ok(outcome) => {
            println!(
                "refreshed {agent}: container {} on port {}",
                outcome.container_name, outcome.host_port
            );
            0
        },
        Err(ploinky_agents::Error::ManifestInvalid(reason)) => {
            eprintln!("invalid manifest for {agent}: {reason}");
            ploinky_supervisor::EXIT_CONFIG
        },
        Err(e) => {
            eprintln!("refresh failed: {e}");
            1
        },
    }
}

async fn cmd_destroy(paths: &WorkspacePaths, target: &DestroyTarget) -> i32 {
    let driver = match ContainerDriver::detect() {
        Ok(driver) => driver,
        Err(e) => {
            eprintln!("no container runtime: {e}");
            return 1;
        },
    };
    let manager = workspace::build_manager(paths, driver);

    let result = match target {
        DestroyTarget::Agent { name } => manager.destroy(name).await,
        DestroyTarget::Workspace => manager.destroy_workspace().await,
        DestroyTarget::All => manager.destroy_all_ploinky().await,
    };
    match result {
        Ok(()) => {
            println!("done");
            0
        },
        Err(e) => {
            eprintln!("destroy failed: {e}");
            1
        },
    }
}

async fn cmd_status(paths: &WorkspacePaths) -> i32 {
    let port = resolve_port(paths);
    println!("router port: {port}");

    let health_url = format!("http://127.0.0.1:{port}/health");
    let client = reqwest::Client::new();
    let health = client
        .get(&health_url)
        .timeout(std::time::Duration::from_secs(3))
        .send()
        .await;
    match health {
        Ok(response) if response.status().is_success() => println!("router: healthy"),
        Ok(response) => println!("router: unhealthy (HTTP {})", response.status()),
        Err(_) => println!("router: unreachable"),
    }

    let registry = match AgentRegistry::load(&paths.agents_json()) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("cannot read agent registry: {e}");
            return 1;
        },
    };
    if registry.records.is_empty() {
        println!("no agents recorded");
        return 0;
    }

    let driver = ContainerDriver::detect().ok();
    let table = RoutingTable::load(&paths.routing_json()).unwrap_or_default();
    for (container, record) in &registry.records {
        let state = match driver {
            Some(ref driver) => {
                if driver.is_running(container).await {
                    "running"
                } else {
                    "stopped"
                }
            },
            None => "unknown",
        };
        let host_port = table
            .get(&record.agent_name)
            .map(|r| r.host_port.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "  {}  {}  {}  port {}",
            record.agent_name, container, state, host_port
        );
    }
    0
}

async fn cmd_logs(paths: &WorkspacePaths, action: &LogsAction) -> i32 {
    let log = paths.router_log();
    match action {
        LogsAction::Last { count } => {
            for record in read_last(&log, *count) {
                println!(
                    "{} {:5} {} {}",
                    record.ts,
                    record.level,
                    record.event,
                    serde_json::Value::Object(record.fields)
                );
            }
            0
        },
        LogsAction::Tail => {
            let mut offset = ploinky_common::logfile::file_len(&log);
            loop {
                let (next, lines) = read_from(&log, offset);
                offset = next;
                for line in lines {
                    println!("{line}");
                }
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            }
        },
    }
}
