//! Porter gateway binary.

use std::{net::SocketAddr, sync::Arc};

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::EnvFilter,
};

use {
    porter_agent::{AgentConfig, AgentConnection},
    porter_channels::MemoryMessageLog,
    porter_gateway::{GatewayState, server},
    porter_sessions::{
        DmPolicy, LifecycleConfig, MemorySessionStore, SessionManagerConfig,
    },
};

#[derive(Parser)]
#[command(name = "porter", about = "Porter — multi-channel agent gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to.
    #[arg(long, global = true, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on.
    #[arg(long, global = true, default_value_t = 8787)]
    port: u16,

    /// Agent worker WebSocket URL.
    #[arg(
        long,
        global = true,
        env = "PORTER_WORKER_URL",
        default_value = "ws://127.0.0.1:8765/ws"
    )]
    worker_url: String,

    /// Token sent as X-Gateway-Token on the worker upgrade request.
    #[arg(long, global = true, env = "PORTER_GATEWAY_TOKEN")]
    worker_token: Option<String>,

    /// Allowlist file path (supports a leading ~).
    #[arg(
        long,
        global = true,
        env = "PORTER_ALLOWLIST",
        default_value = "~/.porter/allowlist.json"
    )]
    allowlist_path: String,

    /// DM admission policy: open or pairing.
    #[arg(long, global = true, env = "PORTER_DM_POLICY", default_value = "pairing")]
    dm_policy: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is provided).
    Gateway,
    /// Print the version and exit.
    Version,
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("porter={level},info")));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if matches!(cli.command, Some(Commands::Version)) {
        println!("porter {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    init_tracing(&cli.log_level, cli.json_logs);

    let dm_policy = match cli.dm_policy.as_str() {
        "open" => DmPolicy::Open,
        _ => DmPolicy::Pairing,
    };

    let mut agent_config = AgentConfig::new(cli.worker_url.clone());
    if let Some(token) = cli.worker_token.clone() {
        agent_config = agent_config.with_token(token);
    }
    let agent = AgentConnection::new(agent_config);
    if let Err(e) = agent.connect().await {
        // The transport reconnects lazily on the first turn; a cold
        // worker at boot is not fatal.
        info!(error = %e, "worker not reachable yet");
    }

    let state = GatewayState::new(
        SessionManagerConfig {
            dm_policy,
            allowlist_path: Some(cli.allowlist_path.clone()),
            ..SessionManagerConfig::default()
        },
        LifecycleConfig::default(),
        Arc::new(MemorySessionStore::new()),
        Arc::new(MemoryMessageLog::new()),
        agent,
    );
    let _maintenance = state.spawn_maintenance();

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port).parse()?;
    info!(
        addr = %addr,
        worker = %cli.worker_url,
        policy = %cli.dm_policy,
        "starting porter gateway"
    );
    server::serve(state, addr).await
}
