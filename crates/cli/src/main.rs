mod serve_commands;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "rpcgate", about = "rpcgate, authenticated RPC gateway for a trading client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTPS + WebSocket RPC server.
    Serve(serve_commands::ListenArgs),
    /// Create the TLS certificate and key if neither exists.
    Gencert(serve_commands::ListenArgs),
    /// Print the route list, or help for one route.
    Routes { route: Option<String> },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "rpcgate starting");

    match cli.command {
        Commands::Serve(args) => serve_commands::handle_serve(args).await,
        Commands::Gencert(args) => serve_commands::handle_gencert(args),
        Commands::Routes { route } => {
            let text = rpcgate_gateway::methods::help_text(route.as_deref())
                .ok_or_else(|| anyhow::anyhow!("unknown route: {}", route.unwrap_or_default()))?;
            println!("{text}");
            Ok(())
        },
    }
}
