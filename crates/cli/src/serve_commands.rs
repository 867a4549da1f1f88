use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Result,
    clap::Args,
    rpcgate_config::{GatewayFileConfig, discover_and_load},
    rpcgate_gateway::{NoopCore, RpcConfig, RpcServer, ensure_identity, tls::default_cert_hosts},
    rpcgate_protocol::RpcVersion,
    secrecy::SecretString,
    tokio_util::sync::CancellationToken,
    tracing::info,
};

/// Flags shared by commands that need the listener settings. Each one
/// overrides the matching config file field.
#[derive(Args, Debug, Default)]
pub struct ListenArgs {
    /// Config file. Defaults to `rpcgate.{toml,yaml,yml,json}` in the working
    /// directory or `~/.config/rpcgate/`.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Listen address, `host:port`.
    #[arg(long)]
    pub addr: Option<String>,

    /// Basic-auth user name.
    #[arg(long)]
    pub user: Option<String>,

    /// Basic-auth secret.
    #[arg(long, env = "RPCGATE_PASS", hide_env_values = true)]
    pub pass: Option<String>,

    /// TLS certificate path.
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// TLS private key path.
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Host name or IP for a generated certificate. Repeatable.
    #[arg(long = "cert-host")]
    pub cert_hosts: Vec<String>,
}

/// Listener settings after merging flags over the config file.
#[derive(Debug)]
pub struct Settings {
    pub addr: String,
    pub user: String,
    pub pass: SecretString,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub cert_hosts: Vec<String>,
}

impl Settings {
    pub fn resolve(args: ListenArgs, file: GatewayFileConfig) -> Self {
        let cert = args.cert.unwrap_or_else(|| file.cert_path());
        let key = args.key.unwrap_or_else(|| file.key_path());
        let pass = match args.pass {
            Some(pass) => SecretString::new(pass),
            None => file.pass.unwrap_or_else(|| SecretString::new(String::new())),
        };
        let cert_hosts = if args.cert_hosts.is_empty() {
            file.cert_hosts
        } else {
            args.cert_hosts
        };
        Self {
            addr: args.addr.unwrap_or(file.addr),
            user: args.user.unwrap_or(file.user),
            pass,
            cert,
            key,
            cert_hosts,
        }
    }

    fn load(args: ListenArgs) -> Result<Self> {
        let file = discover_and_load(args.config.as_deref())?;
        Ok(Self::resolve(args, file))
    }
}

pub async fn handle_serve(args: ListenArgs) -> Result<()> {
    let settings = Settings::load(args)?;

    let mut cfg = RpcConfig::new(
        Arc::new(NoopCore::default()),
        settings.addr,
        settings.pass,
        settings.cert,
        settings.key,
    );
    cfg.user = settings.user;
    cfg.cert_hosts = settings.cert_hosts;

    let server = RpcServer::new(cfg)?;
    let ctx = CancellationToken::new();
    let tracker = server.connect(ctx.clone())?;

    let lines = [
        format!("rpcgate v{}", env!("CARGO_PKG_VERSION")),
        format!(
            "RPC v{}, listening on https://{}",
            RpcVersion::current(),
            server
                .addr()
                .map_or_else(|| server.configured_addr().to_string(), |a| a.to_string())
        ),
        format!("{} routes registered", server.routes().route_names().len()),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("interrupt received, shutting down");
        }
        () = tracker.wait() => {}
    }
    ctx.cancel();
    tracker.wait().await;
    Ok(())
}

pub fn handle_gencert(args: ListenArgs) -> Result<()> {
    let settings = Settings::load(args)?;
    let hosts = if settings.cert_hosts.is_empty() {
        default_cert_hosts()
    } else {
        settings.cert_hosts
    };
    ensure_identity(&settings.cert, &settings.key, &hosts)?;
    println!("cert: {}", settings.cert.display());
    println!("key:  {}", settings.key.display());
    Ok(())
}
