use clap::Parser;
use consult_call_lib::{logger, CallConfig, Role};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Join a consultation session and drive its call from the console")]
struct Args {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    signaling_url: Option<String>,

    #[arg(short, long)]
    session: Option<String>,

    #[arg(short, long)]
    user: Option<String>,

    #[arg(short, long)]
    name: Option<String>,

    /// requester or helper
    #[arg(short, long)]
    role: Option<Role>,

    /// tracing filter, overrides RUST_LOG
    #[arg(long)]
    log: Option<String>,

    /// Check the configured ICE servers and exit
    #[arg(long)]
    check_ice: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => CallConfig::from_file(path)?,
        None => CallConfig::default(),
    }
    .apply_env();
    if let Some(url) = args.signaling_url {
        config.signaling_url = url;
    }
    if let Some(session) = args.session {
        config.session_id = session;
    }
    if let Some(user) = args.user {
        config.user_id = user;
    }
    if let Some(name) = args.name {
        config.user_name = name;
    }
    if let Some(role) = args.role {
        config.role = role;
    }

    logger::init_logging(args.log.as_deref().or(config.log_filter.as_deref()));

    if args.check_ice {
        if !consult_call_lib::check_ice_servers(&config).await {
            std::process::exit(1);
        }
        return Ok(());
    }

    consult_call_lib::run(config).await
}
