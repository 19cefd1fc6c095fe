use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "line-gemini-bot")]
#[command(about = "LINE webhook bot backed by Gemini", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the webhook server. Needs LINE_CHANNEL_SECRET, LINE_CHANNEL_ACCESS_TOKEN and GEMINI_API_KEY (env or config file).
    Serve {
        /// Config file path (default: LINE_BOT_CONFIG_PATH or ~/.line-gemini-bot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default: PORT env, config, or 8000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Print the x-line-signature value for a request body file, for sending test callbacks.
    Sign {
        /// Config file path used to resolve the channel secret
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Channel secret (default: LINE_CHANNEL_SECRET or config)
        #[arg(long)]
        secret: Option<String>,

        /// File holding the exact request body
        #[arg(value_name = "FILE")]
        body: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("line-gemini-bot {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("serve failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Sign {
            config,
            secret,
            body,
        }) => match run_sign(config, secret, body) {
            Ok(sig) => println!("{}", sig),
            Err(e) => {
                log::error!("sign failed: {:#}", e);
                std::process::exit(1);
            }
        },
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_serve(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = line_gemini::config::load_config(config_path)?;
    log::debug!("config path: {}", path.display());
    config.server.port = match port {
        Some(p) => p,
        None => line_gemini::config::resolve_port(&config)?,
    };
    log::info!(
        "starting gateway on {}:{}",
        config.server.bind,
        config.server.port
    );
    line_gemini::gateway::run_gateway(config).await
}

fn run_sign(
    config_path: Option<PathBuf>,
    secret: Option<String>,
    body_path: PathBuf,
) -> anyhow::Result<String> {
    use anyhow::Context;

    let secret = match secret {
        Some(s) => s,
        None => {
            let (config, _) = line_gemini::config::load_config(config_path)?;
            line_gemini::config::resolve_channel_secret(&config).with_context(|| {
                format!(
                    "no channel secret: pass --secret or set {}",
                    line_gemini::config::ENV_CHANNEL_SECRET
                )
            })?
        }
    };
    let body = std::fs::read(&body_path)
        .with_context(|| format!("reading body from {}", body_path.display()))?;
    Ok(line_gemini::signature::sign(&secret, &body))
}
