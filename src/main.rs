use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use fakesmtp::{Config, MailSaver, ServerHandler, ServerModel};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILE: &str = "fakesmtp.toml";

/// Disposable SMTP server writing every received email to disk
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Directory where received emails are saved
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Start the server at launch (always on when running headless)
    #[arg(short, long)]
    start_server: bool,

    /// Run without a graphical interface; this binary always does
    #[arg(short, long)]
    background: bool,

    /// Listening port
    #[arg(short, long)]
    port: Option<String>,

    /// Address to listen on, every local address by default
    #[arg(short = 'a', long)]
    bind_address: Option<String>,

    /// Only keep emails whose recipients end with one of these domains
    #[arg(short, long, value_delimiter = ',')]
    relay_domains: Option<Vec<String>>,

    /// Keep emails in memory only
    #[arg(short, long)]
    memory_mode: bool,

    /// Settings file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Hostname announced in the greeting
    #[arg(long)]
    hostname: Option<String>,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(output_dir) = self.output_dir {
            config.output_dir = output_dir;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind_address) = self.bind_address {
            config.bind_address = Some(bind_address);
        }
        if let Some(relay_domains) = self.relay_domains {
            config.relay_domains = Some(relay_domains);
        }
        if let Some(hostname) = self.hostname {
            config.hostname = hostname;
        }
        config.memory_mode |= self.memory_mode;
        config.start_server |= self.start_server;
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config_path = args.config.clone();
    if args.background && args.start_server {
        tracing::warn!(
            "Option '--start-server' is useless as it is implied by option '--background'."
        );
    }

    let mut config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, "Cannot load settings.");
            return ExitCode::FAILURE;
        }
    };
    args.apply(&mut config);

    if !config.start_server {
        tracing::info!("Running headless, the server is started automatically.");
    }

    let saver = Arc::new(MailSaver::new(config.saver_config()));
    let mut count = 0u64;
    let reporter = saver.subscribe_with("email-reporter", move |email| {
        count += 1;
        tracing::info!(
            count,
            from = %email.from,
            to = ?email.to,
            subject = %email.subject,
            "Received email."
        );
    });
    if let Err(error) = reporter {
        tracing::error!(%error, "Cannot start email reporter.");
        return ExitCode::FAILURE;
    }

    let handler = Arc::new(ServerHandler::new(&config.hostname, Arc::clone(&saver)));
    let model = ServerModel::new(Arc::clone(&handler));
    model.set_port(config.port.clone());
    model.set_host(config.bind_address.clone().unwrap_or_default());

    if let Err(error) = model.toggle() {
        tracing::error!(%error, "Failed to start server.");
        return ExitCode::FAILURE;
    }
    if let Some(addr) = handler.local_addr() {
        tracing::info!(
            %addr,
            output_dir = %config.output_dir.display(),
            memory_mode = config.memory_mode,
            "Server started."
        );
    }

    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(error) => {
            tracing::error!(%error, "Cannot install signal handler.");
            handler.stop();
            return ExitCode::FAILURE;
        }
    };
    if let Some(signal) = signals.forever().next() {
        tracing::info!(signal, "Shutting down.");
    }

    handler.stop();
    if let Err(error) = config.save(&config_path) {
        tracing::warn!(%error, "Cannot save settings.");
    }
    ExitCode::SUCCESS
}
