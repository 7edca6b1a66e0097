//! Command-line client for chunked large-file uploads.

mod config;

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chunklift_transfer::SpeedCalculator;
use chunklift_uploader::credentials::default_token_path;
use chunklift_uploader::{
    CredentialProvider, HttpTransport, ProgressSnapshot, StaticToken, TokenStore,
    UploadCoordinator, UploadHooks, UploadTransport, UploadableFile,
};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::ClientConfig;

#[derive(Parser)]
#[command(name = "chunklift")]
#[command(about = "Upload large files in resumable chunks")]
#[command(version)]
struct Cli {
    /// Client config file path
    #[arg(long, global = true, env = "CHUNKLIFT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct EndpointArgs {
    /// Upload service base URL (overrides client config)
    #[arg(long, env = "CHUNKLIFT_URL")]
    url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file in chunks
    Upload(UploadArgs),
    /// Save a bearer token for an upload service
    Login {
        #[command(flatten)]
        endpoint: EndpointArgs,
        /// Token value (avoid if possible; prefer --token-stdin)
        #[arg(long)]
        token: Option<String>,
        /// Read token from stdin
        #[arg(long, default_value_t = false)]
        token_stdin: bool,
    },
    /// Forget the saved token for an upload service
    Logout {
        #[command(flatten)]
        endpoint: EndpointArgs,
    },
}

#[derive(Args)]
struct UploadArgs {
    /// File to upload
    file: PathBuf,

    #[command(flatten)]
    endpoint: EndpointArgs,

    /// Bearer token (overrides client config and saved tokens)
    #[arg(long, env = "CHUNKLIFT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Chunk size in MiB
    #[arg(long)]
    chunk_size_mb: Option<u64>,

    /// Maximum chunks in flight
    #[arg(long)]
    parallel: Option<usize>,

    /// Retries per chunk after the first failure
    #[arg(long)]
    max_retries: Option<u32>,

    /// Backoff unit in milliseconds; retry n waits n times this
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Name reported to the service (default: the file name)
    #[arg(long)]
    name: Option<String>,

    /// MIME type (default: guessed from the extension)
    #[arg(long)]
    mime_type: Option<String>,

    /// Upload in chunks even if the file is below the size threshold
    #[arg(long, default_value_t = false)]
    force_chunked: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chunklift=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::load(cli.config.as_deref()).context("failed to load config")?;

    match cli.command {
        Commands::Upload(args) => upload(config, args).await,
        Commands::Login {
            endpoint,
            token,
            token_stdin,
        } => login(&config, &endpoint, token, token_stdin),
        Commands::Logout { endpoint } => logout(&config, &endpoint),
    }
}

fn resolve_url(config: &ClientConfig, endpoint: &EndpointArgs) -> Result<String> {
    let url = endpoint
        .url
        .clone()
        .unwrap_or_else(|| config.upload_url.clone());
    if url.is_empty() {
        bail!("no upload URL; pass --url or set upload_url in the client config");
    }
    Ok(url)
}

fn open_token_store() -> Result<Arc<TokenStore>> {
    let path = default_token_path().context("cannot determine config directory")?;
    let store = TokenStore::new(path).context("failed to load token store")?;
    Ok(Arc::new(store))
}

fn login(
    config: &ClientConfig,
    endpoint: &EndpointArgs,
    token: Option<String>,
    token_stdin: bool,
) -> Result<()> {
    let url = resolve_url(config, endpoint)?;
    let token = match (token, token_stdin) {
        (Some(_), true) => bail!("use either --token or --token-stdin, not both"),
        (Some(token), false) => token,
        (None, true) => {
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("failed to read token from stdin")?;
            line.trim().to_string()
        }
        (None, false) => bail!("a token is required (--token or --token-stdin)"),
    };
    if token.is_empty() {
        bail!("token is empty");
    }

    let store = open_token_store()?;
    store.save_token(&url, &token)?;
    println!("Saved token for {url} to {}", store.path().display());
    Ok(())
}

fn logout(config: &ClientConfig, endpoint: &EndpointArgs) -> Result<()> {
    let url = resolve_url(config, endpoint)?;
    let store = open_token_store()?;
    if store.remove_token(&url)? {
        println!("Removed token for {url}");
    } else {
        println!("No token saved for {url}");
    }
    Ok(())
}

/// Picks the token source: flag, then config, then the token store.
fn credentials_for(
    config: &ClientConfig,
    flag: Option<String>,
    url: &str,
) -> Result<Arc<dyn CredentialProvider>> {
    if let Some(token) = flag.or_else(|| config.token.clone()) {
        return Ok(Arc::new(StaticToken::new(token)));
    }
    let store = open_token_store()?;
    if store.get_token(url).is_none() {
        bail!("no token for {url}; run `chunklift login --url {url}` or pass --token");
    }
    Ok(Arc::new(store.for_endpoint(url)))
}

async fn upload(mut config: ClientConfig, args: UploadArgs) -> Result<()> {
    let url = resolve_url(&config, &args.endpoint)?;
    if let Some(v) = args.chunk_size_mb {
        config.chunk_size_mb = v;
    }
    if let Some(v) = args.parallel {
        config.parallel_uploads = v;
    }
    if let Some(v) = args.max_retries {
        config.max_retries = v;
    }
    if let Some(v) = args.retry_delay_ms {
        config.retry_delay_ms = v;
    }
    if let Some(v) = args.timeout_secs {
        config.request_timeout_secs = Some(v);
    }

    let mut file = UploadableFile::open(&args.file)
        .await
        .with_context(|| format!("failed to open {}", args.file.display()))?;
    if let Some(name) = args.name {
        file = file.with_name(name);
    }
    if let Some(mime_type) = args.mime_type {
        file = file.with_mime_type(mime_type);
    }
    if !args.force_chunked && !file.needs_chunk_upload(config.threshold_mb) {
        bail!(
            "{} is {} and does not exceed the {} MiB chunked-upload threshold; \
             pass --force-chunked to upload it anyway",
            args.file.display(),
            format_bytes(file.size()),
            config.threshold_mb
        );
    }

    let credentials = credentials_for(&config, args.token, &url)?;
    let transport: Arc<dyn UploadTransport> = Arc::new(
        HttpTransport::new(&url, credentials, config.request_timeout())
            .context("failed to build HTTP client")?,
    );

    tracing::info!(
        file = %args.file.display(),
        size = file.size(),
        mime_type = file.mime_type(),
        url = %url,
        "starting upload"
    );

    let speed = Arc::new(Mutex::new(SpeedCalculator::default()));
    let hooks = UploadHooks::default().on_progress({
        let speed = Arc::clone(&speed);
        move |snapshot| {
            let mut speed = speed.lock().unwrap_or_else(PoisonError::into_inner);
            speed.record(snapshot.uploaded_bytes);
            let line = render_progress(
                snapshot,
                speed.bytes_per_second(),
                speed.eta(snapshot.remaining_bytes()),
            );
            let mut stderr = std::io::stderr().lock();
            let _ = write!(stderr, "\r{line}");
            let _ = stderr.flush();
        }
    });

    let coordinator = Arc::new(
        UploadCoordinator::new(file, transport, config.upload_options())
            .context("invalid upload options")?
            .with_hooks(hooks),
    );

    let interrupt = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, aborting upload");
                coordinator.abort().await;
            }
        })
    };

    let result = coordinator.start().await;
    interrupt.abort();
    eprintln!();

    let response = result.context("upload failed")?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn render_progress(snapshot: &ProgressSnapshot, bytes_per_second: f64, eta: Option<Duration>) -> String {
    let eta = eta.map_or_else(|| "--".to_string(), format_duration);
    format!(
        "{:>3}%  {}/{} chunks  {}/{}  {}/s  eta {}",
        snapshot.percentage,
        snapshot.uploaded_chunks,
        snapshot.total_chunks,
        format_bytes(snapshot.uploaded_bytes),
        format_bytes(snapshot.total_bytes),
        format_bytes(bytes_per_second as u64),
        eta
    )
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}
