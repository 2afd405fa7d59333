use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lodestone_lib::{
    descriptor, prepare_launch, verify_version, AccountCredential, CancelSource, CancelToken,
    DataLayout, FetchConfig, FetchError, HashedFetcher, InstallError, InstallOptions, Installer,
    LogSink, LogStream, ManifestResolver, PlatformContext, ProcessHost, ProcessState,
    ProgressSink, ServerAddress, TaskId, UserSettings, DEFAULT_WORKERS,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const NETWORK: i32 = 3;
    pub const INTEGRITY: i32 = 4;
    pub const LAUNCH: i32 = 5;
    pub const CANCELLED: i32 = 6;
}

#[derive(Parser)]
#[command(name = "lodestone", version, about = "Install, verify and launch game versions")]
struct Cli {
    /// Launcher data directory (defaults to the platform data dir)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Materialize a version: client jar, libraries, natives and assets
    Install {
        version_id: String,

        /// Parallel download workers (1..=32)
        #[arg(long)]
        workers: Option<usize>,

        /// Refetch the version descriptor even if cached
        #[arg(long)]
        refresh: bool,
    },

    /// Install if needed, then launch
    Launch {
        version_id: String,

        /// Launch offline with this player name
        #[arg(long, conflicts_with = "account")]
        offline: Option<String>,

        /// Use a stored credential by handle
        #[arg(long)]
        account: Option<String>,

        /// Maximum heap in MiB
        #[arg(long)]
        ram: Option<u32>,

        /// Minimum heap in MiB
        #[arg(long)]
        min_ram: Option<u32>,

        /// Join this server after startup (host[:port])
        #[arg(long)]
        server: Option<String>,

        #[arg(long, requires = "height")]
        width: Option<u32>,

        #[arg(long, requires = "width")]
        height: Option<u32>,

        /// Launch in demo mode
        #[arg(long)]
        demo: bool,

        /// Java binary to use instead of auto-detection
        #[arg(long)]
        java: Option<PathBuf>,

        #[arg(long)]
        workers: Option<usize>,
    },

    /// Recompute hashes of all on-disk artifacts for a version
    Verify { version_id: String },

    /// List versions known to the upstream manifest
    List {
        /// Filter by type: release, snapshot, old_alpha, old_beta
        #[arg(long = "type", value_name = "TYPE")]
        kind: Option<String>,
    },
}

/// Optional `settings.json` in the data root. Opaque defaults the flags can
/// override; absence is fine.
#[derive(Debug, Default, Deserialize)]
struct Settings {
    java_path: Option<PathBuf>,
    min_heap_mb: Option<u32>,
    max_heap_mb: Option<u32>,
    workers: Option<usize>,
}

impl Settings {
    fn load(layout: &DataLayout) -> Self {
        let path = layout.root().join("settings.json");
        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    log::warn!("Ignoring malformed {}: {}", path.display(), e);
                    Settings::default()
                }
            },
            Err(_) => Settings::default(),
        }
    }
}

/// Stored credentials, written by whatever auth front-end the user runs.
/// The launcher only looks entries up by handle.
#[derive(Debug, Deserialize)]
struct StoredAccount {
    username: String,
    uuid: String,
    access_token: String,
    user_type: String,
    #[serde(default)]
    xuid: Option<String>,
}

fn load_account(layout: &DataLayout, handle: &str) -> Result<AccountCredential> {
    let path = layout.root().join("accounts.json");
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("No account store at {}", path.display()))?;
    let accounts: std::collections::HashMap<String, StoredAccount> =
        serde_json::from_str(&contents)
            .with_context(|| format!("Malformed account store at {}", path.display()))?;
    let account = accounts
        .get(handle)
        .with_context(|| format!("No account with handle {:?}", handle))?;

    Ok(AccountCredential {
        mode: lodestone_lib::AccountMode::Online,
        username: account.username.clone(),
        uuid: account.uuid.clone(),
        access_token: account.access_token.clone(),
        user_type: account.user_type.clone(),
        xuid: account.xuid.clone(),
    })
}

/// Console progress: one status line per batch, updated at percent steps.
struct ConsoleProgress {
    total_tasks: AtomicUsize,
    done_tasks: AtomicUsize,
    total_bytes: AtomicU64,
    bytes: AtomicU64,
    last_percent: AtomicU64,
}

impl ConsoleProgress {
    fn new() -> Self {
        Self {
            total_tasks: AtomicUsize::new(0),
            done_tasks: AtomicUsize::new(0),
            total_bytes: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            last_percent: AtomicU64::new(0),
        }
    }

    fn report(&self) {
        let total_bytes = self.total_bytes.load(Ordering::SeqCst);
        let percent = if total_bytes > 0 {
            self.bytes.load(Ordering::SeqCst) * 100 / total_bytes
        } else {
            let total = self.total_tasks.load(Ordering::SeqCst).max(1) as u64;
            self.done_tasks.load(Ordering::SeqCst) as u64 * 100 / total
        };
        let percent = percent.min(100);

        // Only speak up every five points to keep the console readable.
        let previous = self.last_percent.load(Ordering::SeqCst);
        if percent >= previous + 5 || (percent == 100 && previous != 100) {
            self.last_percent.store(percent, Ordering::SeqCst);
            eprintln!(
                "  {}% ({}/{} files)",
                percent,
                self.done_tasks.load(Ordering::SeqCst),
                self.total_tasks.load(Ordering::SeqCst)
            );
        }
    }
}

impl ProgressSink for ConsoleProgress {
    fn on_batch_start(&self, total_tasks: usize, total_bytes: u64) {
        self.total_tasks.store(total_tasks, Ordering::SeqCst);
        self.total_bytes.store(total_bytes, Ordering::SeqCst);
        self.done_tasks.store(0, Ordering::SeqCst);
        self.bytes.store(0, Ordering::SeqCst);
        self.last_percent.store(0, Ordering::SeqCst);
        if total_tasks > 0 {
            eprintln!(
                "Downloading {} files ({:.1} MiB declared)...",
                total_tasks,
                total_bytes as f64 / (1024.0 * 1024.0)
            );
        }
    }

    fn on_bytes(&self, _task: TaskId, delta: u64) {
        self.bytes.fetch_add(delta, Ordering::SeqCst);
        self.report();
    }

    fn on_complete(&self, _task: TaskId, result: Result<(), &FetchError>) {
        self.done_tasks.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = result {
            if !matches!(e, FetchError::Cancelled) {
                eprintln!("  failed: {}", e);
            }
        }
        self.report();
    }
}

/// Forward child output to our own stdio, stream for stream, and tee every
/// line into the per-launch log file when one could be opened.
struct ConsoleLogSink {
    log_file: Option<std::sync::Mutex<std::io::BufWriter<std::fs::File>>>,
}

impl ConsoleLogSink {
    fn new(log_path: Option<PathBuf>) -> Self {
        let log_file = log_path.and_then(|path| {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match std::fs::File::create(&path) {
                Ok(file) => Some(std::sync::Mutex::new(std::io::BufWriter::new(file))),
                Err(e) => {
                    log::warn!("Cannot open game log {}: {}", path.display(), e);
                    None
                }
            }
        });
        Self { log_file }
    }
}

impl LogSink for ConsoleLogSink {
    fn on_line(&self, stream: LogStream, line: &str) {
        match stream {
            LogStream::Stdout => println!("{}", line),
            LogStream::Stderr => eprintln!("{}", line),
        }
        if let Some(ref file) = self.log_file {
            use std::io::Write;
            if let Ok(mut file) = file.lock() {
                let _ = writeln!(file, "{}", line);
                let _ = file.flush();
            }
        }
    }
}

fn default_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lodestone")
}

fn cancel_on_ctrl_c() -> CancelToken {
    let (source, token) = CancelSource::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            source.cancel();
        }
    });
    token
}

fn parse_server(raw: &str) -> Result<ServerAddress> {
    match raw.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => Ok(ServerAddress {
            host: host.to_string(),
            port: Some(
                port.parse()
                    .with_context(|| format!("Invalid server port {:?}", port))?,
            ),
        }),
        _ => Ok(ServerAddress {
            host: raw.to_string(),
            port: None,
        }),
    }
}

fn install_exit_code(err: &InstallError) -> i32 {
    match err {
        InstallError::Cancelled => exit_codes::CANCELLED,
        InstallError::Manifest(_) => exit_codes::NETWORK,
        InstallError::Plan(_) => exit_codes::INTEGRITY,
        InstallError::Io(_) => 1,
        InstallError::Tasks { first, .. } => {
            if first.is_integrity() {
                exit_codes::INTEGRITY
            } else {
                match first {
                    FetchError::Transport { .. }
                    | FetchError::HttpStatus { .. }
                    | FetchError::Unauthorized { .. } => exit_codes::NETWORK,
                    FetchError::Cancelled => exit_codes::CANCELLED,
                    _ => 1,
                }
            }
        }
    }
}

struct App {
    layout: DataLayout,
    resolver: Arc<ManifestResolver>,
    settings: Settings,
}

impl App {
    fn new(root: Option<PathBuf>) -> Result<Self> {
        let layout = DataLayout::new(root.unwrap_or_else(default_root));
        let settings = Settings::load(&layout);
        let resolver = Arc::new(ManifestResolver::new(layout.clone())?);
        Ok(Self {
            layout,
            resolver,
            settings,
        })
    }

    fn installer(&self) -> Result<Installer> {
        let fetcher = Arc::new(HashedFetcher::new(FetchConfig::default())?);
        Ok(Installer::new(
            self.layout.clone(),
            self.resolver.clone(),
            fetcher,
            PlatformContext::current(),
        ))
    }

    async fn install(
        &self,
        version_id: &str,
        workers: Option<usize>,
        refresh: bool,
        cancel: &CancelToken,
    ) -> i32 {
        let options = InstallOptions {
            workers: workers
                .or(self.settings.workers)
                .unwrap_or(DEFAULT_WORKERS),
            refresh_descriptor: refresh,
        };
        let installer = match self.installer() {
            Ok(installer) => installer,
            Err(e) => {
                eprintln!("error: {:#}", e);
                return 1;
            }
        };

        match installer
            .install(version_id, &options, Arc::new(ConsoleProgress::new()), cancel)
            .await
        {
            Ok(summary) => {
                println!(
                    "Installed {}: {} tasks, {:.1} MiB transferred",
                    version_id,
                    summary.tasks_completed,
                    summary.bytes_transferred as f64 / (1024.0 * 1024.0)
                );
                exit_codes::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {}", e);
                install_exit_code(&e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn launch(
        &self,
        version_id: &str,
        offline: Option<String>,
        account: Option<String>,
        ram: Option<u32>,
        min_ram: Option<u32>,
        server: Option<String>,
        resolution: Option<(u32, u32)>,
        demo: bool,
        java: Option<PathBuf>,
        workers: Option<usize>,
        cancel: &CancelToken,
    ) -> i32 {
        // Install-if-needed: a no-op when everything is present and verified.
        let code = self.install(version_id, workers, false, cancel).await;
        if code != exit_codes::SUCCESS {
            return code;
        }

        let descriptor = match self.resolver.fetch_descriptor(version_id, false).await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                eprintln!("error: {:#}", e);
                return exit_codes::NETWORK;
            }
        };

        let credential = match (offline, account) {
            (Some(name), _) => AccountCredential::offline(&name),
            (None, Some(handle)) => match load_account(&self.layout, &handle) {
                Ok(credential) => credential,
                Err(e) => {
                    eprintln!("error: {:#}", e);
                    return exit_codes::LAUNCH;
                }
            },
            (None, None) => AccountCredential::offline("Player"),
        };

        let server_join = match server.as_deref().map(parse_server).transpose() {
            Ok(server_join) => server_join,
            Err(e) => {
                eprintln!("error: {:#}", e);
                return exit_codes::LAUNCH;
            }
        };

        let settings = UserSettings {
            min_heap_mb: min_ram.or(self.settings.min_heap_mb),
            max_heap_mb: ram.or(self.settings.max_heap_mb),
            resolution,
            server_join,
            extra_jvm_args: Vec::new(),
            java_binary: java.or_else(|| self.settings.java_path.clone()),
            demo,
        };

        let ctx = PlatformContext::current();
        let working_dir = self.layout.root().to_path_buf();

        let prepared = match prepare_launch(
            &self.layout,
            &ctx,
            &descriptor,
            &settings,
            &credential,
            &working_dir,
        )
        .await
        {
            Ok(prepared) => prepared,
            Err(e) => {
                eprintln!("error: {}", e);
                return exit_codes::LAUNCH;
            }
        };

        for warning in &prepared.plan.warnings {
            eprintln!("warning: {}", warning);
        }

        let epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let log_path = self
            .layout
            .root()
            .join("logs")
            .join(format!("{}-{}.log", version_id, epoch));

        let sink = Arc::new(ConsoleLogSink::new(Some(log_path)));
        let host = match ProcessHost::spawn(&prepared.plan, sink).await {
            Ok(host) => host,
            Err(e) => {
                eprintln!("error: {}", e);
                prepared.cleanup().await;
                return exit_codes::LAUNCH;
            }
        };

        println!("Launched {} (pid {})", version_id, host.pid());

        let state = tokio::select! {
            state = host.wait() => state,
            _ = cancel.cancelled_wait() => {
                match host.terminate(Duration::from_secs(10)).await {
                    Ok(state) => state,
                    Err(e) => {
                        eprintln!("error: failed to terminate child: {}", e);
                        prepared.cleanup().await;
                        return exit_codes::LAUNCH;
                    }
                }
            }
        };

        prepared.cleanup().await;

        match state {
            ProcessState::Exited(code) => {
                println!("Game exited with code {}", code);
                exit_codes::SUCCESS
            }
            ProcessState::Terminated => exit_codes::CANCELLED,
            ProcessState::Failed(message) => {
                eprintln!("error: {}", message);
                exit_codes::LAUNCH
            }
            other => {
                eprintln!("error: unexpected final state {:?}", other);
                exit_codes::LAUNCH
            }
        }
    }

    async fn verify(&self, version_id: &str) -> i32 {
        let descriptor_path = self.layout.descriptor_path(version_id);
        let descriptor = if descriptor_path.exists() {
            match descriptor::load_descriptor(&descriptor_path).await {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    eprintln!("error: {:#}", e);
                    return exit_codes::INTEGRITY;
                }
            }
        } else {
            eprintln!(
                "error: {} is not installed (no descriptor at {})",
                version_id,
                descriptor_path.display()
            );
            return exit_codes::INTEGRITY;
        };

        let ctx = PlatformContext::current();
        match verify_version(&self.layout, &ctx, &descriptor).await {
            Ok(mismatches) if mismatches.is_empty() => {
                println!("{}: all artifacts verified", version_id);
                exit_codes::SUCCESS
            }
            Ok(mismatches) => {
                println!("{}: {} mismatched artifacts", version_id, mismatches.len());
                for mismatch in &mismatches {
                    println!("  {}", mismatch);
                }
                // Mismatches are data, not an error; rerun `install` to heal.
                exit_codes::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {:#}", e);
                1
            }
        }
    }

    async fn list(&self, kind: Option<String>) -> i32 {
        let manifest = match self.resolver.fetch_manifest().await {
            Ok(manifest) => manifest,
            Err(e) => {
                eprintln!("error: {:#}", e);
                return exit_codes::NETWORK;
            }
        };

        let filter = match kind
            .as_deref()
            .map(|s| s.parse::<lodestone_lib::VersionType>())
            .transpose()
        {
            Ok(filter) => filter,
            Err(e) => {
                eprintln!("error: {:#}", e);
                return 2;
            }
        };

        for version in &manifest.versions {
            if let Some(wanted) = filter {
                if version.version_type != wanted {
                    continue;
                }
            }
            let installed = if self.layout.descriptor_path(&version.id).exists() {
                " [installed]"
            } else {
                ""
            };
            let latest = if version.id == manifest.latest.release
                || version.id == manifest.latest.snapshot
            {
                " [latest]"
            } else {
                ""
            };
            println!(
                "{:<20} {:<9} {}{}{}",
                version.id,
                version.version_type.as_str(),
                version.release_time.format("%Y-%m-%d"),
                installed,
                latest
            );
        }

        exit_codes::SUCCESS
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let app = match App::new(cli.root) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    };

    let cancel = cancel_on_ctrl_c();

    let code = match cli.command {
        Command::Install {
            version_id,
            workers,
            refresh,
        } => app.install(&version_id, workers, refresh, &cancel).await,
        Command::Launch {
            version_id,
            offline,
            account,
            ram,
            min_ram,
            server,
            width,
            height,
            demo,
            java,
            workers,
        } => {
            let resolution = width.zip(height);
            app.launch(
                &version_id,
                offline,
                account,
                ram,
                min_ram,
                server,
                resolution,
                demo,
                java,
                workers,
                &cancel,
            )
            .await
        }
        Command::Verify { version_id } => app.verify(&version_id).await,
        Command::List { kind } => app.list(kind).await,
    };

    std::process::exit(code);
}
