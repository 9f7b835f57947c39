//! Core application

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::api::ApiServer;
use crate::core::banner;
use crate::core::cli::{self, CliConfig, Commands, SystemCommands};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::core::storage::AppStorage;
use crate::data::StorageService;
use crate::domain::{
    HistoryReader, IngestCoordinator, IngestSettings, NamingConfig, RetentionEnforcer, build_namer,
};

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub storage: AppStorage,
    pub database: Arc<StorageService>,
    pub retention: Arc<RetentionEnforcer>,
    pub ingest: Arc<IngestCoordinator>,
    pub history: Arc<HistoryReader>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        match command {
            Some(Commands::System {
                command: system_cmd,
            }) => {
                return Self::handle_system_command(system_cmd);
            }
            Some(Commands::Start) | None => {}
        }

        let app = Self::init(&cli_config).await?;
        Self::start_server(app).await
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        let storage = AppStorage::init(&config).await?;

        let database = Arc::new(
            StorageService::init(config.database.backend, &storage)
                .await
                .context("Failed to initialize storage backend")?,
        );
        tracing::debug!(backend = %database.backend(), "Storage initialized");

        let adapter = database.adapter(Duration::from_secs(config.database.timeout_secs));
        let namer = build_namer(NamingConfig::from(&config.database));
        let settings = IngestSettings::from(&config);

        let retention = Arc::new(RetentionEnforcer::new(
            Arc::clone(&adapter),
            &config.database.truncation,
        ));
        let ingest = Arc::new(IngestCoordinator::new(
            settings.clone(),
            Arc::clone(&namer),
            Arc::clone(&adapter),
            Arc::clone(&retention),
        )?);
        let history = Arc::new(HistoryReader::new(namer, adapter, &settings));
        let shutdown = ShutdownService::new(database.clone());

        Ok(Self {
            shutdown,
            config,
            storage,
            database,
            retention,
            ingest,
            history,
        })
    }

    fn handle_system_command(cmd: SystemCommands) -> Result<()> {
        match cmd {
            SystemCommands::Prune { yes } => Self::prune_data(yes),
        }
    }

    fn prune_data(skip_confirm: bool) -> Result<()> {
        let data_dir = AppStorage::resolve_data_dir();

        if !data_dir.exists() {
            println!(
                "Nothing to prune. Data directory does not exist: {}",
                data_dir.display()
            );
            return Ok(());
        }

        let data_dir = data_dir.canonicalize().unwrap_or(data_dir);

        println!("This will permanently delete the local data directory:");
        println!("  {}", data_dir.display());
        println!();
        println!(
            "Make sure the server is not running. \
             Deleting data while the server is running will cause data corruption."
        );

        if !skip_confirm {
            print!("\nContinue? [y/N] ");
            std::io::Write::flush(&mut std::io::stdout())?;

            let mut input = String::new();
            std::io::stdin().read_line(&mut input)?;

            if !matches!(input.trim().to_lowercase().as_str(), "y" | "yes") {
                println!("Aborted.");
                return Ok(());
            }
        }

        std::fs::remove_dir_all(&data_dir)
            .with_context(|| format!("Failed to delete data directory: {}", data_dir.display()))?;
        println!("Pruned: {}", data_dir.display());
        Ok(())
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start_server(app: Self) -> Result<()> {
        // Install signal handlers FIRST (before any blocking calls)
        app.shutdown.install_signal_handlers();

        app.start_background_tasks().await;

        banner::print_banner(&app.config, &app.storage);

        let server = ApiServer::new(app);
        let app = server.start().await?;
        app.shutdown.shutdown().await;

        Ok(())
    }

    pub async fn start_background_tasks(&self) {
        if let Some(h) = self
            .database
            .start_checkpoint_task(self.shutdown.subscribe())
        {
            self.shutdown.register(h).await;
        }

        if let Some(h) = self.retention.start_retention_task(
            self.config.database.truncation.interval_secs,
            self.shutdown.subscribe(),
        ) {
            self.shutdown.register(h).await;
        }

        if let Some(h) = self.ingest.start_proof_of_life_task(
            self.config.logging.proof_of_life_interval,
            self.shutdown.subscribe(),
        ) {
            self.shutdown.register(h).await;
        }

        tracing::debug!("Background tasks started");
    }
}
