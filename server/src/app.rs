//! Core application

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use crate::api::ApiServer;
use crate::core::cli::{self, CliConfig};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG, ENV_LOG_FORMAT, FLUSH_QUEUE_CAPACITY};
use crate::core::shutdown::ShutdownService;
use crate::data::driver_for_url;
use crate::domain::{FlushEvent, FlushPipeline, FlushSink};

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub sink: Arc<FlushSink>,
    pub flush_events: mpsc::Sender<FlushEvent>,
    flush_queue: Option<mpsc::Receiver<FlushEvent>>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let cli_config = cli::parse();
        let app = Self::init(&cli_config)?;
        Self::start_server(app).await
    }

    fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;

        let driver = driver_for_url(&config.sink.storage_url)
            .context("Failed to initialize storage driver")?;
        tracing::debug!(backend = driver.backend_name(), "Storage initialized");

        let sink = Arc::new(FlushSink::new(&config.sink, driver));
        let (flush_events, flush_queue) = mpsc::channel(FLUSH_QUEUE_CAPACITY);
        let shutdown = ShutdownService::new(Arc::clone(&sink));

        Ok(Self {
            shutdown,
            config,
            sink,
            flush_events,
            flush_queue: Some(flush_queue),
        })
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        let json = std::env::var(ENV_LOG_FORMAT)
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if json {
            tracing_subscriber::fmt()
                .json()
                .with_target(false)
                .with_env_filter(filter)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_target(false)
                .with_thread_ids(false)
                .with_level(true)
                .with_ansi(true)
                .compact()
                .with_env_filter(filter)
                .init();
        }
    }

    async fn start_server(mut app: Self) -> Result<()> {
        // Install signal handlers FIRST (before any blocking calls)
        app.shutdown.install_signal_handlers();

        app.start_background_tasks().await?;

        tracing::info!(
            host = %app.config.server.host,
            port = app.config.server.port,
            backend = ?app.config.sink.backend(),
            flush_rate_secs = app.config.sink.flush_rate_secs,
            prefix_routing = app.config.sink.prefix_routing,
            "capflush started"
        );

        let server = ApiServer::new(app);
        let app = server.start().await?;
        app.shutdown.shutdown().await;

        Ok(())
    }

    pub async fn start_background_tasks(&mut self) -> Result<()> {
        let queue = self
            .flush_queue
            .take()
            .context("Background tasks already started")?;

        let pipeline = FlushPipeline::new(Arc::clone(&self.sink));
        self.shutdown
            .register(pipeline.start(queue, self.shutdown.subscribe()))
            .await;

        tracing::debug!("Background tasks started");
        Ok(())
    }
}
