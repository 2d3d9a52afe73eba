//! Main application orchestration.
//!
//! Builds the shared pieces (admission controller, token book, state store,
//! settings source), spawns the signal source, the order engine, one
//! position monitor per account and the optional token reloader, then
//! waits for Ctrl-C and cancels everything.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::tokens::{fetch_contracts, merge, TokensFile};
use futures_util::future::join_all;
use spreadbot_core::{FileSettings, SettingsSource, TokenBook};
use spreadbot_exchange::{AdmissionController, ContractDetail, DynExchange, ExchangeApi, MexcClient};
use spreadbot_executor::{OrderEngine, OrderProcessor};
use spreadbot_feed::{SignalSource, SpreadDetector};
use spreadbot_position::PositionMonitor;
use spreadbot_store::{DynStore, MemoryStore, RedisStore, RiskState};
use spreadbot_telemetry::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Main application.
pub struct Application {
    config: AppConfig,
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Build one client per configured account. The first is the primary.
    fn build_clients(&self, settings: &dyn SettingsSource, limiter: &Arc<AdmissionController>) -> AppResult<Vec<DynExchange>> {
        let current = settings.current();
        let primary = current
            .primary_token()
            .ok_or_else(|| AppError::Config("no auth_token in settings and MEXC_AUTH_TOKEN unset".into()))?;

        let client_config = self.config.client_config();
        let mut clients: Vec<DynExchange> = Vec::new();
        for token in std::iter::once(primary).chain(current.extra_accounts.iter().filter(|t| !t.is_empty()).cloned()) {
            let client = MexcClient::new(&client_config, token, limiter.clone())?;
            info!(account = %client.account(), "Account client ready");
            clients.push(Arc::new(client));
        }
        Ok(clients)
    }

    async fn connect_store(&self) -> AppResult<DynStore> {
        match &self.config.redis_url {
            Some(url) => {
                let store = RedisStore::connect(url).await?;
                Ok(Arc::new(store))
            }
            None => {
                warn!("No redis_url configured, using in-memory state");
                Ok(Arc::new(MemoryStore::new()))
            }
        }
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> AppResult<()> {
        let limiter = Arc::new(AdmissionController::new(self.config.exchange.requests_per_second));
        let settings = Arc::new(FileSettings::open(&self.config.settings_path)?);
        let clients = self.build_clients(settings.as_ref(), &limiter)?;
        let primary = clients
            .first()
            .cloned()
            .ok_or_else(|| AppError::Config("no exchange accounts".into()))?;

        let contracts = Arc::new(fetch_contracts(primary.as_ref()).await);
        let overrides = TokensFile::from_file(&self.config.tokens_path)?;
        let book = Arc::new(TokenBook::from_configs(merge(&contracts, &overrides)));
        if book.is_empty() {
            return Err(AppError::Config("token book is empty".into()));
        }

        let risk = RiskState::new(self.connect_store().await?);
        let cancel = CancellationToken::new();
        let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

        // Signal source -> order engine.
        let (tx, rx) = mpsc::unbounded_channel();
        let source = SignalSource::new(
            self.config.feed_config(),
            SpreadDetector::new(book.clone(), self.config.spread_filter()),
            tx,
        );
        tasks.push(("signal_source", tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if let Err(e) = source.run(cancel).await {
                    error!(error = %e, "Signal source stopped");
                }
            }
        })));

        let processor = Arc::new(OrderProcessor::new(
            primary,
            book.clone(),
            settings.clone(),
            risk.clone(),
        ));
        let engine = OrderEngine::new(processor);
        tasks.push(("order_engine", tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if let Err(e) = engine.run(rx, cancel).await {
                    error!(error = %e, "Order engine stopped");
                }
            }
        })));

        for client in clients {
            let monitor = PositionMonitor::new(client, book.clone(), settings.clone(), risk.clone());
            tasks.push(("position_monitor", tokio::spawn({
                let cancel = cancel.clone();
                async move { monitor.run(cancel).await }
            })));
        }

        if let Some(every) = self.config.tokens_reload_interval() {
            let path = self.config.tokens_path.clone();
            let book = book.clone();
            let contracts = contracts.clone();
            let cancel = cancel.clone();
            tasks.push(("token_reloader", tokio::spawn(async move {
                reload_tokens(path, every, book, contracts, cancel).await;
            })));
        }

        info!(tasks = tasks.len(), tokens = book.len(), "Application running");

        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
        }
        cancel.cancel();

        let (names, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        for (name, result) in names.into_iter().zip(join_all(handles).await) {
            if let Err(e) = result {
                error!(task = name, error = %e, "Task ended abnormally");
            }
        }

        match Metrics::render() {
            Ok(text) => debug!(metrics = %text, "Final metrics"),
            Err(e) => warn!(error = %e, "Failed to render metrics"),
        }
        info!("Shutdown complete");
        Ok(())
    }
}

/// Re-read the tokens file on a fixed interval and apply it in one update.
///
/// A broken file keeps the current book.
pub async fn reload_tokens(
    path: String,
    every: Duration,
    book: Arc<TokenBook>,
    contracts: Arc<Vec<ContractDetail>>,
    cancel: CancellationToken,
) {
    info!(%path, secs = every.as_secs(), "Token reloader started");
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(every) => {}
        }
        match TokensFile::from_file(&path) {
            Ok(file) => book.apply(merge(&contracts, &file)),
            Err(e) => warn!(%path, error = %e, "Token reload failed, keeping current book"),
        }
    }
}
