//! Runtime orchestration.
//!
//! [`CinderRuntime`] owns one handler per module kind, wired from a
//! [`CinderConfig`]:
//!
//! ```text
//! config ─▶ handlers ─▶ load directories ─▶ init modules ─▶ emit "ready"
//! ```
//!
//! The application's event source is registered on the listener handler as
//! the `client` emitter, so listeners bind to it without naming it.
//!
//! ```rust,ignore
//! use cinder_runtime::CinderRuntime;
//!
//! let runtime = CinderRuntime::builder()
//!     .config_file("config/cinder.toml")
//!     .emitter(client_events.clone())
//!     .build()?;
//!
//! runtime.run().await?;
//! ```

use std::hash::Hash;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cinder_core::{ClientRef, EventSource, HandlerOptions, LoadResult};
use cinder_framework::{
    CommandHandler, DEFAULT_EMITTER, InhibitorHandler, LanguageHandler, ListenerHandler, MonitorHandler,
    RateLimitManager,
};
use tokio::signal;
use tracing::{debug, info, warn};

use crate::config::{CinderConfig, ConfigLoader, ConfigResult, HandlerConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// Event emitted on the client source once every module is initialized.
pub const READY: &str = "ready";

/// Module counts per handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub commands: usize,
    pub listeners: usize,
    pub inhibitors: usize,
    pub monitors: usize,
    pub languages: usize,
}

impl RuntimeStats {
    pub fn total(&self) -> usize {
        self.commands + self.listeners + self.inhibitors + self.monitors + self.languages
    }
}

/// The set of handlers behind one application.
pub struct CinderRuntime {
    config: CinderConfig,
    client: EventSource,
    commands: CommandHandler,
    listeners: ListenerHandler,
    inhibitors: InhibitorHandler,
    monitors: MonitorHandler,
    languages: LanguageHandler,
    running: AtomicBool,
}

impl CinderRuntime {
    /// Creates a runtime from `cinder.toml` in the working directory, or
    /// from defaults if it cannot be loaded.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                CinderConfig::default()
            });

        Self::from_config(&config)
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from configuration, with a fresh client event
    /// source.
    ///
    /// Initializes logging from `config.logging` unless a subscriber is
    /// already installed.
    pub fn from_config(config: &CinderConfig) -> Self {
        Self::assemble(config.clone(), EventSource::new(DEFAULT_EMITTER), None)
    }

    fn assemble(config: CinderConfig, client: EventSource, app: Option<ClientRef>) -> Self {
        logging::init_from_config(&config.logging);

        let handlers = &config.handlers;
        let options = |name: &str, section: &HandlerConfig| {
            let mut options = HandlerOptions::new(name).settings(config.module_settings(name));
            if let Some(directory) = handlers.resolve(section) {
                options = options.directory(directory);
            }
            if let Some(app) = &app {
                options = options.client(app.clone());
            }
            if !section.use_registry {
                options = options.without_registry();
            }
            options
        };

        let commands = CommandHandler::new(options("commands", &handlers.commands));
        let listeners = ListenerHandler::new(options("listeners", &handlers.listeners));
        let inhibitors =
            InhibitorHandler::with_policy(options("inhibitors", &handlers.inhibitors), config.inhibitor.policy);
        let monitors = MonitorHandler::new(options("monitors", &handlers.monitors));
        let languages = LanguageHandler::new(options("languages", &handlers.languages));

        listeners.set_emitter(DEFAULT_EMITTER, client.clone());
        languages.set_default_namespace(config.language.default_namespace.clone());
        languages.set_fallback(config.language.fallback.clone());

        info!(
            log_level = %config.logging.level,
            inhibitor_policy = ?config.inhibitor.policy,
            "Runtime initialized from configuration"
        );

        Self {
            config,
            client,
            commands,
            listeners,
            inhibitors,
            monitors,
            languages,
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &CinderConfig {
        &self.config
    }

    /// The application event source, registered as the `client` emitter.
    pub fn client(&self) -> &EventSource {
        &self.client
    }

    pub fn commands(&self) -> &CommandHandler {
        &self.commands
    }

    pub fn listeners(&self) -> &ListenerHandler {
        &self.listeners
    }

    pub fn inhibitors(&self) -> &InhibitorHandler {
        &self.inhibitors
    }

    pub fn monitors(&self) -> &MonitorHandler {
        &self.monitors
    }

    pub fn languages(&self) -> &LanguageHandler {
        &self.languages
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Current module counts.
    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            commands: self.commands.len(),
            listeners: self.listeners.len(),
            inhibitors: self.inhibitors.len(),
            monitors: self.monitors.len(),
            languages: self.languages.len(),
        }
    }

    /// A rate limiter manager sweeping at the configured interval.
    pub fn rate_limits<K>(&self, capacity: u32, cooldown: Duration) -> RateLimitManager<K>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
    {
        RateLimitManager::with_sweep(
            capacity,
            cooldown,
            self.config.ratelimit.sweep_interval(),
            |_, limit| limit.expired(),
        )
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Loads the directory of every enabled handler.
    ///
    /// Languages load first and listeners last. Per-file failures are
    /// reported on each handler's `loadError` event; only an unreadable
    /// directory fails the call.
    pub async fn load(&self) -> RuntimeResult<RuntimeStats> {
        let sections = &self.config.handlers;
        Self::load_section("languages", &sections.languages, self.languages.load_directory()).await?;
        Self::load_section("inhibitors", &sections.inhibitors, self.inhibitors.load_directory()).await?;
        Self::load_section("monitors", &sections.monitors, self.monitors.load_directory()).await?;
        Self::load_section("commands", &sections.commands, self.commands.load_directory()).await?;
        Self::load_section("listeners", &sections.listeners, self.listeners.load_directory()).await?;

        let stats = self.stats();
        info!(total = stats.total(), ?stats, "Modules loaded");
        Ok(stats)
    }

    async fn load_section(
        name: &'static str,
        section: &HandlerConfig,
        load: impl Future<Output = LoadResult<usize>>,
    ) -> RuntimeResult<usize> {
        if !section.enabled {
            debug!(handler = name, "Handler disabled, skipping load");
            return Ok(0);
        }
        load.await.map_err(|source| RuntimeError::Load { handler: name, source })
    }

    /// Initializes every module not yet initialized, then emits
    /// [`READY`] on the client source.
    pub async fn ready(&self) {
        self.languages.init_all().await;
        self.inhibitors.init_all().await;
        self.monitors.init_all().await;
        self.commands.init_all().await;
        self.listeners.init_all().await;

        self.client.emit(READY, ());
        info!("Runtime ready");
    }

    /// Loads and initializes all modules.
    pub async fn start(&self) -> RuntimeResult<RuntimeStats> {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("Runtime is already running");
            return Ok(self.stats());
        }

        info!("Starting Cinder runtime");
        let stats = match self.load().await {
            Ok(stats) => stats,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                return Err(e);
            }
        };
        self.ready().await;
        Ok(stats)
    }

    /// Removes every module, listeners first.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            warn!("Runtime is not running");
            return;
        }

        info!("Stopping Cinder runtime");
        self.listeners.clear();
        self.commands.clear();
        self.monitors.clear();
        self.inhibitors.clear();
        self.languages.clear();
        info!("Runtime stopped");
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;
        info!("Cinder runtime is now running. Press Ctrl+C to stop.");

        let waited = wait_for_shutdown().await;
        self.stop().await;
        waited
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await;
        Ok(())
    }
}

impl Default for CinderRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for Ctrl+C or, on Unix, SIGTERM.
async fn wait_for_shutdown() -> RuntimeResult<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`CinderRuntime`] with custom configuration.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    emitter: Option<EventSource>,
    client: Option<ClientRef>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            emitter: None,
            client: None,
        }
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    pub fn merge(mut self, config: CinderConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Uses `source` as the client event source instead of a fresh one.
    pub fn emitter(mut self, source: EventSource) -> Self {
        self.emitter = Some(source);
        self
    }

    /// Application object handed to every module factory.
    pub fn client(mut self, client: ClientRef) -> Self {
        self.client = Some(client);
        self
    }

    pub fn build(self) -> ConfigResult<CinderRuntime> {
        let config = self.config_loader.load()?;
        let emitter = self
            .emitter
            .unwrap_or_else(|| EventSource::new(DEFAULT_EMITTER));
        Ok(CinderRuntime::assemble(config, emitter, self.client))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;

    use cinder_core::events::LISTENER_RAN;
    use cinder_core::{BoxError, BoxFuture, LoadContext, LoadError, LoadedModule, ModuleDescriptor, loaded};
    use cinder_framework::{
        Command, CommandOptions, InhibitorPolicy, Listener, ListenerEvent, ListenerFn, ListenerOptions,
    };
    use serde::Deserialize;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[derive(Deserialize, Default)]
    #[serde(default)]
    struct PingSettings {
        reply: String,
    }

    fn make_ping(ctx: LoadContext) -> BoxFuture<'static, Result<LoadedModule, BoxError>> {
        Box::pin(async move {
            let settings: PingSettings = ctx.settings()?;
            let command = Command::new(CommandOptions::new("ping")).with_run(move |_, _| {
                let reply = settings.reply.clone();
                async move { Ok::<_, BoxError>(Value::String(reply)) }
            });
            Ok::<_, BoxError>(loaded(command))
        })
    }

    fn make_on_ready(_ctx: LoadContext) -> BoxFuture<'static, Result<LoadedModule, BoxError>> {
        Box::pin(async {
            let listener = Listener::new(
                ListenerOptions::new("on_ready").event(READY),
                ListenerFn::sync(|_, _| Ok(json!("ready seen"))),
            );
            Ok::<_, BoxError>(loaded(listener))
        })
    }

    fn layout() -> (TempDir, CinderConfig) {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("commands")).unwrap();
        fs::create_dir_all(root.path().join("listeners")).unwrap();
        fs::write(root.path().join("commands/ping.cmd"), "").unwrap();
        fs::write(root.path().join("listeners/on_ready.js"), "").unwrap();

        let mut config = CinderConfig::default();
        config.handlers.root = Some(root.path().to_path_buf());
        config.handlers.commands.directory = Some(PathBuf::from("commands"));
        config.handlers.commands.use_registry = false;
        config.handlers.listeners.directory = Some(PathBuf::from("listeners"));
        config.handlers.listeners.use_registry = false;
        config
            .modules
            .insert("commands".to_string(), json!({ "ping": { "reply": "pong" } }));
        (root, config)
    }

    #[tokio::test]
    async fn test_handlers_follow_config() {
        let mut config = CinderConfig::default();
        config.language.default_namespace = "cmd".to_string();
        config.language.fallback = Some("en-US".to_string());
        config.inhibitor.policy = InhibitorPolicy::FailClosed;
        config.ratelimit.sweep_interval_ms = 5_000;

        let runtime = CinderRuntime::from_config(&config);

        assert_eq!(runtime.languages().default_namespace(), "cmd");
        assert_eq!(runtime.languages().fallback().as_deref(), Some("en-US"));
        assert_eq!(runtime.inhibitors().policy(), InhibitorPolicy::FailClosed);
        assert!(runtime.listeners().emitter(DEFAULT_EMITTER).is_some());
        assert_eq!(runtime.rate_limits::<u64>(1, Duration::from_secs(1)).sweep_interval(), Duration::from_secs(5));
        assert_eq!(runtime.stats(), RuntimeStats::default());
    }

    #[tokio::test]
    async fn test_start_loads_initializes_and_announces_ready() {
        let (_root, config) = layout();
        let runtime = CinderRuntime::from_config(&config);
        runtime
            .commands()
            .register(ModuleDescriptor::new("commands", "ping", make_ping));
        runtime
            .listeners()
            .register(ModuleDescriptor::new("listeners", "on_ready", make_on_ready));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _ran = runtime
            .listeners()
            .events()
            .on_typed::<ListenerEvent, _>(LISTENER_RAN, move |event| {
                if let ListenerEvent::Ran { event, result, .. } = event {
                    let _ = tx.send((event.clone(), result.clone()));
                }
            });

        let stats = runtime.start().await.unwrap();
        assert!(runtime.is_running());
        assert_eq!(stats.commands, 1);
        assert_eq!(stats.listeners, 1);
        assert_eq!(stats.total(), 2);

        let (event, result) = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, READY);
        assert_eq!(result, json!("ready seen"));

        let ping = runtime.commands().find("ping").unwrap();
        assert_eq!(ping.run(Arc::new(())).await.unwrap(), json!("pong"));
    }

    #[tokio::test]
    async fn test_stop_removes_modules_and_unbinds_listeners() {
        let (_root, config) = layout();
        let runtime = CinderRuntime::from_config(&config);
        runtime
            .commands()
            .register(ModuleDescriptor::new("commands", "ping", make_ping));
        runtime
            .listeners()
            .register(ModuleDescriptor::new("listeners", "on_ready", make_on_ready));

        runtime.start().await.unwrap();
        assert_eq!(runtime.client().listener_count(READY), 1);

        runtime.stop().await;
        assert!(!runtime.is_running());
        assert_eq!(runtime.stats().total(), 0);
        assert_eq!(runtime.client().listener_count(READY), 0);
    }

    #[tokio::test]
    async fn test_disabled_handler_is_not_loaded() {
        let (_root, mut config) = layout();
        config.handlers.listeners.enabled = false;
        let runtime = CinderRuntime::from_config(&config);
        runtime
            .commands()
            .register(ModuleDescriptor::new("commands", "ping", make_ping));

        let stats = runtime.load().await.unwrap();
        assert_eq!(stats.commands, 1);
        assert_eq!(stats.listeners, 0);
    }

    #[tokio::test]
    async fn test_unreadable_directory_fails_start() {
        let root = tempfile::tempdir().unwrap();
        let mut config = CinderConfig::default();
        config.handlers.commands.directory = Some(root.path().join("missing"));

        let runtime = CinderRuntime::from_config(&config);
        let result = runtime.start().await;

        assert!(matches!(
            result,
            Err(RuntimeError::Load { handler: "commands", source: LoadError::Failed { .. } })
        ));
        assert!(!runtime.is_running());
    }
}
