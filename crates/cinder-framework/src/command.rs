//! Commands and their handler.
//!
//! Parsing arguments is left to the caller; a command here is identity,
//! aliases, an optional cooldown, and an optional run function.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use cinder_core::{BoxError, BoxFuture, Handler, HandlerOptions, Module, ModuleCore, ModuleOptions, Payload};
use serde_json::Value;
use tracing::{Instrument, debug};

use crate::error::Ratelimited;
use crate::ratelimit::RateLimitManager;

/// Body of a command.
pub type CommandFn =
    Arc<dyn Fn(Arc<Command>, Payload) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;

/// Per-key usage limit of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cooldown {
    /// Uses per window.
    pub capacity: u32,
    /// Window length.
    pub duration: Duration,
}

/// Options for [`Command`].
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    /// Identity options.
    pub module: ModuleOptions,
    /// Alternative names.
    pub aliases: Vec<String>,
    /// Human-readable description.
    pub description: String,
    /// Cooldown applied per key (usually a user id).
    pub cooldown: Option<Cooldown>,
}

impl CommandOptions {
    /// Options with an explicit id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            module: ModuleOptions::new(id),
            ..Self::default()
        }
    }

    /// Adds an alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Sets the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the cooldown.
    pub fn cooldown(mut self, capacity: u32, duration: Duration) -> Self {
        self.cooldown = Some(Cooldown { capacity, duration });
        self
    }
}

/// A named action users can invoke.
pub struct Command {
    core: ModuleCore,
    aliases: Vec<String>,
    description: String,
    cooldown: Option<Cooldown>,
    cooldowns: Option<RateLimitManager<String>>,
    run: Option<CommandFn>,
}

impl Command {
    /// Creates a command without a body.
    pub fn new(options: CommandOptions) -> Self {
        Self {
            core: ModuleCore::new(options.module),
            aliases: options.aliases,
            description: options.description,
            cooldown: options.cooldown,
            cooldowns: options
                .cooldown
                .map(|c| RateLimitManager::new(c.capacity, c.duration)),
            run: None,
        }
    }

    /// Sets the body.
    pub fn with_run<F, Fut>(mut self, run: F) -> Self
    where
        F: Fn(Arc<Command>, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.run = Some(Arc::new(
            move |command: Arc<Command>, message: Payload| -> BoxFuture<'static, Result<Value, BoxError>> {
                Box::pin(run(command, message))
            },
        ));
        self
    }

    /// Description text.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Configured cooldown.
    pub fn cooldown(&self) -> Option<Cooldown> {
        self.cooldown
    }

    /// Per-key cooldown buckets, if a cooldown is configured.
    pub fn cooldowns(&self) -> Option<&RateLimitManager<String>> {
        self.cooldowns.as_ref()
    }

    /// Consumes one use of the cooldown for `key`. Always succeeds without
    /// a cooldown.
    pub fn ratelimit(&self, key: &str) -> Result<(), Ratelimited> {
        match &self.cooldowns {
            Some(manager) => manager.drip(key.to_string()),
            None => Ok(()),
        }
    }

    /// Runs the body. A command without one returns `null`.
    pub async fn run(self: &Arc<Self>, message: Payload) -> Result<Value, BoxError> {
        let Some(run) = self.run.clone() else {
            return Ok(Value::Null);
        };
        debug!(command = %self.core.qualified_name(), "Running command");
        run(Arc::clone(self), message)
            .instrument(self.core.span())
            .await
    }
}

impl Module for Command {
    type Shared = ();

    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn aliases(&self) -> &[String] {
        &self.aliases
    }
}

/// Handler of [`Command`]s.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    inner: Arc<Handler<Command>>,
}

impl CommandHandler {
    /// Creates the handler.
    pub fn new(options: HandlerOptions) -> Self {
        Self {
            inner: Handler::new(options),
        }
    }

    /// Finds a command by id or alias.
    pub fn find(&self, name: &str) -> Option<Arc<Command>> {
        self.inner.resolve(name)
    }

    /// The underlying handler.
    pub fn handler(&self) -> &Arc<Handler<Command>> {
        &self.inner
    }
}

impl Deref for CommandHandler {
    type Target = Handler<Command>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handler() -> CommandHandler {
        CommandHandler::new(HandlerOptions::new("commands").without_registry())
    }

    #[test]
    fn test_find_by_id_or_alias() {
        let commands = handler();
        commands
            .insert(Command::new(CommandOptions::new("ping").alias("p").alias("latency")))
            .unwrap();

        assert_eq!(commands.find("ping").unwrap().core().id(), "ping");
        assert_eq!(commands.find("latency").unwrap().core().id(), "ping");
        assert!(commands.find("pong").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_per_key() {
        let command = Command::new(CommandOptions::new("daily").cooldown(1, Duration::from_secs(60)));

        assert!(command.ratelimit("alice").is_ok());
        assert!(command.ratelimit("alice").is_err());
        assert!(command.ratelimit("bob").is_ok());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(command.ratelimit("alice").is_ok());
    }

    #[test]
    fn test_no_cooldown_never_limits() {
        let command = Command::new(CommandOptions::new("help"));
        for _ in 0..10 {
            assert!(command.ratelimit("anyone").is_ok());
        }
        assert!(command.cooldowns().is_none());
    }

    #[tokio::test]
    async fn test_run_passes_message() {
        let commands = handler();
        let echo = Command::new(CommandOptions::new("echo")).with_run(|command, message| async move {
            let text = message.downcast_ref::<String>().cloned().unwrap_or_default();
            Ok::<_, BoxError>(json!({ "from": command.core().id(), "text": text }))
        });
        let echo = commands.insert(echo).unwrap();

        let result = echo.run(Arc::new(String::from("hi"))).await.unwrap();
        assert_eq!(result, json!({ "from": "echo", "text": "hi" }));

        let silent = commands.insert(Command::new(CommandOptions::new("noop"))).unwrap();
        assert_eq!(silent.run(Arc::new(())).await.unwrap(), Value::Null);
    }
}
