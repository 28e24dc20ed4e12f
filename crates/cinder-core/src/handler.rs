//! Generic per-category loader and store of modules.
//!
//! A [`Handler<T>`] owns every module of one category. It:
//!
//! - Walks its directory, filters files through its load predicate, and
//!   builds each qualifying file from the [`ModuleDescriptor`] registered
//!   under that file's relative path.
//! - Type-checks what factories return against `T` at runtime; anything
//!   else is reported as a `loadError` and discarded.
//! - Stores modules by id. A later module with the same id replaces the
//!   earlier one but keeps its registration position, so ordering that
//!   depends on registration (e.g. inhibitor tie-breaking) survives reloads.
//! - Emits lifecycle events on its [`EventSource`]; emitting with no
//!   subscriber is a no-op.
//!
//! # Example
//!
//! ```rust,ignore
//! let handler = Handler::<Listener>::new(HandlerOptions::new("listeners"));
//! handler.register(ModuleDescriptor::new("listeners", "ready", make_ready));
//! let count = handler.load_all("./listeners").await?;
//! handler.init_all().await;
//! ```

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{Instrument, debug, error, info, warn};

use crate::descriptor::{self, ClientRef, LoadContext, LoadedModule, ModuleDescriptor};
use crate::emitter::EventSource;
use crate::error::{LoadError, LoadResult};
use crate::events::HandlerEvent;
use crate::module::{Module, SourceLocation};

/// Predicate deciding which walked files are loaded.
pub type LoadFilter = Arc<dyn Fn(&Path, &Metadata) -> bool + Send + Sync>;

/// Accepts regular files whose name starts with neither `.` nor `_`.
pub fn default_filter(path: &Path, metadata: &Metadata) -> bool {
    metadata.is_file()
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| !name.starts_with('.') && !name.starts_with('_'))
}

// =============================================================================
// HandlerOptions
// =============================================================================

/// Construction options for a [`Handler`].
#[derive(Clone)]
pub struct HandlerOptions {
    /// Handler name; also the category matched against
    /// [`MODULE_REGISTRY`](crate::MODULE_REGISTRY) entries.
    pub name: String,
    /// Directory walked by [`Handler::load_directory`].
    pub directory: Option<PathBuf>,
    /// Load predicate.
    pub filter: LoadFilter,
    /// Application object passed to factories.
    pub client: Option<ClientRef>,
    /// Per-module settings, keyed by relative path.
    pub settings: Value,
    /// Whether to pick up link-time descriptors for this category.
    pub use_registry: bool,
}

impl HandlerOptions {
    /// Options with the default filter and no directory.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            directory: None,
            filter: Arc::new(default_filter),
            client: None,
            settings: Value::Null,
            use_registry: true,
        }
    }

    /// Sets the directory.
    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Replaces the load predicate.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Path, &Metadata) -> bool + Send + Sync + 'static,
    {
        self.filter = Arc::new(filter);
        self
    }

    /// Sets the application object handed to factories.
    pub fn client(mut self, client: ClientRef) -> Self {
        self.client = Some(client);
        self
    }

    /// Sets the per-module settings object.
    pub fn settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }

    /// Ignores the link-time registry; only [`Handler::register`]ed
    /// descriptors are used.
    pub fn without_registry(mut self) -> Self {
        self.use_registry = false;
        self
    }
}

impl fmt::Debug for HandlerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerOptions")
            .field("name", &self.name)
            .field("directory", &self.directory)
            .field("use_registry", &self.use_registry)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Resolvable
// =============================================================================

/// Either a module id or an already-typed module.
#[derive(Debug)]
pub enum Resolvable<'a, T> {
    /// Look up by id.
    Id(&'a str),
    /// The module itself.
    Module(&'a Arc<T>),
}

impl<'a, T> From<&'a str> for Resolvable<'a, T> {
    fn from(id: &'a str) -> Self {
        Self::Id(id)
    }
}

impl<'a, T> From<&'a String> for Resolvable<'a, T> {
    fn from(id: &'a String) -> Self {
        Self::Id(id)
    }
}

impl<'a, T> From<&'a Arc<T>> for Resolvable<'a, T> {
    fn from(module: &'a Arc<T>) -> Self {
        Self::Module(module)
    }
}

// =============================================================================
// Handler
// =============================================================================

struct Entry<T> {
    seq: u64,
    module: Arc<T>,
}

/// Loader and store for one category of modules.
pub struct Handler<T: Module> {
    name: String,
    directory: RwLock<Option<PathBuf>>,
    filter: LoadFilter,
    client: Option<ClientRef>,
    settings: Arc<Value>,
    descriptors: RwLock<HashMap<String, ModuleDescriptor>>,
    modules: RwLock<HashMap<String, Entry<T>>>,
    next_seq: AtomicU64,
    shared: T::Shared,
    events: EventSource,
    this: Weak<Self>,
}

impl<T: Module> Handler<T> {
    /// Creates a handler. Link-time descriptors for `options.name` are
    /// registered unless disabled.
    pub fn new(options: HandlerOptions) -> Arc<Self> {
        let mut descriptors = HashMap::new();
        if options.use_registry {
            for desc in descriptor::registered(&options.name) {
                descriptors.insert(desc.path.to_string(), *desc);
            }
        }

        Arc::new_cyclic(|this| Self {
            events: EventSource::new(options.name.clone()),
            name: options.name,
            directory: RwLock::new(options.directory),
            filter: options.filter,
            client: options.client,
            settings: Arc::new(options.settings),
            descriptors: RwLock::new(descriptors),
            modules: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            shared: T::Shared::default(),
            this: this.clone(),
        })
    }

    /// Handler name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory walked by [`load_directory`](Self::load_directory).
    pub fn directory(&self) -> Option<PathBuf> {
        self.directory.read().clone()
    }

    /// Changes the directory.
    pub fn set_directory(&self, directory: impl Into<PathBuf>) {
        *self.directory.write() = Some(directory.into());
    }

    /// Emitter carrying this handler's lifecycle events.
    pub fn events(&self) -> &EventSource {
        &self.events
    }

    /// Per-category shared state.
    pub fn shared(&self) -> &T::Shared {
        &self.shared
    }

    // ─── Descriptors ─────────────────────────────────────────────────────────

    /// Registers (or replaces) the descriptor for `descriptor.path`.
    ///
    /// Replacing a descriptor is how new code reaches a running handler: the
    /// next load or reload of that path uses the new factory.
    pub fn register(&self, descriptor: ModuleDescriptor) {
        if descriptor.category != self.name {
            warn!(
                handler = %self.name,
                category = descriptor.category,
                path = descriptor.path,
                "Registering descriptor declared for another category"
            );
        }
        self.descriptors
            .write()
            .insert(descriptor.path.to_string(), descriptor);
    }

    /// Forgets the descriptor for `path`.
    pub fn unregister(&self, path: &str) -> Option<ModuleDescriptor> {
        self.descriptors.write().remove(path)
    }

    // ─── Events ──────────────────────────────────────────────────────────────

    /// Emits a lifecycle event. No-op without subscribers.
    pub fn emit(&self, event: HandlerEvent<T>) -> bool {
        self.events.emit(event.name(), event)
    }

    /// Emits a category-specific event (e.g. `listenerRan`) on this
    /// handler's emitter. No-op without subscribers.
    pub fn emit_event<E>(&self, event: &str, payload: E) -> bool
    where
        E: Any + Send + Sync,
    {
        self.events.emit(event, payload)
    }

    fn report(&self, error: LoadError, path: &Path) -> LoadError {
        warn!(
            handler = %self.name,
            path = %path.display(),
            error = %error,
            "Module failed to load"
        );
        self.emit(HandlerEvent::LoadError {
            error: error.clone(),
            path: path.to_path_buf(),
        });
        error
    }

    // ─── Loading ─────────────────────────────────────────────────────────────

    /// Loads the file at `directory/segments…`.
    pub async fn load(&self, directory: impl Into<PathBuf>, segments: Vec<String>) -> LoadResult<Arc<T>> {
        self.load_at(SourceLocation::new(directory, segments), false)
            .await
    }

    /// Loads `location`. With `reload` set, `moduleLoaded` is not emitted.
    pub async fn load_at(&self, location: SourceLocation, reload: bool) -> LoadResult<Arc<T>> {
        let key = location.key();
        let path = location.path();

        let descriptor = self.descriptors.read().get(&key).copied();
        let Some(descriptor) = descriptor else {
            return Err(self.report(LoadError::NotFound { path: key }, &path));
        };

        let ctx = LoadContext::new(self.client.clone(), location.clone(), Arc::clone(&self.settings));
        let created = (descriptor.create)(ctx)
            .await
            .map_err(|e| self.report(LoadError::failed(&path, e), &path))?;
        let module = Self::downcast(created, &key).map_err(|e| self.report(e, &path))?;

        module.core().patch(location);
        self.store(Arc::new(*module), reload)
            .map_err(|e| self.report(e, &path))
    }

    /// Walks `directory`, loads every file accepted by the filter
    /// concurrently, and returns the number of stored modules.
    ///
    /// Individual failures are reported through `loadError` and do not stop
    /// the batch; only an unreadable directory fails the call.
    pub async fn load_all(&self, directory: impl Into<PathBuf>) -> LoadResult<usize> {
        let directory = directory.into();
        self.set_directory(directory.clone());

        let files = self
            .walk(&directory)
            .await
            .map_err(|e| self.report(LoadError::failed(&directory, e), &directory))?;

        let results = future::join_all(
            files
                .into_iter()
                .map(|segments| self.load_at(SourceLocation::new(&directory, segments), false)),
        )
        .await;
        let failed = results.iter().filter(|r| r.is_err()).count();

        let count = self.len();
        info!(
            handler = %self.name,
            directory = %directory.display(),
            loaded = count,
            failed,
            "Modules loaded"
        );
        Ok(count)
    }

    /// [`load_all`](Self::load_all) on the configured directory. Returns 0
    /// when none is set.
    pub async fn load_directory(&self) -> LoadResult<usize> {
        match self.directory() {
            Some(directory) => self.load_all(directory).await,
            None => {
                debug!(handler = %self.name, "No directory configured, nothing to load");
                Ok(0)
            }
        }
    }

    async fn walk(&self, root: &Path) -> std::io::Result<Vec<Vec<String>>> {
        let mut files = Vec::new();
        let mut pending = vec![Vec::<String>::new()];

        while let Some(relative) = pending.pop() {
            let dir = relative.iter().fold(root.to_path_buf(), |p, s| p.join(s));
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let metadata = tokio::fs::metadata(&path).await?;
                let mut segments = relative.clone();
                segments.push(entry.file_name().to_string_lossy().into_owned());

                if metadata.is_dir() {
                    pending.push(segments);
                } else if (self.filter)(&path, &metadata) {
                    files.push(segments);
                }
            }
        }

        files.sort();
        Ok(files)
    }

    fn downcast(module: LoadedModule, path: &str) -> LoadResult<Box<T>> {
        module.downcast::<T>().map_err(|_| LoadError::TypeMismatch {
            path: path.to_string(),
            expected: type_name::<T>(),
        })
    }

    // ─── Store ───────────────────────────────────────────────────────────────

    /// Adds a type-erased module. A value that is not a `T` is reported as a
    /// `loadError` and discarded.
    pub fn add(&self, module: LoadedModule) -> Option<Arc<T>> {
        let unknown = Path::new("<unknown>");
        let module = match Self::downcast(module, "<unknown>") {
            Ok(module) => module,
            Err(e) => {
                self.report(e, unknown);
                return None;
            }
        };
        let id = module.core().id();
        self.store(Arc::new(*module), false)
            .map_err(|e| self.report(e, Path::new(&id)))
            .ok()
    }

    /// Adds a typed module.
    pub fn insert(&self, module: T) -> LoadResult<Arc<T>> {
        let id = module.core().id();
        self.store(Arc::new(module), false)
            .map_err(|e| self.report(e, Path::new(&id)))
    }

    fn store(&self, module: Arc<T>, reload: bool) -> LoadResult<Arc<T>> {
        let core = module.core();
        let id = core.id();
        if id.is_empty() {
            return Err(LoadError::MissingId {
                kind: type_name::<T>(),
            });
        }

        let previous = self.get(id.as_str());
        if let Some(existing) = &previous
            && Arc::ptr_eq(existing, &module)
        {
            return Ok(module);
        }

        // The outgoing entry is detached first so the two never overlap.
        if let Some(old) = &previous {
            T::detach(old);
        }
        let this: Weak<dyn Any + Send + Sync> = self.this.clone();
        core.bind(this);
        if let Err(e) = T::attach(&module, self) {
            if let Some(old) = &previous
                && let Err(restore) = T::attach(old, self)
            {
                warn!(
                    handler = %self.name,
                    module = %old.core().qualified_name(),
                    error = %restore,
                    "Failed to re-attach replaced module"
                );
            }
            return Err(LoadError::attach(id.clone(), e));
        }

        let replaced = {
            let mut modules = self.modules.write();
            let seq = modules
                .get(&id)
                .map(|entry| entry.seq)
                .unwrap_or_else(|| self.next_seq.fetch_add(1, Ordering::Relaxed));
            modules
                .insert(
                    id.clone(),
                    Entry {
                        seq,
                        module: Arc::clone(&module),
                    },
                )
                .map(|entry| entry.module)
        };
        if let Some(old) = &replaced
            && !previous.as_ref().is_some_and(|p| Arc::ptr_eq(p, old))
        {
            T::detach(old);
        }

        let _span = core.span().entered();
        debug!(handler = %self.name, replaced = replaced.is_some(), reload, "Module stored");
        if !reload {
            self.emit(HandlerEvent::ModuleLoaded(Arc::clone(&module)));
        }
        Ok(module)
    }

    /// Looks a module up by id, or returns the given module.
    pub fn get<'a>(&self, resolvable: impl Into<Resolvable<'a, T>>) -> Option<Arc<T>>
    where
        T: 'a,
    {
        match resolvable.into() {
            Resolvable::Id(id) => self.modules.read().get(id).map(|e| Arc::clone(&e.module)),
            Resolvable::Module(module) => Some(Arc::clone(module)),
        }
    }

    /// Looks a module up by id, then by alias in registration order.
    pub fn resolve(&self, name: &str) -> Option<Arc<T>> {
        self.get(name).or_else(|| {
            self.values()
                .into_iter()
                .find(|m| m.aliases().iter().any(|alias| alias == name))
        })
    }

    /// Removes a module by id, detaching it. Emits `moduleRemoved` when
    /// `emit` is set.
    pub fn remove<'a>(&self, resolvable: impl Into<Resolvable<'a, T>>, emit: bool) -> Option<Arc<T>>
    where
        T: 'a,
    {
        let id = match resolvable.into() {
            Resolvable::Id(id) => id.to_string(),
            Resolvable::Module(module) => module.core().id(),
        };
        let removed = self.modules.write().remove(&id)?.module;
        T::detach(&removed);
        debug!(handler = %self.name, module = %removed.core().qualified_name(), "Module removed");
        if emit {
            self.emit(HandlerEvent::ModuleRemoved(Arc::clone(&removed)));
        }
        Some(removed)
    }

    /// Removes every module.
    pub fn clear(&self) {
        let drained: Vec<Entry<T>> = self.modules.write().drain().map(|(_, e)| e).collect();
        for entry in drained {
            T::detach(&entry.module);
        }
    }

    /// All modules in registration order.
    pub fn values(&self) -> Vec<Arc<T>> {
        let modules = self.modules.read();
        let mut entries: Vec<&Entry<T>> = modules.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| Arc::clone(&e.module)).collect()
    }

    /// All ids in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.values().iter().map(|m| m.core().id()).collect()
    }

    /// Whether a module with `id` is stored.
    pub fn contains(&self, id: &str) -> bool {
        self.modules.read().contains_key(id)
    }

    /// Number of stored modules.
    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }

    // ─── Initialization ──────────────────────────────────────────────────────

    /// Runs `init` on every module that has not been initialized yet,
    /// concurrently.
    pub async fn init_all(&self) {
        let modules = self.values();
        future::join_all(modules.iter().map(|m| self.init_module(m))).await;
    }

    /// Runs `init` on `module` unless it already ran. Failures are logged.
    pub async fn init_module(&self, module: &Arc<T>) {
        let core = module.core();
        if !core.mark_initialized() {
            return;
        }
        if let Err(e) = module.init().instrument(core.span()).await {
            error!(
                handler = %self.name,
                module = %core.qualified_name(),
                error = %e,
                "Module init failed"
            );
        }
    }
}

impl<T: Module> fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("type", &type_name::<T>())
            .field("modules", &self.len())
            .field("descriptors", &self.descriptors.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::loaded;
    use crate::error::BoxError;
    use crate::events;
    use crate::module::{ModuleCore, ModuleLifecycle, ModuleOptions};
    use futures::future::BoxFuture;
    use std::sync::atomic::AtomicUsize;

    struct Gadget {
        core: ModuleCore,
        aliases: Vec<String>,
        generation: usize,
    }

    impl Gadget {
        fn new(options: ModuleOptions) -> Self {
            Self {
                core: ModuleCore::new(options),
                aliases: Vec::new(),
                generation: 0,
            }
        }
    }

    impl Module for Gadget {
        type Shared = ();

        fn core(&self) -> &ModuleCore {
            &self.core
        }

        fn aliases(&self) -> &[String] {
            &self.aliases
        }
    }

    static ALPHA_BUILDS: AtomicUsize = AtomicUsize::new(0);

    fn make_alpha(_ctx: LoadContext) -> BoxFuture<'static, Result<LoadedModule, BoxError>> {
        Box::pin(async {
            let generation = ALPHA_BUILDS.fetch_add(1, Ordering::SeqCst);
            let mut gadget = Gadget::new(ModuleOptions::default());
            gadget.generation = generation;
            Ok::<_, BoxError>(loaded(gadget))
        })
    }

    fn make_beta(_ctx: LoadContext) -> BoxFuture<'static, Result<LoadedModule, BoxError>> {
        Box::pin(async { Ok::<_, BoxError>(loaded(Gadget::new(ModuleOptions::default()))) })
    }

    fn make_wrong_type(_ctx: LoadContext) -> BoxFuture<'static, Result<LoadedModule, BoxError>> {
        Box::pin(async { Ok::<_, BoxError>(loaded(String::from("not a gadget"))) })
    }

    fn make_failing(_ctx: LoadContext) -> BoxFuture<'static, Result<LoadedModule, BoxError>> {
        Box::pin(async { Err::<LoadedModule, BoxError>("factory exploded".into()) })
    }

    fn handler() -> Arc<Handler<Gadget>> {
        let handler = Handler::<Gadget>::new(HandlerOptions::new("gadgets").without_registry());
        handler.register(ModuleDescriptor::new("gadgets", "alpha", make_alpha));
        handler.register(ModuleDescriptor::new("gadgets", "nested/beta", make_beta));
        handler.register(ModuleDescriptor::new("gadgets", "wrong", make_wrong_type));
        handler.register(ModuleDescriptor::new("gadgets", "failing", make_failing));
        handler
    }

    fn count_events(handler: &Handler<Gadget>, name: &str) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let _ = handler.events().on(name, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    #[tokio::test]
    async fn test_load_all_reports_failures_without_aborting() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "alpha.rs");
        touch(dir.path(), "nested/beta.rs");
        touch(dir.path(), "wrong.rs");
        touch(dir.path(), "failing.rs");
        touch(dir.path(), "unknown.rs");
        touch(dir.path(), "_skipped.rs");

        let handler = handler();
        let errors = count_events(&handler, events::LOAD_ERROR);
        let loaded = count_events(&handler, events::MODULE_LOADED);

        let count = handler.load_all(dir.path()).await.unwrap();

        assert_eq!(count, 2);
        assert_eq!(errors.load(Ordering::SeqCst), 3);
        assert_eq!(loaded.load(Ordering::SeqCst), 2);

        let beta = handler.get("beta").unwrap();
        assert_eq!(beta.core().category(), "nested");
        assert_eq!(beta.core().location().unwrap().key(), "nested/beta");
    }

    #[tokio::test]
    async fn test_load_missing_directory_fails() {
        let handler = handler();
        let result = handler.load_all("/definitely/not/here").await;
        assert!(matches!(result, Err(LoadError::Failed { .. })));
    }

    #[tokio::test]
    async fn test_load_not_found() {
        let handler = handler();
        let result = handler.load("/root", vec!["ghost.rs".into()]).await;
        assert!(matches!(result, Err(LoadError::NotFound { path }) if path == "ghost"));
    }

    #[tokio::test]
    async fn test_reload_replaces_single_entry() {
        let handler = handler();
        let original = handler.load("/mods", vec!["alpha.rs".into()]).await.unwrap();
        let loaded = count_events(&handler, events::MODULE_LOADED);

        let replacement = original.reload().await.unwrap();

        assert!(!Arc::ptr_eq(&original, &replacement));
        assert!(replacement.generation > original.generation);
        assert!(replacement.core().is_initialized());
        assert_eq!(handler.len(), 1);
        assert!(Arc::ptr_eq(&handler.get("alpha").unwrap(), &replacement));
        // Reloads do not announce themselves as new modules.
        assert_eq!(loaded.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_store_size_accounting() {
        let handler = handler();
        for id in ["a", "b", "c", "b"] {
            handler.insert(Gadget::new(ModuleOptions::new(id))).unwrap();
        }
        assert!(handler.remove("a", true).is_some());
        assert!(handler.remove("missing", true).is_none());

        // 4 adds - 1 overwrite - 1 remove
        assert_eq!(handler.len(), 2);
        assert_eq!(handler.ids(), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_overwrite_keeps_registration_order() {
        let handler = handler();
        handler.insert(Gadget::new(ModuleOptions::new("first"))).unwrap();
        handler.insert(Gadget::new(ModuleOptions::new("second"))).unwrap();
        handler.insert(Gadget::new(ModuleOptions::new("first"))).unwrap();
        assert_eq!(handler.ids(), vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn test_add_rejects_wrong_type() {
        let handler = handler();
        let errors = count_events(&handler, events::LOAD_ERROR);

        assert!(handler.add(loaded(42_u32)).is_none());
        assert!(handler.add(loaded(Gadget::new(ModuleOptions::new("ok")))).is_some());

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(handler.len(), 1);
    }

    #[test]
    fn test_insert_without_id_fails() {
        let handler = handler();
        let result = handler.insert(Gadget::new(ModuleOptions::default()));
        assert!(matches!(result, Err(LoadError::MissingId { .. })));
    }

    #[test]
    fn test_resolve_by_alias_and_instance() {
        let handler = handler();
        let mut gadget = Gadget::new(ModuleOptions::new("ping"));
        gadget.aliases = vec!["p".into()];
        let stored = handler.insert(gadget).unwrap();

        assert!(Arc::ptr_eq(&handler.resolve("p").unwrap(), &stored));
        assert!(Arc::ptr_eq(&handler.get(&stored).unwrap(), &stored));
        assert!(handler.resolve("q").is_none());
    }

    #[test]
    fn test_enable_disable_unload_emit() {
        let handler = handler();
        let enabled = count_events(&handler, events::MODULE_ENABLED);
        let disabled = count_events(&handler, events::MODULE_DISABLED);
        let unloaded = count_events(&handler, events::MODULE_UNLOADED);
        let removed = count_events(&handler, events::MODULE_REMOVED);

        let module = handler.insert(Gadget::new(ModuleOptions::new("x"))).unwrap();
        module.disable();
        assert!(!module.core().is_enabled());
        module.enable();
        assert!(module.core().is_enabled());
        assert!(module.unload().is_some());

        assert_eq!(enabled.load(Ordering::SeqCst), 1);
        assert_eq!(disabled.load(Ordering::SeqCst), 1);
        assert_eq!(unloaded.load(Ordering::SeqCst), 1);
        assert_eq!(removed.load(Ordering::SeqCst), 0);
        assert!(handler.is_empty());
    }

    struct Hooked {
        core: ModuleCore,
        tag: &'static str,
        accept: bool,
        log: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    impl Module for Hooked {
        type Shared = ();

        fn core(&self) -> &ModuleCore {
            &self.core
        }

        fn attach(module: &Arc<Self>, _handler: &Handler<Self>) -> Result<(), BoxError> {
            module.log.lock().push(format!("attach {}", module.tag));
            if module.accept {
                Ok(())
            } else {
                Err("rejected".into())
            }
        }

        fn detach(module: &Arc<Self>) {
            module.log.lock().push(format!("detach {}", module.tag));
        }
    }

    #[test]
    fn test_replacement_detaches_before_attaching() {
        let handler = Handler::<Hooked>::new(HandlerOptions::new("hooked").without_registry());
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let hooked = |tag, accept| Hooked {
            core: ModuleCore::new(ModuleOptions::new("x")),
            tag,
            accept,
            log: Arc::clone(&log),
        };

        handler.insert(hooked("old", true)).unwrap();
        handler.insert(hooked("new", true)).unwrap();
        assert_eq!(*log.lock(), ["attach old", "detach old", "attach new"]);

        log.lock().clear();
        let result = handler.insert(hooked("bad", false));
        assert!(matches!(result, Err(LoadError::Attach { .. })));
        assert_eq!(*log.lock(), ["detach new", "attach bad", "attach new"]);
        assert_eq!(handler.get("x").unwrap().tag, "new");
    }

    #[tokio::test]
    async fn test_init_runs_once() {
        let handler = handler();
        let module = handler.insert(Gadget::new(ModuleOptions::new("x"))).unwrap();
        handler.init_all().await;
        handler.init_all().await;
        assert!(module.core().is_initialized());
    }
}
