//! Module base type and lifecycle.
//!
//! Every loadable behavior unit embeds a [`ModuleCore`] and implements
//! [`Module`]. The lifecycle is:
//!
//! ```text
//! constructed ──► patched (id/category/location assigned by the Handler)
//!             ──► initialized (init() on application ready, once)
//!             ──► enabled ⇄ disabled
//!             ──► unloaded (terminal)
//! ```
//!
//! Lifecycle operations that need the owning handler (`enable`, `reload`,
//! `unload`, …) live on [`ModuleLifecycle`], implemented for `Arc<T>`.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{Span, debug, info_span};

use crate::error::{BoxError, LoadError, LoadResult};
use crate::events::HandlerEvent;
use crate::handler::Handler;

/// Category given to modules sitting at the root of a handler directory.
pub const DEFAULT_CATEGORY: &str = "default";

// =============================================================================
// SourceLocation
// =============================================================================

/// Where a module was loaded from: the handler root plus the path segments
/// relative to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    /// Root directory walked by the handler.
    pub directory: PathBuf,
    /// Path segments relative to `directory`, file name last.
    pub segments: Vec<String>,
}

impl SourceLocation {
    /// Creates a location.
    pub fn new(directory: impl Into<PathBuf>, segments: Vec<String>) -> Self {
        Self {
            directory: directory.into(),
            segments,
        }
    }

    /// Absolute path of the file.
    pub fn path(&self) -> PathBuf {
        self.segments
            .iter()
            .fold(self.directory.clone(), |path, segment| path.join(segment))
    }

    /// File name without its extension.
    pub fn file_stem(&self) -> &str {
        self.segments
            .last()
            .map(|name| {
                Path::new(name)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or(name.as_str())
            })
            .unwrap_or_default()
    }

    /// Relative identity of the file: segments joined with `/`, extension
    /// stripped. This is the key looked up in the descriptor table and the
    /// unit of hot-reload identity.
    pub fn key(&self) -> String {
        match self.segments.split_last() {
            Some((_, [])) => self.file_stem().to_string(),
            Some((_, parents)) => format!("{}/{}", parents.join("/"), self.file_stem()),
            None => String::new(),
        }
    }

    /// Parent directories joined with `/`, or `None` at the root.
    pub fn parent_category(&self) -> Option<String> {
        match self.segments.split_last() {
            Some((_, parents)) if !parents.is_empty() => Some(parents.join("/")),
            _ => None,
        }
    }
}

// =============================================================================
// ModuleOptions / ModuleCore
// =============================================================================

/// Options shared by every module type.
#[derive(Debug, Clone)]
pub struct ModuleOptions {
    /// Explicit id. Derived from the file name when absent.
    pub id: Option<String>,
    /// Explicit category. Derived from the parent directories when absent.
    pub category: Option<String>,
    /// Initial enabled flag.
    pub enabled: bool,
}

impl Default for ModuleOptions {
    fn default() -> Self {
        Self {
            id: None,
            category: None,
            enabled: true,
        }
    }
}

impl ModuleOptions {
    /// Options with an explicit id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Sets the category.
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Sets the initial enabled flag.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

#[derive(Debug)]
struct ModuleMeta {
    id: Option<String>,
    category: Option<String>,
    location: Option<SourceLocation>,
    span: Span,
}

/// State every module carries: identity, location, flags, and the
/// back-reference to its owning handler.
#[derive(Debug)]
pub struct ModuleCore {
    meta: RwLock<ModuleMeta>,
    enabled: AtomicBool,
    initialized: AtomicBool,
    handler: RwLock<Option<Weak<dyn Any + Send + Sync>>>,
}

impl ModuleCore {
    /// Creates an unpatched core.
    pub fn new(options: ModuleOptions) -> Self {
        Self {
            meta: RwLock::new(ModuleMeta {
                id: options.id,
                category: options.category,
                location: None,
                span: Span::none(),
            }),
            enabled: AtomicBool::new(options.enabled),
            initialized: AtomicBool::new(false),
            handler: RwLock::new(None),
        }
    }

    /// Module id, empty until assigned.
    pub fn id(&self) -> String {
        self.meta.read().id.clone().unwrap_or_default()
    }

    /// Module category.
    pub fn category(&self) -> String {
        self.meta
            .read()
            .category
            .clone()
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string())
    }

    /// Location the module was loaded from, if it came from a file.
    pub fn location(&self) -> Option<SourceLocation> {
        self.meta.read().location.clone()
    }

    /// `category.id`, the module's logger context.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.category(), self.id())
    }

    /// Span carrying the module's logger context.
    pub fn span(&self) -> Span {
        self.meta.read().span.clone()
    }

    /// Returns the enabled flag.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Sets the enabled flag, returning the previous value.
    pub(crate) fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::AcqRel)
    }

    /// Whether `init` already ran.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Marks the module initialized; returns `false` if it already was.
    pub(crate) fn mark_initialized(&self) -> bool {
        !self.initialized.swap(true, Ordering::AcqRel)
    }

    /// Assigns id, category, and location from the file the module came from.
    /// Explicit options win over derived values.
    pub(crate) fn patch(&self, location: SourceLocation) {
        let mut meta = self.meta.write();
        if meta.id.is_none() {
            meta.id = Some(location.file_stem().to_string());
        }
        if meta.category.is_none() {
            meta.category = location.parent_category();
        }
        meta.location = Some(location);
    }

    /// Records the owning handler and derives the logger span.
    pub(crate) fn bind(&self, handler: Weak<dyn Any + Send + Sync>) {
        *self.handler.write() = Some(handler);
        let mut meta = self.meta.write();
        let qualified = format!(
            "{}.{}",
            meta.category.as_deref().unwrap_or(DEFAULT_CATEGORY),
            meta.id.as_deref().unwrap_or_default()
        );
        meta.span = info_span!("module", module = %qualified);
    }

    /// Returns the owning handler if it is a `Handler<T>` and still alive.
    pub fn handler<T: Module>(&self) -> Option<Arc<Handler<T>>> {
        let weak = self.handler.read().clone()?;
        weak.upgrade()?.downcast::<Handler<T>>().ok()
    }
}

// =============================================================================
// Module trait
// =============================================================================

/// A pluggable unit of behavior owned by a [`Handler`].
///
/// Implementors embed a [`ModuleCore`] and expose it through [`core`].
/// `Shared` is per-category state owned by the handler and reachable from
/// every module of that category (a listener's emitter table, a language's
/// default namespace, …); use `()` when there is none.
///
/// [`core`]: Module::core
#[async_trait]
pub trait Module: Any + Send + Sync + Sized {
    /// Per-handler state shared by all modules of this type.
    type Shared: Default + Send + Sync + 'static;

    /// Returns the embedded core.
    fn core(&self) -> &ModuleCore;

    /// Alternative names the module can be resolved by.
    fn aliases(&self) -> &[String] {
        &[]
    }

    /// Startup work, run once when the application becomes ready.
    async fn init(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called when the module is stored in `handler`. An error rejects the
    /// module and keeps whatever entry was stored before.
    fn attach(_module: &Arc<Self>, _handler: &Handler<Self>) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called when the module leaves its handler (removal or replacement).
    fn detach(_module: &Arc<Self>) {}
}

// =============================================================================
// Lifecycle operations
// =============================================================================

/// Lifecycle operations on a stored module.
#[async_trait]
pub trait ModuleLifecycle<T: Module> {
    /// Returns the owning handler.
    fn handler(&self) -> Option<Arc<Handler<T>>>;

    /// Enables the module and emits `moduleEnabled`.
    fn enable(&self);

    /// Disables the module and emits `moduleDisabled`.
    fn disable(&self);

    /// Loads this module's file again, initializes the replacement, and
    /// returns it. The original instance is left untouched; the handler
    /// ends up holding only the replacement.
    async fn reload(&self) -> LoadResult<Arc<T>>;

    /// Emits `moduleUnloaded` and removes the module from its handler.
    fn unload(&self) -> Option<Arc<T>>;
}

#[async_trait]
impl<T: Module> ModuleLifecycle<T> for Arc<T> {
    fn handler(&self) -> Option<Arc<Handler<T>>> {
        self.core().handler::<T>()
    }

    fn enable(&self) {
        self.core().set_enabled(true);
        if let Some(handler) = ModuleLifecycle::handler(self) {
            handler.emit(HandlerEvent::ModuleEnabled(Arc::clone(self)));
        }
    }

    fn disable(&self) {
        self.core().set_enabled(false);
        if let Some(handler) = ModuleLifecycle::handler(self) {
            handler.emit(HandlerEvent::ModuleDisabled(Arc::clone(self)));
        }
    }

    async fn reload(&self) -> LoadResult<Arc<T>> {
        let core = self.core();
        let id = core.id();
        let location = core
            .location()
            .ok_or_else(|| LoadError::NoLocation { id: id.clone() })?;
        let handler = ModuleLifecycle::handler(self).ok_or(LoadError::Detached { id })?;

        let replacement = handler.load_at(location, true).await?;
        handler.init_module(&replacement).await;
        debug!(module = %replacement.core().qualified_name(), "Module reloaded");
        Ok(replacement)
    }

    fn unload(&self) -> Option<Arc<T>> {
        let handler = ModuleLifecycle::handler(self)?;
        handler.emit(HandlerEvent::ModuleUnloaded(Arc::clone(self)));
        handler.remove(self, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(segments: &[&str]) -> SourceLocation {
        SourceLocation::new("/modules", segments.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_location_key_and_category() {
        let root = location(&["ping.rs"]);
        assert_eq!(root.key(), "ping");
        assert_eq!(root.parent_category(), None);

        let nested = location(&["admin", "tools", "ban.rs"]);
        assert_eq!(nested.key(), "admin/tools/ban");
        assert_eq!(nested.parent_category().as_deref(), Some("admin/tools"));
        assert_eq!(nested.path(), PathBuf::from("/modules/admin/tools/ban.rs"));
    }

    #[test]
    fn test_patch_derives_identity() {
        let core = ModuleCore::new(ModuleOptions::default());
        core.patch(location(&["fun", "dice.rs"]));
        assert_eq!(core.id(), "dice");
        assert_eq!(core.category(), "fun");
        assert_eq!(core.qualified_name(), "fun.dice");
    }

    #[test]
    fn test_patch_keeps_explicit_options() {
        let core = ModuleCore::new(ModuleOptions::new("roll").category("games"));
        core.patch(location(&["fun", "dice.rs"]));
        assert_eq!(core.id(), "roll");
        assert_eq!(core.category(), "games");
        assert!(core.location().is_some());
    }

    #[test]
    fn test_root_module_gets_default_category() {
        let core = ModuleCore::new(ModuleOptions::default());
        core.patch(location(&["ping.rs"]));
        assert_eq!(core.category(), DEFAULT_CATEGORY);
    }
}
