//! Languages: namespaced translation trees with a small path grammar.
//!
//! A path has the form `[namespace:]dotted.path[[index]]`:
//!
//! ```text
//! greeting                  default namespace, key "greeting"
//! cmd:errors.missing[0]     namespace "cmd", key errors → missing, element 0
//! ```
//!
//! Leaves are JSON values or functions. Function leaves are called with the
//! lookup context (whole, or its values in order for positional languages).
//! String results are interpolated: every `#{dotted.path}` marker is
//! replaced by the value at that path in the context, or by nothing when
//! absent, until no marker is left.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use cinder_core::{BoxError, BoxFuture, Handler, HandlerOptions, Module, ModuleCore, ModuleOptions};
use parking_lot::RwLock;
use regex::{Captures, Regex};
use serde_json::Value;
use tracing::{Instrument, debug};

use crate::error::{LanguageError, TranslateError, TranslateResult};

/// Namespace used when a path names none and the handler sets no other.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Interpolation gives up after this many passes.
pub const MAX_INTERPOLATION_PASSES: usize = 32;

static PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?P<ns>[^:\[\]]+):)?(?P<keys>[^:\[\]]+)(?:\[(?P<index>\d+)\])?$")
        .expect("path pattern is valid")
});

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\{([^{}]*)\}").expect("marker pattern is valid"));

// =============================================================================
// Paths
// =============================================================================

/// A parsed translation path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationPath {
    /// Explicit namespace, if any.
    pub namespace: Option<String>,
    /// Keys to descend, in order.
    pub keys: Vec<String>,
    /// Element to select from a sequence result.
    pub index: Option<usize>,
}

impl FromStr for TranslationPath {
    type Err = TranslateError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let invalid = || TranslateError::InvalidPath {
            path: path.to_string(),
        };
        let caps = PATH.captures(path.trim()).ok_or_else(invalid)?;

        let keys: Vec<String> = caps["keys"].split('.').map(str::to_string).collect();
        if keys.iter().any(|k| k.trim().is_empty()) {
            return Err(invalid());
        }
        let index = match caps.name("index") {
            Some(m) => Some(m.as_str().parse().map_err(|_| invalid())?),
            None => None,
        };

        Ok(Self {
            namespace: caps.name("ns").map(|m| m.as_str().to_string()),
            keys,
            index,
        })
    }
}

impl fmt::Display for TranslationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ns) = &self.namespace {
            write!(f, "{ns}:")?;
        }
        f.write_str(&self.keys.join("."))?;
        if let Some(index) = self.index {
            write!(f, "[{index}]")?;
        }
        Ok(())
    }
}

// =============================================================================
// Tree
// =============================================================================

/// What a translation function receives.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionArgs {
    /// The whole context.
    Context(Value),
    /// The context's values in the order they were written.
    Positional(Vec<Value>),
}

impl FunctionArgs {
    fn build(context: &Value, positional: bool) -> Self {
        if !positional {
            return Self::Context(context.clone());
        }
        Self::Positional(match context {
            Value::Object(map) => map.values().cloned().collect(),
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        })
    }
}

/// A function leaf.
#[derive(Clone)]
pub enum TranslationFn {
    /// Called in place.
    Sync(Arc<dyn Fn(&Language, FunctionArgs) -> Result<Value, BoxError> + Send + Sync>),
    /// Awaited.
    Async(Arc<dyn Fn(Arc<Language>, FunctionArgs) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>),
}

impl TranslationFn {
    /// Wraps a synchronous function.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Language, FunctionArgs) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Wraps an asynchronous function.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<Language>, FunctionArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        Self::Async(Arc::new(
            move |language: Arc<Language>, args: FunctionArgs| -> BoxFuture<'static, Result<Value, BoxError>> {
                Box::pin(f(language, args))
            },
        ))
    }
}

impl fmt::Debug for TranslationFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sync(_) => "TranslationFn::Sync",
            Self::Async(_) => "TranslationFn::Async",
        })
    }
}

/// A node of a translation tree.
#[derive(Debug, Clone)]
pub enum Node {
    /// A primitive or a sequence.
    Value(Value),
    /// Nested keys.
    Branch(HashMap<String, Node>),
    /// Computed on lookup.
    Function(TranslationFn),
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Branch(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
            other => Self::Value(other),
        }
    }
}

fn insert_at(tree: &mut HashMap<String, Node>, keys: &[String], node: Node) {
    let Some((last, parents)) = keys.split_last() else {
        return;
    };
    let mut branch = tree;
    for key in parents {
        let slot = branch
            .entry(key.clone())
            .or_insert_with(|| Node::Branch(HashMap::new()));
        if !matches!(slot, Node::Branch(_)) {
            *slot = Node::Branch(HashMap::new());
        }
        let Node::Branch(next) = slot else {
            return;
        };
        branch = next;
    }
    branch.insert(last.clone(), node);
}

fn value_at<'a>(context: &'a Value, dotted: &str) -> Option<&'a Value> {
    dotted
        .split('.')
        .map(str::trim)
        .try_fold(context, |value, key| match value {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn render(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Replaces `#{path}` markers with context values until none remain.
pub fn interpolate(template: &str, context: &Value) -> Result<String, usize> {
    let mut text = template.to_string();
    for _ in 0..MAX_INTERPOLATION_PASSES {
        if !MARKER.is_match(&text) {
            return Ok(text);
        }
        text = MARKER
            .replace_all(&text, |caps: &Captures<'_>| render(value_at(context, &caps[1])))
            .into_owned();
    }
    if MARKER.is_match(&text) {
        Err(MAX_INTERPOLATION_PASSES)
    } else {
        Ok(text)
    }
}

// =============================================================================
// Language
// =============================================================================

/// Options for [`Language`].
#[derive(Debug, Clone, Default)]
pub struct LanguageOptions {
    /// Identity options. The id is usually a locale such as `en-US`.
    pub module: ModuleOptions,
    /// Alternative names.
    pub aliases: Vec<String>,
    /// Declared namespaces.
    pub namespaces: Vec<String>,
    /// Pass context values positionally to function leaves.
    pub positional_args: bool,
}

impl LanguageOptions {
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

    /// Declares a namespace.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespaces.push(namespace.into());
        self
    }

    /// Passes context values positionally.
    pub fn positional(mut self) -> Self {
        self.positional_args = true;
        self
    }
}

/// Assembles a [`Language`], validating namespaces on [`build`](Self::build).
#[derive(Debug)]
pub struct LanguageBuilder {
    options: LanguageOptions,
    trees: Vec<(String, Value)>,
    functions: Vec<(String, String, TranslationFn)>,
}

impl LanguageBuilder {
    /// Adds the tree of `namespace`. Objects become branches.
    pub fn tree(mut self, namespace: impl Into<String>, tree: Value) -> Self {
        self.trees.push((namespace.into(), tree));
        self
    }

    /// Adds a function leaf at `dotted` inside `namespace`.
    pub fn function(mut self, namespace: impl Into<String>, dotted: impl Into<String>, f: TranslationFn) -> Self {
        self.functions.push((namespace.into(), dotted.into(), f));
        self
    }

    /// Builds the language. Fails on a tree or function for an undeclared
    /// namespace.
    pub fn build(self) -> Result<Language, LanguageError> {
        let declared = &self.options.namespaces;
        let check = |namespace: &String| {
            if declared.contains(namespace) {
                Ok(())
            } else {
                Err(LanguageError::UndeclaredNamespace {
                    namespace: namespace.clone(),
                })
            }
        };

        let mut trees: HashMap<String, HashMap<String, Node>> =
            declared.iter().map(|ns| (ns.clone(), HashMap::new())).collect();

        for (namespace, tree) in self.trees {
            check(&namespace)?;
            let Node::Branch(nodes) = Node::from(tree) else {
                return Err(LanguageError::NotAnObject { namespace });
            };
            trees.entry(namespace).or_default().extend(nodes);
        }
        for (namespace, dotted, f) in self.functions {
            check(&namespace)?;
            let keys: Vec<String> = dotted.split('.').map(str::to_string).collect();
            insert_at(trees.entry(namespace).or_default(), &keys, Node::Function(f));
        }

        Ok(Language {
            core: ModuleCore::new(self.options.module),
            aliases: self.options.aliases,
            namespaces: self.options.namespaces,
            positional: self.options.positional_args,
            trees,
        })
    }
}

/// A set of translations for one locale.
pub struct Language {
    core: ModuleCore,
    aliases: Vec<String>,
    namespaces: Vec<String>,
    positional: bool,
    trees: HashMap<String, HashMap<String, Node>>,
}

impl Language {
    /// Starts building a language.
    pub fn builder(options: LanguageOptions) -> LanguageBuilder {
        LanguageBuilder {
            options,
            trees: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// Declared namespaces.
    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    /// Whether function leaves get positional arguments.
    pub fn is_positional(&self) -> bool {
        self.positional
    }

    /// Namespace used for paths without one: the owning handler's default,
    /// else [`DEFAULT_NAMESPACE`].
    pub fn default_namespace(&self) -> String {
        self.core
            .handler::<Language>()
            .map(|handler| handler.shared().default_namespace())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
    }

    fn lookup(&self, namespace: &str, keys: &[String]) -> Option<&Node> {
        let (first, rest) = keys.split_first()?;
        let mut node = self.trees.get(namespace)?.get(first)?;
        for key in rest {
            let Node::Branch(children) = node else {
                return None;
            };
            node = children.get(key)?;
        }
        Some(node)
    }

    /// Resolves `path` against this language.
    pub async fn translate(self: &Arc<Self>, path: &str, context: &Value) -> TranslateResult<Value> {
        let parsed: TranslationPath = path.parse()?;
        let namespace = parsed
            .namespace
            .clone()
            .unwrap_or_else(|| self.default_namespace());
        let language = self.core.id();

        if !self.namespaces.contains(&namespace) {
            return Err(TranslateError::MissingNamespace { namespace, language });
        }
        let missing = || TranslateError::MissingTranslation {
            path: path.to_string(),
            language: self.core.id(),
        };

        let value = match self.lookup(&namespace, &parsed.keys).ok_or_else(missing)? {
            Node::Value(value) => value.clone(),
            Node::Branch(_) => return Err(missing()),
            Node::Function(f) => {
                let args = FunctionArgs::build(context, self.positional);
                let result = match f {
                    TranslationFn::Sync(f) => f(self, args),
                    TranslationFn::Async(f) => f(Arc::clone(self), args).instrument(self.core.span()).await,
                };
                result.map_err(|source| TranslateError::Function {
                    path: path.to_string(),
                    source: Arc::from(source),
                })?
            }
        };

        let value = match (parsed.index, value) {
            (Some(index), Value::Array(mut items)) if index < items.len() => items.swap_remove(index),
            (Some(_), Value::Array(_)) => return Err(missing()),
            (_, value) => value,
        };

        match value {
            Value::Null => Err(missing()),
            Value::String(template) => interpolate(&template, context)
                .map(Value::String)
                .map_err(|passes| TranslateError::InterpolationLoop {
                    path: path.to_string(),
                    passes,
                }),
            other => Ok(other),
        }
    }
}

impl Module for Language {
    type Shared = LanguageShared;

    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn aliases(&self) -> &[String] {
        &self.aliases
    }
}

/// Defaults shared by every language of one handler.
#[derive(Debug)]
pub struct LanguageShared {
    default_namespace: RwLock<String>,
    fallback: RwLock<Option<String>>,
}

impl Default for LanguageShared {
    fn default() -> Self {
        Self {
            default_namespace: RwLock::new(DEFAULT_NAMESPACE.to_string()),
            fallback: RwLock::new(None),
        }
    }
}

impl LanguageShared {
    /// Namespace used for paths without one.
    pub fn default_namespace(&self) -> String {
        self.default_namespace.read().clone()
    }

    /// Fallback language id.
    pub fn fallback(&self) -> Option<String> {
        self.fallback.read().clone()
    }
}

// =============================================================================
// LanguageHandler
// =============================================================================

/// Handler of [`Language`]s.
#[derive(Debug, Clone)]
pub struct LanguageHandler {
    inner: Arc<Handler<Language>>,
}

impl LanguageHandler {
    /// Creates the handler.
    pub fn new(options: HandlerOptions) -> Self {
        Self {
            inner: Handler::new(options),
        }
    }

    /// The underlying handler.
    pub fn handler(&self) -> &Arc<Handler<Language>> {
        &self.inner
    }

    /// Sets the namespace used for paths without one.
    pub fn set_default_namespace(&self, namespace: impl Into<String>) {
        *self.inner.shared().default_namespace.write() = namespace.into();
    }

    /// Namespace used for paths without one.
    pub fn default_namespace(&self) -> String {
        self.inner.shared().default_namespace()
    }

    /// Sets the language tried when a translation is missing.
    pub fn set_fallback(&self, language: Option<String>) {
        *self.inner.shared().fallback.write() = language;
    }

    /// Fallback language id.
    pub fn fallback(&self) -> Option<String> {
        self.inner.shared().fallback()
    }

    /// Resolves `path` in the language with this id or alias. A missing
    /// translation is retried in the fallback language, if one is set.
    pub async fn translate(&self, language: &str, path: &str, context: &Value) -> TranslateResult<Value> {
        let target = self
            .inner
            .resolve(language)
            .ok_or_else(|| TranslateError::MissingLanguage {
                language: language.to_string(),
            })?;

        match target.translate(path, context).await {
            Err(e) if e.is_missing_translation() => {
                let fallback = self
                    .fallback()
                    .and_then(|id| self.inner.resolve(&id))
                    .filter(|fallback| !Arc::ptr_eq(fallback, &target));
                let Some(fallback) = fallback else {
                    return Err(e);
                };
                debug!(
                    language = %target.core().id(),
                    fallback = %fallback.core().id(),
                    path,
                    "Translation missing, using fallback"
                );
                fallback.translate(path, context).await
            }
            other => other,
        }
    }
}

impl Deref for LanguageHandler {
    type Target = Handler<Language>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
