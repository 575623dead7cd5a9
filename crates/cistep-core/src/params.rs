//! Lazily evaluated step parameters.
//!
//! A step advertises its output parameters as a [`ParameterMap`] of
//! producers. Nothing is evaluated until a consumer asks for a value, and
//! the producing step decides whether a value is cached ([`CachedParameter`])
//! or recomputed per read ([`FnParameter`]).
//!
//! [`DeferredParameters`] is the shared board consumers read from. The
//! executor publishes a step's producers onto it once the step has
//! completed, so a consumer scheduled after its producer always sees them.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{StepError, StepResult};

/// A named output value computed on demand.
///
/// Implementations are shared across every consumer and must tolerate
/// concurrent calls.
#[async_trait]
pub trait Parameter: Send + Sync {
    async fn value(&self) -> StepResult<String>;
}

/// Parameter producers keyed by parameter name.
pub type ParameterMap = BTreeMap<String, Arc<dyn Parameter>>;

/// Parameter backed by an async closure, evaluated on every read.
pub struct FnParameter<F> {
    producer: F,
}

impl<F, Fut> FnParameter<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepResult<String>> + Send + 'static,
{
    pub fn new(producer: F) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl<F, Fut> Parameter for FnParameter<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepResult<String>> + Send + 'static,
{
    async fn value(&self) -> StepResult<String> {
        (self.producer)().await
    }
}

/// Memoizes the first successful resolution of another parameter.
///
/// Failed resolutions are not cached; the next read retries.
pub struct CachedParameter {
    inner: Arc<dyn Parameter>,
    cell: OnceCell<String>,
}

impl CachedParameter {
    pub fn new(inner: Arc<dyn Parameter>) -> Self {
        Self {
            inner,
            cell: OnceCell::new(),
        }
    }
}

#[async_trait]
impl Parameter for CachedParameter {
    async fn value(&self) -> StepResult<String> {
        self.cell
            .get_or_try_init(|| self.inner.value())
            .await
            .cloned()
    }
}

/// Wrap an async closure as a shareable parameter.
pub fn parameter<F, Fut>(producer: F) -> Arc<dyn Parameter>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepResult<String>> + Send + 'static,
{
    Arc::new(FnParameter::new(producer))
}

/// Wrap an async closure as a parameter that resolves at most once.
pub fn cached_parameter<F, Fut>(producer: F) -> Arc<dyn Parameter>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepResult<String>> + Send + 'static,
{
    Arc::new(CachedParameter::new(parameter(producer)))
}

#[derive(Default)]
struct Board {
    producers: BTreeMap<String, Arc<dyn Parameter>>,
    values: BTreeMap<String, String>,
}

/// Thread-safe registry of published parameters.
///
/// Concrete values recorded with [`DeferredParameters::set`] take precedence
/// over lazy producers registered under the same name.
#[derive(Default)]
pub struct DeferredParameters {
    board: RwLock<Board>,
}

impl DeferredParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every producer in `map`. Later registrations replace
    /// earlier ones with the same name.
    pub fn publish(&self, map: &ParameterMap) {
        if map.is_empty() {
            return;
        }
        let mut board = self.board.write().unwrap_or_else(|e| e.into_inner());
        for (name, producer) in map {
            debug!(parameter = %name, "publishing parameter");
            board.producers.insert(name.clone(), Arc::clone(producer));
        }
    }

    /// Register a single lazy producer.
    pub fn add(&self, name: impl Into<String>, producer: Arc<dyn Parameter>) {
        let mut board = self.board.write().unwrap_or_else(|e| e.into_inner());
        board.producers.insert(name.into(), producer);
    }

    /// Record a concrete value.
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        let mut board = self.board.write().unwrap_or_else(|e| e.into_inner());
        board.values.insert(name.into(), value.into());
    }

    pub fn has(&self, name: &str) -> bool {
        let board = self.board.read().unwrap_or_else(|e| e.into_inner());
        board.values.contains_key(name) || board.producers.contains_key(name)
    }

    /// Every published name, sorted.
    pub fn names(&self) -> Vec<String> {
        let board = self.board.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = board
            .values
            .keys()
            .chain(board.producers.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Resolve `name`, evaluating its producer if no concrete value exists.
    pub async fn get(&self, name: &str) -> StepResult<String> {
        let producer = {
            let board = self.board.read().unwrap_or_else(|e| e.into_inner());
            if let Some(value) = board.values.get(name) {
                return Ok(value.clone());
            }
            board.producers.get(name).cloned()
        };
        match producer {
            Some(producer) => producer.value().await,
            None => Err(StepError::ParameterNotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Resolve every published parameter.
    pub async fn resolve_all(&self) -> StepResult<BTreeMap<String, String>> {
        let mut resolved = BTreeMap::new();
        for name in self.names() {
            let value = self.get(&name).await?;
            resolved.insert(name, value);
        }
        Ok(resolved)
    }
}

impl fmt::Debug for DeferredParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredParameters")
            .field("names", &self.names())
            .finish()
    }
}
