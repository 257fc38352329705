//! Pull-based node graph with per-generation caching and cooperative
//! cancellation.
//!
//! A [`Node`] wraps one [`Filter`] over an [`Upstream`] and a live
//! [`SettingsControl`]. Asking a node for its result pulls the upstream
//! lazily, runs the filter, and caches the output until either the
//! settings generation moves or the upstream hands back a different
//! input. A [`Source`] sits at the root and holds the current image.
//!
//! Cache validity is keyed on input identity: a node keeps the `Arc`
//! of the input its output was computed from and reuses the output only
//! while the upstream hands back that same `Arc` (`Arc::ptr_eq`).
//! [`Upstream::has_result`] is the cheap check for the same condition,
//! answering without pulling or computing anything.
//!
//! # Locking
//!
//! Each node guards its filter and cache with one mutex. The lock is
//! held only while reading or replacing that state, never across a
//! filter invocation or an upstream call, so a slow stage never blocks
//! a settings push or a `has_result()` query from another thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::settings::Validate;
use crate::types::ConfigError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Cancel ──────────────────────────────────────────────────────────

/// Shared cancellation flag.
///
/// Clones observe the same flag. Setting it makes every node that holds
/// it return `None` without starting work, and discard any output that
/// finishes after the flag went up.
#[derive(Debug, Clone, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    /// A cleared flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether cancellation is requested.
    #[must_use]
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Raise or clear the flag.
    pub fn set(&self, cancelled: bool) {
        self.0.store(cancelled, Ordering::Release);
    }
}

// ─── Settings control ────────────────────────────────────────────────

#[derive(Debug)]
struct Versioned<S> {
    settings: S,
    generation: u64,
}

/// Shared, validated settings with a change counter.
///
/// Every accepted [`set`](Self::set) bumps the generation; nodes compare
/// it against the generation their filter was built from.
#[derive(Debug)]
pub struct SettingsControl<S> {
    inner: Arc<Mutex<Versioned<S>>>,
}

impl<S> Clone for SettingsControl<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Validate + Clone> SettingsControl<S> {
    /// Wrap initial settings at generation 0.
    ///
    /// # Errors
    ///
    /// Returns the settings' [`Validate`] error.
    pub fn new(settings: S) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            inner: Arc::new(Mutex::new(Versioned {
                settings,
                generation: 0,
            })),
        })
    }

    /// Current settings.
    #[must_use]
    pub fn get(&self) -> S {
        lock(&self.inner).settings.clone()
    }

    /// Replace the settings and bump the generation.
    ///
    /// # Errors
    ///
    /// Returns the settings' [`Validate`] error; the previous settings
    /// stay in place.
    pub fn set(&self, settings: S) -> Result<(), ConfigError> {
        settings.validate()?;
        let mut inner = lock(&self.inner);
        inner.settings = settings;
        inner.generation += 1;
        Ok(())
    }

    /// Edit a copy of the current settings and [`set`](Self::set) it.
    ///
    /// # Errors
    ///
    /// Returns the edited settings' [`Validate`] error.
    pub fn update(&self, edit: impl FnOnce(&mut S)) -> Result<(), ConfigError> {
        let mut settings = self.get();
        edit(&mut settings);
        self.set(settings)
    }

    /// Number of accepted changes so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        lock(&self.inner).generation
    }

    /// Generation and settings read under one lock.
    #[must_use]
    pub fn snapshot(&self) -> (u64, S) {
        let inner = lock(&self.inner);
        (inner.generation, inner.settings.clone())
    }
}

// ─── Contracts ───────────────────────────────────────────────────────

/// One processing stage, rebuilt from its settings whenever they change.
pub trait Filter: Sized + Send + Sync {
    /// Settings the stage is built from.
    type Settings: Validate + Clone + Send;
    /// Upstream result consumed by the stage.
    type Input: Send + Sync;
    /// Result produced by the stage.
    type Output: Send + Sync;

    /// Stage name used in logs and diagnostics.
    const NAME: &'static str;

    /// Build the stage from a settings snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the settings are unusable.
    fn new(settings: &Self::Settings) -> Result<Self, ConfigError>;

    /// Run the stage. `None` means "nothing to report", e.g. a disabled
    /// stage, and propagates downstream as absence rather than error.
    fn filter(&self, input: &Self::Input) -> Option<Self::Output>;
}

/// Anything a node can pull its input from.
pub trait Upstream: Send + Sync {
    /// Result type handed downstream.
    type Output: Send + Sync;

    /// Whether a cached result is ready without recomputation.
    fn has_result(&self) -> bool;

    /// Current result, computing it if needed.
    fn get_result(&self) -> Option<Arc<Self::Output>>;
}

// ─── Source ──────────────────────────────────────────────────────────

#[derive(Debug)]
struct SourceState<T> {
    data: Option<Arc<T>>,
    fresh: bool,
    version: u64,
}

/// Root of a graph holding the current input.
///
/// Pushing new data marks it fresh; while fresh, [`has_result`] reports
/// `false` so downstream caches know to recompute.
///
/// [`has_result`]: Upstream::has_result
#[derive(Debug)]
pub struct Source<T> {
    state: Mutex<SourceState<T>>,
}

impl<T> Default for Source<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(SourceState {
                data: None,
                fresh: false,
                version: 0,
            }),
        }
    }
}

impl<T> Source<T> {
    /// An empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held data.
    pub fn set_data(&self, data: T) {
        let mut state = lock(&self.state);
        state.data = Some(Arc::new(data));
        state.fresh = true;
        state.version += 1;
    }

    /// The held data, without marking it as pulled.
    #[must_use]
    pub fn peek(&self) -> Option<Arc<T>> {
        lock(&self.state).data.clone()
    }

    /// Number of times data has been pushed.
    #[must_use]
    pub fn version(&self) -> u64 {
        lock(&self.state).version
    }
}

impl<T: Send + Sync> Upstream for Source<T> {
    type Output = T;

    fn has_result(&self) -> bool {
        let state = lock(&self.state);
        state.data.is_some() && !state.fresh
    }

    fn get_result(&self) -> Option<Arc<T>> {
        let mut state = lock(&self.state);
        state.fresh = false;
        state.data.clone()
    }
}

// ─── Node ────────────────────────────────────────────────────────────

struct Cached<I, O> {
    input: Arc<I>,
    output: Arc<O>,
}

struct NodeState<F: Filter> {
    generation: u64,
    filter: Option<Arc<F>>,
    cached: Option<Cached<F::Input, F::Output>>,
}

/// A filter stage over an upstream, with settings-driven invalidation.
pub struct Node<U, F: Filter> {
    input: Arc<U>,
    control: SettingsControl<F::Settings>,
    cancel: Cancel,
    state: Mutex<NodeState<F>>,
}

impl<U, F> Node<U, F>
where
    U: Upstream<Output = F::Input>,
    F: Filter,
{
    /// Build a node, constructing its filter from the control's current
    /// settings.
    ///
    /// # Errors
    ///
    /// Returns the filter's [`ConfigError`].
    pub fn new(
        input: Arc<U>,
        control: SettingsControl<F::Settings>,
        cancel: Cancel,
    ) -> Result<Self, ConfigError> {
        let (generation, settings) = control.snapshot();
        let filter = F::new(&settings)?;
        Ok(Self {
            input,
            control,
            cancel,
            state: Mutex::new(NodeState {
                generation,
                filter: Some(Arc::new(filter)),
                cached: None,
            }),
        })
    }

    /// Stage name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        F::NAME
    }

    /// The settings control this node follows.
    #[must_use]
    pub const fn control(&self) -> &SettingsControl<F::Settings> {
        &self.control
    }

    /// The upstream this node pulls from.
    #[must_use]
    pub const fn input(&self) -> &Arc<U> {
        &self.input
    }

    /// Rebuild the filter and drop the cache if the settings moved.
    fn sync(&self, state: &mut NodeState<F>) {
        let (generation, settings) = self.control.snapshot();
        if generation == state.generation {
            return;
        }
        trace!(node = F::NAME, generation, "settings changed");
        state.generation = generation;
        state.cached = None;
        state.filter = match F::new(&settings) {
            Ok(filter) => Some(Arc::new(filter)),
            Err(e) => {
                warn!(node = F::NAME, error = %e, "cannot build filter");
                None
            }
        };
    }
}

impl<U, F> Upstream for Node<U, F>
where
    U: Upstream<Output = F::Input>,
    F: Filter,
{
    type Output = F::Output;

    fn has_result(&self) -> bool {
        {
            let mut state = lock(&self.state);
            self.sync(&mut state);
            if state.cached.is_none() {
                return false;
            }
        }
        self.input.has_result()
    }

    fn get_result(&self) -> Option<Arc<F::Output>> {
        if self.cancel.get() {
            trace!(node = F::NAME, "cancelled");
            return None;
        }

        let (generation, filter, cached) = {
            let mut state = lock(&self.state);
            self.sync(&mut state);
            let cached = state
                .cached
                .as_ref()
                .map(|c| (Arc::clone(&c.input), Arc::clone(&c.output)));
            (state.generation, state.filter.clone(), cached)
        };

        let input = self.input.get_result()?;

        if let Some((from, output)) = cached
            && Arc::ptr_eq(&from, &input)
        {
            trace!(node = F::NAME, "cached");
            return Some(output);
        }

        let filter = filter?;
        if self.cancel.get() || self.control.generation() != generation {
            debug!(node = F::NAME, "stale before filtering");
            return None;
        }

        let start = Instant::now();
        let output = filter.filter(&input);
        debug!(
            node = F::NAME,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            produced = output.is_some(),
            "filtered"
        );
        let output = Arc::new(output?);

        if self.cancel.get() {
            debug!(node = F::NAME, "cancelled during filter, discarding");
            return None;
        }

        let mut state = lock(&self.state);
        self.sync(&mut state);
        if state.generation != generation {
            debug!(node = F::NAME, "settings changed during filter, discarding");
            return None;
        }
        state.cached = Some(Cached {
            input,
            output: Arc::clone(&output),
        });
        Some(output)
    }
}
