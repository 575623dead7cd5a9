//! In-memory fakes for the step contract (testing only)
//!
//! [`FakeStep`] is a configurable [`Step`] that counts its calls, and
//! [`Journal`] records when runs begin and end so tests can assert
//! ordering and concurrency.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{StepError, StepResult};
use crate::link::Link;
use crate::params::{Parameter, ParameterMap};
use crate::step::{InputDefinition, Step};

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Begin(String),
    End(String),
}

/// Shared, ordered log of run boundaries.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: JournalEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &JournalEntry) -> Option<usize> {
        self.entries.lock().unwrap().iter().position(|e| e == entry)
    }

    pub fn started(&self, step: &str) -> bool {
        self.position(&JournalEntry::Begin(step.to_string())).is_some()
    }

    /// `first` finished running before `second` began.
    pub fn finished_before_started(&self, first: &str, second: &str) -> bool {
        let end = self.position(&JournalEntry::End(first.to_string()));
        let begin = self.position(&JournalEntry::Begin(second.to_string()));
        matches!((end, begin), (Some(end), Some(begin)) if end < begin)
    }

    /// Highest number of runs in flight at once.
    pub fn max_concurrency(&self) -> usize {
        let mut current = 0usize;
        let mut max = 0usize;
        for entry in self.entries.lock().unwrap().iter() {
            match entry {
                JournalEntry::Begin(_) => {
                    current += 1;
                    max = max.max(current);
                }
                JournalEntry::End(_) => current = current.saturating_sub(1),
            }
        }
        max
    }

    pub fn finished_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, JournalEntry::End(_)))
            .count()
    }
}

// ---------------------------------------------------------------------------
// FakeStep
// ---------------------------------------------------------------------------

/// Configurable step whose effect is a boolean flag.
///
/// A successful `run` flips the flag so the next `done` reports `true`.
#[derive(Default)]
pub struct FakeStep {
    name: String,
    requires: Vec<Link>,
    creates: Vec<Link>,
    provides: ParameterMap,
    gate: Option<Link>,
    inputs: InputDefinition,
    delay: Option<Duration>,
    failing_run: Option<String>,
    failing_done: Option<String>,
    failing_inputs: Option<String>,
    journal: Option<Arc<Journal>>,
    done: AtomicBool,
    run_calls: AtomicUsize,
    done_calls: AtomicUsize,
    inputs_calls: AtomicUsize,
    dry_flags: Mutex<Vec<bool>>,
}

impl FakeStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn requires(mut self, link: Link) -> Self {
        self.requires.push(link);
        self
    }

    pub fn creates(mut self, link: Link) -> Self {
        self.creates.push(link);
        self
    }

    /// Start with the effect already in place.
    pub fn already_done(self) -> Self {
        self.done.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_run(mut self, message: impl Into<String>) -> Self {
        self.failing_run = Some(message.into());
        self
    }

    pub fn failing_done(mut self, message: impl Into<String>) -> Self {
        self.failing_done = Some(message.into());
        self
    }

    pub fn failing_inputs(mut self, message: impl Into<String>) -> Self {
        self.failing_inputs = Some(message.into());
        self
    }

    /// Sleep this long inside `run`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_journal(mut self, journal: Arc<Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_inputs(mut self, inputs: InputDefinition) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn provides(mut self, name: impl Into<String>, param: Arc<dyn Parameter>, gate: Link) -> Self {
        self.provides.insert(name.into(), param);
        self.gate = Some(gate);
        self
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub fn run_calls(&self) -> usize {
        self.run_calls.load(Ordering::SeqCst)
    }

    pub fn done_calls(&self) -> usize {
        self.done_calls.load(Ordering::SeqCst)
    }

    pub fn inputs_calls(&self) -> usize {
        self.inputs_calls.load(Ordering::SeqCst)
    }

    /// The `dry` argument of every call, in call order.
    pub fn dry_flags(&self) -> Vec<bool> {
        self.dry_flags.lock().unwrap().clone()
    }

    fn note(&self, entry: JournalEntry) {
        if let Some(journal) = &self.journal {
            journal.record(entry);
        }
    }
}

#[async_trait]
impl Step for FakeStep {
    async fn inputs(&self, dry: bool) -> StepResult<InputDefinition> {
        self.dry_flags.lock().unwrap().push(dry);
        self.inputs_calls.fetch_add(1, Ordering::SeqCst);
        match &self.failing_inputs {
            Some(message) => Err(StepError::Resolution {
                what: format!("inputs for {}", self.name),
                reason: message.clone(),
            }),
            None => Ok(self.inputs.clone()),
        }
    }

    async fn run(&self, dry: bool) -> StepResult<()> {
        self.dry_flags.lock().unwrap().push(dry);
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        self.note(JournalEntry::Begin(self.name.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.note(JournalEntry::End(self.name.clone()));
        match &self.failing_run {
            Some(message) => Err(StepError::failed(message.clone())),
            None => {
                self.done.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn done(&self, dry: bool) -> StepResult<bool> {
        self.dry_flags.lock().unwrap().push(dry);
        self.done_calls.fetch_add(1, Ordering::SeqCst);
        match &self.failing_done {
            Some(message) => Err(StepError::failed(message.clone())),
            None => Ok(self.is_done()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn requires(&self) -> Vec<Link> {
        self.requires.clone()
    }

    fn creates(&self) -> Vec<Link> {
        self.creates.clone()
    }

    fn provides(&self) -> (ParameterMap, Option<Link>) {
        (self.provides.clone(), self.gate.clone())
    }
}
