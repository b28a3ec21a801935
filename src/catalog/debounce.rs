//! Debounced, ordered option fetching for one autocomplete input.
//!
//! Every keystroke restarts the quiet-period timer and takes a new
//! generation number. A fetch only publishes its result while its generation
//! is still the newest one, so a slow early query can never overwrite a
//! later one. Dropping the field cancels whatever is pending.

use super::autocomplete::{AutocompleteRequest, Resolution, resolve};
use crate::backend::Backend;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};
use std::time::Duration;
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldState {
    /// Generation of the applied resolution; 0 before the first fetch lands.
    pub generation: u64,
    pub loading: bool,
    pub resolution: Option<Resolution>,
}

#[derive(Debug, Default)]
pub struct Generations {
    latest: AtomicU64,
}

impl Generations {
    pub fn next(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.latest.load(Ordering::SeqCst) == generation
    }
}

/// Applies `resolution` unless a newer generation was issued or applied.
pub fn publish(
    state: &watch::Sender<FieldState>,
    generations: &Generations,
    generation: u64,
    resolution: Resolution,
) -> bool {
    state.send_if_modified(|current| {
        if !generations.is_current(generation) || generation <= current.generation {
            return false;
        }
        *current = FieldState {
            generation,
            loading: false,
            resolution: Some(resolution),
        };
        true
    })
}

pub struct AutocompleteField {
    backend: Arc<dyn Backend>,
    window: Duration,
    limit: usize,
    request: Mutex<AutocompleteRequest>,
    generations: Arc<Generations>,
    state: Arc<watch::Sender<FieldState>>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl AutocompleteField {
    pub fn new(
        backend: Arc<dyn Backend>,
        request: AutocompleteRequest,
        window: Duration,
        limit: usize,
    ) -> Self {
        let (state, _) = watch::channel(FieldState::default());
        Self {
            backend,
            window,
            limit,
            request: Mutex::new(request),
            generations: Arc::new(Generations::default()),
            state: Arc::new(state),
            pending: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<FieldState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> FieldState {
        self.state.borrow().clone()
    }

    /// The user typed: re-query with the new fragment after the quiet period.
    pub fn input(&self, text: &str) {
        self.request.lock().unwrap_or_else(|e| e.into_inner()).query = text.to_string();
        self.schedule();
    }

    /// Selection changed outside the input box; keep the current fragment.
    pub fn set_selected(&self, selected: Vec<String>) {
        self.request.lock().unwrap_or_else(|e| e.into_inner()).selected = selected;
        self.schedule();
    }

    fn schedule(&self) {
        // Held across the snapshot, the bump and the swap so the stored task
        // always carries the newest request and generation.
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let request = self.request.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let generation = self.generations.next();
        self.state.send_modify(|state| state.loading = true);

        let backend = self.backend.clone();
        let generations = self.generations.clone();
        let state = self.state.clone();
        let window = self.window;
        let limit = self.limit;
        let task = tokio::spawn(async move {
            sleep(window).await;
            let resolution = resolve(backend.as_ref(), &request, limit).await;
            if !publish(&state, &generations, generation, resolution) {
                debug!(
                    target = "bicimarket.autocomplete",
                    generation, "discarded superseded options"
                );
            }
        });

        if let Some(previous) = pending.replace(task) {
            previous.abort();
        }
    }
}

impl Drop for AutocompleteField {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = pending.take() {
            task.abort();
        }
    }
}
