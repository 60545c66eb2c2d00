//! Cursor-driven incremental loading of a remote collection.
//!
//! A [`Loader`] owns one [`PagedCollection`] and moves it through
//! `Idle -> Loading -> (Idle | Exhausted | Error)`. At most one fetch is
//! outstanding per cursor; calls made while a fetch is in flight are dropped,
//! not queued. Every `reset` bumps a generation counter, and a fetch that
//! resolves under an older generation is discarded. Hooks registered with
//! [`Loader::on_reset`] run after every reset, whoever triggered it.

use crate::mutation::Mutation;
use crate::source::PageSource;
use serde::Serialize;
use splitdebt_core::models::{Identified, Page};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LoadPhase {
    Idle,
    Loading,
    Exhausted,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A fetch for the current cursor is still outstanding.
    InFlight,
    /// The server has no more pages.
    Exhausted,
    /// The last fetch failed; only an explicit retry resumes loading.
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Appended {
        added: usize,
        duplicates: usize,
        exhausted: bool,
    },
    Skipped(SkipReason),
    Failed(String),
    /// The result belonged to a generation that was reset meanwhile.
    Stale,
}

/// Snapshot of a loader's collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PagedCollection<T> {
    pub items: Vec<T>,
    /// Server-side offset of the next page.
    pub cursor: u32,
    pub page_size: u32,
    pub has_more: bool,
    pub phase: LoadPhase,
    pub generation: u64,
}

impl<T> PagedCollection<T> {
    fn empty(page_size: u32, generation: u64) -> Self {
        Self {
            items: Vec::new(),
            cursor: 0,
            page_size,
            has_more: true,
            phase: LoadPhase::Idle,
            generation,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.phase == LoadPhase::Loading
    }

    pub fn last_error(&self) -> Option<&str> {
        match &self.phase {
            LoadPhase::Error(message) => Some(message),
            _ => None,
        }
    }

    /// Nothing loaded, nothing loading and nothing failed.
    pub fn is_empty_result(&self) -> bool {
        self.items.is_empty() && matches!(self.phase, LoadPhase::Idle | LoadPhase::Exhausted)
    }
}

struct Inner<S: PageSource> {
    source: Arc<S>,
    collection: PagedCollection<S::Item>,
    in_flight: Option<u32>,
    pending_mutations: HashSet<String>,
}

struct Ticket<S> {
    source: Arc<S>,
    cursor: u32,
    limit: u32,
    generation: u64,
}

impl<S: PageSource> Inner<S> {
    fn begin(&mut self, retry: bool) -> Result<Ticket<S>, SkipReason> {
        let c = &self.collection;
        if c.phase == LoadPhase::Exhausted || !c.has_more {
            return Err(SkipReason::Exhausted);
        }
        if c.phase == LoadPhase::Loading || self.in_flight == Some(c.cursor) {
            return Err(SkipReason::InFlight);
        }
        if matches!(c.phase, LoadPhase::Error(_)) && !retry {
            return Err(SkipReason::Errored);
        }

        self.in_flight = Some(c.cursor);
        self.collection.phase = LoadPhase::Loading;
        Ok(Ticket {
            source: Arc::clone(&self.source),
            cursor: self.collection.cursor,
            limit: self.collection.page_size,
            generation: self.collection.generation,
        })
    }

    fn finish(
        &mut self,
        ticket: &Ticket<S>,
        result: anyhow::Result<Page<S::Item>>,
    ) -> FetchOutcome {
        let collection = ticket.source.collection();
        if ticket.generation != self.collection.generation {
            tracing::debug!(
                collection,
                generation = ticket.generation,
                current = self.collection.generation,
                "discarding page from a reset generation"
            );
            return FetchOutcome::Stale;
        }
        self.in_flight = None;

        let page = match result {
            Ok(page) => page,
            Err(err) => {
                let message = api::error_message(&err, ticket.source.failure_message());
                tracing::warn!(collection, cursor = ticket.cursor, error = %err, "page fetch failed");
                self.collection.phase = LoadPhase::Error(message.clone());
                return FetchOutcome::Failed(message);
            }
        };

        let received = page.items.len() + page.skipped;
        let page_index = ticket.cursor / ticket.limit.max(1);
        let short = received < ticket.limit as usize;
        let exhausted = received == 0 || short || !page.more_after(page_index);

        let mut seen: HashSet<String> = self
            .collection
            .items
            .iter()
            .map(|item| item.id().to_string())
            .collect();
        let mut added = 0;
        for item in page.items {
            if seen.insert(item.id().to_string()) {
                self.collection.items.push(item);
                added += 1;
            }
        }
        let duplicates = received - page.skipped - added;

        // Advance by the requested size, not by what was new, so offsets stay
        // monotonic even when the server shifted items under us.
        if received > 0 {
            self.collection.cursor += ticket.limit;
        }
        if exhausted {
            self.collection.has_more = false;
            self.collection.phase = LoadPhase::Exhausted;
        } else {
            self.collection.phase = LoadPhase::Idle;
        }

        tracing::debug!(
            collection,
            cursor = self.collection.cursor,
            received,
            added,
            duplicates,
            exhausted,
            "page applied"
        );
        FetchOutcome::Appended {
            added,
            duplicates,
            exhausted,
        }
    }
}

type ResetCallback = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Default)]
struct ResetHooks {
    next_id: u64,
    hooks: HashMap<u64, ResetCallback>,
}

fn lock_hooks(hooks: &Mutex<ResetHooks>) -> MutexGuard<'_, ResetHooks> {
    hooks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Unregisters its reset hook when dropped.
pub struct ResetHook {
    id: u64,
    hooks: Weak<Mutex<ResetHooks>>,
}

impl Drop for ResetHook {
    fn drop(&mut self) {
        if let Some(hooks) = self.hooks.upgrade() {
            lock_hooks(&hooks).hooks.remove(&self.id);
        }
    }
}

/// Incremental loader for one collection instance. Clones share the same
/// collection; separate instances share nothing.
pub struct Loader<S: PageSource> {
    inner: Arc<Mutex<Inner<S>>>,
    reset_hooks: Arc<Mutex<ResetHooks>>,
}

impl<S: PageSource> Clone for Loader<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            reset_hooks: Arc::clone(&self.reset_hooks),
        }
    }
}

impl<S: PageSource> Loader<S> {
    pub fn new(source: S, page_size: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                source: Arc::new(source),
                collection: PagedCollection::empty(page_size.max(1), 0),
                in_flight: None,
                pending_mutations: HashSet::new(),
            })),
            reset_hooks: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch the page at the current cursor unless loading is pointless or
    /// already happening.
    pub async fn request_next_page(&self) -> FetchOutcome {
        self.fetch(false).await
    }

    /// Re-enter loading after a failed fetch, resuming at the same cursor.
    pub async fn retry(&self) -> FetchOutcome {
        self.fetch(true).await
    }

    async fn fetch(&self, retry: bool) -> FetchOutcome {
        let ticket = match self.lock().begin(retry) {
            Ok(ticket) => ticket,
            Err(reason) => return FetchOutcome::Skipped(reason),
        };
        tracing::debug!(
            collection = ticket.source.collection(),
            cursor = ticket.cursor,
            page_size = ticket.limit,
            generation = ticket.generation,
            "fetching page"
        );

        let result = ticket.source.fetch_page(ticket.cursor, ticket.limit).await;
        self.lock().finish(&ticket, result)
    }

    /// Drop everything loaded so far and start over from offset zero. A fetch
    /// still in flight will be discarded when it resolves.
    pub fn reset(&self) {
        let generation = {
            let mut inner = self.lock();
            let generation = inner.collection.generation + 1;
            let page_size = inner.collection.page_size;
            inner.collection = PagedCollection::empty(page_size, generation);
            inner.in_flight = None;
            inner.pending_mutations.clear();
            tracing::debug!(
                collection = inner.source.collection(),
                generation,
                "collection reset"
            );
            generation
        };

        let hooks: Vec<ResetCallback> = lock_hooks(&self.reset_hooks)
            .hooks
            .values()
            .cloned()
            .collect();
        for hook in hooks {
            hook(generation);
        }
    }

    /// Runs `callback` with the new generation after every reset, until the
    /// returned hook is dropped. Callbacks run with no loader lock held.
    pub fn on_reset(&self, callback: impl Fn(u64) + Send + Sync + 'static) -> ResetHook {
        let mut hooks = lock_hooks(&self.reset_hooks);
        hooks.next_id += 1;
        let id = hooks.next_id;
        hooks.hooks.insert(id, Arc::new(callback));
        ResetHook {
            id,
            hooks: Arc::downgrade(&self.reset_hooks),
        }
    }

    /// Reset and read from a different source from now on, e.g. when the
    /// owning event changes.
    pub fn rescope(&self, source: S) {
        self.lock().source = Arc::new(source);
        self.reset();
    }

    pub fn source(&self) -> Arc<S> {
        Arc::clone(&self.lock().source)
    }

    pub fn snapshot(&self) -> PagedCollection<S::Item> {
        self.lock().collection.clone()
    }

    pub fn items(&self) -> Vec<S::Item> {
        self.lock().collection.items.clone()
    }

    pub fn find(&self, id: &str) -> Option<S::Item> {
        self.lock()
            .collection
            .items
            .iter()
            .find(|item| item.id() == id)
            .cloned()
    }

    pub fn phase(&self) -> LoadPhase {
        self.lock().collection.phase.clone()
    }

    pub fn has_more(&self) -> bool {
        self.lock().collection.has_more
    }

    pub fn generation(&self) -> u64 {
        self.lock().collection.generation
    }

    /// Whether the visibility driver should ask for more right now.
    pub fn wants_more(&self) -> bool {
        let inner = self.lock();
        inner.collection.phase == LoadPhase::Idle && inner.collection.has_more
    }

    /// Applies a local change if the collection is still the one of
    /// `generation`. The cursor is never touched.
    pub fn apply(&self, generation: u64, mutation: Mutation<S::Item>) -> bool {
        let mut inner = self.lock();
        if inner.collection.generation != generation {
            tracing::debug!(
                collection = inner.source.collection(),
                generation,
                "dropping mutation for a reset generation"
            );
            return false;
        }
        mutation.apply_to(&mut inner.collection.items)
    }

    /// Marks `id` as having a remote change outstanding and returns the
    /// generation it was registered under, or `None` when one already is.
    pub fn begin_mutation(&self, id: &str) -> Option<u64> {
        let mut inner = self.lock();
        let generation = inner.collection.generation;
        inner
            .pending_mutations
            .insert(id.to_string())
            .then_some(generation)
    }

    /// Releases the marker set by [`begin_mutation`](Self::begin_mutation).
    /// A marker from before a reset is already gone; the current one is kept.
    pub fn end_mutation(&self, generation: u64, id: &str) {
        let mut inner = self.lock();
        if inner.collection.generation == generation {
            inner.pending_mutations.remove(id);
        }
    }

    pub fn is_mutating(&self, id: &str) -> bool {
        self.lock().pending_mutations.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{mpsc, Mutex as AsyncMutex};

    #[derive(Debug, Clone, PartialEq)]
    struct Row(String);

    impl Identified for Row {
        fn id(&self) -> &str {
            &self.0
        }
    }

    fn rows(ids: std::ops::Range<usize>) -> Vec<Row> {
        ids.map(|i| Row(format!("r{i}"))).collect()
    }

    /// Hands out whatever the test pushes into the channel, one response per
    /// fetch, so a fetch stays in flight until the test answers it.
    struct Scripted {
        responses: AsyncMutex<mpsc::UnboundedReceiver<Result<Page<Row>>>>,
        fetches: Arc<AtomicUsize>,
        offsets: Arc<std::sync::Mutex<Vec<u32>>>,
    }

    #[async_trait]
    impl PageSource for Scripted {
        type Item = Row;

        fn collection(&self) -> &'static str {
            "rows"
        }

        async fn fetch_page(&self, offset: u32, _limit: u32) -> Result<Page<Row>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.offsets.lock().unwrap().push(offset);
            let mut rx = self.responses.lock().await;
            rx.recv().await.unwrap_or_else(|| Err(anyhow!("script ended")))
        }
    }

    struct Harness {
        loader: Loader<Scripted>,
        tx: mpsc::UnboundedSender<Result<Page<Row>>>,
        fetches: Arc<AtomicUsize>,
        offsets: Arc<std::sync::Mutex<Vec<u32>>>,
    }

    fn harness(page_size: u32) -> Harness {
        let (tx, rx) = mpsc::unbounded_channel();
        let fetches = Arc::new(AtomicUsize::new(0));
        let offsets = Arc::new(std::sync::Mutex::new(Vec::new()));
        let source = Scripted {
            responses: AsyncMutex::new(rx),
            fetches: Arc::clone(&fetches),
            offsets: Arc::clone(&offsets),
        };
        Harness {
            loader: Loader::new(source, page_size),
            tx,
            fetches,
            offsets,
        }
    }

    impl Harness {
        fn answer(&self, items: Vec<Row>) {
            self.tx.send(Ok(Page::new(items))).unwrap();
        }

        fn fail(&self, message: &str) {
            self.tx.send(Err(anyhow!(message.to_string()))).unwrap();
        }
    }

    #[tokio::test]
    async fn pages_until_a_short_page() {
        let h = harness(10);
        h.answer(rows(0..10));
        h.answer(rows(10..20));
        h.answer(rows(20..24));

        for _ in 0..3 {
            assert!(matches!(
                h.loader.request_next_page().await,
                FetchOutcome::Appended { .. }
            ));
        }
        let snap = h.loader.snapshot();
        assert_eq!(snap.items.len(), 24);
        assert!(!snap.has_more);
        assert_eq!(snap.phase, LoadPhase::Exhausted);
        assert_eq!(*h.offsets.lock().unwrap(), vec![0, 10, 20]);

        assert_eq!(
            h.loader.request_next_page().await,
            FetchOutcome::Skipped(SkipReason::Exhausted)
        );
        assert_eq!(h.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_page_exhausts_without_moving_cursor() {
        let h = harness(10);
        h.answer(rows(0..10));
        h.answer(Vec::new());
        h.loader.request_next_page().await;
        let outcome = h.loader.request_next_page().await;
        assert_eq!(
            outcome,
            FetchOutcome::Appended {
                added: 0,
                duplicates: 0,
                exhausted: true
            }
        );
        let snap = h.loader.snapshot();
        assert_eq!(snap.cursor, 10);
        assert!(!snap.has_more);
    }

    #[tokio::test]
    async fn concurrent_requests_issue_one_fetch() {
        let h = harness(10);
        let (first, second) = tokio::join!(h.loader.request_next_page(), async {
            let skipped = h.loader.request_next_page().await;
            h.answer(rows(0..10));
            skipped
        });

        assert_eq!(second, FetchOutcome::Skipped(SkipReason::InFlight));
        assert!(matches!(first, FetchOutcome::Appended { added: 10, .. }));
        assert_eq!(h.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn overlapping_pages_are_deduplicated() {
        let h = harness(3);
        h.answer(rows(0..3));
        // upstream insert shifted r2 into the second page
        h.answer(vec![Row("r2".into()), Row("r3".into()), Row("r4".into())]);

        h.loader.request_next_page().await;
        let outcome = h.loader.request_next_page().await;

        assert_eq!(
            outcome,
            FetchOutcome::Appended {
                added: 2,
                duplicates: 1,
                exhausted: false
            }
        );
        let ids: Vec<String> = h.loader.items().into_iter().map(|r| r.0).collect();
        assert_eq!(ids, vec!["r0", "r1", "r2", "r3", "r4"]);
        // cursor still moves by the full page size
        assert_eq!(h.loader.snapshot().cursor, 6);
    }

    #[tokio::test]
    async fn failure_keeps_items_and_cursor() {
        let h = harness(2);
        h.answer(rows(0..2));
        h.fail("server is down");
        h.loader.request_next_page().await;

        let outcome = h.loader.request_next_page().await;
        assert_eq!(outcome, FetchOutcome::Failed("server is down".into()));
        let snap = h.loader.snapshot();
        assert_eq!(snap.items.len(), 2);
        assert_eq!(snap.cursor, 2);
        assert_eq!(snap.last_error(), Some("server is down"));

        // errors need an explicit retry
        assert_eq!(
            h.loader.request_next_page().await,
            FetchOutcome::Skipped(SkipReason::Errored)
        );

        h.answer(rows(2..3));
        assert!(matches!(
            h.loader.retry().await,
            FetchOutcome::Appended { added: 1, exhausted: true, .. }
        ));
        assert_eq!(*h.offsets.lock().unwrap(), vec![0, 2, 2]);
    }

    #[tokio::test]
    async fn reset_discards_in_flight_result() {
        let h = harness(10);
        let (outcome, ()) = tokio::join!(h.loader.request_next_page(), async {
            tokio::task::yield_now().await;
            h.loader.reset();
            h.answer(rows(0..10));
        });

        assert_eq!(outcome, FetchOutcome::Stale);
        let snap = h.loader.snapshot();
        assert!(snap.items.is_empty());
        assert_eq!(snap.cursor, 0);
        assert_eq!(snap.phase, LoadPhase::Idle);
        assert_eq!(snap.generation, 1);

        // the reset released the guard, so loading starts over at zero
        h.answer(rows(0..4));
        assert!(matches!(
            h.loader.request_next_page().await,
            FetchOutcome::Appended { added: 4, .. }
        ));
        assert_eq!(*h.offsets.lock().unwrap(), vec![0, 0]);
    }

    #[tokio::test]
    async fn total_pages_ends_paging_early() {
        let h = harness(2);
        h.tx.send(Ok(Page::new(rows(0..2)).with_total_pages(1)))
            .unwrap();
        assert!(matches!(
            h.loader.request_next_page().await,
            FetchOutcome::Appended { exhausted: true, .. }
        ));
        assert!(!h.loader.has_more());
    }

    #[tokio::test]
    async fn skipped_entries_count_towards_a_full_page() {
        let h = harness(3);
        let mut partial = Page::new(rows(0..2));
        partial.skipped = 1;
        h.tx.send(Ok(partial)).unwrap();

        let outcome = h.loader.request_next_page().await;
        assert_eq!(
            outcome,
            FetchOutcome::Appended {
                added: 2,
                duplicates: 0,
                exhausted: false
            }
        );
        assert!(h.loader.has_more());
        assert_eq!(h.loader.snapshot().cursor, 3);
    }

    #[tokio::test]
    async fn mutation_marker_survives_completion_from_old_generation() {
        let h = harness(10);
        let old = h.loader.begin_mutation("r0").unwrap();
        assert_eq!(h.loader.begin_mutation("r0"), None);

        h.loader.reset();
        let current = h.loader.begin_mutation("r0").unwrap();
        assert_ne!(old, current);

        h.loader.end_mutation(old, "r0");
        assert!(h.loader.is_mutating("r0"));
        h.loader.end_mutation(current, "r0");
        assert!(!h.loader.is_mutating("r0"));
    }

    #[tokio::test]
    async fn changes_for_a_reset_generation_are_dropped() {
        let h = harness(10);
        h.answer(rows(0..3));
        h.loader.request_next_page().await;
        let before = h.loader.generation();

        h.loader.reset();
        h.answer(rows(0..3));
        h.loader.request_next_page().await;

        let rename = Mutation::Patch {
            id: "r0".to_string(),
            patch: |row: &mut Row| row.0.push('!'),
        };
        assert!(!h.loader.apply(before, rename));
        assert_eq!(h.loader.items(), rows(0..3));
    }

    #[test]
    fn reset_hooks_run_until_dropped() {
        let h = harness(10);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hook = h.loader.on_reset(move |generation| sink.lock().unwrap().push(generation));

        h.loader.reset();
        h.loader.clone().reset();
        drop(hook);
        h.loader.reset();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn separate_loaders_do_not_share_guards() {
        let a = harness(5);
        let b = harness(5);
        let (ra, rb, ()) = tokio::join!(
            a.loader.request_next_page(),
            b.loader.request_next_page(),
            async {
                tokio::task::yield_now().await;
                a.answer(rows(0..1));
                b.answer(rows(0..1));
            }
        );
        assert!(matches!(ra, FetchOutcome::Appended { .. }));
        assert!(matches!(rb, FetchOutcome::Appended { .. }));
    }
}
