//! Visibility-triggered paging.
//!
//! The rendering layer owns a [`Viewport`]: it mounts a trailing sentinel
//! after each list, reports how close that sentinel is to the visible area,
//! and unmounts it when the list goes away. A [`FetchDriver`] subscribes to
//! its sentinel and asks the loader for the next page each time the sentinel
//! comes into view. The driver follows the loader: whenever the loader is
//! reset, by the driver or by anyone else holding a clone, the driver starts
//! observing its sentinel again.

use crate::loader::{FetchOutcome, Loader, ResetHook};
use crate::source::PageSource;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SentinelId(u64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObserverOptions {
    /// Start loading this far before the sentinel actually enters the view.
    pub root_margin_px: f32,
    /// Visible fraction of the sentinel that counts as "in view".
    pub threshold: f32,
}

impl Default for ObserverOptions {
    fn default() -> Self {
        Self {
            root_margin_px: 150.0,
            threshold: 0.1,
        }
    }
}

/// One measurement of a sentinel against the viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection {
    /// Visible fraction of the sentinel, 0.0..=1.0.
    pub ratio: f32,
    /// Distance from the bottom edge of the viewport to the top of the
    /// sentinel; zero or negative once it is on screen.
    pub distance_px: f32,
}

impl Intersection {
    pub fn hidden(distance_px: f32) -> Self {
        Self {
            ratio: 0.0,
            distance_px,
        }
    }

    pub fn visible() -> Self {
        Self {
            ratio: 1.0,
            distance_px: 0.0,
        }
    }

    fn counts_as_visible(&self, options: &ObserverOptions) -> bool {
        self.ratio >= options.threshold || self.distance_px <= options.root_margin_px
    }
}

/// What an observer is told about its sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentinelEvent {
    /// The sentinel crossed into view.
    Entered(SentinelId),
    /// The sentinel was unmounted; the observer is already removed.
    Unmounted(SentinelId),
}

type Callback = Arc<dyn Fn(SentinelEvent) + Send + Sync>;

struct Observer {
    sentinel: SentinelId,
    options: ObserverOptions,
    visible: bool,
    callback: Callback,
}

#[derive(Default)]
struct ViewportInner {
    next_sentinel: u64,
    next_observer: u64,
    mounted: HashSet<SentinelId>,
    observers: HashMap<u64, Observer>,
}

/// Observer registry keyed by sentinel. Notifications are edge triggered:
/// an observer fires when its sentinel crosses into view, not while it stays
/// there.
#[derive(Clone, Default)]
pub struct Viewport {
    inner: Arc<Mutex<ViewportInner>>,
}

impl Viewport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ViewportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mount_sentinel(&self) -> SentinelId {
        let mut inner = self.lock();
        inner.next_sentinel += 1;
        let id = SentinelId(inner.next_sentinel);
        inner.mounted.insert(id);
        id
    }

    /// Removes the sentinel and every observer still watching it. Each
    /// removed observer gets a final [`SentinelEvent::Unmounted`].
    pub fn unmount_sentinel(&self, sentinel: SentinelId) {
        let notify: Vec<Callback> = {
            let mut inner = self.lock();
            inner.mounted.remove(&sentinel);
            let ids: Vec<u64> = inner
                .observers
                .iter()
                .filter(|(_, o)| o.sentinel == sentinel)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| inner.observers.remove(&id))
                .map(|o| o.callback)
                .collect()
        };
        for callback in notify {
            callback(SentinelEvent::Unmounted(sentinel));
        }
    }

    pub fn is_mounted(&self, sentinel: SentinelId) -> bool {
        self.lock().mounted.contains(&sentinel)
    }

    pub fn observe(
        &self,
        sentinel: SentinelId,
        options: ObserverOptions,
        callback: impl Fn(SentinelEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let mut inner = self.lock();
        inner.next_observer += 1;
        let id = inner.next_observer;
        inner.observers.insert(
            id,
            Observer {
                sentinel,
                options,
                visible: false,
                callback: Arc::new(callback),
            },
        );
        Subscription {
            id,
            viewport: Arc::downgrade(&self.inner),
        }
    }

    /// Feed a new measurement for `sentinel`. Callbacks run after the
    /// registry lock is released.
    pub fn report(&self, sentinel: SentinelId, entry: Intersection) {
        let fire: Vec<Callback> = {
            let mut inner = self.lock();
            if !inner.mounted.contains(&sentinel) {
                return;
            }
            inner
                .observers
                .values_mut()
                .filter(|o| o.sentinel == sentinel)
                .filter_map(|o| {
                    let now = entry.counts_as_visible(&o.options);
                    let rising = now && !o.visible;
                    o.visible = now;
                    rising.then(|| Arc::clone(&o.callback))
                })
                .collect()
        };
        for callback in fire {
            callback(SentinelEvent::Entered(sentinel));
        }
    }

    pub fn observer_count(&self, sentinel: SentinelId) -> usize {
        self.lock()
            .observers
            .values()
            .filter(|o| o.sentinel == sentinel)
            .count()
    }
}

/// Stops observing when dropped.
pub struct Subscription {
    id: u64,
    viewport: Weak<Mutex<ViewportInner>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.viewport.upgrade() {
            let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.observers.remove(&self.id);
        }
    }
}

/// Signals are tagged with the loader generation they were subscribed under.
type Signal = (u64, SentinelEvent);

#[derive(Default)]
struct Link {
    sentinel: Option<SentinelId>,
    subscription: Option<Subscription>,
}

/// The part of a driver its loader's reset hook needs. Subscriptions are
/// always dropped after the link lock is released.
#[derive(Clone)]
struct Wiring {
    viewport: Viewport,
    options: ObserverOptions,
    tx: mpsc::UnboundedSender<Signal>,
    link: Arc<Mutex<Link>>,
}

impl Wiring {
    fn lock(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sentinel(&self) -> Option<SentinelId> {
        self.lock().sentinel
    }

    fn is_subscribed(&self) -> bool {
        self.lock().subscription.is_some()
    }

    fn observe(&self, sentinel: SentinelId, generation: u64) {
        let tx = self.tx.clone();
        let subscription = self.viewport.observe(sentinel, self.options, move |event| {
            // receiver lives as long as the driver
            let _ = tx.send((generation, event));
        });
        let previous = {
            let mut link = self.lock();
            link.sentinel = Some(sentinel);
            link.subscription.replace(subscription)
        };
        drop(previous);
    }

    /// Observe the remembered sentinel again if it is still mounted.
    fn reobserve(&self, generation: u64) {
        match self.sentinel() {
            Some(sentinel) if self.viewport.is_mounted(sentinel) => {
                self.observe(sentinel, generation)
            }
            _ => {
                let previous = self.lock().subscription.take();
                drop(previous);
            }
        }
    }

    /// Stop observing but remember the sentinel for the next reset.
    fn pause(&self) -> bool {
        let previous = self.lock().subscription.take();
        previous.is_some()
    }

    /// Stop observing and forget the sentinel.
    fn clear(&self) -> bool {
        let previous = {
            let mut link = self.lock();
            link.sentinel = None;
            link.subscription.take()
        };
        previous.is_some()
    }

    fn point_at(&self, sentinel: SentinelId) {
        let previous = {
            let mut link = self.lock();
            link.sentinel = Some(sentinel);
            link.subscription.take()
        };
        drop(previous);
    }
}

/// Connects a sentinel's visibility to a loader.
pub struct FetchDriver<S: PageSource> {
    loader: Loader<S>,
    wiring: Wiring,
    signals_rx: mpsc::UnboundedReceiver<Signal>,
    _reset_hook: ResetHook,
}

impl<S: PageSource> FetchDriver<S> {
    pub fn new(loader: Loader<S>, viewport: Viewport, options: ObserverOptions) -> Self {
        let (tx, signals_rx) = mpsc::unbounded_channel();
        let wiring = Wiring {
            viewport,
            options,
            tx,
            link: Arc::default(),
        };
        let on_reset = wiring.clone();
        let reset_hook = loader.on_reset(move |generation| on_reset.reobserve(generation));
        Self {
            loader,
            wiring,
            signals_rx,
            _reset_hook: reset_hook,
        }
    }

    pub fn loader(&self) -> &Loader<S> {
        &self.loader
    }

    /// True while subscribed to a sentinel that is still mounted.
    pub fn is_observing(&self) -> bool {
        let sentinel = self.wiring.sentinel();
        self.wiring.is_subscribed()
            && sentinel.is_some_and(|sentinel| self.wiring.viewport.is_mounted(sentinel))
    }

    /// Start watching `sentinel`, replacing any earlier one.
    pub fn attach(&mut self, sentinel: SentinelId) {
        self.wiring.observe(sentinel, self.loader.generation());
    }

    /// Stop watching. A later loader reset does not resume observing.
    pub fn detach(&mut self) {
        if self.wiring.clear() {
            tracing::debug!(
                collection = self.loader.source().collection(),
                "stopped observing sentinel"
            );
        }
    }

    /// Reset the loader and observe the list's (possibly new) sentinel.
    pub fn reset(&mut self, sentinel: SentinelId) {
        self.wiring.point_at(sentinel);
        self.loader.reset();
    }

    /// Reset onto a different source, e.g. after switching events.
    pub fn rescope(&mut self, source: S, sentinel: SentinelId) {
        self.wiring.point_at(sentinel);
        self.loader.rescope(source);
    }

    /// Handle every visibility signal received so far.
    pub async fn pump(&mut self) -> Vec<FetchOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(signal) = self.signals_rx.try_recv() {
            if let Some(outcome) = self.on_signal(signal).await {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    /// Wait for the next visibility signal and handle it. Returns `None` once
    /// the driver has stopped observing or its sentinel was unmounted.
    pub async fn next(&mut self) -> Option<FetchOutcome> {
        loop {
            if !self.is_observing() {
                return None;
            }
            let signal = self.signals_rx.recv().await?;
            if let Some(outcome) = self.on_signal(signal).await {
                return Some(outcome);
            }
        }
    }

    async fn on_signal(&mut self, (generation, event): Signal) -> Option<FetchOutcome> {
        if generation != self.loader.generation() {
            return None;
        }
        match event {
            SentinelEvent::Unmounted(sentinel) => {
                if self.wiring.sentinel() == Some(sentinel) {
                    self.detach();
                }
                None
            }
            SentinelEvent::Entered(sentinel) => {
                if self.wiring.sentinel() != Some(sentinel) || !self.is_observing() {
                    return None;
                }
                if !self.loader.wants_more() {
                    return None;
                }
                let outcome = self.loader.request_next_page().await;
                if !self.loader.has_more() && self.wiring.pause() {
                    tracing::debug!(
                        collection = self.loader.source().collection(),
                        "collection exhausted, pausing observer"
                    );
                }
                Some(outcome)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use splitdebt_core::models::{Identified, Page};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone)]
    struct Row(String);

    impl Identified for Row {
        fn id(&self) -> &str {
            &self.0
        }
    }

    /// `total` rows served in pages; counts fetches.
    struct Counted {
        total: usize,
        fetches: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PageSource for Counted {
        type Item = Row;

        fn collection(&self) -> &'static str {
            "rows"
        }

        async fn fetch_page(&self, offset: u32, limit: u32) -> Result<Page<Row>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let start = (offset as usize).min(self.total);
            let end = (start + limit as usize).min(self.total);
            Ok(Page::new((start..end).map(|i| Row(format!("r{i}"))).collect()))
        }
    }

    fn driver(total: usize, page_size: u32) -> (FetchDriver<Counted>, Viewport, Arc<AtomicUsize>) {
        let fetches = Arc::new(AtomicUsize::new(0));
        let loader = Loader::new(
            Counted {
                total,
                fetches: Arc::clone(&fetches),
            },
            page_size,
        );
        let viewport = Viewport::new();
        let driver = FetchDriver::new(loader, viewport.clone(), ObserverOptions::default());
        (driver, viewport, fetches)
    }

    #[tokio::test]
    async fn loads_when_sentinel_enters_margin() {
        let (mut driver, viewport, fetches) = driver(30, 10);
        let sentinel = viewport.mount_sentinel();
        driver.attach(sentinel);

        viewport.report(sentinel, Intersection::hidden(600.0));
        assert!(driver.pump().await.is_empty());

        viewport.report(sentinel, Intersection::hidden(120.0));
        let outcomes = driver.pump().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn staying_visible_does_not_refire() {
        let (mut driver, viewport, fetches) = driver(30, 10);
        let sentinel = viewport.mount_sentinel();
        driver.attach(sentinel);

        viewport.report(sentinel, Intersection::visible());
        viewport.report(sentinel, Intersection::visible());
        driver.pump().await;
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // scroll away and back
        viewport.report(sentinel, Intersection::hidden(900.0));
        viewport.report(sentinel, Intersection::visible());
        driver.pump().await;
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stops_observing_once_exhausted() {
        let (mut driver, viewport, fetches) = driver(12, 10);
        let sentinel = viewport.mount_sentinel();
        driver.attach(sentinel);

        for _ in 0..4 {
            viewport.report(sentinel, Intersection::hidden(900.0));
            viewport.report(sentinel, Intersection::visible());
            driver.pump().await;
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        assert!(!driver.is_observing());
        assert_eq!(viewport.observer_count(sentinel), 0);
        assert_eq!(driver.loader().items().len(), 12);
        assert_eq!(driver.next().await, None);
    }

    #[tokio::test]
    async fn reset_reobserves_new_sentinel() {
        let (mut driver, viewport, fetches) = driver(5, 10);
        let first = viewport.mount_sentinel();
        driver.attach(first);
        viewport.report(first, Intersection::visible());
        driver.pump().await;
        assert!(!driver.is_observing());

        viewport.unmount_sentinel(first);
        let second = viewport.mount_sentinel();
        driver.reset(second);
        assert!(driver.is_observing());
        assert_eq!(viewport.observer_count(second), 1);
        assert!(driver.loader().items().is_empty());

        // stale signals from the old sentinel are ignored
        viewport.report(first, Intersection::visible());
        viewport.report(second, Intersection::visible());
        let outcomes = driver.pump().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let viewport = Viewport::new();
        let sentinel = viewport.mount_sentinel();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let sub = viewport.observe(sentinel, ObserverOptions::default(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        viewport.report(sentinel, Intersection::visible());
        drop(sub);
        viewport.report(sentinel, Intersection::hidden(1000.0));
        viewport.report(sentinel, Intersection::visible());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(viewport.observer_count(sentinel), 0);
    }

    #[test]
    fn unmount_tears_down_observers() {
        let viewport = Viewport::new();
        let sentinel = viewport.mount_sentinel();
        let _sub = viewport.observe(sentinel, ObserverOptions::default(), |_| {});
        assert_eq!(viewport.observer_count(sentinel), 1);
        viewport.unmount_sentinel(sentinel);
        assert_eq!(viewport.observer_count(sentinel), 0);
        assert!(!viewport.is_mounted(sentinel));
    }

    #[test]
    fn unmount_notifies_observers() {
        let viewport = Viewport::new();
        let sentinel = viewport.mount_sentinel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = viewport.observe(sentinel, ObserverOptions::default(), move |event| {
            sink.lock().unwrap().push(event);
        });
        viewport.report(sentinel, Intersection::visible());
        viewport.unmount_sentinel(sentinel);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                SentinelEvent::Entered(sentinel),
                SentinelEvent::Unmounted(sentinel)
            ]
        );
    }

    #[tokio::test]
    async fn unmounting_the_sentinel_ends_next() {
        let (mut driver, viewport, fetches) = driver(30, 10);
        let sentinel = viewport.mount_sentinel();
        driver.attach(sentinel);
        assert!(driver.is_observing());

        let (ended, ()) = tokio::join!(
            tokio::time::timeout(Duration::from_secs(1), driver.next()),
            async {
                tokio::task::yield_now().await;
                viewport.unmount_sentinel(sentinel);
            }
        );
        assert_eq!(ended.ok(), Some(None));
        assert!(!driver.is_observing());
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reset_from_a_loader_clone_resumes_observing() {
        let (mut driver, viewport, fetches) = driver(5, 10);
        let sentinel = viewport.mount_sentinel();
        driver.attach(sentinel);
        viewport.report(sentinel, Intersection::visible());
        driver.pump().await;
        assert!(!driver.is_observing());

        let elsewhere = driver.loader().clone();
        elsewhere.reset();
        assert!(driver.is_observing());
        assert_eq!(viewport.observer_count(sentinel), 1);

        viewport.report(sentinel, Intersection::hidden(900.0));
        viewport.report(sentinel, Intersection::visible());
        assert_eq!(driver.pump().await.len(), 1);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        assert_eq!(driver.loader().items().len(), 5);
    }

    #[tokio::test]
    async fn detached_driver_ignores_later_resets() {
        let (mut driver, viewport, _fetches) = driver(30, 10);
        let sentinel = viewport.mount_sentinel();
        driver.attach(sentinel);
        driver.detach();

        driver.loader().reset();
        assert!(!driver.is_observing());
        assert_eq!(viewport.observer_count(sentinel), 0);
    }
}
