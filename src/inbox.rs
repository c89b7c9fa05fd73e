//! Event delivery.
//!
//! The processor only needs [`Inbox::post`]. [`LocalInbox`] is an in-memory
//! mailbox shared by every zone running in this process, and [`Dispatcher`]
//! drains it with a pool of worker threads, routing each event to the
//! processor of the zone that owns its target.
//!
//! Ordering: events for one target are handed out in posting order, and
//! never two at a time. Events for different targets run in parallel, and
//! idle targets take turns.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::graph::{VertexId, ZoneId};
use crate::index::event::Event;
use crate::index::processor::EventProcessor;

/// Delivery of an event to the zone owning `target`.
pub trait Inbox: Send + Sync {
    fn post(&self, target: &VertexId, event: Event);
}

/// Per-target queues plus the targets that can be handed out next.
///
/// A target sits in `ready` exactly when it has queued events and is not
/// busy, so taking and releasing never scan the queues.
#[derive(Debug, Default)]
struct Mailbox {
    queues: HashMap<VertexId, VecDeque<(u64, Event)>>,
    ready: VecDeque<VertexId>,
    busy: HashSet<VertexId>,
    queued: usize,
    next_seq: u64,
}

impl Mailbox {
    fn push(&mut self, target: &VertexId, event: Event) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queued += 1;
        let queue = self.queues.entry(target.clone()).or_default();
        queue.push_back((seq, event));
        if queue.len() == 1 && !self.busy.contains(target) {
            self.ready.push_back(target.clone());
        }
    }

    /// Pop the next event of the first ready target and mark it busy.
    fn claim(&mut self) -> Option<(VertexId, Event)> {
        let target = self.ready.pop_front()?;
        let (_, event) = self.queues.get_mut(&target)?.pop_front()?;
        self.queued -= 1;
        self.busy.insert(target.clone());
        Some((target, event))
    }

    fn release(&mut self, target: &VertexId) {
        self.busy.remove(target);
        if self.queues.get(target).is_some_and(|queue| !queue.is_empty()) {
            self.ready.push_back(target.clone());
        } else {
            self.queues.remove(target);
        }
    }

    /// Every queued event, in posting order.
    fn drain(&mut self) -> Vec<(VertexId, Event)> {
        let mut drained: Vec<(u64, VertexId, Event)> = self
            .queues
            .iter_mut()
            .flat_map(|(target, queue)| {
                queue
                    .drain(..)
                    .map(move |(seq, event)| (seq, target.clone(), event))
            })
            .collect();
        self.queues.retain(|target, _| self.busy.contains(target));
        self.ready.clear();
        self.queued = 0;
        drained.sort_by_key(|(seq, _, _)| *seq);
        drained
            .into_iter()
            .map(|(_, target, event)| (target, event))
            .collect()
    }

    fn is_quiet(&self) -> bool {
        self.queued == 0 && self.busy.is_empty()
    }
}

/// In-memory mailbox with per-target ordering.
#[derive(Debug, Default)]
pub struct LocalInbox {
    state: Mutex<Mailbox>,
    changed: Condvar,
    posted: AtomicU64,
}

impl LocalInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events waiting to be taken.
    pub fn len(&self) -> usize {
        self.state.lock().expect("inbox lock poisoned").queued
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nothing queued and nothing being processed.
    pub fn is_quiet(&self) -> bool {
        self.state.lock().expect("inbox lock poisoned").is_quiet()
    }

    /// Total events ever posted.
    pub fn posted(&self) -> u64 {
        self.posted.load(Ordering::Relaxed)
    }

    /// Take the next event for an idle target, without waiting. Idle
    /// targets are served in the order they became ready.
    ///
    /// The target stays busy until the returned [`Delivery`] is dropped.
    pub fn try_take(&self) -> Option<Delivery<'_>> {
        let mut state = self.state.lock().expect("inbox lock poisoned");
        state.claim().map(|claimed| self.delivery(claimed))
    }

    /// Like [`try_take`](Self::try_take), but waits while events are queued
    /// for busy targets. Returns `None` once the inbox is quiet.
    pub fn take(&self) -> Option<Delivery<'_>> {
        let mut state = self.state.lock().expect("inbox lock poisoned");
        loop {
            if let Some(claimed) = state.claim() {
                return Some(self.delivery(claimed));
            }
            if state.is_quiet() {
                return None;
            }
            state = self.changed.wait(state).expect("inbox lock poisoned");
        }
    }

    /// Like [`take`](Self::take), but gives up after `timeout` even if events
    /// are still pending.
    pub fn take_timeout(&self, timeout: Duration) -> Option<Delivery<'_>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().expect("inbox lock poisoned");
        loop {
            if let Some(claimed) = state.claim() {
                return Some(self.delivery(claimed));
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .expect("inbox lock poisoned")
                .0;
        }
    }

    /// Remove every queued event without processing it, oldest first.
    pub fn drain_pending(&self) -> Vec<(VertexId, Event)> {
        let mut state = self.state.lock().expect("inbox lock poisoned");
        let drained = state.drain();
        self.changed.notify_all();
        drained
    }

    fn delivery(&self, (target, event): (VertexId, Event)) -> Delivery<'_> {
        Delivery {
            inbox: self,
            target,
            event,
        }
    }

    fn release(&self, target: &VertexId) {
        let mut state = self.state.lock().expect("inbox lock poisoned");
        state.release(target);
        self.changed.notify_all();
    }
}

impl Inbox for LocalInbox {
    fn post(&self, target: &VertexId, event: Event) {
        let mut state = self.state.lock().expect("inbox lock poisoned");
        state.push(target, event);
        self.posted.fetch_add(1, Ordering::Relaxed);
        self.changed.notify_all();
    }
}

/// An event taken from a [`LocalInbox`]. Its target is released on drop.
pub struct Delivery<'a> {
    inbox: &'a LocalInbox,
    pub target: VertexId,
    pub event: Event,
}

impl Drop for Delivery<'_> {
    fn drop(&mut self) {
        self.inbox.release(&self.target);
    }
}

/// Counters from one dispatcher run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub processed: u64,
    pub failed: u64,
    /// Events addressed to a zone with no registered processor.
    pub undeliverable: u64,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
    undeliverable: AtomicU64,
}

impl Counters {
    fn report(self) -> DispatchReport {
        DispatchReport {
            processed: self.processed.into_inner(),
            failed: self.failed.into_inner(),
            undeliverable: self.undeliverable.into_inner(),
        }
    }
}

/// How long an idle worker in [`Dispatcher::run`] waits before rechecking
/// the stop flag.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Routes events from a [`LocalInbox`] to per-zone processors.
///
/// A failed event is logged and counted, never retried.
#[derive(Default)]
pub struct Dispatcher {
    routes: HashMap<ZoneId, Arc<EventProcessor>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, zone: ZoneId, processor: Arc<EventProcessor>) {
        self.routes.insert(zone, processor);
    }

    /// Process events until the inbox is quiet, using `workers` threads.
    pub fn run_until_quiet(&self, inbox: &LocalInbox, workers: usize) -> DispatchReport {
        let counters = Counters::default();
        let work = || {
            while let Some(delivery) = inbox.take() {
                self.deliver(&delivery, &counters);
            }
        };
        run_workers(workers, &work);

        let report = counters.report();
        tracing::debug!(
            processed = report.processed,
            failed = report.failed,
            undeliverable = report.undeliverable,
            "inbox quiet"
        );
        report
    }

    /// Process events as they arrive until `stop` is set, then drain what is
    /// left and return.
    pub fn run(&self, inbox: &LocalInbox, workers: usize, stop: &AtomicBool) -> DispatchReport {
        let counters = Counters::default();
        let work = || loop {
            match inbox.take_timeout(IDLE_POLL) {
                Some(delivery) => self.deliver(&delivery, &counters),
                None if stop.load(Ordering::Relaxed) && inbox.is_quiet() => break,
                None => {}
            }
        };
        run_workers(workers, &work);
        counters.report()
    }

    fn deliver(&self, delivery: &Delivery<'_>, counters: &Counters) {
        let Some(processor) = self.routes.get(delivery.target.owner()) else {
            tracing::error!(
                vertex = %delivery.target,
                zone = %delivery.target.owner(),
                "no processor for zone, dropping event"
            );
            counters.undeliverable.fetch_add(1, Ordering::Relaxed);
            return;
        };
        match processor.process(&delivery.target, &delivery.event) {
            Ok(()) => {
                counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(
                    vertex = %delivery.target,
                    trace = %delivery.event.trace,
                    error = %e,
                    "event processing failed"
                );
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn run_workers(workers: usize, work: &(impl Fn() + Sync)) {
    if workers <= 1 {
        work();
    } else {
        std::thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(work);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::event::EventKind;

    fn vid(s: &str) -> VertexId {
        s.parse().unwrap()
    }

    fn ev(trace: &str) -> Event {
        Event::new(EventKind::ChildChange, trace, vid("z:s"))
    }

    #[test]
    fn busy_target_is_skipped_until_released() {
        let inbox = LocalInbox::new();
        inbox.post(&vid("z:a"), ev("1"));
        inbox.post(&vid("z:a"), ev("2"));
        inbox.post(&vid("z:b"), ev("3"));

        let first = inbox.try_take().unwrap();
        assert_eq!(first.event.trace, "1");

        // z:a is busy, so its second event waits behind z:b.
        let second = inbox.try_take().unwrap();
        assert_eq!(second.event.trace, "3");
        assert!(inbox.try_take().is_none());

        drop(first);
        let third = inbox.try_take().unwrap();
        assert_eq!(third.event.trace, "2");
        assert_eq!(third.target, vid("z:a"));
    }

    #[test]
    fn quiet_only_when_nothing_queued_or_busy() {
        let inbox = LocalInbox::new();
        assert!(inbox.is_quiet());
        inbox.post(&vid("z:a"), ev("1"));
        assert!(!inbox.is_quiet());
        let d = inbox.take().unwrap();
        assert!(inbox.is_empty());
        assert!(!inbox.is_quiet());
        drop(d);
        assert!(inbox.is_quiet());
        assert!(inbox.take().is_none());
        assert_eq!(inbox.posted(), 1);
    }

    #[test]
    fn drain_pending_empties_queue() {
        let inbox = LocalInbox::new();
        inbox.post(&vid("z:a"), ev("1"));
        inbox.post(&vid("z:b"), ev("2"));
        let drained = inbox.drain_pending();
        assert_eq!(drained.len(), 2);
        assert!(inbox.is_quiet());
    }

    #[test]
    fn unrouted_zone_is_undeliverable() {
        let inbox = LocalInbox::new();
        inbox.post(&vid("elsewhere:a"), ev("1"));
        let report = Dispatcher::new().run_until_quiet(&inbox, 1);
        assert_eq!(report.undeliverable, 1);
        assert_eq!(report.processed, 0);
        assert!(inbox.is_quiet());
    }

    #[test]
    fn backlog_for_busy_target_keeps_order() {
        let inbox = LocalInbox::new();
        for i in 0..1000 {
            inbox.post(&vid("z:a"), ev(&i.to_string()));
        }
        inbox.post(&vid("z:b"), ev("b"));

        let held = inbox.try_take().unwrap();
        assert_eq!(held.event.trace, "0");
        assert_eq!(inbox.try_take().unwrap().event.trace, "b");
        assert!(inbox.try_take().is_none());
        assert_eq!(inbox.len(), 999);
        drop(held);

        for i in 1..1000 {
            let d = inbox.try_take().unwrap();
            assert_eq!(d.target, vid("z:a"));
            assert_eq!(d.event.trace, i.to_string());
        }
        assert!(inbox.is_quiet());
    }

    #[test]
    fn drain_pending_keeps_posting_order_across_targets() {
        let inbox = LocalInbox::new();
        inbox.post(&vid("z:b"), ev("1"));
        inbox.post(&vid("z:a"), ev("2"));
        inbox.post(&vid("z:b"), ev("3"));
        let held = inbox.try_take().unwrap();
        inbox.post(&vid("z:c"), ev("4"));

        let traces: Vec<_> = inbox
            .drain_pending()
            .into_iter()
            .map(|(_, e)| e.trace)
            .collect();
        assert_eq!(traces, vec!["2", "3", "4"]);
        assert!(!inbox.is_quiet());
        drop(held);
        assert!(inbox.is_quiet());
    }

    #[test]
    fn run_processes_until_stopped_and_drained() {
        use crate::graph::store::Graph;
        use crate::graph::{Edge, Permissions, VertexType};
        use crate::instrumentation::NoopInstrumentation;
        use crate::zone::Zone;

        let inbox = Arc::new(LocalInbox::new());
        let zone = Zone::new(
            ZoneId::new("z"),
            Graph::for_zone(ZoneId::new("z")),
            inbox.clone(),
            Arc::new(NoopInstrumentation),
        );
        zone.add_vertex(vid("z:u"), VertexType::User).unwrap();
        zone.add_vertex(vid("z:w"), VertexType::User).unwrap();
        zone.add_vertex(vid("z:g"), VertexType::Group).unwrap();
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(ZoneId::new("z"), Arc::clone(zone.processor()));

        zone.add_edge(Edge::new(vid("z:u"), vid("z:g"), Permissions::ALL))
            .unwrap();
        let stop = AtomicBool::new(false);
        let report = std::thread::scope(|s| {
            let running = s.spawn(|| dispatcher.run(&inbox, 2, &stop));
            std::thread::sleep(Duration::from_millis(100));
            // Posted while the workers are idle-polling.
            zone.add_edge(Edge::new(vid("z:w"), vid("z:g"), Permissions::ALL))
                .unwrap();
            stop.store(true, Ordering::Relaxed);
            running.join().unwrap()
        });

        // Each edge is one event per endpoint; nothing forwards further.
        assert_eq!(report.processed, 4);
        assert_eq!(report.failed, 0);
        assert!(inbox.is_quiet());
        let children = zone.effective_children(&vid("z:g")).unwrap();
        assert_eq!(children.len(), 2);
    }
}
