//! Scoped batching of edit notifications.
//!
//! Layer mutators open a [`ChangeBlock`] around every edit. While any block
//! is open on a thread, events accumulate in that thread's queue; closing
//! the outermost block delivers one deduplicated, ordered batch to every
//! registered listener. Nesting blocks simply extends the batch, which is
//! how callers group many edits into one round of downstream processing.
//!
//! Listeners run synchronously on the closing thread. They must not edit
//! layers or query downstream representations from inside the callback;
//! update bookkeeping and schedule work instead.

use std::{
    cell::RefCell,
    sync::{Arc, LazyLock, Mutex},
};

use indexmap::IndexSet;

use crate::{path::ScenePath, token::Token};

/// What changed about one path of one layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A spec record appeared.
    SpecCreated,
    /// A spec record (and, by protocol, its subtree) went away.
    SpecRemoved,
    /// A spec record moved to a new path.
    SpecMoved { new_path: ScenePath },
    /// A field's value changed, appeared, or disappeared.
    FieldChanged(Token),
    /// The authored time samples changed.
    TimeSamplesChanged,
    /// The layer re-read its content from source.
    LayerReloaded,
    /// The layer's whole content was replaced.
    ContentReplaced,
    /// The layer's muting state flipped.
    MutenessChanged,
}

/// One entry of a change batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeEvent {
    /// Identifier of the layer that changed.
    pub layer: String,
    /// The affected path; the absolute root for layer-wide changes.
    pub path: ScenePath,
    pub change: ChangeKind,
}

thread_local! {
    static STATE: RefCell<ThreadState> = RefCell::new(ThreadState {
        depth: 0,
        events: IndexSet::new(),
    });
}

struct ThreadState {
    depth: usize,
    /// Insertion-ordered and deduplicated as events arrive.
    events: IndexSet<ChangeEvent>,
}

type Listener = Arc<dyn Fn(&[ChangeEvent]) + Send + Sync>;

static LISTENERS: LazyLock<Mutex<Vec<(u64, Listener)>>> = LazyLock::new(|| Mutex::new(Vec::new()));
static NEXT_LISTENER_ID: Mutex<u64> = Mutex::new(0);

/// Registration of a change listener; dropping it unregisters.
#[must_use = "dropping the handle unregisters the listener"]
pub struct ListenerHandle {
    id: u64,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        let mut listeners = LISTENERS.lock().expect("listener registry poisoned");
        listeners.retain(|(id, _)| *id != self.id);
    }
}

/// Registers a listener invoked with each closed change batch.
pub fn register_listener(listener: impl Fn(&[ChangeEvent]) + Send + Sync + 'static) -> ListenerHandle {
    let mut next = NEXT_LISTENER_ID.lock().expect("listener id counter poisoned");
    let id = *next;
    *next += 1;
    drop(next);
    LISTENERS
        .lock()
        .expect("listener registry poisoned")
        .push((id, Arc::new(listener)));
    ListenerHandle { id }
}

fn notify(batch: &[ChangeEvent]) {
    if batch.is_empty() {
        return;
    }
    // Snapshot the listener list so callbacks never run under the registry
    // lock.
    let listeners: Vec<Listener> = LISTENERS
        .lock()
        .expect("listener registry poisoned")
        .iter()
        .map(|(_, l)| Arc::clone(l))
        .collect();
    for listener in listeners {
        listener(batch);
    }
}

/// Queues an event into the current thread's open batch, or delivers it
/// immediately when no block is open.
pub fn queue_event(event: ChangeEvent) {
    let deliver_now = STATE.with(|state| {
        let mut state = state.borrow_mut();
        if state.depth == 0 {
            true
        } else {
            state.events.insert(event.clone());
            false
        }
    });
    if deliver_now {
        notify(std::slice::from_ref(&event));
    }
}

/// A scoped change batch; see the module docs. Closing the outermost block
/// on a thread drains and delivers that thread's queue, including when the
/// block is dropped during unwinding.
pub struct ChangeBlock {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ChangeBlock {
    /// Opens a block on the current thread.
    #[must_use]
    pub fn new() -> Self {
        STATE.with(|state| state.borrow_mut().depth += 1);
        Self {
            _not_send: std::marker::PhantomData,
        }
    }
}

impl Default for ChangeBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ChangeBlock {
    fn drop(&mut self) {
        let batch = STATE.with(|state| {
            let mut state = state.borrow_mut();
            state.depth -= 1;
            if state.depth == 0 {
                Some(std::mem::take(&mut state.events))
            } else {
                None
            }
        });
        if let Some(events) = batch {
            let batch: Vec<ChangeEvent> = events.into_iter().collect();
            notify(&batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // The listener registry is process-wide and tests run in parallel, so
    // every test tags its events with a unique layer name and filters on it.
    fn event(tag: &str, n: u32) -> ChangeEvent {
        ChangeEvent {
            layer: tag.to_owned(),
            path: ScenePath::from_string(&format!("/P{n}")),
            change: ChangeKind::SpecCreated,
        }
    }

    fn tagged_listener(tag: &'static str) -> (ListenerHandle, Arc<AtomicUsize>, Arc<Mutex<Vec<ChangeEvent>>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handle = {
            let calls = Arc::clone(&calls);
            let seen = Arc::clone(&seen);
            register_listener(move |batch| {
                let mine: Vec<ChangeEvent> =
                    batch.iter().filter(|e| e.layer == tag).cloned().collect();
                if !mine.is_empty() {
                    calls.fetch_add(1, Ordering::SeqCst);
                    seen.lock().unwrap().extend(mine);
                }
            })
        };
        (handle, calls, seen)
    }

    #[test]
    fn nested_blocks_coalesce_into_one_notification() {
        const TAG: &str = "test:coalesce";
        let (handle, calls, seen) = tagged_listener(TAG);
        {
            let _outer = ChangeBlock::new();
            {
                let _inner = ChangeBlock::new();
                for n in 0..50 {
                    queue_event(event(TAG, n));
                }
            }
            // Inner close delivers nothing; the outer block is still open.
            assert_eq!(calls.load(Ordering::SeqCst), 0);
            for n in 50..100 {
                queue_event(event(TAG, n));
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "one composite notification");
        assert_eq!(seen.lock().unwrap().len(), 100);
        drop(handle);
    }

    #[test]
    fn duplicate_events_are_dropped() {
        const TAG: &str = "test:dedup";
        let (handle, _calls, seen) = tagged_listener(TAG);
        {
            let _block = ChangeBlock::new();
            queue_event(event(TAG, 1));
            queue_event(event(TAG, 2));
            queue_event(event(TAG, 1));
        }
        let batch = seen.lock().unwrap();
        assert_eq!(batch.len(), 2, "exact duplicates coalesce");
        assert_eq!(batch[0], event(TAG, 1), "insertion order is preserved");
        drop(handle);
    }

    #[test]
    fn unregistered_listeners_stop_receiving() {
        const TAG: &str = "test:unregister";
        let (handle, calls, _seen) = tagged_listener(TAG);
        queue_event(event(TAG, 1));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no open block delivers immediately");
        drop(handle);
        queue_event(event(TAG, 2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
