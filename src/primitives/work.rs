// ============================================================================
// spark-scheduler - Work Handle
// One-shot completion signal with any number of subscribers
// ============================================================================
//
// A WorkHandle is returned by every render request. It commits once the
// rendered update commits, and from then on it stays committed: subscribers
// registered before the commit fire in registration order, subscribers
// registered after fire immediately. Either way each fires exactly once.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Subscriber callback type
pub type WorkCallback = Box<dyn FnOnce()>;

struct WorkInner {
    committed: Cell<bool>,
    callbacks: RefCell<Vec<WorkCallback>>,
}

/// Shared handle to a completion signal.
///
/// Clones refer to the same signal.
///
/// # Example
///
/// ```
/// use spark_scheduler::WorkHandle;
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let work = WorkHandle::new();
/// let fired = Rc::new(Cell::new(0));
///
/// let counter = fired.clone();
/// work.then(move || counter.set(counter.get() + 1));
/// assert_eq!(fired.get(), 0);
///
/// work.commit();
/// work.commit();
/// assert_eq!(fired.get(), 1);
///
/// // late subscribers fire right away
/// let counter = fired.clone();
/// work.then(move || counter.set(counter.get() + 1));
/// assert_eq!(fired.get(), 2);
/// ```
#[derive(Clone)]
pub struct WorkHandle {
    inner: Rc<WorkInner>,
}

impl WorkHandle {
    /// Create an uncommitted handle
    pub fn new() -> Self {
        Self {
            inner: Rc::new(WorkInner {
                committed: Cell::new(false),
                callbacks: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Whether the work has committed
    pub fn is_committed(&self) -> bool {
        self.inner.committed.get()
    }

    /// Run `callback` once the work commits, or now if it already has.
    pub fn then(&self, callback: impl FnOnce() + 'static) {
        if self.inner.committed.get() {
            callback();
            return;
        }
        self.inner.callbacks.borrow_mut().push(Box::new(callback));
    }

    /// Mark the work committed and fire pending subscribers in order.
    ///
    /// Only the first call does anything.
    pub fn commit(&self) {
        if self.inner.committed.replace(true) {
            return;
        }
        // subscribers may call `then` on this handle; release the borrow first
        let callbacks = std::mem::take(&mut *self.inner.callbacks.borrow_mut());
        for callback in callbacks {
            callback();
        }
    }

    /// Number of subscribers waiting for the commit
    pub fn pending_subscribers(&self) -> usize {
        self.inner.callbacks.borrow().len()
    }

    /// Whether two handles refer to the same signal
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for WorkHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WorkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkHandle")
            .field("committed", &self.is_committed())
            .field("pending_subscribers", &self.pending_subscribers())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
