// ============================================================================
// spark-scheduler - Type Definitions
// Handles, node kinds and the state trait every node value implements
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// HANDLES
// =============================================================================
//
// Everything the scheduler owns lives in arenas indexed by small Copy
// handles. Handles are stable for the lifetime of the owning root; they are
// never reused while the scheduler is alive.
// =============================================================================

macro_rules! handle {
    ($(#[$doc:meta])* $name:ident, $label:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(usize);

        impl $name {
            /// Wrap an arena index
            pub const fn from_index(index: usize) -> Self {
                Self(index)
            }

            /// The arena index
            pub const fn index(self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }
    };
}

handle!(
    /// Handle to a logical node (a double-buffered pair)
    NodeId,
    "node"
);

handle!(
    /// Handle to a mounted root
    RootId,
    "root"
);

handle!(
    /// Handle to a batch
    BatchId,
    "batch"
);

// =============================================================================
// NODE KIND
// =============================================================================

/// What a node is, which decides whether it can carry an update queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// The top node of a scheduled tree; holds the rendered children
    Root,
    /// A node with its own state and update queue
    Stateful,
    /// A stateless node (host element, text); never receives updates
    Leaf,
}

impl NodeKind {
    /// Whether updates may be enqueued on this kind of node
    pub const fn holds_state(self) -> bool {
        matches!(self, Self::Root | Self::Stateful)
    }
}

// =============================================================================
// NODE STATE
// =============================================================================

/// The value type stored in nodes and evolved by updates.
///
/// `merge` is a shallow assign: keys present in the patch overwrite the
/// previous state, everything else carries over. Implementations must be
/// pure, since a render may apply the same patch more than once when lower
/// priority updates are rebased.
pub trait NodeState: Clone + 'static {
    /// A partial state applied by `Set` and `Capture` updates
    type Partial: Clone + 'static;

    /// Inputs handed to payload functions alongside the previous state
    type Inputs: Default + 'static;

    /// Shallow-merge a patch into this state
    fn merge(&self, partial: &Self::Partial) -> Self;
}

impl<K, V> NodeState for BTreeMap<K, V>
where
    K: Ord + Clone + 'static,
    V: Clone + 'static,
{
    type Partial = BTreeMap<K, V>;
    type Inputs = ();

    fn merge(&self, partial: &Self::Partial) -> Self {
        let mut next = self.clone();
        next.extend(partial.iter().map(|(k, v)| (k.clone(), v.clone())));
        next
    }
}

// =============================================================================
// TESTS
// =============================================================================
