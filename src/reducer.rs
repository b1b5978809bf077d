//! Operation reduction.
//!
//! Consecutive operations on the same entity often carry redundant intent:
//! a create followed by three updates is one create, a create followed by a
//! delete is nothing at all. The reducer folds such runs into an equivalent
//! shorter sequence before the engine dispatches them, so the remote sees
//! one exchange per entity instead of one per keystroke.
//!
//! Reduction is pure: no storage, no clocks, same input, same output.

use crate::operation::{Operation, OperationKind, OperationStatus};
use crate::Payload;

/// Outcome of reducing a pair of operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Reduction {
    /// The pair folded into one equivalent operation.
    Merged(Operation),
    /// The pair annihilated; neither reaches the remote.
    Cancelled,
    /// The pair does not reduce; both survive in order.
    Unreduced(Operation, Operation),
}

/// Capability contract for squashing operation sequences.
pub trait OperationReducer: Send + Sync {
    /// Reduce two consecutive operations.
    ///
    /// `first` precedes `second` in the log. Implementations must only
    /// merge operations targeting the same entity.
    fn reduce_pair(&self, first: Operation, second: Operation) -> Reduction;

    /// Reduce a sequence pairwise, left to right.
    ///
    /// Carries a rolling "current" operation: a merge folds into it, a
    /// cancellation drops it and lets the next operation take its place,
    /// and an unreduced pair emits the earlier operation. Idempotent on
    /// already-reduced input, and preserves the relative timestamp order
    /// of everything emitted.
    fn reduce_many(&self, ops: Vec<Operation>) -> Vec<Operation> {
        let mut reduced = Vec::new();
        let mut current: Option<Operation> = None;
        for op in ops {
            current = match current {
                None => Some(op),
                Some(cur) => match self.reduce_pair(cur, op) {
                    Reduction::Merged(merged) => Some(merged),
                    Reduction::Cancelled => None,
                    Reduction::Unreduced(first, second) => {
                        reduced.push(first);
                        Some(second)
                    }
                },
            };
        }
        if let Some(op) = current {
            reduced.push(op);
        }
        reduced
    }
}

/// Shallow merge: every key in `overlay` overrides `base`; other keys from
/// `base` are preserved. Nested maps are replaced wholesale, not merged.
pub fn shallow_merge(base: &Payload, overlay: &Payload) -> Payload {
    let mut merged = base.clone();
    for (key, value) in overlay {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// The default reducer.
///
/// Rules for consecutive operations `A` then `B` on the same entity:
///
/// | A        | B        | result |
/// |----------|----------|--------|
/// | `Create` | `Update` | `Create` with merged payload, `B`'s timestamp |
/// | `Create` | `Delete` | cancelled |
/// | `Update` | `Update` | `Update` with merged payload, `B`'s timestamp |
/// | `Update` | `Delete` | `B` |
///
/// `Custom` operations and pairs on different entities never reduce.
#[derive(Debug, Clone, Copy, Default)]
pub struct SquashReducer;

impl SquashReducer {
    /// Fold `second` into `first`, keeping `first`'s identity and kind.
    ///
    /// A squashed operation is a fresh intent: pending, zero retries, no
    /// stale error message.
    fn merge_into_first(mut first: Operation, second: &Operation) -> Operation {
        first.payload = shallow_merge(&first.payload, &second.payload);
        first.timestamp = second.timestamp;
        first.status = OperationStatus::Pending;
        first.retry_count = 0;
        first.error_message = None;
        first
    }
}

impl OperationReducer for SquashReducer {
    fn reduce_pair(&self, first: Operation, second: Operation) -> Reduction {
        if first.entity_key() != second.entity_key() {
            return Reduction::Unreduced(first, second);
        }

        match (&first.kind, &second.kind) {
            (OperationKind::Custom(_), _) | (_, OperationKind::Custom(_)) => {
                Reduction::Unreduced(first, second)
            }
            (OperationKind::Create, OperationKind::Update)
            | (OperationKind::Update, OperationKind::Update) => {
                Reduction::Merged(Self::merge_into_first(first, &second))
            }
            (OperationKind::Create, OperationKind::Delete) => Reduction::Cancelled,
            (OperationKind::Update, OperationKind::Delete) => Reduction::Merged(second),
            _ => Reduction::Unreduced(first, second),
        }
    }
}
