//! Atomic operation batches: wire request, validated operations, local ids, and the
//! transactional coordinator.

mod coordinator;
mod local_ids;
mod operation;
mod schemas;

pub use coordinator::{BatchState, Coordinator};
pub use local_ids::LocalIdTable;
pub use operation::{AtomicOperation, OperationKind, RefTarget, RelationshipRef, RelationshipRefs};
pub use schemas::{
    AtomicOperationRequest, AtomicResults, DataObject, IdentifierWire, OperationCode, OperationObject, OperationResult,
    RefObject, RelationshipWire, WireLinkage,
};
