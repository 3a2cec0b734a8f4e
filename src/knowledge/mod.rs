//! Knowledge points: identifiers, records and the sync repository.

mod events;
mod ident;
mod mutation;
mod repository;
mod types;

pub use events::{EventSink, MutationKind, SyncEvent, TracingSink};
pub use ident::{CompositeId, KnowledgePointRef, PointAction, LEGACY_OWNER_ID};
pub use repository::KnowledgePointRepository;
pub use types::KnowledgePoint;
