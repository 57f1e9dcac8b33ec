pub mod chat;
pub mod errors;
pub mod ids;
pub mod model;
pub mod registry;

pub use chat::{ChatRouter, SystemEvent};
pub use errors::{ServerError, ServerResult};
pub use ids::{ClientId, FileId, IdAllocator, Seq};
pub use model::{ChatKind, ChatMessage, Participant, Plane, RosterEntry};
pub use registry::Registry;
