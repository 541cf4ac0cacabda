pub mod backend;
pub mod pending;
pub mod session;

pub use backend::{Backend, BackendError, MemoryBackend, Op, Snapshot};
pub use pending::{Landed, Pending, Settled, Staged};
pub use session::{CanvasSession, LoadState};
