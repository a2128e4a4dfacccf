// Deferred memory reclamation for structures shared with the realtime thread
//
// Nothing reachable by the realtime reader is ever dropped synchronously.
// Removed objects go into a DeferredReclaimer; the control side's periodic
// tick confirms and destroys them once the ReaderClock shows the reader has
// moved past the edit.

pub mod grace;
pub mod reclaimer;

pub use grace::{GraceTracker, ReaderClock, ReaderPass, ReaderRegistration};
pub use reclaimer::{DEFAULT_CONFIRM_BATCH, DEFAULT_RECLAIMER_CAPACITY, DeferredReclaimer};

/// Type-erased object awaiting reclamation
pub type Garbage = Box<dyn Send>;
