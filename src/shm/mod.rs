/// Shared-memory backing for the scoreboard.
///
/// Provides `Region`, a fixed array of `capacity` record slots in a
/// memory-mapped file, together with the fixed record layout and the
/// byte-range lock every reader and writer goes through.
///
/// Writers lock exactly their own slot's bytes exclusively, so workers
/// publishing to different slots never wait on each other. Snapshots take a
/// shared lock over the whole region, which excludes all in-flight slot
/// writes for the duration of the copy.
pub mod layout;
pub mod lock;
pub mod region;

pub use layout::{decode, encode, RecordLayout, RECORD_SIZE};
pub use lock::{LockMode, RangeGuard, RangeLock};
pub use region::Region;
