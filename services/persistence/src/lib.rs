//! Persistence: durable, append-only record journal
//!
//! Backs the stream processor's aggregate changelog: every state change is
//! framed, checksummed and appended before it is applied in memory, and the
//! journal is replayed on restart to rebuild that state.
//!
//! - `journal`: frame format and the segment-rotating writer
//! - `reader`: sequential replay with torn-tail and corruption detection
//! - `segment`: segment file naming and discovery
//! - `codec`: bincode payload encoding for typed records
//! - `snapshot`: checksummed state images that let old segments be pruned

pub mod codec;
pub mod journal;
pub mod reader;
pub mod segment;
pub mod snapshot;

pub use codec::{decode_record, encode_record, CodecError};
pub use journal::{JournalConfig, JournalEntry, JournalError, JournalWriter, SyncPolicy};
pub use reader::{JournalReader, ReaderError, TornTail};
pub use snapshot::{Snapshot, SnapshotError, SnapshotInterval, SnapshotStore};
