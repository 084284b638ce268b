pub mod toc;
pub mod mbox;
pub mod scanner;

use crate::core::error::Result;
use crate::core::progress::ProgressSink;

pub use mbox::MboxMailbox;
pub use scanner::MailboxScanner;
pub use toc::{Toc, TocEntry};

/// A source of messages the scanner can read incrementally.
///
/// Sequence numbers are stable for as long as the mailbox is only appended to.
pub trait Mailbox {
    /// Three-character id that prefixes every pointer into this mailbox.
    fn id(&self) -> &str;

    fn count(&self) -> usize;

    /// Raw message bytes, without any mailbox framing.
    fn get(&self, seq: usize) -> Result<Vec<u8>>;

    fn pointer(&self, seq: usize) -> Result<String>;

    /// Highest sequence number already handed to the index.
    fn last_parsed(&self) -> Option<usize>;

    fn set_last_parsed(&mut self, seq: Option<usize>);

    /// Roll back incomplete trailing state from an interrupted scan.
    /// Returns true if anything changed.
    fn repair(&mut self, progress: &dyn ProgressSink) -> Result<bool>;

    fn save(&self) -> Result<()>;
}
