pub mod core;
pub mod storage;
pub mod analysis;
pub mod index;
pub mod query;
pub mod mailbox;
pub mod writer;

pub use crate::core::config::Config;
pub use crate::core::database::Database;
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::types::{CancelFlag, MsgIdx};

/*
  Mailbox ──► MailboxScanner ──► Tokenizer ──► FilterSet
                   │                               │
                   ▼                               ▼
             MessageIndex ◄──────────────── keywords + <tag>:tag
             │  lines: Vec<String>      (metadata log, one record per line)
             │  ptrs / msgids           (pointer and message-id lookups)
             │  RecordCache             (parsed records, bounded LRU)
             ▼
             PostingStore
                dir/<signature prefix>  sig<TAB>id<TAB>id...
                HandlePool              (cached append handles)

  Every mutation runs on one writer: either a single owner of `Database`,
  or a `TaskQueue<Database>` whose executor thread owns it.
*/
