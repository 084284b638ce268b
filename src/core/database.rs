use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use log::info;
use crate::analysis::mail_tokenizer::MailTokenizer;
use crate::analysis::tokenizer::Tokenizer;
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::progress::{LogProgress, ProgressSink};
use crate::core::types::{CancelFlag, MsgIdx};
use crate::index::message_index::{mailbox_of, MessageIndex, TagStats};
use crate::index::posting_store::PostingStore;
use crate::index::record::MessageRecord;
use crate::mailbox::mbox::{read_pointer_in, MboxMailbox};
use crate::mailbox::scanner::MailboxScanner;
use crate::mailbox::Mailbox;
use crate::query::filter::FilterSet;
use crate::storage::file_lock::FileLock;
use crate::storage::layout::StorageLayout;
use crate::storage::lines::Decryptor;

/// One open mail index: the metadata log, its postings, and the mailboxes
/// that feed it.
///
/// A `Database` is the single writer for its work directory; opening a second
/// one on the same directory fails until the first is dropped. Every method
/// taking `&mut self` is a mutation and belongs on the writer queue when the
/// database is shared between threads.
pub struct Database {
    config: Config,

    storage: StorageLayout,
    _lock: FileLock,

    index: MessageIndex,
    filters: FilterSet,
    tokenizer: Box<dyn Tokenizer>,
    mailboxes: HashMap<String, MboxMailbox>, // Opened mailboxes, by id

    progress: Arc<dyn ProgressSink>,
    cancel: CancelFlag,
}

impl Database {
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with(config, Arc::new(LogProgress::default()), None)
    }

    pub fn open_with(
        config: Config,
        progress: Arc<dyn ProgressSink>,
        decryptor: Option<Arc<dyn Decryptor>>,
    ) -> Result<Self> {
        let storage = StorageLayout::new(&config)?;
        let lock = FileLock::acquire(&storage)?;

        let mut postings = PostingStore::new(
            storage.postings_dir.clone(),
            config.posting_bound_bytes(),
            config.fd_cache_size,
            progress.clone(),
        )?;
        if let Some(decryptor) = &decryptor {
            postings = postings.with_decryptor(decryptor.clone());
        }

        let mut index = MessageIndex::new(&config, postings, progress.clone());
        if let Some(decryptor) = decryptor {
            index = index.with_decryptor(decryptor);
        }
        index.load()?;

        let filters = FilterSet::from_config(&config, index.stop_words(), progress.as_ref());
        let tokenizer: Box<dyn Tokenizer> = Box::new(MailTokenizer::new()?);

        info!(
            "Opened {} with {} messages and {} filters",
            storage.base_dir.display(),
            index.len(),
            filters.rules.len()
        );

        Ok(Database {
            config,
            storage,
            _lock: lock,
            index,
            filters,
            tokenizer,
            mailboxes: HashMap::new(),
            progress,
            cancel: CancelFlag::new(),
        })
    }

    pub fn with_tokenizer(mut self, tokenizer: Box<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &StorageLayout {
        &self.storage
    }

    pub fn index(&self) -> &MessageIndex {
        &self.index
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    /// Rebuild the filter rules after the filter sections changed.
    pub fn set_config(&mut self, config: Config) {
        self.filters = FilterSet::from_config(&config, self.index.stop_words(), self.progress.as_ref());
        self.config = config;
    }

    /// Flag polled by scans and optimize; clone it to cancel from elsewhere.
    /// Scan, rescan and optimize fail with `Cancelled` when they saw it set,
    /// and clear it on the way out.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn search<S: AsRef<str>>(&self, terms: &[S]) -> Result<BTreeSet<MsgIdx>> {
        self.index.search(terms)
    }

    pub fn sort(&self, results: &BTreeSet<MsgIdx>, how: Option<&str>) -> Vec<MsgIdx> {
        self.index.sort(results, how)
    }

    pub fn get(&self, idx: MsgIdx) -> Result<MessageRecord> {
        self.index.get(idx)
    }

    pub fn set(&mut self, idx: MsgIdx, record: MessageRecord) -> Result<()> {
        self.index.set(idx, record)
    }

    /// Tag by tag id (see [`Config::get_tag_id`]).
    pub fn add_tag(&mut self, tag: &str, ids: &[MsgIdx]) -> Result<usize> {
        self.index.add_tag(tag, ids)
    }

    pub fn remove_tag(&mut self, tag: &str, ids: &[MsgIdx]) -> Result<usize> {
        self.index.remove_tag(tag, ids)
    }

    /// Index new messages from any mailbox implementation.
    pub fn scan(&mut self, mailbox: &mut dyn Mailbox) -> Result<usize> {
        let mut scanner = MailboxScanner::new(
            &mut self.index,
            self.tokenizer.as_ref(),
            &self.filters,
            self.progress.as_ref(),
            &self.cancel,
        );
        let added = scanner.scan(mailbox)?;
        self.finish_cancellable("Scan")?;
        Ok(added)
    }

    /// A cancel is consumed by the operation that observes it, so one
    /// raised before a queued operation starts still stops that operation.
    fn finish_cancellable(&self, what: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            self.cancel.reset();
            return Err(Error::cancelled(what));
        }
        Ok(())
    }

    fn mailbox_path(&self, id: &str) -> Result<PathBuf> {
        self.config
            .get_mailboxes()?
            .into_iter()
            .find(|(mailbox_id, _)| mailbox_id == id)
            .map(|(_, path)| path)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("No such mailbox: {}", id)))
    }

    /// A configured mailbox, opened once and refreshed on later calls.
    pub fn open_mailbox(&mut self, id: &str) -> Result<&mut MboxMailbox> {
        let path = self.mailbox_path(id)?;
        let stale = self.mailboxes.get(id).is_some_and(|mailbox| mailbox.path() != path.as_path());
        if stale {
            self.mailboxes.remove(id);
        }

        if let Some(mailbox) = self.mailboxes.get_mut(id) {
            self.progress.mark(&format!("{}: Updating: {}", id, path.display()));
            mailbox.update_toc(self.progress.as_ref())?;
        } else {
            self.progress.mark(&format!("{}: Opening: {}", id, path.display()));
            let state_path = self.storage.mailbox_state_path(id);
            let mailbox = MboxMailbox::open(id, &path, state_path, self.progress.as_ref())?;
            self.mailboxes.insert(id.to_string(), mailbox);
        }

        self.mailboxes
            .get_mut(id)
            .ok_or_else(|| Error::new(ErrorKind::Internal, format!("Mailbox {} vanished", id)))
    }

    /// Scan every configured mailbox, saving the index if anything changed.
    pub fn rescan(&mut self) -> Result<usize> {
        let mut total = 0;
        for (id, path) in self.config.get_mailboxes()? {
            if self.cancel.is_cancelled() {
                break;
            }
            let opened = self.open_mailbox(&id).map(|_| ());
            if let Err(e) = opened {
                self.progress
                    .warning(&format!("{}: Cannot open {}: {}", id, path.display(), e));
                continue;
            }
            let Some(mailbox) = self.mailboxes.get_mut(&id) else { continue };
            let mut scanner = MailboxScanner::new(
                &mut self.index,
                self.tokenizer.as_ref(),
                &self.filters,
                self.progress.as_ref(),
                &self.cancel,
            );
            total += scanner.scan(mailbox)?;
        }

        if total > 0 {
            self.index.save()?;
        }
        self.finish_cancellable("Rescan")?;
        self.progress.mark(&format!("Rescan done, {} messages added", total));
        Ok(total)
    }

    /// Compact and merge posting shards. Returns the shard count.
    pub fn optimize(&mut self, force: bool) -> Result<usize> {
        self.index.save()?;
        let shards = self.index.postings().optimize(force, &self.cancel)?;
        self.finish_cancellable("Optimize")?;
        Ok(shards)
    }

    pub fn update_tag_stats(&mut self) -> Result<HashMap<String, TagStats>> {
        let new_tag = self.config.get_tag_id("new");
        let tag_ids = self.config.tag_ids();
        Ok(self.index.update_tag_stats(&tag_ids, new_tag.as_deref())?.clone())
    }

    pub fn save(&self) -> Result<()> {
        self.index.save()
    }

    /// Raw bytes of a message, from the first mailbox copy that can be read.
    pub fn message_bytes(&self, idx: MsgIdx) -> Result<Vec<u8>> {
        let record = self.index.get(idx)?;
        let mut last_error = None;
        for pointer in &record.pointers {
            let bytes = self
                .mailbox_path(mailbox_of(pointer))
                .and_then(|path| read_pointer_in(&path, pointer));
            match bytes {
                Ok(bytes) => return Ok(bytes),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            Error::new(ErrorKind::NotFound, format!("Message {} has no location", idx))
        }))
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("work_dir", &self.storage.base_dir)
            .field("messages", &self.index.len())
            .field("tokenizer", &self.tokenizer.name())
            .finish()
    }
}
