use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use log::debug;
use crate::analysis::stopword::StopWords;
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::progress::ProgressSink;
use crate::core::types::MsgIdx;
use crate::core::utils::sha1_b64;
use crate::index::posting_store::PostingStore;
use crate::index::record::MessageRecord;
use crate::index::record_cache::RecordCache;
use crate::index::sort::{SortKey, SortMode};
use crate::query::evaluator::{evaluate, HitSource};
use crate::query::terms::parse_terms;
use crate::storage::lines::{read_lines, Decryptor};

/// Tag id totals shown next to tag names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagStats {
    pub count: usize,
    pub new_count: usize,
}

/// Key under which whole-index totals are kept in the stats map.
pub const ALL_TAGS: &str = "ALL";

/// The ordered metadata log plus the posting store that indexes it.
///
/// Records are held as raw text lines and parsed on demand through a bounded
/// cache, so loading a large log costs one pass and little memory. Mutations
/// only touch memory until [`MessageIndex::save`] writes the whole log back.
pub struct MessageIndex {
    path: PathBuf,
    postings: PostingStore,
    lines: Vec<String>,
    ptrs: HashMap<String, MsgIdx>,
    msgids: HashMap<String, MsgIdx>,
    cache: RecordCache,
    stats: HashMap<String, TagStats>,
    stop_words: StopWords,
    sort_max: usize,
    default_order: String,
    tag_flush_interval: usize,
    decryptor: Option<Arc<dyn Decryptor>>,
    progress: Arc<dyn ProgressSink>,
}

impl MessageIndex {
    pub fn new(config: &Config, postings: PostingStore, progress: Arc<dyn ProgressSink>) -> Self {
        MessageIndex {
            path: config.mailindex_file(),
            postings,
            lines: Vec::new(),
            ptrs: HashMap::new(),
            msgids: HashMap::new(),
            cache: RecordCache::new(config.record_cache_size),
            stats: HashMap::new(),
            stop_words: StopWords::mail(),
            sort_max: config.sort_max,
            default_order: config.default_order.clone(),
            tag_flush_interval: config.tag_flush_interval.max(1),
            decryptor: None,
            progress,
        }
    }

    pub fn with_decryptor(mut self, decryptor: Arc<dyn Decryptor>) -> Self {
        self.decryptor = Some(decryptor);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn postings(&self) -> &PostingStore {
        &self.postings
    }

    pub fn stop_words(&self) -> &StopWords {
        &self.stop_words
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Replace the in-memory log with the file's contents.
    pub fn load(&mut self) -> Result<usize> {
        self.progress.mark("Loading metadata index...");
        self.lines.clear();
        self.ptrs.clear();
        self.msgids.clear();
        self.cache.clear();

        if !self.path.exists() {
            self.progress
                .warning(&format!("Metadata index not found: {}", self.path.display()));
        }
        let loaded = read_lines(&self.path, self.decryptor.as_deref())?;
        for line in loaded.lines {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.lines.push(line.to_string());
        }

        self.rebuild_lookups();
        self.progress
            .mark(&format!("Loaded metadata for {} messages", self.lines.len()));
        Ok(self.lines.len())
    }

    fn rebuild_lookups(&mut self) {
        for (offset, line) in self.lines.iter().enumerate() {
            match MessageRecord::parse_line(line) {
                Ok(record) => {
                    let idx = MsgIdx::from(offset);
                    self.msgids.insert(record.msg_id, idx);
                    for pointer in record.pointers {
                        self.ptrs.insert(pointer, idx);
                    }
                }
                Err(e) => self.progress.warning(&format!("Line {}: {}", offset, e)),
            }
        }
    }

    /// Write the whole log, replacing the file atomically.
    pub fn save(&self) -> Result<()> {
        self.progress.mark("Saving metadata index...");
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::Builder::new().prefix(".tmp-").tempfile_in(&dir)?;
        {
            let mut out = std::io::BufWriter::new(tmp.as_file_mut());
            writeln!(out, "# This is the mailsift index file.")?;
            writeln!(out, "# We have {} messages!", self.lines.len())?;
            for line in &self.lines {
                writeln!(out, "{}", line)?;
            }
            out.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;

        self.postings.flush()?;
        self.progress.mark("Saved metadata index");
        Ok(())
    }

    pub fn get(&self, idx: MsgIdx) -> Result<MessageRecord> {
        if let Some(record) = self.cache.get(idx) {
            return Ok(record);
        }
        let line = self
            .lines
            .get(idx.as_usize())
            .ok_or_else(|| Error::out_of_range(idx.value(), self.lines.len()))?;
        let record = MessageRecord::parse_line(line)?;
        self.cache.put(record.clone());
        Ok(record)
    }

    /// Append (`idx == len`) or overwrite (`idx < len`) a record.
    pub fn set(&mut self, idx: MsgIdx, mut record: MessageRecord) -> Result<()> {
        let pos = idx.as_usize();
        if pos > self.lines.len() {
            return Err(Error::out_of_range(idx.value(), self.lines.len()));
        }
        record.idx = idx;

        if pos < self.lines.len() {
            if let Ok(old) = MessageRecord::parse_line(&self.lines[pos]) {
                for pointer in &old.pointers {
                    if self.ptrs.get(pointer) == Some(&idx) {
                        self.ptrs.remove(pointer);
                    }
                }
            }
            self.lines[pos] = record.to_line();
        } else {
            self.lines.push(record.to_line());
        }

        self.cache.invalidate(idx);
        self.msgids.insert(record.msg_id.clone(), idx);
        for pointer in &record.pointers {
            self.ptrs.insert(pointer.clone(), idx);
        }
        Ok(())
    }

    pub fn by_pointer(&self, pointer: &str) -> Option<MsgIdx> {
        self.ptrs.get(pointer).copied()
    }

    pub fn by_msg_id(&self, msg_id: &str) -> Option<MsgIdx> {
        self.msgids.get(msg_id).copied()
    }

    /// Record a new sighting of a known message. A pointer into a mailbox
    /// the message was already seen in replaces the old one.
    pub fn update_location(&mut self, idx: MsgIdx, pointer: &str) -> Result<()> {
        let mut record = self.get(idx)?;
        let mailbox = mailbox_of(pointer);
        match record.pointers.iter_mut().find(|p| mailbox_of(p) == mailbox) {
            Some(existing) => *existing = pointer.to_string(),
            None => record.pointers.push(pointer.to_string()),
        }
        self.set(idx, record)
    }

    /// Root record of the conversation `idx` belongs to.
    pub fn conversation(&self, idx: MsgIdx) -> Result<MessageRecord> {
        let record = self.get(idx)?;
        self.get(record.conversation)
    }

    pub fn replies(&self, idx: MsgIdx) -> Result<Vec<MsgIdx>> {
        Ok(self.get(idx)?.replies)
    }

    pub fn tags(&self, idx: MsgIdx) -> Result<Vec<String>> {
        Ok(self.get(idx)?.tags)
    }

    /// Note `reply` on its conversation root.
    pub fn add_reply(&mut self, root: MsgIdx, reply: MsgIdx) -> Result<()> {
        let mut record = self.get(root)?;
        if !record.replies.contains(&reply) {
            record.replies.push(reply);
            self.set(root, record)?;
        }
        Ok(())
    }

    /// Write postings for a freshly indexed message. Shards are not
    /// compacted here; `optimize` takes care of them.
    pub fn add_keywords(&self, idx: MsgIdx, keywords: &HashSet<String>) -> Result<()> {
        for keyword in keywords {
            self.postings.append_deferred(keyword, idx)?;
        }
        Ok(())
    }

    /// Given ids plus every reply reachable from them.
    fn expand_replies(&self, ids: &[MsgIdx]) -> Result<BTreeSet<MsgIdx>> {
        let mut expanded = BTreeSet::new();
        let mut queue: VecDeque<MsgIdx> = VecDeque::new();
        for &idx in ids {
            if idx.as_usize() >= self.lines.len() {
                return Err(Error::out_of_range(idx.value(), self.lines.len()));
            }
            if expanded.insert(idx) {
                queue.push_back(idx);
            }
        }

        let mut visited = 0usize;
        while let Some(idx) = queue.pop_front() {
            for reply in self.replies(idx)? {
                if reply.as_usize() < self.lines.len() && expanded.insert(reply) {
                    queue.push_back(reply);
                }
            }
            visited += 1;
            if visited % self.tag_flush_interval == 0 {
                self.cache.clear();
            }
        }
        Ok(expanded)
    }

    /// Tag messages and everything in their reply subtrees. Returns how many
    /// messages the tag now covers from this call.
    pub fn add_tag(&mut self, tag: &str, ids: &[MsgIdx]) -> Result<usize> {
        let expanded = self.expand_replies(ids)?;
        self.progress
            .mark(&format!("Tagging {} messages ({})", expanded.len(), tag));
        self.retag(&expanded, |record| record.add_tag(tag))?;
        self.postings.add_hits(&tag_keyword(tag), &expanded)?;
        Ok(expanded.len())
    }

    pub fn remove_tag(&mut self, tag: &str, ids: &[MsgIdx]) -> Result<usize> {
        let expanded = self.expand_replies(ids)?;
        self.progress
            .mark(&format!("Untagging {} messages ({})", expanded.len(), tag));
        self.retag(&expanded, |record| record.remove_tag(tag))?;
        self.postings.remove_hits(&tag_keyword(tag), &expanded)?;
        Ok(expanded.len())
    }

    fn retag<F>(&mut self, ids: &BTreeSet<MsgIdx>, mut edit: F) -> Result<()>
    where
        F: FnMut(&mut MessageRecord) -> bool,
    {
        for (n, &idx) in ids.iter().enumerate() {
            let mut record = self.get(idx)?;
            if edit(&mut record) {
                self.lines[idx.as_usize()] = record.to_line();
                self.cache.invalidate(idx);
            }
            if (n + 1) % self.tag_flush_interval == 0 {
                self.cache.clear();
            }
        }
        self.cache.clear();
        Ok(())
    }

    /// Evaluate a term list against the posting store.
    pub fn search<S: AsRef<str>>(&self, raw_terms: &[S]) -> Result<BTreeSet<MsgIdx>> {
        let terms = parse_terms(raw_terms, &self.stop_words, self.progress.as_ref());
        let mut source = PostingSource {
            postings: &self.postings,
            len: self.lines.len(),
            progress: self.progress.as_ref(),
        };
        let mut results = evaluate(&terms, &mut source)?;

        // An interrupted scan can leave postings for ids it never recorded.
        let len = self.lines.len() as u64;
        results.retain(|idx| idx.value() < len);

        self.progress.mark(&format!("Found {} results", results.len()));
        Ok(results)
    }

    /// Order search results. `None` uses the configured default order.
    pub fn sort(&self, results: &BTreeSet<MsgIdx>, how: Option<&str>) -> Vec<MsgIdx> {
        let how = how.unwrap_or(&self.default_order).to_string();
        let mode = match how.parse::<SortMode>() {
            Ok(mode) => mode,
            Err(e) => {
                self.progress.warning(&format!("{}, using index order", e));
                SortMode::fallback(&how)
            }
        };
        self.sort_by_mode(results, mode)
    }

    pub fn sort_by_mode(&self, results: &BTreeSet<MsgIdx>, mode: SortMode) -> Vec<MsgIdx> {
        let mut sorted: Vec<MsgIdx> = results.iter().copied().collect();
        if sorted.is_empty() {
            return sorted;
        }

        let mut leftovers = Vec::new();
        if sorted.len() > self.sort_max {
            self.progress.warning(&format!(
                "Over sort_max ({}) results, sorting badly.",
                self.sort_max
            ));
            if mode.reverse {
                sorted.reverse();
            }
            leftovers = sorted.split_off(self.sort_max);
        }

        self.progress
            .mark(&format!("Sorting messages in {} order...", mode));
        let mut missing = false;
        match mode.key {
            SortKey::Unsorted => {}
            SortKey::Index => sorted.sort(),
            SortKey::Random => {
                let nonce: u64 = rand::random();
                sorted.sort_by_cached_key(|idx| sha1_b64(&format!("{}{}", nonce, idx.to_b36())));
            }
            SortKey::Date => sorted.sort_by_cached_key(|&idx| {
                self.sort_field(idx, &mut missing, |record| record.date)
            }),
            SortKey::From => sorted.sort_by_cached_key(|&idx| {
                self.sort_field(idx, &mut missing, |record| record.from)
            }),
            SortKey::Subject => sorted.sort_by_cached_key(|&idx| {
                self.sort_field(idx, &mut missing, |record| record.subject)
            }),
        }
        if missing {
            self.progress.warning("Sort failed, sorting badly. Partial index?");
        }
        if mode.reverse {
            sorted.reverse();
        }

        if !mode.flat {
            let mut seen = HashSet::new();
            let mut collapsed = Vec::with_capacity(sorted.len());
            for idx in sorted {
                let root = self.get(idx).map(|record| record.conversation).unwrap_or(idx);
                if seen.insert(root) {
                    collapsed.push(root);
                }
            }
            sorted = collapsed;
        }

        sorted.extend(leftovers);
        self.progress.mark(&format!("Sorted messages in {} order", mode));
        sorted
    }

    fn sort_field<K, F>(&self, idx: MsgIdx, missing: &mut bool, field: F) -> Option<K>
    where
        F: Fn(MessageRecord) -> K,
    {
        match self.get(idx) {
            Ok(record) => Some(field(record)),
            Err(e) => {
                debug!("No sort key for {}: {}", idx, e);
                *missing = true;
                None
            }
        }
    }

    /// Recount every tag in one pass over each tag's posting list.
    pub fn update_tag_stats(
        &mut self,
        tag_ids: &[String],
        new_tag: Option<&str>,
    ) -> Result<&HashMap<String, TagStats>> {
        let new_msgs = match new_tag {
            Some(tag) => self.postings.hits(&tag_keyword(tag))?,
            None => BTreeSet::new(),
        };
        self.stats.insert(
            ALL_TAGS.to_string(),
            TagStats { count: self.lines.len(), new_count: new_msgs.len() },
        );

        for tag in tag_ids {
            self.progress.mark(&format!("Counting messages in tag:{}", tag));
            let hits = self.postings.hits(&tag_keyword(tag))?;
            let new_count = hits.intersection(&new_msgs).count();
            self.stats
                .insert(tag.clone(), TagStats { count: hits.len(), new_count });
        }
        Ok(&self.stats)
    }

    pub fn tag_stats(&self) -> &HashMap<String, TagStats> {
        &self.stats
    }

    pub fn cache(&self) -> &RecordCache {
        &self.cache
    }
}

/// Posting key holding every message carrying `tag`.
pub fn tag_keyword(tag: &str) -> String {
    format!("{}:tag", tag)
}

/// The three-character mailbox id a pointer starts with.
pub fn mailbox_of(pointer: &str) -> &str {
    pointer.get(..3).unwrap_or(pointer)
}

struct PostingSource<'a> {
    postings: &'a PostingStore,
    len: usize,
    progress: &'a dyn ProgressSink,
}

impl HitSource for PostingSource<'_> {
    fn hits(&mut self, keyword: &str) -> Result<BTreeSet<MsgIdx>> {
        self.progress.mark(&format!("Searching for {}", keyword));
        self.postings.hits(keyword)
    }

    fn all(&mut self) -> Result<BTreeSet<MsgIdx>> {
        Ok((0..self.len).map(MsgIdx::from).collect())
    }
}

impl std::fmt::Debug for MessageIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageIndex")
            .field("path", &self.path)
            .field("messages", &self.lines.len())
            .field("cache", &self.cache.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::progress::RecordingProgress;

    fn index(dir: &Path, progress: Arc<RecordingProgress>) -> MessageIndex {
        let mut config = Config::with_work_dir(dir);
        config.sort_max = 3;
        let postings = PostingStore::new(config.postinglist_dir(), 60 * 1024, 16, progress.clone()).unwrap();
        MessageIndex::new(&config, postings, progress)
    }

    fn record(idx: u64, date: i64, subject: &str) -> MessageRecord {
        let mut record = MessageRecord::new(MsgIdx(idx), &format!("001{}:1", idx), &format!("id{}", idx));
        record.date = date;
        record.subject = subject.to_string();
        record
    }

    #[test]
    fn set_is_append_or_update_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = index(dir.path(), Arc::new(RecordingProgress::new()));
        index.set(MsgIdx(0), record(0, 10, "a")).unwrap();
        let err = index.set(MsgIdx(2), record(2, 10, "c")).unwrap_err();
        assert!(err.is(ErrorKind::OutOfRange));

        index.set(MsgIdx(0), record(0, 10, "changed")).unwrap();
        assert_eq!(index.get(MsgIdx(0)).unwrap().subject, "changed");
        assert_eq!(index.by_msg_id("id0"), Some(MsgIdx(0)));
        assert_eq!(index.by_pointer("0010:1"), Some(MsgIdx(0)));
    }

    #[test]
    fn update_location_replaces_same_mailbox_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = index(dir.path(), Arc::new(RecordingProgress::new()));
        index.set(MsgIdx(0), record(0, 10, "a")).unwrap();

        index.update_location(MsgIdx(0), "001Z:1").unwrap();
        index.update_location(MsgIdx(0), "0020:1").unwrap();
        assert_eq!(index.get(MsgIdx(0)).unwrap().pointers, vec!["001Z:1", "0020:1"]);
        assert_eq!(index.by_pointer("0010:1"), None);
        assert_eq!(index.by_pointer("001Z:1"), Some(MsgIdx(0)));
    }

    #[test]
    fn sorting_degrades_above_sort_max() {
        let dir = tempfile::tempdir().unwrap();
        let progress = Arc::new(RecordingProgress::new());
        let mut index = index(dir.path(), progress.clone());
        for (i, date) in [50, 40, 30, 20, 10].into_iter().enumerate() {
            index.set(MsgIdx(i as u64), record(i as u64, date, "s")).unwrap();
        }
        let all: BTreeSet<MsgIdx> = (0..5u64).map(MsgIdx).collect();

        let sorted = index.sort(&all, Some("flat-date"));
        // First three by date, the rest left in index order.
        assert_eq!(sorted, vec![MsgIdx(2), MsgIdx(1), MsgIdx(0), MsgIdx(3), MsgIdx(4)]);
        assert!(progress.warnings().iter().any(|w| w.contains("sort_max")));
    }

    #[test]
    fn bad_lines_are_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let progress = Arc::new(RecordingProgress::new());
        let mut index = index(dir.path(), progress.clone());
        let good = record(1, 10, "fine").to_line();
        std::fs::write(
            index.path(),
            format!("# header\n0\t0010:1\tid\t-1Y2P0IJ32E8E8\tf\ts\t\t\t0\n{}\n", good),
        )
        .unwrap();

        assert_eq!(index.load().unwrap(), 2);
        assert!(progress.warnings().iter().any(|w| w.starts_with("Line 0:")));
        assert!(index.get(MsgIdx(0)).unwrap_err().is(ErrorKind::Parse));
        assert_eq!(index.get(MsgIdx(1)).unwrap().subject, "fine");
        assert_eq!(index.by_msg_id("id1"), Some(MsgIdx(1)));
    }

    #[test]
    fn unknown_order_falls_back_to_index() {
        let dir = tempfile::tempdir().unwrap();
        let progress = Arc::new(RecordingProgress::new());
        let mut index = index(dir.path(), progress.clone());
        for i in 0..3u64 {
            index.set(MsgIdx(i), record(i, 100 - i as i64, "s")).unwrap();
        }
        let all: BTreeSet<MsgIdx> = (0..3u64).map(MsgIdx).collect();
        assert_eq!(index.sort(&all, Some("rev-size")), vec![MsgIdx(2), MsgIdx(1), MsgIdx(0)]);
        assert!(progress.warnings().iter().any(|w| w.contains("Unknown sort order")));
    }
}
