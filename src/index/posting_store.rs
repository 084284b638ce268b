use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use log::debug;
use parking_lot::Mutex;
use rand::Rng;
use crate::core::error::Result;
use crate::core::progress::ProgressSink;
use crate::core::types::{CancelFlag, MsgIdx};
use crate::index::shard::{format_words, take_prefixed, Shard};
use crate::index::signature::{TermSignature, SIGNATURE_LEN};
use crate::storage::handle_pool::HandlePool;
use crate::storage::lines::{read_lines, Decryptor};

/// Headroom kept below the bound when deciding to compact or merge.
const BOUND_SLACK: u64 = (SIGNATURE_LEN as u64) * 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Replace,
    Append,
}

/// Sharded on-disk map of term signature -> message ids.
///
/// A signature lives in the file named by its longest existing prefix, or in
/// a new file named by the full signature. Files grow by plain appends and
/// are periodically rewritten by compaction (splitting hot prefixes into
/// longer-named files) and merging (folding small files into a shorter
/// prefix).
pub struct PostingStore {
    dir: PathBuf,
    bound: u64,
    compact_odds: Option<u32>,
    pool: Mutex<HandlePool>,
    decryptor: Option<Arc<dyn Decryptor>>,
    progress: Arc<dyn ProgressSink>,
}

impl PostingStore {
    pub fn new(
        dir: impl Into<PathBuf>,
        bound: u64,
        fd_cache_size: usize,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(PostingStore {
            dir,
            bound,
            compact_odds: Some(50),
            pool: Mutex::new(HandlePool::new(fd_cache_size)),
            decryptor: None,
            progress,
        })
    }

    pub fn with_decryptor(mut self, decryptor: Arc<dyn Decryptor>) -> Self {
        self.decryptor = Some(decryptor);
        self
    }

    /// One in `odds + 1` oversized appends triggers a compaction; `None` never does.
    pub fn set_compact_odds(&mut self, odds: Option<u32>) {
        self.compact_odds = odds;
    }

    pub fn bound(&self) -> u64 {
        self.bound
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn shard_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Name of the shard currently holding `signature`, if any.
    pub fn locate(&self, signature: &TermSignature) -> Option<String> {
        (1..=SIGNATURE_LEN)
            .rev()
            .map(|len| signature.prefix(len))
            .find(|prefix| self.shard_path(prefix).is_file())
            .map(String::from)
    }

    /// Add one posting. An oversized target shard is occasionally compacted
    /// on the spot instead of appended to.
    pub fn append(&self, term: &str, id: MsgIdx) -> Result<()> {
        self.write_posting(term, id, true)
    }

    /// Add one posting by plain append, leaving big shards for `optimize`.
    /// Bulk indexing uses this so a scan never stalls on a rewrite.
    pub fn append_deferred(&self, term: &str, id: MsgIdx) -> Result<()> {
        self.write_posting(term, id, false)
    }

    fn write_posting(&self, term: &str, id: MsgIdx, compact: bool) -> Result<()> {
        let signature = TermSignature::of(term);
        let name = self
            .locate(&signature)
            .unwrap_or_else(|| signature.as_str().to_string());
        let path = self.shard_path(&name);

        let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if compact && size > self.bound.saturating_sub(BOUND_SLACK) && self.roll_compaction() {
            // Big file: fold this posting into a full rewrite, which also
            // splits out hot prefixes.
            let mut shard = self.load_shard(&signature)?;
            shard.ids_mut(signature.as_str()).insert(id.to_b36());
            self.save_shard(shard)?;
            return Ok(());
        }

        let line = format!("{}\t{}\n", signature, id.to_b36());
        self.pool.lock().append(&path, line.as_bytes())
    }

    fn roll_compaction(&self) -> bool {
        match self.compact_odds {
            Some(odds) => rand::thread_rng().gen_range(0..=odds) == 0,
            None => false,
        }
    }

    /// Every id stored under the term's signature.
    pub fn hits(&self, term: &str) -> Result<BTreeSet<MsgIdx>> {
        let signature = TermSignature::of(term);
        let shard = self.load_shard(&signature)?;
        let mut hits = BTreeSet::new();
        if let Some(ids) = shard.ids(signature.as_str()) {
            for id in ids {
                match MsgIdx::parse(id) {
                    Ok(idx) => {
                        hits.insert(idx);
                    }
                    Err(e) => debug!("Ignoring bad posting {:?} for {}: {}", id, signature, e),
                }
            }
        }
        Ok(hits)
    }

    pub fn add_hits(&self, term: &str, ids: &BTreeSet<MsgIdx>) -> Result<()> {
        let signature = TermSignature::of(term);
        let mut shard = self.load_shard(&signature)?;
        shard
            .ids_mut(signature.as_str())
            .extend(ids.iter().map(|id| id.to_b36()));
        self.save_shard(shard)?;
        Ok(())
    }

    pub fn remove_hits(&self, term: &str, ids: &BTreeSet<MsgIdx>) -> Result<()> {
        let signature = TermSignature::of(term);
        let mut shard = self.load_shard(&signature)?;
        let stored = shard.ids_mut(signature.as_str());
        // Postings may have been written in either case; compare by value.
        stored.retain(|id| match MsgIdx::parse(id) {
            Ok(idx) => !ids.contains(&idx),
            Err(_) => true,
        });
        self.save_shard(shard)?;
        Ok(())
    }

    /// Load the shard that holds (or would hold) `signature`.
    pub fn load_shard(&self, signature: &TermSignature) -> Result<Shard> {
        match self.locate(signature) {
            Some(name) => {
                let mut shard = self.load_named(&name)?;
                shard.ids_mut(signature.as_str());
                Ok(shard)
            }
            None => {
                let mut shard = Shard::new(signature.as_str());
                shard.ids_mut(signature.as_str());
                Ok(shard)
            }
        }
    }

    fn load_named(&self, name: &str) -> Result<Shard> {
        let path = self.shard_path(name);
        self.pool.lock().flush_path(&path)?;

        let loaded = read_lines(&path, self.decryptor.as_deref())?;
        let mut shard = Shard::new(name);
        shard.size = loaded.bytes;
        for line in &loaded.lines {
            shard.parse_line(line);
        }
        Ok(shard)
    }

    /// Rewrite a shard, promoting the most populous prefixes into longer-named
    /// files until the remainder fits the bound. Returns bytes written.
    pub fn save_shard(&self, mut shard: Shard) -> Result<u64> {
        let root = shard.name.clone();
        let mut plan: Vec<(String, String, WriteMode)> = Vec::new();
        let mut work = vec![(
            root.clone(),
            take_prefixed(&mut shard.words, &root),
            WriteMode::Replace,
        )];

        while let Some((prefix, mut words, mode)) = work.pop() {
            let mut output = format_words(&words);
            while output.len() as u64 > self.bound && prefix.len() < SIGNATURE_LEN {
                let biggest = words
                    .iter()
                    .max_by_key(|(_, ids)| ids.len())
                    .map(|(word, _)| word.clone());
                let Some(biggest) = biggest else { break };
                if biggest.len() <= prefix.len() {
                    break;
                }

                let child = biggest[..prefix.len() + 1].to_string();
                let moved = take_prefixed(&mut words, &child);
                work.push((child, moved, WriteMode::Append));
                output = format_words(&words);
            }
            plan.push((prefix, output, mode));
        }

        // Children land before their parent is replaced.
        let mut written = 0u64;
        for (prefix, output, mode) in plan.into_iter().rev() {
            let path = self.shard_path(&prefix);
            match mode {
                WriteMode::Append => {
                    if !output.is_empty() {
                        self.progress.mark(&format!("Splitting out >{}<", prefix));
                        self.pool.lock().append_durable(&path, output.as_bytes())?;
                    }
                }
                WriteMode::Replace => self.replace_file(&path, &output)?,
            }
            written += output.len() as u64;
        }
        Ok(written)
    }

    fn replace_file(&self, path: &Path, output: &str) -> Result<()> {
        self.pool.lock().close_path(path)?;

        if output.is_empty() {
            if path.exists() {
                fs::remove_file(path)?;
            }
            return Ok(());
        }

        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(&self.dir)?;
        tmp.write_all(output.as_bytes())?;
        tmp.flush()?;
        tmp.persist(path)?;
        Ok(())
    }

    /// Compact big shards, then merge small ones into their prefix parents.
    /// Returns the final number of shard files.
    pub fn optimize(&self, force: bool, cancel: &CancelFlag) -> Result<usize> {
        self.pool.lock().close_all()?;

        // Pass 1: compact everything at 90% of the bound or more.
        let threshold = self.bound * 9 / 10;
        for name in self.shard_names()? {
            if cancel.is_cancelled() {
                break;
            }
            let size = match fs::metadata(self.shard_path(&name)) {
                Ok(meta) => meta.len(),
                Err(_) => continue,
            };
            if force || size >= threshold {
                self.progress.mark(&format!("Pass 1: Compacting >{}<", name));
                let result = self.load_named(&name).and_then(|shard| self.save_shard(shard));
                if let Err(e) = result {
                    self.progress
                        .warning(&format!("Compacting {} failed, will retry later: {}", name, e));
                }
            }
        }

        // Pass 2: fold small shards into their closest existing prefix.
        self.pool.lock().close_all()?;
        let mut names: Vec<String> = self
            .shard_names()?
            .into_iter()
            .filter(|name| name.len() > 1)
            .collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let merge_limit = self.bound.saturating_sub(BOUND_SLACK);
        for name in names {
            if cancel.is_cancelled() {
                break;
            }
            let size = match fs::metadata(self.shard_path(&name)) {
                Ok(meta) => meta.len(),
                Err(_) => continue,
            };
            let target = self.merge_target(&name);
            let target_size = fs::metadata(self.shard_path(&target))
                .map(|m| m.len())
                .unwrap_or(0);

            if size + target_size < merge_limit {
                self.progress
                    .mark(&format!("Pass 2: Merging {} into {}", name, target));
                if let Err(e) = self.merge_into(&name, &target) {
                    self.progress
                        .warning(&format!("Merging {} failed, will retry later: {}", name, e));
                }
            }
        }

        self.pool.lock().close_all()?;
        let count = self.shard_count()?;
        self.progress.mark(&format!("Optimized {} posting lists", count));
        Ok(count)
    }

    /// Closest shorter existing prefix of `name`; the one-char prefix if none.
    fn merge_target(&self, name: &str) -> String {
        let mut len = name.len() - 1;
        while len > 1 && !self.shard_path(&name[..len]).is_file() {
            len -= 1;
        }
        name[..len].to_string()
    }

    /// Copy then delete: the source goes only after the target has its bytes.
    fn merge_into(&self, source: &str, target: &str) -> Result<()> {
        let source_path = self.shard_path(source);
        let target_path = self.shard_path(target);

        let mut pool = self.pool.lock();
        pool.close_path(&source_path)?;
        let bytes = fs::read(&source_path)?;
        pool.append_durable(&target_path, &bytes)?;
        pool.close_path(&target_path)?;
        fs::remove_file(&source_path)?;
        Ok(())
    }

    pub fn shard_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    pub fn shard_count(&self) -> Result<usize> {
        Ok(self.shard_names()?.len())
    }

    pub fn total_bytes(&self) -> Result<u64> {
        self.flush()?;
        let mut total = 0;
        for name in self.shard_names()? {
            total += fs::metadata(self.shard_path(&name))?.len();
        }
        Ok(total)
    }

    pub fn flush(&self) -> Result<()> {
        self.pool.lock().flush_all()
    }

    pub fn close_handles(&self) -> Result<()> {
        self.pool.lock().close_all()
    }
}
