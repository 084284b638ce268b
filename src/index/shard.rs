use std::collections::{BTreeMap, BTreeSet};

/// In-memory view of one shard file: signature -> ids (base-36 text).
///
/// Ids are kept as the exact text found on disk so a compaction never
/// rewrites a posting it could not parse.
#[derive(Debug, Clone, Default)]
pub struct Shard {
    pub name: String,
    pub words: BTreeMap<String, BTreeSet<String>>,
    pub size: u64,
}

impl Shard {
    pub fn new(name: &str) -> Self {
        Shard {
            name: name.to_string(),
            words: BTreeMap::new(),
            size: 0,
        }
    }

    /// `signature<TAB>id<TAB>id...`; lines without an id are ignored.
    pub fn parse_line(&mut self, line: &str) {
        let mut fields = line.trim().split('\t');
        let Some(word) = fields.next() else { return };
        let ids: Vec<&str> = fields.filter(|id| !id.is_empty()).collect();
        if word.is_empty() || ids.is_empty() {
            return;
        }
        self.words
            .entry(word.to_string())
            .or_default()
            .extend(ids.into_iter().map(String::from));
    }

    pub fn ids(&self, signature: &str) -> Option<&BTreeSet<String>> {
        self.words.get(signature)
    }

    pub fn ids_mut(&mut self, signature: &str) -> &mut BTreeSet<String> {
        self.words.entry(signature.to_string()).or_default()
    }
}

/// Remove and return every entry whose key starts with `prefix`.
pub fn take_prefixed(
    words: &mut BTreeMap<String, BTreeSet<String>>,
    prefix: &str,
) -> BTreeMap<String, BTreeSet<String>> {
    let keys: Vec<String> = words
        .range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, _)| k.clone())
        .collect();

    let mut taken = BTreeMap::new();
    for key in keys {
        if let Some(ids) = words.remove(&key) {
            taken.insert(key, ids);
        }
    }
    taken
}

/// Serialized shard text; words with no ids are skipped.
pub fn format_words(words: &BTreeMap<String, BTreeSet<String>>) -> String {
    let mut output = String::new();
    for (word, ids) in words {
        if ids.is_empty() {
            continue;
        }
        output.push_str(word);
        for id in ids {
            output.push('\t');
            output.push_str(id);
        }
        output.push('\n');
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_lines_union() {
        let mut shard = Shard::new("ab");
        shard.parse_line("abc\t1\t2");
        shard.parse_line("abc\t2\t3\n");
        shard.parse_line("abd\t");
        shard.parse_line("");
        assert_eq!(shard.ids("abc").unwrap().len(), 3);
        assert!(shard.ids("abd").is_none());
        assert_eq!(format_words(&shard.words), "abc\t1\t2\t3\n");
    }

    #[test]
    fn take_prefixed_only_moves_matching_keys() {
        let mut shard = Shard::new("a");
        for line in ["aa\t1", "ab\t2", "abc\t3", "b\t4"] {
            shard.parse_line(line);
        }
        let taken = take_prefixed(&mut shard.words, "ab");
        assert_eq!(taken.keys().collect::<Vec<_>>(), vec!["ab", "abc"]);
        assert_eq!(shard.words.len(), 2);
    }
}
