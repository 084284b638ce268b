use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::utils::{b36, parse_b36};

/// Sections holding open-ended dictionaries (`section:key = value`).
pub const SECTIONS: &[&str] = &["mailbox", "tag", "filter", "filter_terms", "filter_tags"];

#[derive(Debug, Clone)]
pub struct Config {
    pub work_dir: PathBuf,
    pub mailindex_file: Option<PathBuf>,
    pub postinglist_dir: Option<PathBuf>,

    pub postinglist_kb: u64,            // Shard soft size bound
    pub sort_max: usize,                // Above this, sorting degrades
    pub default_order: String,

    pub fd_cache_size: usize,           // Append handle pool capacity
    pub record_cache_size: usize,       // Parsed message record cache
    pub tag_flush_interval: usize,      // Drop record cache every N tagged ids

    pub sections: HashMap<String, BTreeMap<String, String>>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            work_dir: PathBuf::from("./mailsift"),
            mailindex_file: None,
            postinglist_dir: None,

            postinglist_kb: 60,
            sort_max: 2500,
            default_order: "rev-date".to_string(),

            fd_cache_size: 500,
            record_cache_size: 5000,
            tag_flush_interval: 1000,

            sections: HashMap::new(),
        }
    }
}

/// One auto-tagging rule as stored in the `filter*` sections.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    pub id: String,
    pub terms: String,
    pub tags: String,
    pub comment: String,
}

impl Config {
    pub fn with_work_dir(work_dir: impl Into<PathBuf>) -> Self {
        Config {
            work_dir: work_dir.into(),
            ..Config::default()
        }
    }

    pub fn mailindex_file(&self) -> PathBuf {
        self.mailindex_file
            .clone()
            .unwrap_or_else(|| self.work_dir.join("mailsift.idx"))
    }

    pub fn postinglist_dir(&self) -> PathBuf {
        self.postinglist_dir
            .clone()
            .unwrap_or_else(|| self.work_dir.join("search"))
    }

    pub fn posting_bound_bytes(&self) -> u64 {
        self.postinglist_kb * 1024
    }

    /// Set an option by name. `section:key` addresses a dictionary entry.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let key = key.trim().to_lowercase();
        let value = value.trim();

        if let Some((section, subkey)) = key.split_once(':') {
            if SECTIONS.contains(&section) {
                self.sections
                    .entry(section.to_string())
                    .or_default()
                    .insert(subkey.to_string(), value.to_string());
                return Ok(());
            }
        }

        match key.as_str() {
            "postinglist_kb" => self.postinglist_kb = parse_int(&key, value)?,
            "sort_max" => self.sort_max = parse_int(&key, value)?,
            "fd_cache_size" => self.fd_cache_size = parse_int(&key, value)?,
            "record_cache_size" => self.record_cache_size = parse_int(&key, value)?,
            "tag_flush_interval" => self.tag_flush_interval = parse_int(&key, value)?,
            "default_order" => self.default_order = value.to_string(),
            "mailindex_file" => self.mailindex_file = Some(PathBuf::from(value)),
            "postinglist_dir" => self.postinglist_dir = Some(PathBuf::from(value)),
            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    format!("Unknown key in config: {}", key),
                ))
            }
        }
        Ok(())
    }

    /// Remove a dictionary entry, or reset a path option to its default.
    pub fn unset(&mut self, key: &str) -> Result<()> {
        let key = key.trim().to_lowercase();
        if let Some((section, subkey)) = key.split_once(':') {
            if let Some(entries) = self.sections.get_mut(section) {
                entries.remove(subkey);
            }
            return Ok(());
        }
        match key.as_str() {
            "mailindex_file" => self.mailindex_file = None,
            "postinglist_dir" => self.postinglist_dir = None,
            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    format!("Cannot unset {}", key),
                ))
            }
        }
        Ok(())
    }

    pub fn section(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.sections.get(name)
    }

    fn section_value(&self, section: &str, key: &str) -> String {
        self.section(section)
            .and_then(|entries| entries.get(key))
            .cloned()
            .unwrap_or_default()
    }

    /// Next free base-36 id in a section.
    pub fn next_id(&self, section: &str) -> String {
        let max = self
            .section(section)
            .into_iter()
            .flat_map(|entries| entries.keys())
            .filter_map(|k| parse_b36(k).ok())
            .max();
        match max {
            Some(max) => b36(max + 1),
            None => "0".to_string(),
        }
    }

    /// Configured mailboxes as `(3-char id, path)`, sorted by id.
    pub fn get_mailboxes(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut mailboxes = Vec::new();
        if let Some(entries) = self.section("mailbox") {
            for (key, path) in entries {
                let id = b36(parse_b36(key)?);
                if id.len() > 3 {
                    return Err(Error::new(
                        ErrorKind::InvalidArgument,
                        format!("Mailbox ID too large: {}", id),
                    ));
                }
                mailboxes.push((format!("{:0>3}", id), PathBuf::from(path)));
            }
        }
        mailboxes.sort();
        Ok(mailboxes)
    }

    /// Filters ordered by their numeric (base-36) id.
    pub fn get_filters(&self) -> Vec<FilterSpec> {
        let mut ids: Vec<&String> = self
            .section("filter")
            .map(|entries| entries.keys().collect())
            .unwrap_or_default();
        ids.sort_by_key(|id| parse_b36(id).unwrap_or(u64::MAX));

        ids.into_iter()
            .map(|id| FilterSpec {
                id: id.clone(),
                terms: self.section_value("filter_terms", id),
                tags: self.section_value("filter_tags", id),
                comment: self.section_value("filter", id),
            })
            .collect()
    }

    pub fn get_tag_id(&self, name: &str) -> Option<String> {
        let name = name.to_lowercase();
        self.section("tag")?
            .iter()
            .find(|(_, tag_name)| tag_name.to_lowercase() == name)
            .map(|(id, _)| id.clone())
    }

    pub fn tag_ids(&self) -> Vec<String> {
        self.section("tag")
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse::<T>().map_err(|_| {
        Error::new(
            ErrorKind::InvalidArgument,
            format!("{} is not an integer (for {})", value, key),
        )
    })
}
