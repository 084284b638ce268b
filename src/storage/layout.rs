use std::path::PathBuf;
use std::fs;
use crate::core::config::Config;
use crate::core::error::Result;

/// Directory structure for data files
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,          // Root (work) directory
    pub postings_dir: PathBuf,      // Posting shard files, named by signature prefix
    pub mailbox_state_dir: PathBuf, // Persisted mailbox TOCs
    pub mailindex_file: PathBuf,    // Metadata log
}

impl StorageLayout {
    pub fn new(config: &Config) -> Result<Self> {
        let base_dir = config.work_dir.clone();
        let postings_dir = config.postinglist_dir();
        let mailbox_state_dir = base_dir.join("mailbox-state");
        let mailindex_file = config.mailindex_file();

        // Create directories
        fs::create_dir_all(&base_dir)?;
        fs::create_dir_all(&postings_dir)?;
        fs::create_dir_all(&mailbox_state_dir)?;
        if let Some(parent) = mailindex_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        Ok(StorageLayout {
            base_dir,
            postings_dir,
            mailbox_state_dir,
            mailindex_file,
        })
    }

    pub fn mailbox_state_path(&self, mailbox_id: &str) -> PathBuf {
        self.mailbox_state_dir.join(format!("{}.toc", mailbox_id))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.base_dir.join(".lock")
    }
}
