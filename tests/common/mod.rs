#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use mailsift::core::progress::RecordingProgress;
use mailsift::{Config, Database};
use tempfile::TempDir;

/// A message as it sits in an mbox file, `From ` line included.
pub struct TestMail<'a> {
    pub message_id: &'a str,
    pub date: &'a str,
    pub from: &'a str,
    pub subject: &'a str,
    pub in_reply_to: Option<&'a str>,
    pub body: &'a str,
}

impl<'a> TestMail<'a> {
    pub fn new(message_id: &'a str, subject: &'a str) -> Self {
        TestMail {
            message_id,
            date: "Tue, 14 Nov 2023 22:13:20 +0000",
            from: "Alice Example <alice@example.org>",
            subject,
            in_reply_to: None,
            body: "Nothing much to say.",
        }
    }

    pub fn render(&self) -> String {
        let mut text = String::from("From alice@example.org Tue Nov 14 22:13:20 2023\n");
        text.push_str(&format!("From: {}\n", self.from));
        text.push_str(&format!("Subject: {}\n", self.subject));
        text.push_str(&format!("Date: {}\n", self.date));
        text.push_str(&format!("Message-ID: {}\n", self.message_id));
        if let Some(parent) = self.in_reply_to {
            text.push_str(&format!("In-Reply-To: {}\n", parent));
        }
        text.push('\n');
        text.push_str(self.body);
        text.push_str("\n\n");
        text
    }
}

pub fn write_mbox(path: &Path, mails: &[TestMail<'_>]) {
    let text: String = mails.iter().map(TestMail::render).collect();
    fs::write(path, text).unwrap();
}

pub fn append_mbox(path: &Path, mails: &[TestMail<'_>]) {
    let mut text = fs::read_to_string(path).unwrap_or_default();
    text.extend(mails.iter().map(TestMail::render));
    fs::write(path, text).unwrap();
}

/// Work directory plus one configured mailbox file (id `001`).
pub struct Fixture {
    pub dir: TempDir,
    pub progress: Arc<RecordingProgress>,
}

impl Fixture {
    pub fn new() -> Self {
        Fixture {
            dir: TempDir::new().unwrap(),
            progress: Arc::new(RecordingProgress::new()),
        }
    }

    pub fn mbox_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn config(&self) -> Config {
        let mut config = Config::with_work_dir(self.dir.path().join("work"));
        config
            .set("mailbox:1", self.mbox_path("inbox.mbox").to_str().unwrap())
            .unwrap();
        config
    }

    pub fn open(&self, config: Config) -> Database {
        Database::open_with(config, self.progress.clone(), None).unwrap()
    }
}
