use std::collections::HashSet;
use chrono::{DateTime, Utc};
use mailparse::ParsedMail;
use crate::analysis::mail_tokenizer::header_text;
use crate::analysis::tokenizer::{MessageContext, Tokenizer};
use crate::core::error::Result;
use crate::core::progress::ProgressSink;
use crate::core::types::{CancelFlag, MsgIdx};
use crate::core::utils::message_id_hash;
use crate::index::message_index::MessageIndex;
use crate::index::record::MessageRecord;
use crate::mailbox::Mailbox;
use crate::query::filter::FilterSet;

/// Dates further than this into the future are not believed.
pub const MAX_FUTURE_SECS: i64 = 24 * 3600;

/// Report progress for already-known messages only this often.
const QUIET_MARK_EVERY: usize = 317;

/// Result of turning a `Date:` header into a timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerivedDate {
    Parsed(i64),
    Future(i64),
    Bogus(i64),
}

impl DerivedDate {
    pub fn timestamp(&self) -> i64 {
        match *self {
            DerivedDate::Parsed(ts) | DerivedDate::Future(ts) | DerivedDate::Bogus(ts) => ts,
        }
    }
}

/// Timestamp for a message given the one derived for the message before it.
///
/// Mailboxes are mostly in chronological order, so a missing or absurd date
/// is replaced by one second after the previous message.
pub fn derive_date(header: &str, previous: i64, now: i64) -> DerivedDate {
    match parse_date(header) {
        Some(ts) if ts > now + MAX_FUTURE_SECS => DerivedDate::Future(previous + 1),
        Some(ts) => DerivedDate::Parsed(ts),
        None => DerivedDate::Bogus(previous + 1),
    }
}

/// Strict RFC 2822 first, then the lenient parser for the many mailers
/// that get it slightly wrong. Nothing before the epoch is plausible.
fn parse_date(header: &str) -> Option<i64> {
    let header = header.trim();
    if header.is_empty() {
        return None;
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(header) {
        return Some(date.timestamp());
    }
    mailparse::dateparse(header).ok().filter(|ts| *ts > 0)
}

/// Feeds new messages from one mailbox into the index.
pub struct MailboxScanner<'a> {
    index: &'a mut MessageIndex,
    tokenizer: &'a dyn Tokenizer,
    filters: &'a FilterSet,
    progress: &'a dyn ProgressSink,
    cancel: &'a CancelFlag,
}

impl<'a> MailboxScanner<'a> {
    pub fn new(
        index: &'a mut MessageIndex,
        tokenizer: &'a dyn Tokenizer,
        filters: &'a FilterSet,
        progress: &'a dyn ProgressSink,
        cancel: &'a CancelFlag,
    ) -> Self {
        MailboxScanner { index, tokenizer, filters, progress, cancel }
    }

    /// Index every message past the mailbox's watermark. Returns the number
    /// of messages added or relocated.
    pub fn scan(&mut self, mailbox: &mut dyn Mailbox) -> Result<usize> {
        let mailbox_id = mailbox.id().to_string();
        self.progress.mark(&format!("{}: Checking mailbox", mailbox_id));

        let repaired = mailbox.repair(self.progress)?;
        let count = mailbox.count();
        let first = mailbox.last_parsed().map_or(0, |last| last + 1);
        if first >= count {
            if repaired {
                mailbox.save()?;
            }
            return Ok(0);
        }

        let mut added = 0;
        let mut last_done = mailbox.last_parsed();
        let mut msg_date = Utc::now().timestamp();

        for seq in first..count {
            if self.cancel.is_cancelled() {
                self.progress
                    .warning(&format!("{}: Scan cancelled at message {}", mailbox_id, seq));
                break;
            }
            let status = format!(
                "{}: Reading your mail: {}% ({}/{} messages)",
                mailbox_id,
                100 * seq / count,
                seq,
                count
            );

            let pointer = mailbox.pointer(seq)?;
            if self.index.by_pointer(&pointer).is_some() {
                if seq % QUIET_MARK_EVERY == 0 {
                    self.progress.mark(&status);
                }
                last_done = Some(seq);
                continue;
            }
            self.progress.mark(&status);

            let raw = mailbox.get(seq)?;
            match mailparse::parse_mail(&raw) {
                Ok(msg) => {
                    self.index_one(&msg, &pointer, &mailbox_id, &mut msg_date)?;
                    added += 1;
                }
                Err(e) => self
                    .progress
                    .warning(&format!("{}: Unreadable message {}: {}", mailbox_id, pointer, e)),
            }
            last_done = Some(seq);
        }

        if added > 0 || repaired {
            mailbox.set_last_parsed(last_done);
            mailbox.save()?;
        }
        self.progress.mark(&format!("{}: Indexed mailbox", mailbox_id));
        Ok(added)
    }

    fn index_one(
        &mut self,
        msg: &ParsedMail<'_>,
        pointer: &str,
        mailbox_id: &str,
        msg_date: &mut i64,
    ) -> Result<()> {
        let message_id = header_text(msg, "message-id");
        let msg_id = if message_id.trim().is_empty() {
            message_id_hash(pointer)
        } else {
            message_id_hash(&message_id)
        };

        // Same message seen somewhere else: just remember the new place.
        if let Some(existing) = self.index.by_msg_id(&msg_id) {
            return self.index.update_location(existing, pointer);
        }

        let idx = MsgIdx::from(self.index.len());
        let msg_mid = idx.to_b36();

        let now = Utc::now().timestamp();
        let derived = derive_date(&header_text(msg, "date"), *msg_date, now);
        match derived {
            DerivedDate::Future(_) => self
                .progress
                .warning(&format!("={}/{} is from the FUTURE!", msg_mid, msg_id)),
            DerivedDate::Bogus(_) => self
                .progress
                .warning(&format!("={}/{} has a bogus date.", msg_mid, msg_id)),
            DerivedDate::Parsed(_) => {}
        }
        *msg_date = derived.timestamp();

        let root = self.find_conversation(msg)?;

        let ctx = MessageContext {
            msg_mid: &msg_mid,
            msg_id: &msg_id,
            date: *msg_date,
            mailbox: Some(mailbox_id),
        };
        let keywords = self.tokenizer.keywords(msg, &ctx, self.progress);
        let keywords = self.filters.apply(keywords, idx)?;
        let tags = tags_of(&keywords);

        // Postings go first: search ignores ids past the end of the log.
        self.index.add_keywords(idx, &keywords)?;

        let record = MessageRecord {
            idx,
            pointers: vec![pointer.to_string()],
            msg_id,
            date: *msg_date,
            from: header_text(msg, "from"),
            subject: header_text(msg, "subject"),
            tags,
            replies: Vec::new(),
            conversation: root.unwrap_or(idx),
        };
        self.index.set(idx, record)?;

        if let Some(root) = root {
            self.index.add_reply(root, idx)?;
        }
        Ok(())
    }

    /// Conversation root of the first referenced message we know about.
    fn find_conversation(&self, msg: &ParsedMail<'_>) -> Result<Option<MsgIdx>> {
        let refs = format!(
            "{} {}",
            header_text(msg, "references"),
            header_text(msg, "in-reply-to")
        )
        .replace(',', " ");

        let mut seen = HashSet::new();
        for reference in refs.split_whitespace() {
            if !seen.insert(reference) {
                continue;
            }
            let Some(parent) = self.index.by_msg_id(&message_id_hash(reference)) else {
                continue;
            };
            let root = self.index.get(parent)?.conversation;
            if root.as_usize() < self.index.len() {
                return Ok(Some(root));
            }
        }
        Ok(None)
    }
}

/// Tag ids named by `<tag>:tag` keywords, sorted.
fn tags_of(keywords: &HashSet<String>) -> Vec<String> {
    let mut tags: Vec<String> = keywords
        .iter()
        .filter_map(|k| k.strip_suffix(":tag"))
        .filter(|tag| !tag.is_empty())
        .map(String::from)
        .collect();
    tags.sort();
    tags
}
