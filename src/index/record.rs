use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::MsgIdx;
use crate::core::utils::{b36_signed, parse_b36_signed};

/// Columns in a current metadata line.
pub const RECORD_FIELDS: usize = 9;

/// Older logs carry an unused third column.
pub const LEGACY_RECORD_FIELDS: usize = 10;

/// One message's entry in the metadata log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub idx: MsgIdx,
    pub pointers: Vec<String>,  // Where copies of the message live
    pub msg_id: String,         // Message-id hash
    pub date: i64,              // Unix time
    pub from: String,
    pub subject: String,
    pub tags: Vec<String>,      // Tag ids
    pub replies: Vec<MsgIdx>,   // Only meaningful on a conversation root
    pub conversation: MsgIdx,   // Root of this message's conversation
}

impl MessageRecord {
    /// A record that is its own conversation root and has no tags yet.
    pub fn new(idx: MsgIdx, pointer: &str, msg_id: &str) -> Self {
        MessageRecord {
            idx,
            pointers: vec![pointer.to_string()],
            msg_id: msg_id.to_string(),
            date: 0,
            from: String::new(),
            subject: String::new(),
            tags: Vec::new(),
            replies: Vec::new(),
            conversation: idx,
        }
    }

    pub fn parse_line(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut fields: Vec<&str> = line.split('\t').collect();
        if fields.len() >= LEGACY_RECORD_FIELDS {
            fields.remove(2);
        }
        if fields.len() < RECORD_FIELDS {
            return Err(Error::new(
                ErrorKind::Parse,
                format!("Bogus line ({} fields): {}", fields.len(), line),
            ));
        }

        let idx = MsgIdx::parse(fields[0])?;
        let date = if fields[3].is_empty() { 0 } else { parse_b36_signed(fields[3])? };
        let conversation = if fields[8].is_empty() { idx } else { MsgIdx::parse(fields[8])? };

        Ok(MessageRecord {
            idx,
            pointers: split_list(fields[1]).map(String::from).collect(),
            msg_id: fields[2].to_string(),
            date,
            from: fields[4].to_string(),
            subject: fields[5].to_string(),
            tags: split_list(fields[6]).map(String::from).collect(),
            replies: split_list(fields[7]).filter_map(|r| MsgIdx::parse(r).ok()).collect(),
            conversation,
        })
    }

    pub fn to_line(&self) -> String {
        let replies: Vec<String> = self.replies.iter().map(|r| r.to_b36()).collect();
        [
            self.idx.to_b36(),
            self.pointers.join(","),
            clean(&self.msg_id),
            b36_signed(self.date),
            clean(&self.from),
            clean(&self.subject),
            self.tags.join(","),
            replies.join(","),
            self.conversation.to_b36(),
        ]
        .join("\t")
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Returns false if the tag was already there.
    pub fn add_tag(&mut self, tag: &str) -> bool {
        if self.has_tag(tag) {
            return false;
        }
        self.tags.push(tag.to_string());
        true
    }

    /// Returns false if the tag was not there.
    pub fn remove_tag(&mut self, tag: &str) -> bool {
        let before = self.tags.len();
        self.tags.retain(|t| t != tag);
        self.tags.len() != before
    }

    pub fn is_conversation_root(&self) -> bool {
        self.conversation == self.idx
    }
}

fn split_list(field: &str) -> impl Iterator<Item = &str> {
    field.split(',').filter(|item| !item.is_empty())
}

/// Field text must not break the line format.
fn clean(text: &str) -> String {
    text.replace(['\t', '\r', '\n'], " ")
}
