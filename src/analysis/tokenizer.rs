use std::collections::HashSet;
use mailparse::ParsedMail;
use crate::core::progress::ProgressSink;

/// What the scanner already knows about a message when extracting keywords.
#[derive(Debug, Clone)]
pub struct MessageContext<'a> {
    pub msg_mid: &'a str,         // Base-36 index id the message will get
    pub msg_id: &'a str,          // Message-id hash
    pub date: i64,                // Derived unix timestamp
    pub mailbox: Option<&'a str>,
}

pub trait Tokenizer: Send + Sync {
    /// Every keyword the message should be findable by.
    fn keywords(
        &self,
        msg: &ParsedMail<'_>,
        ctx: &MessageContext<'_>,
        progress: &dyn ProgressSink,
    ) -> HashSet<String>;

    fn name(&self) -> &str;

    fn clone_box(&self) -> Box<dyn Tokenizer>;
}
