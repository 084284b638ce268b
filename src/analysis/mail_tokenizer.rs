use std::collections::HashSet;
use chrono::{DateTime, Datelike, Utc};
use mailparse::{MailHeaderMap, ParsedMail};
use regex::Regex;
use crate::analysis::stopword::StopWords;
use crate::analysis::tokenizer::{MessageContext, Tokenizer};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::progress::ProgressSink;

pub const WORD_PATTERN: &str = r#"[^\s!@#$%^&*()_+={}\[\]:"|;'\\<>?,./\-]{2,}"#;

/// Headers whose values are noise for search purposes.
pub const BORING_HEADERS: &[&str] = &[
    "received", "date",
    "content-type", "content-disposition", "mime-version",
    "dkim-signature", "domainkey-signature", "received-spf",
];

/// Header value with encoded words decoded and line breaks flattened.
pub fn header_text(msg: &ParsedMail<'_>, name: &str) -> String {
    msg.headers
        .get_first_value(name)
        .map(|value| flatten(&value))
        .unwrap_or_default()
}

fn flatten(value: &str) -> String {
    value.replace(['\r', '\t', '\n'], " ")
}

/// Default tokenizer: body words, attachment names, dates, and header words
/// qualified by the header they came from.
#[derive(Clone)]
pub struct MailTokenizer {
    words: Regex,
    tags: Regex,
    stop_words: StopWords,
}

impl MailTokenizer {
    pub fn new() -> Result<Self> {
        Self::with_stop_words(StopWords::mail())
    }

    pub fn with_stop_words(stop_words: StopWords) -> Result<Self> {
        let words = Regex::new(WORD_PATTERN)
            .map_err(|e| Error::new(ErrorKind::Internal, format!("Bad word pattern: {}", e)))?;
        let tags = Regex::new(r"(?s)<[^>]*>")
            .map_err(|e| Error::new(ErrorKind::Internal, format!("Bad tag pattern: {}", e)))?;
        Ok(MailTokenizer { words, tags, stop_words })
    }

    /// Lowercased words of `text` as the index sees them.
    pub fn words(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        self.words
            .find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    fn part_text(
        &self,
        part: &ParsedMail<'_>,
        ctx: &MessageContext<'_>,
        progress: &dyn ProgressSink,
    ) -> Option<String> {
        let mimetype = part.ctype.mimetype.to_lowercase();
        if mimetype != "text/plain" && mimetype != "text/html" {
            return None;
        }

        let body = match part.get_body() {
            Ok(body) => body,
            Err(e) => {
                progress.warning(&format!(
                    "={}/{} has an undecodable {} part: {}",
                    ctx.msg_mid, ctx.msg_id, mimetype, e
                ));
                return None;
            }
        };

        if mimetype == "text/html" && body.len() > 3 {
            Some(self.tags.replace_all(&body, " ").into_owned())
        } else {
            Some(body)
        }
    }
}

fn attachment_name(part: &ParsedMail<'_>) -> Option<String> {
    let disposition = part.get_content_disposition();
    disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .filter(|name| !name.trim().is_empty())
        .cloned()
}

impl Tokenizer for MailTokenizer {
    fn keywords(
        &self,
        msg: &ParsedMail<'_>,
        ctx: &MessageContext<'_>,
        progress: &dyn ProgressSink,
    ) -> HashSet<String> {
        let mut keywords: HashSet<String> = HashSet::new();

        for part in msg.parts() {
            let mut text = self.part_text(part, ctx, progress);

            if let Some(name) = attachment_name(part) {
                keywords.insert("attachment:has".to_string());
                keywords.extend(self.words(&name).into_iter().map(|w| format!("{}:att", w)));
                let body = text.get_or_insert_with(String::new);
                body.push(' ');
                body.push_str(&name);
            }

            if let Some(text) = text {
                keywords.extend(self.words(&text));
            }
        }

        let date: DateTime<Utc> = DateTime::from_timestamp(ctx.date, 0).unwrap_or_default();
        keywords.insert(format!("{}:year", date.year()));
        keywords.insert(format!("{}:month", date.month()));
        keywords.insert(format!("{}:day", date.day()));
        keywords.insert(format!("{}-{}-{}:date", date.year(), date.month(), date.day()));
        keywords.insert(format!("{}:id", ctx.msg_id));

        keywords.extend(self.words(&header_text(msg, "subject")));
        keywords.extend(self.words(&header_text(msg, "from")));
        if let Some(mailbox) = ctx.mailbox {
            keywords.insert(format!("{}:mailbox", mailbox.to_lowercase()));
        }

        for header in &msg.headers {
            let key = header.get_key().to_lowercase();
            if BORING_HEADERS.contains(&key.as_str()) {
                continue;
            }
            let mut words: HashSet<String> = self.words(&header_text(msg, &key)).into_iter().collect();
            self.stop_words.strip(&mut words);
            for word in &words {
                keywords.insert(format!("{}:{}", word, key));
                if key.contains("list") {
                    keywords.insert(format!("{}:list", word));
                }
            }
        }

        self.stop_words.strip(&mut keywords);
        keywords
    }

    fn name(&self) -> &str {
        "mail"
    }

    fn clone_box(&self) -> Box<dyn Tokenizer> {
        Box::new(self.clone())
    }
}
