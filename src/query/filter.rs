use std::collections::{BTreeSet, HashSet};
use crate::analysis::stopword::StopWords;
use crate::core::config::{Config, FilterSpec};
use crate::core::error::Result;
use crate::core::progress::ProgressSink;
use crate::core::types::MsgIdx;
use crate::query::evaluator::{evaluate, HitSource};
use crate::query::terms::{parse_terms, SearchTerm};

/// Term list that matches every message.
pub const MATCH_ALL: &str = "*";

#[derive(Debug, Clone, PartialEq)]
pub enum FilterTerms {
    MatchAll,
    Terms(Vec<SearchTerm>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagDelta {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterRule {
    pub id: String,
    pub terms: FilterTerms,
    pub deltas: Vec<(TagDelta, String)>,
    pub comment: String,
}

impl FilterRule {
    pub fn from_spec(spec: &FilterSpec, stop_words: &StopWords, progress: &dyn ProgressSink) -> Self {
        let terms = if spec.terms.trim() == MATCH_ALL {
            FilterTerms::MatchAll
        } else {
            let raw: Vec<&str> = spec.terms.split_whitespace().collect();
            FilterTerms::Terms(parse_terms(&raw, stop_words, progress))
        };

        let deltas = spec
            .tags
            .split_whitespace()
            .filter_map(|tag| {
                let (delta, name) = match tag.strip_prefix('-') {
                    Some(name) => (TagDelta::Remove, name),
                    None => (TagDelta::Add, tag.strip_prefix('+').unwrap_or(tag)),
                };
                (!name.is_empty()).then(|| (delta, name.to_string()))
            })
            .collect();

        FilterRule {
            id: spec.id.clone(),
            terms,
            deltas,
            comment: spec.comment.clone(),
        }
    }

    /// Whether the rule fires for a message with these keywords.
    pub fn matches(&self, keywords: &HashSet<String>, candidate: MsgIdx) -> Result<bool> {
        match &self.terms {
            FilterTerms::MatchAll => Ok(true),
            FilterTerms::Terms(terms) => {
                let mut source = KeywordSource { keywords, candidate };
                Ok(!evaluate(terms, &mut source)?.is_empty())
            }
        }
    }
}

/// Answers lookups from one message's keyword set; no disk reads.
struct KeywordSource<'a> {
    keywords: &'a HashSet<String>,
    candidate: MsgIdx,
}

impl HitSource for KeywordSource<'_> {
    fn hits(&mut self, keyword: &str) -> Result<BTreeSet<MsgIdx>> {
        let mut hits = BTreeSet::new();
        if self.keywords.contains(keyword) {
            hits.insert(self.candidate);
        }
        Ok(hits)
    }

    fn all(&mut self) -> Result<BTreeSet<MsgIdx>> {
        Ok(BTreeSet::from([self.candidate]))
    }
}

/// Ordered auto-tagging rules.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    pub rules: Vec<FilterRule>,
}

impl FilterSet {
    pub fn from_config(config: &Config, stop_words: &StopWords, progress: &dyn ProgressSink) -> Self {
        FilterSet {
            rules: config
                .get_filters()
                .iter()
                .map(|spec| FilterRule::from_spec(spec, stop_words, progress))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run every rule in order over a draft keyword set, adding or removing
    /// `<tag>:tag` keywords. Later rules see the edits of earlier ones.
    pub fn apply(&self, mut keywords: HashSet<String>, candidate: MsgIdx) -> Result<HashSet<String>> {
        for rule in &self.rules {
            if !rule.matches(&keywords, candidate)? {
                continue;
            }
            for (delta, tag) in &rule.deltas {
                let keyword = format!("{}:tag", tag);
                match delta {
                    TagDelta::Add => {
                        keywords.insert(keyword);
                    }
                    TagDelta::Remove => {
                        keywords.remove(&keyword);
                    }
                }
            }
        }
        Ok(keywords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::progress::RecordingProgress;

    fn filters(rules: &[(&str, &str, &str)]) -> FilterSet {
        let mut config = Config::default();
        for (id, terms, tags) in rules {
            config.set(&format!("filter:{}", id), "test rule").unwrap();
            config.set(&format!("filter_terms:{}", id), terms).unwrap();
            config.set(&format!("filter_tags:{}", id), tags).unwrap();
        }
        FilterSet::from_config(&config, &StopWords::mail(), &RecordingProgress::new())
    }

    fn keywords(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rules_apply_in_order() {
        let set = filters(&[
            ("0", "*", "+new"),
            ("1", "from:mailer-daemon", "+junk -new"),
            ("2", "unsubscribe -from:friend", "+lists"),
        ]);
        let candidate = MsgIdx(7);

        let bounce = set.apply(keywords(&["mailer-daemon:from", "failure"]), candidate).unwrap();
        assert!(bounce.contains("junk:tag"));
        assert!(!bounce.contains("new:tag"));

        let newsletter = set.apply(keywords(&["unsubscribe", "shop:from"]), candidate).unwrap();
        assert!(newsletter.contains("new:tag"));
        assert!(newsletter.contains("lists:tag"));

        let friendly = set.apply(keywords(&["unsubscribe", "friend:from"]), candidate).unwrap();
        assert!(!friendly.contains("lists:tag"));
    }

    #[test]
    fn all_mail_matches_the_candidate() {
        let set = filters(&[("0", "all:mail -spam", "+inbox")]);
        assert!(set.apply(keywords(&["hello"]), MsgIdx(0)).unwrap().contains("inbox:tag"));
        assert!(!set.apply(keywords(&["spam"]), MsgIdx(0)).unwrap().contains("inbox:tag"));
    }
}
