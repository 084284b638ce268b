use std::fmt;
use crate::analysis::stopword::StopWords;
use crate::core::progress::ProgressSink;

/// How a term's hits combine with the running result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Intersect,  // no prefix
    Union,      // `+`
    Difference, // `-`
}

/// What a term reads: one posting key, or every message in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    AllMail,
    Keyword(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTerm {
    pub op: Operator,
    pub lookup: Lookup,
}

impl SearchTerm {
    /// Parse one raw term. `from:bob` reads key `bob:from`, `body:word`
    /// reads `word`, and `all:mail` matches everything.
    pub fn parse(raw: &str) -> Option<SearchTerm> {
        let (op, rest) = match raw.chars().next()? {
            '+' => (Operator::Union, &raw[1..]),
            '-' => (Operator::Difference, &raw[1..]),
            _ => (Operator::Intersect, raw),
        };
        let term = rest.to_lowercase();
        if term.is_empty() {
            return None;
        }

        let lookup = if let Some(word) = term.strip_prefix("body:") {
            Lookup::Keyword(word.to_string())
        } else if term == "all:mail" {
            Lookup::AllMail
        } else if let Some((field, word)) = term.split_once(':') {
            Lookup::Keyword(format!("{}:{}", word, field))
        } else {
            Lookup::Keyword(term)
        };
        Some(SearchTerm { op, lookup })
    }
}

impl fmt::Display for SearchTerm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let op = match self.op {
            Operator::Intersect => "",
            Operator::Union => "+",
            Operator::Difference => "-",
        };
        match &self.lookup {
            Lookup::AllMail => write!(f, "{}all:mail", op),
            Lookup::Keyword(key) => write!(f, "{}{}", op, key),
        }
    }
}

/// Parse a whole term list, dropping stop words (with a warning) and
/// anything empty.
pub fn parse_terms<S: AsRef<str>>(
    raw_terms: &[S],
    stop_words: &StopWords,
    progress: &dyn ProgressSink,
) -> Vec<SearchTerm> {
    let mut terms = Vec::with_capacity(raw_terms.len());
    for raw in raw_terms {
        let raw = raw.as_ref().trim();
        if stop_words.contains(&raw.to_lowercase()) {
            progress.warning(&format!("Ignoring common word: {}", raw));
            continue;
        }
        if let Some(term) = SearchTerm::parse(raw) {
            terms.push(term);
        }
    }
    terms
}
