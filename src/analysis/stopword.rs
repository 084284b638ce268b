use std::collections::HashSet;

/// Words too common to be worth a posting list.
#[derive(Debug, Clone)]
pub struct StopWords {
    pub stop_words: HashSet<String>,
}

impl StopWords {
    pub fn new(stop_words: Vec<String>) -> Self {
        StopWords {
            stop_words: stop_words.into_iter().collect(),
        }
    }

    pub fn mail() -> Self {
        let words = vec![
            "an", "and", "are", "as", "at", "by", "for", "from",
            "has", "http", "in", "is", "it", "mailto", "og", "or",
            "re", "so", "the", "to", "was",
        ].into_iter().map(String::from).collect();

        StopWords::new(words)
    }

    pub fn contains(&self, word: &str) -> bool {
        self.stop_words.contains(word)
    }

    pub fn strip(&self, keywords: &mut HashSet<String>) {
        keywords.retain(|k| !self.stop_words.contains(k));
    }
}

impl Default for StopWords {
    fn default() -> Self {
        StopWords::mail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_only_listed_words() {
        let stop = StopWords::mail();
        let mut keywords: HashSet<String> =
            ["the", "budget", "mailto", "to:tag"].iter().map(|s| s.to_string()).collect();
        stop.strip(&mut keywords);
        let mut left: Vec<_> = keywords.into_iter().collect();
        left.sort();
        assert_eq!(left, vec!["budget", "to:tag"]);
    }
}
