use std::collections::BTreeSet;
use crate::core::error::Result;
use crate::core::types::MsgIdx;
use crate::query::terms::{Lookup, Operator, SearchTerm};

/// Where term hits come from: the posting store, or an in-memory keyword set.
pub trait HitSource {
    fn hits(&mut self, keyword: &str) -> Result<BTreeSet<MsgIdx>>;

    /// Every id `all:mail` stands for.
    fn all(&mut self) -> Result<BTreeSet<MsgIdx>>;
}

/// Fold term hits left to right, starting from the first term's hits.
/// An empty term list matches nothing.
pub fn evaluate(terms: &[SearchTerm], source: &mut dyn HitSource) -> Result<BTreeSet<MsgIdx>> {
    let mut results: Option<BTreeSet<MsgIdx>> = None;

    for term in terms {
        let hits = match &term.lookup {
            Lookup::AllMail => source.all()?,
            Lookup::Keyword(key) => source.hits(key)?,
        };

        results = Some(match results {
            None => hits,
            Some(running) => match term.op {
                Operator::Union => &running | &hits,
                Operator::Difference => &running - &hits,
                Operator::Intersect => &running & &hits,
            },
        });
    }

    Ok(results.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapSource {
        postings: HashMap<String, BTreeSet<MsgIdx>>,
        len: u64,
    }

    impl HitSource for MapSource {
        fn hits(&mut self, keyword: &str) -> Result<BTreeSet<MsgIdx>> {
            Ok(self.postings.get(keyword).cloned().unwrap_or_default())
        }

        fn all(&mut self) -> Result<BTreeSet<MsgIdx>> {
            Ok((0..self.len).map(MsgIdx).collect())
        }
    }

    fn ids(list: &[u64]) -> BTreeSet<MsgIdx> {
        list.iter().copied().map(MsgIdx).collect()
    }

    fn source() -> MapSource {
        let mut postings = HashMap::new();
        postings.insert("cat".to_string(), ids(&[1, 2, 3]));
        postings.insert("dog".to_string(), ids(&[2, 3, 4]));
        postings.insert("fish".to_string(), ids(&[3, 9]));
        MapSource { postings, len: 6 }
    }

    fn terms(raw: &[&str]) -> Vec<SearchTerm> {
        raw.iter().filter_map(|t| SearchTerm::parse(t)).collect()
    }

    #[test]
    fn operators_apply_left_to_right() {
        let mut source = source();
        assert_eq!(evaluate(&terms(&["cat", "dog"]), &mut source).unwrap(), ids(&[2, 3]));
        assert_eq!(evaluate(&terms(&["cat", "+dog"]), &mut source).unwrap(), ids(&[1, 2, 3, 4]));
        assert_eq!(evaluate(&terms(&["cat", "-dog"]), &mut source).unwrap(), ids(&[1]));
        assert_eq!(
            evaluate(&terms(&["cat", "-fish", "+fish"]), &mut source).unwrap(),
            ids(&[1, 2, 3, 9])
        );
        // The first term's operator is ignored.
        assert_eq!(evaluate(&terms(&["-cat"]), &mut source).unwrap(), ids(&[1, 2, 3]));
    }

    #[test]
    fn all_mail_and_empty_lists() {
        let mut source = source();
        assert_eq!(evaluate(&terms(&["all:mail", "-dog"]), &mut source).unwrap(), ids(&[0, 1, 5]));
        assert!(evaluate(&[], &mut source).unwrap().is_empty());
        assert!(evaluate(&terms(&["nothing"]), &mut source).unwrap().is_empty());
    }
}
