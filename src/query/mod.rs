pub mod terms;
pub mod evaluator;
pub mod filter;

pub use evaluator::{evaluate, HitSource};
pub use filter::{FilterRule, FilterSet};
pub use terms::{parse_terms, Lookup, Operator, SearchTerm};
