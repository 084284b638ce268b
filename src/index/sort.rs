use std::fmt;
use std::str::FromStr;
use crate::core::error::{Error, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Index,
    Random,
    Date,
    From,
    Subject,
    Unsorted,
}

/// Parsed sort order such as `rev-date` or `flat-index`.
///
/// The key is matched as a suffix of the name; a `rev` prefix reverses the
/// final order and `flat` anywhere disables conversation collapsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortMode {
    pub key: SortKey,
    pub reverse: bool,
    pub flat: bool,
}

impl SortMode {
    /// Index order with whatever `rev`/`flat` flags `name` carries.
    pub fn fallback(name: &str) -> Self {
        let name = name.to_lowercase();
        SortMode {
            key: SortKey::Index,
            reverse: name.starts_with("rev"),
            flat: name.contains("flat"),
        }
    }
}

impl FromStr for SortMode {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let lowered = name.to_lowercase();
        let key = if lowered == "unsorted" || lowered.ends_with("-unsorted") {
            SortKey::Unsorted
        } else if lowered.ends_with("index") {
            SortKey::Index
        } else if lowered.ends_with("random") {
            SortKey::Random
        } else if lowered.ends_with("date") {
            SortKey::Date
        } else if lowered.ends_with("from") {
            SortKey::From
        } else if lowered.ends_with("subject") {
            SortKey::Subject
        } else {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("Unknown sort order: {}", name),
            ));
        };

        Ok(SortMode { key, ..SortMode::fallback(&lowered) })
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let key = match self.key {
            SortKey::Index => "index",
            SortKey::Random => "random",
            SortKey::Date => "date",
            SortKey::From => "from",
            SortKey::Subject => "subject",
            SortKey::Unsorted => "unsorted",
        };
        if self.reverse {
            f.write_str("rev-")?;
        }
        if self.flat {
            f.write_str("flat-")?;
        }
        f.write_str(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefix_flags_and_suffix_key() {
        let mode: SortMode = "rev-date".parse().unwrap();
        assert_eq!(mode, SortMode { key: SortKey::Date, reverse: true, flat: false });

        let mode: SortMode = "flat-Subject".parse().unwrap();
        assert_eq!(mode, SortMode { key: SortKey::Subject, reverse: false, flat: true });

        let mode: SortMode = "reverse_index".parse().unwrap();
        assert!(mode.reverse);
        assert_eq!(mode.key, SortKey::Index);

        assert_eq!("unsorted".parse::<SortMode>().unwrap().key, SortKey::Unsorted);
        assert_eq!("rev-flat-from".parse::<SortMode>().unwrap().to_string(), "rev-flat-from");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = "rev-size".parse::<SortMode>().unwrap_err();
        assert!(err.is(ErrorKind::InvalidArgument));
        assert_eq!(SortMode::fallback("rev-size"), SortMode { key: SortKey::Index, reverse: true, flat: false });
    }
}
