//! Fixed category set validated at parse time.
//!
//! K_i: Labels the prompt asks for are known up front.
//! B_i: The model may answer with a label outside that set → ParseFailure.

use std::collections::HashMap;

/// Allowed category labels, in configured order.
///
/// Matching is case-insensitive and whitespace-trimmed; a match is
/// normalised to the configured spelling. An empty set accepts any label.
#[derive(Debug, Clone, Default)]
pub struct CategorySet {
    labels: Vec<String>,
    lookup: HashMap<String, usize>,
}

impl CategorySet {
    /// Build a set from configured labels.
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for label in labels {
            let label: String = label.into();
            let label = label.trim().to_string();
            let key = label.to_lowercase();
            if label.is_empty() || set.lookup.contains_key(&key) {
                continue;
            }
            set.lookup.insert(key, set.labels.len());
            set.labels.push(label);
        }
        set
    }

    /// Whether any label is accepted.
    pub fn is_open(&self) -> bool {
        self.labels.is_empty()
    }

    /// Configured labels.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Map a raw label to its canonical spelling.
    ///
    /// Returns `None` when the set is closed and the label is not in it.
    pub fn canonicalize(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if self.is_open() {
            return Some(raw.to_string());
        }
        self.lookup
            .get(&raw.to_lowercase())
            .map(|&idx| self.labels[idx].clone())
    }
}
