//! Word-set similarity used by the coverage and duplicate audits.

use std::collections::HashSet;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "are", "was", "were", "from", "into", "onto",
    "have", "has", "had", "can", "could", "should", "would", "will", "shall", "must", "may",
    "all", "any", "each", "every", "not", "but", "its", "their", "they", "them", "then",
    "than", "when", "where", "which", "who", "what", "how", "via", "per", "use", "uses",
    "using", "our", "your", "you", "out", "over", "under", "also", "been", "being",
];

/// Lowercase alphanumeric words of at least three characters, minus stopwords.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .filter(|w| !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Share of `parent` words that also appear in `child`: `|P ∩ C| / |P|`.
///
/// An empty parent set counts as fully covered.
pub fn coverage_ratio(parent: &HashSet<String>, child: &HashSet<String>) -> f64 {
    if parent.is_empty() {
        return 1.0;
    }
    parent.intersection(child).count() as f64 / parent.len() as f64
}

/// Jaccard similarity `|A ∩ B| / |A ∪ B|`; 0 when both are empty.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_filters_short_words_and_stopwords() {
        let tokens = tokenize("Users can register with an e-mail and password!");
        let mut sorted: Vec<_> = tokens.into_iter().collect();
        sorted.sort();
        assert_eq!(sorted, vec!["mail", "password", "register", "users"]);
    }

    #[test]
    fn test_coverage_ratio() {
        let parent = tokenize("users register email password");
        let child = tokenize("implement register endpoint accepting email and password");
        assert!((coverage_ratio(&parent, &child) - 0.75).abs() < 1e-9);
        assert_eq!(coverage_ratio(&HashSet::new(), &child), 1.0);
    }

    #[test]
    fn test_jaccard() {
        let a = tokenize("create user table migration");
        let b = tokenize("create user table migration");
        assert_eq!(jaccard(&a, &b), 1.0);
        let c = tokenize("render login form");
        assert_eq!(jaccard(&a, &c), 0.0);
        assert_eq!(jaccard(&HashSet::new(), &HashSet::new()), 0.0);
    }
}
