use std::collections::HashMap;

/// Splits text into index terms: punctuation is stripped, whitespace
/// separates tokens, and single-character fragments are dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    let cleaned: String = text.chars().filter(|c| !c.is_ascii_punctuation()).collect();
    cleaned
        .split_whitespace()
        .filter(|token| token.chars().count() > 1)
        .map(str::to_owned)
        .collect()
}

/// Per-token frequencies for one document.
pub fn count_tokens(tokens: &[String]) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for token in tokens {
        *counts.entry(token.clone()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_strips_punctuation_and_short_tokens() {
        let tokens = tokenize("Hello, world! A note-taking app.");
        assert_eq!(tokens, vec!["Hello", "world", "notetaking", "app"]);
    }

    #[test]
    fn count_tokens_tallies_repeats() {
        let tokens = tokenize("the cat and the hat");
        let counts = count_tokens(&tokens);
        assert_eq!(counts.get("the"), Some(&2));
        assert_eq!(counts.get("cat"), Some(&1));
        assert_eq!(counts.len(), 4);
    }
}
