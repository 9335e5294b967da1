use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyword {
    pub token: String,
    pub count: usize,
}

pub trait KeywordExtractor: Send + Sync {
    fn extract(&self, text: &str) -> anyhow::Result<Vec<Keyword>>;
}

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "before", "but", "by", "can", "could", "do", "does", "each", "for", "from", "had", "has",
    "have", "how", "if", "in", "into", "is", "it", "its", "just", "more", "most", "no", "not",
    "of", "on", "one", "only", "or", "other", "our", "out", "over", "so", "some", "such",
    "than", "that", "the", "their", "them", "then", "there", "these", "they", "this", "to",
    "up", "us", "was", "we", "were", "what", "when", "which", "while", "who", "will", "with",
    "would", "you", "your",
];

/// Term-frequency extraction over lowercased word tokens.
#[derive(Debug, Clone)]
pub struct FrequencyExtractor {
    pub max_keywords: usize,
    pub min_len: usize,
    pub min_count: usize,
}

impl Default for FrequencyExtractor {
    fn default() -> Self {
        Self {
            max_keywords: 20,
            min_len: 3,
            min_count: 2,
        }
    }
}

impl KeywordExtractor for FrequencyExtractor {
    fn extract(&self, text: &str) -> anyhow::Result<Vec<Keyword>> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut first_seen: HashMap<String, usize> = HashMap::new();

        let tokens = text
            .split(|c: char| !c.is_alphanumeric() && c != '-')
            .map(|t| t.trim_matches('-').to_lowercase())
            .filter(|t| t.chars().count() >= self.min_len)
            .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
            .filter(|t| !STOPWORDS.contains(&t.as_str()));

        for (position, token) in tokens.enumerate() {
            first_seen.entry(token.clone()).or_insert(position);
            *counts.entry(token).or_insert(0) += 1;
        }

        let mut keywords = counts
            .into_iter()
            .filter(|(_, count)| *count >= self.min_count)
            .map(|(token, count)| Keyword { token, count })
            .collect::<Vec<_>>();
        keywords.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| first_seen[&a.token].cmp(&first_seen[&b.token]))
        });
        keywords.truncate(self.max_keywords);
        Ok(keywords)
    }
}
