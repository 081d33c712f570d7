pub mod worker;

pub use worker::{classification_loop, ClassifyDeps};

use anyhow::Result;
use async_trait::async_trait;

/// Outcome of the external classification function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub is_blockable: bool,
    pub reason: String,
}

/// External content classifier. The model behind it is not this crate's
/// concern; calls may fail and may be slow, so callers bound the wait.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Verdict>;
}

/// Substring-match classifier for dev runs: flags text containing any of the
/// configured terms. A stand-in, not a moderation model.
pub struct KeywordClassifier {
    terms: Vec<String>,
}

impl KeywordClassifier {
    pub fn new(terms: Vec<String>) -> Self {
        Self {
            terms: terms.into_iter().map(|t| t.to_lowercase()).collect(),
        }
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> Result<Verdict> {
        let lowered = text.to_lowercase();
        let hit = self.terms.iter().find(|term| lowered.contains(term.as_str()));
        Ok(match hit {
            Some(term) => Verdict {
                is_blockable: true,
                reason: format!("matched blocked term \"{term}\""),
            },
            None => Verdict {
                is_blockable: false,
                reason: "no blocked terms matched".to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keyword_classifier_matches_case_insensitively() {
        let classifier = KeywordClassifier::new(vec!["Gambling".into()]);
        let verdict = classifier.classify("online GAMBLING site").await.unwrap();
        assert!(verdict.is_blockable);

        let verdict = classifier.classify("homework help").await.unwrap();
        assert!(!verdict.is_blockable);
    }
}
