//! Per-file choice between direct analysis and retrieve-then-analyze.
//!
//! A document whose token count fits the budget goes to the model whole;
//! anything larger is chunked, indexed and narrowed to its relevant passages
//! first. Tokens are counted with a tiktoken BPE so the count tracks what the
//! completion model will actually see.

use tiktoken_rs::CoreBPE;
use tracing::debug;

use crate::error::{CoderError, Result};
use crate::models::RoutePath;

/// Counts tokens in a text.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerKind {
    Cl100k,
    O200k,
    P50k,
}

impl TokenizerKind {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "cl100k_base" | "cl100k" => Ok(Self::Cl100k),
            "o200k_base" | "o200k" => Ok(Self::O200k),
            "p50k_base" | "p50k" => Ok(Self::P50k),
            other => Err(CoderError::config(format!(
                "Unknown tokenizer: '{}'. Must be cl100k_base, o200k_base or p50k_base.",
                other
            ))),
        }
    }

    /// Encoding used by a completion model, cl100k when unknown.
    pub fn for_model(model: &str) -> Self {
        let model = model.to_ascii_lowercase();
        if model.starts_with("gpt-4o")
            || model.starts_with("gpt-4.1")
            || model.starts_with("gpt-5")
            || model.starts_with("o1")
            || model.starts_with("o3")
            || model.starts_with("o4")
        {
            Self::O200k
        } else if model.starts_with("text-davinci") || model.starts_with("code-") {
            Self::P50k
        } else {
            Self::Cl100k
        }
    }

    /// Tokenizer from `routing.tokenizer`, else from the completion model.
    pub fn resolve(configured: Option<&str>, model: &str) -> Result<Self> {
        match configured {
            Some(name) => Self::from_name(name),
            None => Ok(Self::for_model(model)),
        }
    }

    pub fn build(&self) -> Result<CoreBPE> {
        let bpe = match self {
            TokenizerKind::Cl100k => tiktoken_rs::cl100k_base(),
            TokenizerKind::O200k => tiktoken_rs::o200k_base(),
            TokenizerKind::P50k => tiktoken_rs::p50k_base(),
        };
        bpe.map_err(|e| CoderError::config(format!("failed to load tokenizer: {}", e)))
    }
}

pub struct BpeCounter {
    bpe: CoreBPE,
}

impl BpeCounter {
    pub fn new(kind: TokenizerKind) -> Result<Self> {
        Ok(Self { bpe: kind.build()? })
    }
}

impl TokenCounter for BpeCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteDecision {
    pub path: RoutePath,
    pub tokens: usize,
}

pub struct RoutingPolicy {
    budget: usize,
    counter: Box<dyn TokenCounter>,
}

impl RoutingPolicy {
    pub fn new(budget: usize, counter: Box<dyn TokenCounter>) -> Self {
        Self { budget, counter }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.counter.count(text)
    }

    pub fn choose_path(&self, text: &str) -> RouteDecision {
        let tokens = self.counter.count(text);
        let path = route_for_count(tokens, self.budget);
        debug!(tokens, budget = self.budget, route = %path, "routing decision");
        RouteDecision { path, tokens }
    }
}

/// `Direct` iff `tokens <= budget`.
pub fn route_for_count(tokens: usize, budget: usize) -> RoutePath {
    if tokens <= budget {
        RoutePath::Direct
    } else {
        RoutePath::Retrieve
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct WordCounter;

    impl TokenCounter for WordCounter {
        fn count(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    fn words(n: usize) -> String {
        vec!["token"; n].join(" ")
    }

    #[test]
    fn large_document_is_retrieved() {
        let policy = RoutingPolicy::new(20_000, Box::new(WordCounter));
        let decision = policy.choose_path(&words(25_000));
        assert_eq!(decision.path, RoutePath::Retrieve);
        assert_eq!(decision.tokens, 25_000);
    }

    #[test]
    fn small_document_goes_direct() {
        let policy = RoutingPolicy::new(20_000, Box::new(WordCounter));
        assert_eq!(policy.choose_path(&words(15_000)).path, RoutePath::Direct);
    }

    #[test]
    fn budget_boundary_is_inclusive() {
        assert_eq!(route_for_count(20_000, 20_000), RoutePath::Direct);
        assert_eq!(route_for_count(20_001, 20_000), RoutePath::Retrieve);
        assert_eq!(route_for_count(0, 1), RoutePath::Direct);
    }

    #[test]
    fn same_text_same_route() {
        let policy = RoutingPolicy::new(10, Box::new(WordCounter));
        let text = words(11);
        assert_eq!(policy.choose_path(&text), policy.choose_path(&text));
    }

    #[test]
    fn tokenizer_resolution() {
        assert_eq!(TokenizerKind::for_model("gpt-4o"), TokenizerKind::O200k);
        assert_eq!(TokenizerKind::for_model("gpt-4-turbo"), TokenizerKind::Cl100k);
        assert_eq!(TokenizerKind::for_model("llama3.1"), TokenizerKind::Cl100k);
        assert_eq!(
            TokenizerKind::resolve(Some("p50k_base"), "gpt-4o").unwrap(),
            TokenizerKind::P50k
        );
        assert!(TokenizerKind::resolve(Some("sentencepiece"), "gpt-4o").is_err());
    }

    #[test]
    fn bpe_counter_counts_tokens() {
        let counter = BpeCounter::new(TokenizerKind::Cl100k).unwrap();
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("hello world"), 2);
    }
}
