//! Content handed out to clients that redeem a solved puzzle.

use rand::seq::IndexedRandom;

/// Supplies the resource granted on a successful redemption
pub trait ResourceProvider: Send + Sync {
    fn resource(&self) -> String;
}

/// Always grants the same string
#[derive(Debug, Clone)]
pub struct StaticResource(String);

impl StaticResource {
    pub fn new(resource: impl Into<String>) -> Self {
        Self(resource.into())
    }
}

impl ResourceProvider for StaticResource {
    fn resource(&self) -> String {
        self.0.clone()
    }
}

const DEFAULT_QUOTES: &[&str] = &[
    "The only true wisdom is in knowing you know nothing.",
    "Well begun is half done.",
    "He who has a why to live can bear almost any how.",
    "Patience is bitter, but its fruit is sweet.",
    "No man ever steps in the same river twice.",
    "What we achieve inwardly will change outer reality.",
    "The journey of a thousand miles begins with one step.",
    "It is not the mountain we conquer, but ourselves.",
];

/// Grants a random quote per redemption
#[derive(Debug, Clone)]
pub struct QuoteBook {
    quotes: Vec<String>,
}

impl QuoteBook {
    /// Book with the given quotes; falls back to the built-in set when empty
    pub fn new(quotes: Vec<String>) -> Self {
        if quotes.is_empty() {
            return Self::default();
        }
        Self { quotes }
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}

impl Default for QuoteBook {
    fn default() -> Self {
        Self {
            quotes: DEFAULT_QUOTES.iter().map(|q| q.to_string()).collect(),
        }
    }
}

impl ResourceProvider for QuoteBook {
    fn resource(&self) -> String {
        self.quotes
            .choose(&mut rand::rng())
            .cloned()
            .unwrap_or_default()
    }
}
