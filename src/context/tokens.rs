//! Token counting using tiktoken-rs
//!
//! Budget enforcement needs real token counts, not byte heuristics, so the
//! assembler shares one lazily-built BPE instance per process.

use anyhow::{anyhow, Result};
use once_cell::sync::OnceCell;
use tiktoken_rs::tokenizer::Tokenizer;
use tiktoken_rs::CoreBPE;

/// Convert an encoding name string to a Tokenizer enum
fn parse_tokenizer(encoding: &str) -> Result<Tokenizer> {
    match encoding.to_lowercase().as_str() {
        "o200k_base" => Ok(Tokenizer::O200kBase),
        "cl100k_base" => Ok(Tokenizer::Cl100kBase),
        "p50k_base" => Ok(Tokenizer::P50kBase),
        "p50k_edit" => Ok(Tokenizer::P50kEdit),
        "r50k_base" => Ok(Tokenizer::R50kBase),
        "gpt2" => Ok(Tokenizer::Gpt2),
        _ => Err(anyhow!(
            "Unknown encoding '{}'. Supported: o200k_base, cl100k_base, p50k_base, p50k_edit, r50k_base, gpt2",
            encoding
        )),
    }
}

/// Token counter using tiktoken BPE encoding
pub struct TokenCounter {
    bpe: CoreBPE,
    encoding_name: String,
}

impl TokenCounter {
    pub fn new(encoding: &str) -> Result<Self> {
        let tokenizer = parse_tokenizer(encoding)?;
        let bpe = tiktoken_rs::get_bpe_from_tokenizer(tokenizer)
            .map_err(|e| anyhow!("Failed to get BPE for encoding '{}': {}", encoding, e))?;
        Ok(Self {
            bpe,
            encoding_name: encoding.to_string(),
        })
    }

    /// Count tokens in a string using the configured encoding
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    pub fn encoding_name(&self) -> &str {
        &self.encoding_name
    }
}

static TOKEN_COUNTER: OnceCell<TokenCounter> = OnceCell::new();

/// Get or initialize the process-wide TokenCounter.
///
/// The first caller fixes the encoding; later calls with a different name
/// return the already-initialized instance. An unknown name falls back to
/// "o200k_base" with a warning rather than failing startup.
pub fn shared_counter(encoding: &str) -> &'static TokenCounter {
    TOKEN_COUNTER.get_or_init(|| {
        TokenCounter::new(encoding).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "falling back to o200k_base encoding");
            TokenCounter::new("o200k_base")
                .expect("Failed to initialize tokenizer with fallback encoding 'o200k_base'")
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_positive_and_below_char_counts_for_prose() {
        let counter = TokenCounter::new("o200k_base").unwrap();
        let prose = "Retrieval merges dense and sparse signals before packing.";
        let tokens = counter.count(prose);
        assert!(tokens > 0);
        assert!(tokens < prose.len());
    }

    #[test]
    fn empty_string_costs_nothing() {
        let counter = TokenCounter::new("o200k_base").unwrap();
        assert_eq!(counter.count(""), 0);
    }

    #[test]
    fn unknown_encodings_are_rejected() {
        assert!(TokenCounter::new("made_up_base").is_err());
    }

    #[test]
    fn shared_counter_returns_one_instance() {
        let a = shared_counter("o200k_base");
        let b = shared_counter("cl100k_base");
        assert_eq!(a.encoding_name(), b.encoding_name());
    }

    #[test]
    fn unicode_text_is_countable() {
        let counter = TokenCounter::new("o200k_base").unwrap();
        assert!(counter.count("hello 世界 🌍") > 0);
    }
}
