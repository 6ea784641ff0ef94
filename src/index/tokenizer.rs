use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, TextAnalyzer, TokenStream};

/// Name the analyzer is registered under in every opened index.
pub const ANALYZER_NAME: &str = "harvester";

/// Alphanumeric words, lower-cased.
pub fn text_analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(LowerCaser)
        .build()
}

/// Splits text into lower-cased alphanumeric words.
///
/// The indexer and the query parser both go through this function, so a
/// word searched for is spelled exactly as it was indexed.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut analyzer = text_analyzer();
    let mut stream = analyzer.token_stream(text);
    let mut words = Vec::new();
    while stream.advance() {
        words.push(stream.token().text.clone());
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_splits_and_lowercases() {
        assert_eq!(
            tokenize("Le Guin, Ursula K. (1929-2018)"),
            vec!["le", "guin", "ursula", "k", "1929", "2018"]
        );
    }

    #[test]
    fn test_tokenize_keeps_non_ascii_letters() {
        assert_eq!(tokenize("Čitanka — ŽIVOT"), vec!["čitanka", "život"]);
        assert!(tokenize(" ,.; ").is_empty());
    }
}
