//! Term extraction shared by indexing, lexical scoring, exact search and
//! span reranking.
//!
//! Every component tokenizes through [`tokenize`], so a term stored in the
//! lexical index is always reachable from the same text typed as a query.
//! Tokens are lowercased, folded to ASCII (`café` becomes `cafe`) and split
//! on non-alphanumeric boundaries. There is no stemming: `fox` and `foxes`
//! are distinct terms.

use std::cell::RefCell;

use tantivy::tokenizer::{
    AsciiFoldingFilter,
    LowerCaser,
    RemoveLongFilter,
    SimpleTokenizer,
    TextAnalyzer,
    TokenStream,
};
use unicode_normalization::char::{decompose_canonical, is_combining_mark};

/// Tokens longer than this many bytes are dropped (hex dumps, base64 and
/// other extraction noise).
pub const MAX_TOKEN_BYTES: usize = 40;

/// A term together with its byte span in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub term: String,
    pub start: usize,
    pub end: usize,
}

fn build_analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(MAX_TOKEN_BYTES))
        .filter(LowerCaser)
        .filter(AsciiFoldingFilter)
        .build()
}

thread_local! {
    static ANALYZER: RefCell<TextAnalyzer> = RefCell::new(build_analyzer());
}

/// Split `text` into lowercased, accent-free terms with their byte offsets.
///
/// # Examples
///
/// ```
/// use pdfdex::tokenizer::tokenize;
///
/// let tokens = tokenize("Quick, brown-Fox!");
/// let terms: Vec<_> = tokens.iter().map(|t| t.term.as_str()).collect();
/// assert_eq!(terms, ["quick", "brown", "fox"]);
/// assert_eq!(tokenize("Résumé")[0].term, "resume");
/// assert_eq!((tokens[2].start, tokens[2].end), (13, 16));
/// ```
pub fn tokenize(text: &str) -> Vec<Token> {
    ANALYZER.with(|analyzer| {
        let mut analyzer = analyzer.borrow_mut();
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while stream.advance() {
            let token = stream.token();
            tokens.push(Token {
                term: token.text.clone(),
                start: token.offset_from,
                end: token.offset_to,
            });
        }
        tokens
    })
}

/// Distinct query terms in first-occurrence order.
pub fn distinct_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for token in tokenize(text) {
        if !terms.contains(&token.term) {
            terms.push(token.term);
        }
    }
    terms
}

/// Lowercased, accent-stripped copy of `text` plus a map from each byte of
/// the copy back to the byte offset of the character it came from in `text`.
///
/// Characters are lowercased, canonically decomposed and stripped of
/// combining marks, so `Café` and `cafe\u{301}` both fold to `cafe`. Folding
/// can change a character's encoded length, so substring hits found in the
/// folded text are translated through this map before being reported as
/// spans of the original.
pub(crate) fn fold_case(text: &str) -> (String, Vec<usize>) {
    let mut folded = String::with_capacity(text.len());
    let mut origin = Vec::with_capacity(text.len() + 1);
    for (offset, ch) in text.char_indices() {
        for lower in ch.to_lowercase() {
            decompose_canonical(lower, |part| {
                if !is_combining_mark(part) {
                    folded.push(part);
                }
            });
            origin.resize(folded.len(), offset);
        }
    }
    origin.push(text.len());
    (folded, origin)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn terms(text: &str) -> Vec<String> {
        tokenize(text).into_iter().map(|t| t.term).collect()
    }

    #[test]
    fn lowercases_and_splits_on_punctuation() {
        assert_eq!(terms("The QUICK-brown fox."), [
            "the", "quick", "brown", "fox"
        ]);
    }

    #[test]
    fn keeps_digits_inside_terms() {
        assert_eq!(terms("ISO 9001:2015 v2"), ["iso", "9001", "2015", "v2"]);
    }

    #[test]
    fn no_stemming() {
        assert_eq!(terms("fox foxes"), ["fox", "foxes"]);
    }

    #[test]
    fn empty_text_has_no_tokens() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("  -- ,, ").is_empty());
    }

    #[test]
    fn drops_overlong_tokens() {
        let noise = "a".repeat(MAX_TOKEN_BYTES + 1);
        assert_eq!(terms(&format!("keep {noise} this")), ["keep", "this"]);
    }

    #[test]
    fn offsets_point_into_original_text() {
        let text = "Größe der Straße";
        let tokens = tokenize(text);
        let sources: Vec<&str> =
            tokens.iter().map(|t| &text[t.start..t.end]).collect();
        assert_eq!(sources, ["Größe", "der", "Straße"]);
    }

    #[test]
    fn accents_are_folded() {
        assert_eq!(terms("Le café du Résumé"), ["le", "cafe", "du", "resume"]);
        assert_eq!(terms("naïve"), terms("naive"));
    }

    #[test]
    fn distinct_terms_preserve_first_occurrence() {
        assert_eq!(distinct_terms("fox quick Fox the quick"), [
            "fox", "quick", "the"
        ]);
    }

    #[test]
    fn fold_case_maps_back_to_source_offsets() {
        let text = "AİB";
        let (folded, origin) = fold_case(text);
        assert_eq!(folded, "aib");
        let b = folded.find('b').unwrap();
        assert_eq!(origin[b], text.find('B').unwrap());
        assert_eq!(*origin.last().unwrap(), text.len());
    }

    #[test]
    fn fold_case_strips_accents() {
        let text = "Le CAFÉ est là";
        let (folded, origin) = fold_case(text);
        assert_eq!(folded, "le cafe est la");
        let at = folded.find("est").unwrap();
        assert_eq!(origin[at], text.find("est").unwrap());

        let (decomposed, _) = fold_case("cafe\u{301}");
        assert_eq!(decomposed, "cafe");
    }

    proptest! {
        #[test]
        fn tokenization_is_stable(text in "\\PC{0,64}") {
            prop_assert_eq!(tokenize(&text), tokenize(&text));
        }

        #[test]
        fn spans_are_ordered_and_in_bounds(text in "\\PC{0,64}") {
            let mut last_end = 0;
            for token in tokenize(&text) {
                prop_assert!(token.start >= last_end);
                prop_assert!(token.start < token.end);
                prop_assert!(token.end <= text.len());
                prop_assert!(text.is_char_boundary(token.start));
                prop_assert!(text.is_char_boundary(token.end));
                last_end = token.end;
            }
        }
    }
}
