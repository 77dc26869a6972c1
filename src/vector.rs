use rayon::prelude::*;

use crate::{
    corpus::{Corpus, PageRef},
    error::{Error, Result},
    result::{SearchResult, sort_results},
};

/// Cosine similarity of two vectors, clamped to `[-1, 1]`.
///
/// Returns `None` when the lengths differ or either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0))
}

/// Rank pages by cosine similarity to `query`.
///
/// Only pages that have an embedding take part; pages with blank text are
/// skipped as well. Fails with [`Error::Unavailable`] when the corpus holds
/// no embeddings at all or the query vector's dimension does not match.
pub fn search(corpus: &Corpus, query: &[f32]) -> Result<Vec<SearchResult>> {
    let Some(dimension) = corpus.dimension().filter(|_| corpus.has_embeddings())
    else {
        return Err(Error::unavailable(
            "vector search",
            "no page in the corpus has an embedding",
        ));
    };
    if query.len() != dimension {
        return Err(Error::unavailable(
            "vector search",
            format!(
                "query vector has {} dimensions, corpus vectors have {dimension}",
                query.len()
            ),
        ));
    }

    let candidates: Vec<(PageRef, &[f32])> = corpus
        .pages()
        .filter(|(_, page)| !page.text.trim().is_empty())
        .filter_map(|(r, page)| page.embedding.as_deref().map(|e| (r, e)))
        .collect();

    let mut results: Vec<SearchResult> = candidates
        .par_iter()
        .filter_map(|&(page, embedding)| {
            cosine_similarity(query, embedding)
                .map(|score| SearchResult::new(page, score))
        })
        .collect();
    sort_results(&mut results);
    Ok(results)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::corpus::{Document, Page};

    fn corpus() -> Corpus {
        Corpus::from_documents(vec![
            Document::new("/lib/a.pdf", vec![
                Page::new(1, "north").with_embedding(vec![1.0, 0.0]),
                Page::new(2, "no vector here"),
                Page::new(3, "north east").with_embedding(vec![1.0, 1.0]),
            ]),
            Document::new("/lib/b.pdf", vec![
                Page::new(1, "south").with_embedding(vec![-1.0, 0.0]),
                Page::new(2, "   ").with_embedding(vec![1.0, 0.0]),
            ]),
        ])
    }

    #[test]
    fn self_similarity_is_one() {
        let v = [0.3, -1.2, 4.0];
        assert!((cosine_similarity(&v, &v).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_vectors_have_no_similarity() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[], &[]), None);
    }

    #[test]
    fn ranks_by_cosine_and_skips_pages_without_vectors() {
        let c = corpus();
        let results = search(&c, &[1.0, 0.0]).unwrap();

        let order: Vec<_> = results.iter().map(|r| r.page).collect();
        assert_eq!(order, [
            PageRef { doc: 0, page: 0 },
            PageRef { doc: 0, page: 2 },
            PageRef { doc: 1, page: 0 },
        ]);
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!((results[2].score + 1.0).abs() < 1e-6);
    }

    #[test]
    fn never_returns_pages_without_embeddings() {
        let c = corpus();
        for result in search(&c, &[0.2, 0.9]).unwrap() {
            assert!(c.page(result.page).unwrap().embedding.is_some());
        }
    }

    #[test]
    fn unavailable_without_embeddings() {
        let c = Corpus::from_documents(vec![Document::new("/lib/a.pdf", vec![
            Page::new(1, "text only"),
        ])]);
        assert!(matches!(
            search(&c, &[1.0]),
            Err(Error::Unavailable { .. })
        ));
    }

    #[test]
    fn unavailable_on_dimension_mismatch() {
        assert!(matches!(
            search(&corpus(), &[1.0, 0.0, 0.0]),
            Err(Error::Unavailable { .. })
        ));
    }

    proptest! {
        #[test]
        fn similarity_is_bounded_and_symmetric(
            a in prop::collection::vec(-100.0f32..100.0, 4),
            b in prop::collection::vec(-100.0f32..100.0, 4),
        ) {
            if let Some(s) = cosine_similarity(&a, &b) {
                prop_assert!((-1.0..=1.0).contains(&s));
                let t = cosine_similarity(&b, &a).unwrap();
                prop_assert!((s - t).abs() < 1e-5);
            }
        }
    }
}
