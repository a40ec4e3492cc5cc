//! Hand-rolled Okapi BM25 over a fixed corpus snapshot.
//!
//! One `Bm25Index` is built per index generation from the tokenized text of
//! every chunk; it never mutates after construction, matching the
//! immutable-`Generation` rebuild/swap model.

use std::collections::HashMap;

const K1: f64 = 1.2;
const B: f64 = 0.75;

#[derive(Debug, Default)]
pub struct Bm25Index {
    /// Per-document term frequency tables, one per corpus position.
    term_freqs: Vec<HashMap<String, u32>>,
    doc_lengths: Vec<usize>,
    avg_doc_length: f64,
    /// Number of documents containing each term at least once.
    doc_freq: HashMap<String, usize>,
    n_docs: usize,
}

impl Bm25Index {
    pub fn build(tokenized_docs: &[Vec<String>]) -> Self {
        let n_docs = tokenized_docs.len();
        if n_docs == 0 {
            return Self::default();
        }

        let mut term_freqs = Vec::with_capacity(n_docs);
        let mut doc_lengths = Vec::with_capacity(n_docs);
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for doc in tokenized_docs {
            let mut freqs: HashMap<String, u32> = HashMap::new();
            for term in doc {
                *freqs.entry(term.clone()).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            doc_lengths.push(doc.len());
            term_freqs.push(freqs);
        }

        let avg_doc_length =
            doc_lengths.iter().sum::<usize>() as f64 / n_docs as f64;

        Self {
            term_freqs,
            doc_lengths,
            avg_doc_length,
            doc_freq,
            n_docs,
        }
    }

    pub fn len(&self) -> usize {
        self.n_docs
    }

    pub fn is_empty(&self) -> bool {
        self.n_docs == 0
    }

    /// Returns one BM25 score per document, in corpus order.
    pub fn score_all(&self, query_terms: &[String]) -> Vec<f32> {
        if self.n_docs == 0 {
            return Vec::new();
        }

        let idfs: HashMap<&str, f64> = query_terms
            .iter()
            .map(|term| {
                let df = self.doc_freq.get(term).copied().unwrap_or(0);
                let idf = (((self.n_docs as f64 - df as f64 + 0.5) / (df as f64 + 0.5)) + 1.0).ln();
                (term.as_str(), idf)
            })
            .collect();

        (0..self.n_docs)
            .map(|doc_idx| {
                let freqs = &self.term_freqs[doc_idx];
                let doc_len = self.doc_lengths[doc_idx] as f64;
                let norm = K1 * (1.0 - B + B * (doc_len / self.avg_doc_length.max(1.0)));

                let score: f64 = query_terms
                    .iter()
                    .map(|term| {
                        let tf = freqs.get(term).copied().unwrap_or(0) as f64;
                        if tf == 0.0 {
                            return 0.0;
                        }
                        let idf = idfs.get(term.as_str()).copied().unwrap_or(0.0);
                        idf * (tf * (K1 + 1.0)) / (tf + norm)
                    })
                    .sum();

                score as f32
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::Bm25Index;

    fn doc(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn empty_corpus_scores_empty() {
        let index = Bm25Index::build(&[]);
        assert!(index.is_empty());
        assert!(index.score_all(&["visa".to_string()]).is_empty());
    }

    #[test]
    fn document_with_query_term_outscores_document_without_it() {
        let docs = vec![
            doc(&["visa", "application", "deadline"]),
            doc(&["tuition", "payment", "plan"]),
        ];
        let index = Bm25Index::build(&docs);
        let scores = index.score_all(&["visa".to_string()]);
        assert_eq!(scores.len(), 2);
        assert!(scores[0] > scores[1]);
        assert_eq!(scores[1], 0.0);
    }

    #[test]
    fn rarer_terms_score_higher_than_common_ones() {
        let docs = vec![
            doc(&["visa", "common"]),
            doc(&["tuition", "common"]),
            doc(&["housing", "common"]),
        ];
        let index = Bm25Index::build(&docs);
        let rare_scores = index.score_all(&["visa".to_string()]);
        let common_scores = index.score_all(&["common".to_string()]);
        assert!(rare_scores[0] > common_scores[0]);
    }
}
