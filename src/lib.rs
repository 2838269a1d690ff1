//! Sentence embeddings from compositional n-gram features.
//!
//! A port of the sent2vec model: word and n-gram embeddings are trained with
//! negative-sampling logistic regression and composed by averaging. Training
//! runs a producer thread and a pool of workers performing unsynchronized
//! ("hogwild") gradient updates on shared matrices.
//!
//! ```no_run
//! use sent2vec::{Sent2Vec, Sent2VecConfig};
//!
//! let corpus: Vec<Vec<String>> = vec![
//!     vec!["this".into(), "is".into(), "a".into(), "sentence".into()],
//! ];
//! let mut model = Sent2Vec::new(Sent2VecConfig { min_count: 1, ..Default::default() });
//! model.build_vocab(&corpus, false).unwrap();
//! model.train(&corpus, 2, 1.0).unwrap();
//! let v = model.sentence_vector(&corpus[0]).unwrap();
//! assert_eq!(v.len(), 100);
//! ```

mod corpus;
mod dictionary;
mod io;
mod model;
mod train;

pub use corpus::{FileCorpus, SentenceStream};
pub use dictionary::{Dictionary, Entry};
pub use model::{Sent2Vec, Sent2VecConfig};

use thiserror::Error;

/// Fatal conditions raised by vocabulary building and training.
#[derive(Debug, Error)]
pub enum Sent2VecError {
    /// No words survived frequency thresholding.
    #[error("empty vocabulary; try a smaller min_count value")]
    EmptyVocabulary,

    /// An operation that needs a built vocabulary ran before `build_vocab`.
    #[error("you must build the vocabulary before calling {0}")]
    VocabularyNotBuilt(&'static str),
}

pub fn norm(v: &[f32]) -> f32 {
    v.iter().copied().map(|e| e * e).sum::<f32>().sqrt()
}

pub fn normalize(v: &mut [f32]) {
    let len = norm(v);
    for e in v {
        *e /= len;
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(&a, &b)| a * b).sum()
}
