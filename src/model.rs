//! Model state: embedding matrices, the negative-sampling table, the SGD
//! update rule, and sentence-vector inference.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use aligned_box::AlignedBox;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::corpus::SentenceStream;
use crate::dictionary::Dictionary;
use crate::{dot, norm, Sent2VecError};

pub(crate) const NEGATIVE_TABLE_SIZE: usize = 10_000_000;

/// An `f32` stored as atomic bits.
///
/// The embedding matrices are mutated in place from every worker thread with
/// no locks (hogwild SGD). Loads and stores are relaxed and read-modify-write
/// is deliberately not atomic: lost updates are an accepted trade for
/// throughput, not an oversight.
#[derive(Default)]
#[repr(transparent)]
pub(crate) struct Real {
    bits: AtomicU32,
}

impl Real {
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn add(&self, x: f32) {
        let a = self.get();
        self.set(a + x);
    }
}

/// Model hyperparameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sent2VecConfig {
    /// Dimensionality of the embedding vectors.
    pub vector_size: usize,
    /// Initial learning rate.
    pub lr: f32,
    /// Floor the learning rate decays towards.
    pub min_lr: f32,
    /// Granularity hint for learning-rate updates. Kept for compatibility;
    /// this trainer updates the rate once per dispatched job.
    pub lr_update_rate: u32,
    /// Passes over the corpus.
    pub epochs: usize,
    /// Words with fewer total occurrences than this are ignored.
    pub min_count: u64,
    /// Negative samples drawn per positive example.
    pub neg: usize,
    /// Max length of word n-grams.
    pub word_ngrams: usize,
    /// Size of the hashed n-gram id space.
    pub bucket: usize,
    /// Subsampling threshold for frequent words.
    pub t: f64,
    /// Min length of char n-grams.
    pub minn: usize,
    /// Max length of char n-grams.
    pub maxn: usize,
    /// Context positions dropped per example when generating training
    /// word n-grams.
    pub dropout_k: usize,
    /// Seed for matrix init, table shuffling, and the worker RNGs.
    pub seed: u64,
    /// Target job size in words.
    pub batch_words: usize,
    /// Worker threads.
    pub workers: usize,
    /// Slot-table capacity; the vocabulary is pruned while reading to stay
    /// under 75% of this.
    pub max_vocab_size: usize,
    /// Max resolved tokens per sentence.
    pub max_line_size: usize,
}

impl Default for Sent2VecConfig {
    fn default() -> Self {
        Sent2VecConfig {
            vector_size: 100,
            lr: 0.2,
            min_lr: 0.001,
            lr_update_rate: 100,
            epochs: 5,
            min_count: 5,
            neg: 10,
            word_ngrams: 2,
            bucket: 2_000_000,
            t: 1e-4,
            minn: 3,
            maxn: 6,
            dropout_k: 2,
            seed: 42,
            batch_words: 10_000,
            workers: 3,
            max_vocab_size: 30_000_000,
            max_line_size: 1024,
        }
    }
}

/// A sent2vec model: dictionary plus input/output embedding matrices.
///
/// `wi` holds one row per word id and per hashed n-gram id,
/// `(size + bucket) x vector_size`; `wo` holds one row per word,
/// `size x vector_size`. Both are shared across worker threads during
/// training and updated without synchronization.
pub struct Sent2Vec {
    pub(crate) config: Sent2VecConfig,
    pub(crate) dict: Option<Dictionary>,
    pub(crate) wi: AlignedBox<[Real]>,
    pub(crate) wo: AlignedBox<[Real]>,
    pub(crate) negatives: Vec<u32>,
    pub(crate) negpos: AtomicUsize,
    pub(crate) min_lr_yet_reached: f32,
    pub(crate) train_count: usize,
    pub(crate) total_train_time: f64,
    pub(crate) loss: f64,
}

/// Cache-line-aligned cells, zero-initialized.
pub(crate) fn alloc_cells(n: usize) -> AlignedBox<[Real]> {
    AlignedBox::slice_from_default(128, n.max(1)).expect("memory allocation failed")
}

fn alloc_matrix(rows: usize, cols: usize) -> AlignedBox<[Real]> {
    alloc_cells(rows * cols)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl Sent2Vec {
    pub fn new(config: Sent2VecConfig) -> Self {
        let min_lr_yet_reached = config.lr;
        Sent2Vec {
            config,
            dict: None,
            wi: alloc_matrix(1, 1),
            wo: alloc_matrix(1, 1),
            negatives: Vec::new(),
            negpos: AtomicUsize::new(0),
            min_lr_yet_reached,
            train_count: 0,
            total_train_time: 0.0,
            loss: 0.0,
        }
    }

    pub fn config(&self) -> &Sent2VecConfig {
        &self.config
    }

    /// The vocabulary, once built.
    pub fn dictionary(&self) -> Option<&Dictionary> {
        self.dict.as_ref()
    }

    /// Number of completed `train` calls.
    pub fn train_count(&self) -> usize {
        self.train_count
    }

    /// Wall-clock seconds spent across all `train` calls.
    pub fn total_train_time(&self) -> f64 {
        self.total_train_time
    }

    /// Summed negative-sampling loss of the last `train` call.
    pub fn last_loss(&self) -> f64 {
        self.loss
    }

    /// Builds the vocabulary and sizes the embedding matrices.
    ///
    /// With `update` set, new sentences are merged into the existing
    /// vocabulary: counts grow, new words get fresh ids and freshly
    /// initialized rows, and the negative-sampling table is extended.
    pub fn build_vocab<S: SentenceStream + ?Sized>(
        &mut self,
        sentences: &S,
        update: bool,
    ) -> Result<(), Sent2VecError> {
        if update {
            self.update_vocab(sentences)
        } else {
            self.init_vocab(sentences)
        }
    }

    fn init_vocab<S: SentenceStream + ?Sized>(
        &mut self,
        sentences: &S,
    ) -> Result<(), Sent2VecError> {
        info!("creating dictionary...");
        let cfg = &self.config;
        let mut dict = Dictionary::new(
            cfg.t,
            cfg.bucket,
            cfg.minn,
            cfg.maxn,
            cfg.max_vocab_size,
            cfg.max_line_size,
        );
        dict.read(sentences, cfg.min_count)?;
        info!(
            "dictionary created, dictionary size: {}, tokens read: {}",
            dict.size(),
            dict.ntokens()
        );

        let d = cfg.vector_size;
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let wi = alloc_matrix(dict.size() + cfg.bucket, d);
        random_init(&wi, d, &mut rng);
        self.wi = wi;
        self.wo = alloc_matrix(dict.size(), d);

        self.negatives = build_negative_table(&dict.counts(), &mut rng);
        self.negpos = AtomicUsize::new(0);
        self.dict = Some(dict);
        Ok(())
    }

    fn update_vocab<S: SentenceStream + ?Sized>(
        &mut self,
        sentences: &S,
    ) -> Result<(), Sent2VecError> {
        let min_count = self.config.min_count;
        let (old_size, new_size, old_counts, counts) = {
            let dict = match self.dict.as_mut() {
                Some(d) if !d.is_empty() => d,
                _ => {
                    return Err(Sent2VecError::VocabularyNotBuilt(
                        "build_vocab with update=true",
                    ))
                }
            };
            let old_size = dict.size();
            let old_counts = dict.counts();
            dict.read(sentences, min_count)?;
            (old_size, dict.size(), old_counts, dict.counts())
        };
        info!(
            "vocabulary updated: {} words ({} new)",
            new_size,
            new_size - old_size
        );

        let d = self.config.vector_size;
        let bucket = self.config.bucket;
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        // The n-gram bucket region sits above the word rows and shifts up as
        // `size` grows; its trained rows are relocated, and the fresh rows go
        // in between, one per new word id.
        let wi = alloc_matrix(new_size + bucket, d);
        copy_rows(&wi[..old_size * d], &self.wi[..old_size * d]);
        random_init(&wi[old_size * d..new_size * d], d, &mut rng);
        copy_rows(
            &wi[new_size * d..(new_size + bucket) * d],
            &self.wi[old_size * d..(old_size + bucket) * d],
        );
        self.wi = wi;

        // New output rows start at zero, like the initial allocation.
        let wo = alloc_matrix(new_size, d);
        copy_rows(&wo[..old_size * d], &self.wo[..old_size * d]);
        self.wo = wo;

        extend_negative_table(&mut self.negatives, &counts, &old_counts, &mut rng);
        Ok(())
    }

    /// Draws a negative sample different from `target`, advancing the shared
    /// cursor. The cursor races across workers by design.
    pub(crate) fn get_negative(&self, target: usize) -> usize {
        loop {
            let pos = self.negpos.load(Ordering::Relaxed);
            self.negpos
                .store((pos + 1) % self.negatives.len(), Ordering::Relaxed);
            let negative = self.negatives[pos] as usize;
            if negative != target {
                return negative;
            }
        }
    }

    pub(crate) fn wi_row(&self, id: usize) -> &[Real] {
        let d = self.config.vector_size;
        &self.wi[id * d..][..d]
    }

    pub(crate) fn wo_row(&self, id: usize) -> &[Real] {
        let d = self.config.vector_size;
        &self.wo[id * d..][..d]
    }

    /// The input-embedding row for a word or n-gram id.
    pub fn input_vector(&self, id: usize) -> Vec<f32> {
        self.wi_row(id).iter().map(Real::get).collect()
    }

    /// One negative-sampling SGD step: `hidden` is the mean of the input
    /// rows; the true target and `neg` sampled negatives each update `wo`
    /// immediately, and the averaged gradient is then added to every input
    /// row of `wi`. Returns the summed loss.
    pub(crate) fn step(
        &self,
        input: &[usize],
        target: usize,
        lr: f32,
        hidden: &mut [f32],
        grad: &mut [f32],
    ) -> f64 {
        if input.is_empty() {
            return 0.0;
        }
        let d = self.config.vector_size;
        hidden.fill(0.0);
        for &id in input {
            let row = self.wi_row(id);
            for c in 0..d {
                hidden[c] += row[c].get();
            }
        }
        let inv = 1.0 / input.len() as f32;
        for h in hidden.iter_mut() {
            *h *= inv;
        }

        grad.fill(0.0);
        let mut loss = 0.0;
        for i in 0..=self.config.neg {
            if i == 0 {
                loss += self.binary_logistic(target, true, lr, hidden, grad);
            } else {
                loss += self.binary_logistic(self.get_negative(target), false, lr, hidden, grad);
            }
        }

        for g in grad.iter_mut() {
            *g *= inv;
        }
        for &id in input {
            let row = self.wi_row(id);
            for c in 0..d {
                row[c].add(grad[c]);
            }
        }
        loss
    }

    /// One binary logistic-regression update against `wo[target]`. The
    /// gradient accumulator reads the row before the row itself is updated.
    fn binary_logistic(
        &self,
        target: usize,
        label: bool,
        lr: f32,
        hidden: &[f32],
        grad: &mut [f32],
    ) -> f64 {
        let d = self.config.vector_size;
        let row = self.wo_row(target);
        let f: f32 = (0..d).map(|c| row[c].get() * hidden[c]).sum();
        let score = sigmoid(f);
        let alpha = lr * (label as u8 as f32 - score);
        for c in 0..d {
            grad[c] += row[c].get() * alpha;
        }
        for c in 0..d {
            row[c].add(hidden[c] * alpha);
        }
        if label {
            -(score as f64).ln()
        } else {
            -(1.0 - score as f64).ln()
        }
    }

    /// Composes a sentence vector: resolved words plus their word n-grams,
    /// averaged over the input rows. An unresolvable sentence yields the
    /// zero vector.
    pub fn sentence_vector(&self, sentence: &[String]) -> Result<Vec<f32>, Sent2VecError> {
        let dict = self
            .dict
            .as_ref()
            .ok_or(Sent2VecError::VocabularyNotBuilt("sentence_vector"))?;
        let d = self.config.vector_size;
        let (_ntokens, words) = dict.get_line(sentence);
        let line = dict.add_ngrams(&words, self.config.word_ngrams);
        let mut vec = vec![0.0f32; d];
        for &id in &line {
            let row = self.wi_row(id);
            for c in 0..d {
                vec[c] += row[c].get();
            }
        }
        if !line.is_empty() {
            let inv = 1.0 / line.len() as f32;
            for v in vec.iter_mut() {
                *v *= inv;
            }
        }
        Ok(vec)
    }

    /// Cosine similarity of two sentence vectors. A zero vector is left
    /// unnormalized, so comparing against it yields 0.
    pub fn similarity(&self, sent1: &[String], sent2: &[String]) -> Result<f32, Sent2VecError> {
        let mut a = self.sentence_vector(sent1)?;
        let mut b = self.sentence_vector(sent2)?;
        unitvec(&mut a);
        unitvec(&mut b);
        Ok(dot(&a, &b))
    }
}

fn unitvec(v: &mut [f32]) {
    let len = norm(v);
    if len > 0.0 {
        for e in v.iter_mut() {
            *e /= len;
        }
    }
}

/// Uniform init in `[-1/d, -1/d + 1)`. The range is deliberately asymmetric.
fn random_init(cells: &[Real], d: usize, rng: &mut StdRng) {
    let low = -1.0 / d as f32;
    for cell in cells {
        cell.set(low + rng.gen::<f32>());
    }
}

fn copy_rows(dst: &[Real], src: &[Real]) {
    for (d, s) in dst.iter().zip(src.iter()) {
        d.set(s.get());
    }
}

/// Builds the negative-sampling table: `floor(sqrt(count) * N / Z) + 1`
/// copies of each id in id order, then a seeded shuffle.
fn build_negative_table(counts: &[u64], rng: &mut StdRng) -> Vec<u32> {
    let z: f64 = counts.iter().map(|&c| (c as f64).sqrt()).sum();
    let mut negatives = Vec::with_capacity(NEGATIVE_TABLE_SIZE + counts.len());
    for (i, &count) in counts.iter().enumerate() {
        let c = (count as f64).sqrt();
        let copies = (c * NEGATIVE_TABLE_SIZE as f64 / z) as usize + 1;
        negatives.extend(std::iter::repeat(i as u32).take(copies));
    }
    negatives.shuffle(rng);
    negatives
}

/// Online-update variant: keeps the existing table, appends allocations for
/// every id that is new or whose count changed (weights normalized over the
/// merged counts), and reshuffles the combined array. Untouched ids keep
/// exactly their old copies.
fn extend_negative_table(
    negatives: &mut Vec<u32>,
    counts: &[u64],
    old_counts: &[u64],
    rng: &mut StdRng,
) {
    let z: f64 = counts.iter().map(|&c| (c as f64).sqrt()).sum();
    for (i, &count) in counts.iter().enumerate() {
        if i < old_counts.len() && count == old_counts[i] {
            continue;
        }
        let c = (count as f64).sqrt();
        let copies = (c * NEGATIVE_TABLE_SIZE as f64 / z) as usize + 1;
        negatives.extend(std::iter::repeat(i as u32).take(copies));
    }
    negatives.shuffle(rng);
}
