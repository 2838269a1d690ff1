//! Hashing vocabulary: words, character n-grams, and word n-grams.
//!
//! Words live in an open-addressed, linear-probed slot table of fixed
//! capacity `max_vocab_size`. Retained words get dense ids `0..size`;
//! hashed n-grams occupy the disjoint id range `size..size + bucket`.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::corpus::SentenceStream;
use crate::Sent2VecError;

/// Marks a free slot in the open-addressed table.
const FREE_SLOT: u32 = u32::MAX;

/// One retained vocabulary word.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entry {
    pub word: String,
    pub count: u64,
    /// The word's own id followed by its hashed char n-gram ids.
    pub subwords: Vec<usize>,
}

/// The sent2vec vocabulary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dictionary {
    max_vocab_size: usize,
    max_line_size: usize,
    words: Vec<Entry>,
    // Derived from `words`; not serialized. See `rebuild_tables`.
    #[serde(skip)]
    word2int: Vec<u32>,
    #[serde(skip)]
    pdiscard: Vec<f64>,
    ntokens: u64,
    size: usize,
    t: f64,
    bucket: usize,
    minn: usize,
    maxn: usize,
}

impl Dictionary {
    pub fn new(
        t: f64,
        bucket: usize,
        minn: usize,
        maxn: usize,
        max_vocab_size: usize,
        max_line_size: usize,
    ) -> Self {
        Dictionary {
            max_vocab_size,
            max_line_size,
            words: Vec::new(),
            word2int: vec![FREE_SLOT; max_vocab_size],
            pdiscard: Vec::new(),
            ntokens: 0,
            size: 0,
            t,
            bucket,
            minn,
            maxn,
        }
    }

    /// 32-bit FNV-1a over the word's Unicode scalar values.
    pub fn hash(word: &str) -> u32 {
        let mut h: u32 = 2166136261;
        for ch in word.chars() {
            h ^= ch as u32;
            h = h.wrapping_mul(16777619);
        }
        h
    }

    /// Returns the slot for `word`: either the slot that holds it or the
    /// first free slot of its probe chain.
    pub fn find(&self, word: &str) -> usize {
        let mut h = Self::hash(word) as usize % self.max_vocab_size;
        while self.word2int[h] != FREE_SLOT && self.words[self.word2int[h] as usize].word != word {
            h = (h + 1) % self.max_vocab_size;
        }
        h
    }

    /// Counts one token occurrence, inserting the word if it is new.
    pub fn add(&mut self, word: &str) {
        let h = self.find(word);
        self.ntokens += 1;
        match self.word2int[h] {
            FREE_SLOT => {
                self.words.push(Entry {
                    word: word.to_string(),
                    count: 1,
                    subwords: Vec::new(),
                });
                self.word2int[h] = self.size as u32;
                self.size += 1;
            }
            id => self.words[id as usize].count += 1,
        }
    }

    /// Consumes a sentence stream, building (or extending) the vocabulary.
    ///
    /// While reading, the table is progressively pruned with an increasing
    /// threshold whenever occupancy passes 75% of capacity, bounding memory
    /// on unbounded streams. Afterwards the final `threshold(min_count)` is
    /// applied and the discard table and char n-grams are built.
    pub fn read<S: SentenceStream + ?Sized>(
        &mut self,
        sentences: &S,
        min_count: u64,
    ) -> Result<(), Sent2VecError> {
        let mut min_threshold = 1;
        for sentence in sentences.sentences() {
            for word in &sentence {
                self.add(word);
                if self.ntokens % 1_000_000 == 0 {
                    info!("read {:.2}M words", self.ntokens as f64 / 1e6);
                }
                if self.size as f64 > 0.75 * self.max_vocab_size as f64 {
                    min_threshold += 1;
                    self.threshold(min_threshold);
                }
            }
        }
        // Words occurring fewer than min_count times are dropped.
        self.threshold(min_count.saturating_sub(1));
        self.init_table_discard();
        self.init_ngrams();
        info!(
            "read {:.2}M words, {} unique words retained",
            self.ntokens as f64 / 1e6,
            self.size
        );
        if self.size == 0 {
            return Err(Sent2VecError::EmptyVocabulary);
        }
        Ok(())
    }

    /// Drops every entry with `count <= t`, preserving relative order, and
    /// rebuilds the slot table with dense ids `0..size`.
    pub fn threshold(&mut self, t: u64) {
        self.words.retain(|e| e.count > t);
        self.size = 0;
        self.word2int = vec![FREE_SLOT; self.max_vocab_size];
        for i in 0..self.words.len() {
            let h = self.find(&self.words[i].word);
            self.word2int[h] = self.size as u32;
            self.size += 1;
        }
    }

    /// Subsampling scores: a token is kept during training when a uniform
    /// draw in [0,1) is at most its score. `sqrt(t/f) + t/f` exceeds 1.0 for
    /// rare words, so those are always kept.
    fn init_table_discard(&mut self) {
        self.pdiscard.clear();
        self.pdiscard.reserve(self.size);
        for e in &self.words {
            let f = e.count as f64 / self.ntokens as f64;
            self.pdiscard.push((self.t / f).sqrt() + self.t / f);
        }
    }

    /// Builds each word's char n-grams: substrings of length `minn..=maxn`,
    /// except that a single character only counts at the start or end of the
    /// word. An interior character alone is never an n-gram.
    fn init_ngrams(&mut self) {
        let size = self.size;
        let bucket = self.bucket;
        let (minn, maxn) = (self.minn, self.maxn);
        for (i, entry) in self.words.iter_mut().enumerate() {
            entry.subwords.clear();
            entry.subwords.push(i);
            let chars: Vec<char> = entry.word.chars().collect();
            let len = chars.len();
            for j in 0..len {
                let mut ngram = String::new();
                for n in 1..=maxn.min(len - j) {
                    ngram.push(chars[j + n - 1]);
                    if n < minn {
                        continue;
                    }
                    if n == 1 && j != 0 && j + 1 != len {
                        continue;
                    }
                    let h = Self::hash(&ngram) as usize % bucket;
                    entry.subwords.push(size + h);
                }
            }
        }
    }

    /// Appends hashed word n-gram ids (spans of up to `n` consecutive ids)
    /// to a copy of `context`. Used at inference time.
    pub fn add_ngrams(&self, context: &[usize], n: usize) -> Vec<usize> {
        let mut line = context.to_vec();
        for i in 0..context.len() {
            let mut h = context[i] as u64;
            for j in (i + 1)..context.len() {
                if j >= i + n {
                    break;
                }
                h = h.wrapping_mul(116049371).wrapping_add(context[j] as u64);
                line.push(self.size + h as usize % self.bucket);
            }
        }
        line
    }

    /// The training variant of [`add_ngrams`]: up to `k` positions are first
    /// discarded at random (never leaving fewer than 2). Discarded positions
    /// neither start nor extend an n-gram but keep their base slot in the
    /// returned line.
    ///
    /// [`add_ngrams`]: Dictionary::add_ngrams
    pub fn add_ngrams_train<R: Rng>(
        &self,
        context: &[usize],
        n: usize,
        k: usize,
        rng: &mut R,
    ) -> Vec<usize> {
        let mut line = context.to_vec();
        let line_size = context.len();
        let mut discard = vec![false; line_size];
        let mut num_discarded = 0;
        while num_discarded < k && line_size - num_discarded > 2 {
            let i = rng.gen_range(0..line_size);
            if !discard[i] {
                discard[i] = true;
                num_discarded += 1;
            }
        }
        for i in 0..line_size {
            if discard[i] {
                continue;
            }
            let mut h = context[i] as u64;
            for j in (i + 1)..line_size {
                if j >= i + n || discard[j] {
                    break;
                }
                h = h.wrapping_mul(116049371).wrapping_add(context[j] as u64);
                line.push(self.size + h as usize % self.bucket);
            }
        }
        line
    }

    /// Resolves a sentence to word ids, silently dropping unknown tokens.
    /// Resolution stops once more than `max_line_size` tokens resolved.
    /// Returns the resolved count and the id list.
    pub fn get_line(&self, sentence: &[String]) -> (usize, Vec<usize>) {
        let mut words = Vec::new();
        let mut ntokens = 0;
        for word in sentence {
            let h = self.find(word);
            let wid = self.word2int[h];
            if wid == FREE_SLOT {
                continue;
            }
            ntokens += 1;
            words.push(wid as usize);
            if ntokens > self.max_line_size {
                break;
            }
        }
        (ntokens, words)
    }

    /// Number of retained words. N-gram ids start here.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Raw token count seen by `read`, across all passes.
    pub fn ntokens(&self) -> u64 {
        self.ntokens
    }

    pub fn words(&self) -> &[Entry] {
        &self.words
    }

    /// Occurrence counts in id order.
    pub fn counts(&self) -> Vec<u64> {
        self.words.iter().map(|e| e.count).collect()
    }

    pub(crate) fn pdiscard(&self) -> &[f64] {
        &self.pdiscard
    }

    /// Rebuilds the slot table and discard scores from the retained words.
    /// Both are derived state and are skipped during serialization, so this
    /// must run after deserializing.
    pub(crate) fn rebuild_tables(&mut self) {
        self.threshold(0);
        self.init_table_discard();
    }
}
