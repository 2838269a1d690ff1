use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sent2vec::{FileCorpus, Sent2Vec, Sent2VecConfig};

#[derive(Parser)]
#[command(about = "SENTENCE VECTOR estimation toolkit", long_about = None, version = "0.1")]
struct Options {
    /// Use text data from FILE to train the model; one sentence per line,
    /// whitespace tokenized
    #[arg(long = "train", value_name = "FILE")]
    train_file: PathBuf,

    /// Save the trained model to FILE
    #[arg(long = "output", value_name = "FILE")]
    output_file: Option<PathBuf>,

    /// Save the word vectors in word2vec format to FILE
    #[arg(long = "save-vectors", value_name = "FILE")]
    save_vectors_file: Option<PathBuf>,

    /// Save the word vectors in binary mode
    #[arg(long)]
    binary: bool,

    /// Set size of sentence vectors; default is 100
    #[arg(long = "size", default_value_t = 100)]
    vector_size: usize,

    /// Set the starting learning rate
    #[arg(long, default_value_t = 0.2)]
    lr: f32,

    /// Set the learning-rate floor
    #[arg(long = "min-lr", default_value_t = 0.001)]
    min_lr: f32,

    /// Run more training iterations
    #[arg(long, default_value_t = 5)]
    epochs: usize,

    /// Discard words that appear less than N times
    #[arg(long = "min-count", value_name = "N", default_value_t = 5)]
    min_count: u64,

    /// Number of negative examples per positive; common values are 5 - 20
    #[arg(long = "negative", default_value_t = 10)]
    neg: usize,

    /// Max length of word ngrams
    #[arg(long = "word-ngrams", default_value_t = 2)]
    word_ngrams: usize,

    /// Number of hash buckets for ngrams
    #[arg(long, default_value_t = 2_000_000)]
    bucket: usize,

    /// Set threshold for occurrence of words. Those that appear with higher
    /// frequency in the training data will be randomly down-sampled
    #[arg(long = "sample", default_value_t = 1e-4)]
    sample: f64,

    /// Min length of char ngrams
    #[arg(long, default_value_t = 3)]
    minn: usize,

    /// Max length of char ngrams
    #[arg(long, default_value_t = 6)]
    maxn: usize,

    /// Number of context positions dropped per training example
    #[arg(long = "dropout-k", default_value_t = 2)]
    dropout_k: usize,

    /// Seed for the random number generator
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Target size (in words) for batches passed to worker threads
    #[arg(long = "batch-words", default_value_t = 10_000)]
    batch_words: usize,

    /// Use N threads
    #[arg(long = "threads", value_name = "N", default_value_t = 3)]
    workers: usize,

    /// Limit RAM during vocabulary building; infrequent words are pruned
    /// once occupancy passes 75% of this many slots
    #[arg(long = "max-vocab-size", default_value_t = 30_000_000)]
    max_vocab_size: usize,
}

fn run(options: Options) -> Result<()> {
    let corpus = FileCorpus::open(&options.train_file)?;
    let config = Sent2VecConfig {
        vector_size: options.vector_size,
        lr: options.lr,
        min_lr: options.min_lr,
        epochs: options.epochs,
        min_count: options.min_count,
        neg: options.neg,
        word_ngrams: options.word_ngrams,
        bucket: options.bucket,
        t: options.sample,
        minn: options.minn,
        maxn: options.maxn,
        dropout_k: options.dropout_k,
        seed: options.seed,
        batch_words: options.batch_words,
        workers: options.workers,
        max_vocab_size: options.max_vocab_size,
        ..Default::default()
    };

    let mut model = Sent2Vec::new(config);
    model.build_vocab(&corpus, false)?;
    model.train(&corpus, 2, 1.0)?;

    if let Some(path) = &options.output_file {
        model.save(path)?;
    }
    if let Some(path) = &options.save_vectors_file {
        model.save_word_vectors(path, options.binary)?;
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = Options::parse();
    if let Err(err) = run(options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
