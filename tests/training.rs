//! End-to-end tests: build a vocabulary, train, and query on a toy corpus.

use sent2vec::{FileCorpus, Sent2Vec, Sent2VecConfig, SentenceStream};

fn toy_corpus() -> Vec<Vec<String>> {
    let raw: &[&[&str]] = &[
        &["the", "cat", "sat", "on", "the", "mat"],
        &["the", "dog", "sat", "on", "the", "rug"],
        &["a", "cat", "chased", "a", "mouse"],
        &["a", "dog", "chased", "a", "cat"],
        &["the", "mouse", "ran", "away"],
        &["cats", "and", "dogs", "are", "pets"],
    ];
    raw.iter()
        .map(|s| s.iter().map(|w| w.to_string()).collect())
        .collect()
}

fn toy_config() -> Sent2VecConfig {
    Sent2VecConfig {
        vector_size: 16,
        min_count: 1,
        bucket: 1000,
        neg: 5,
        workers: 2,
        epochs: 3,
        batch_words: 12,
        t: 1.0, // keep every token on a corpus this small
        seed: 7,
        max_vocab_size: 1000,
        ..Default::default()
    }
}

#[test]
fn build_train_and_query() {
    let corpus = toy_corpus();
    let mut model = Sent2Vec::new(toy_config());
    model.build_vocab(&corpus, false).unwrap();

    let dict = model.dictionary().unwrap();
    let ntokens = dict.ntokens();
    assert!(dict.size() > 0);

    let trained = model.train(&corpus, 2, 1.0).unwrap();
    assert!(trained > 0);
    assert!(trained <= ntokens * 3);
    assert_eq!(model.train_count(), 1);

    let sentence: Vec<String> = vec!["the".into(), "cat".into(), "sat".into()];
    let vec = model.sentence_vector(&sentence).unwrap();
    assert_eq!(vec.len(), 16);
    assert!(vec.iter().any(|&v| v != 0.0));

    let sim = model.similarity(&sentence, &sentence).unwrap();
    assert!((sim - 1.0).abs() < 1e-6);

    let other: Vec<String> = vec!["a".into(), "mouse".into(), "ran".into()];
    let sim = model.similarity(&sentence, &other).unwrap();
    assert!(sim >= -1.0 - 1e-6 && sim <= 1.0 + 1e-6);
}

#[test]
fn unknown_sentence_is_the_zero_vector() {
    let corpus = toy_corpus();
    let mut model = Sent2Vec::new(toy_config());
    model.build_vocab(&corpus, false).unwrap();
    model.train(&corpus, 2, 1.0).unwrap();

    let vec = model
        .sentence_vector(&["zebra".to_string(), "quagga".to_string()])
        .unwrap();
    assert_eq!(vec, vec![0.0f32; 16]);
}

#[test]
fn online_update_extends_a_trained_model() {
    let corpus = toy_corpus();
    let mut model = Sent2Vec::new(toy_config());
    model.build_vocab(&corpus, false).unwrap();
    model.train(&corpus, 2, 1.0).unwrap();
    let old_size = model.dictionary().unwrap().size();

    let fresh: Vec<Vec<String>> = vec![
        vec!["birds".into(), "sing".into(), "songs".into()],
        vec!["birds".into(), "fly".into(), "south".into()],
    ];
    model.build_vocab(&fresh, true).unwrap();
    assert!(model.dictionary().unwrap().size() > old_size);

    let trained = model.train(&fresh, 2, 1.0).unwrap();
    assert!(trained > 0);
    assert_eq!(model.train_count(), 2);

    // New words resolve and embed after the update.
    let vec = model
        .sentence_vector(&["birds".to_string(), "sing".to_string()])
        .unwrap();
    assert!(vec.iter().any(|&v| v != 0.0));
    // Old words still resolve too.
    let vec = model.sentence_vector(&["cat".to_string()]).unwrap();
    assert!(vec.iter().any(|&v| v != 0.0));
}

#[test]
fn file_corpus_feeds_the_full_pipeline() {
    use std::io::Write;

    let path = std::env::temp_dir().join(format!("sent2vec-e2e-{}.txt", std::process::id()));
    let mut f = std::fs::File::create(&path).unwrap();
    for sentence in toy_corpus() {
        writeln!(f, "{}", sentence.join(" ")).unwrap();
    }
    drop(f);

    let corpus = FileCorpus::open(&path).unwrap();
    // The stream restarts: build_vocab consumes one pass, training three.
    let mut model = Sent2Vec::new(toy_config());
    model.build_vocab(&corpus, false).unwrap();
    let ntokens = model.dictionary().unwrap().ntokens();
    assert_eq!(ntokens, corpus.sentences().map(|s| s.len() as u64).sum());

    let trained = model.train(&corpus, 2, 1.0).unwrap();
    assert!(trained > 0);
    std::fs::remove_file(&path).unwrap();
}
