//! Training pipeline: a producer thread batches sentences into jobs, a
//! fixed pool of workers runs unsynchronized SGD over the shared matrices,
//! and the calling thread aggregates progress reports.
//!
//! Coordination is two bounded queues (jobs and progress) with blocking
//! backpressure; shutdown is one `None` sentinel per worker, sent after the
//! producer exhausts the corpus.

use std::thread;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::corpus::SentenceStream;
use crate::model::Sent2Vec;
use crate::Sent2VecError;

/// An immutable batch of sentences plus the learning rate in effect when it
/// was sealed.
struct Job {
    sentences: Vec<Vec<String>>,
    lr: f32,
}

/// Per-job training tallies.
#[derive(Default)]
struct Progress {
    raw_words: u64,
    trained_words: u64,
    examples: u64,
    loss: f64,
}

struct ProducerParams {
    start_lr: f32,
    end_lr: f32,
    total_words: u64,
    batch_words: usize,
    epochs: usize,
    workers: usize,
    first_train: bool,
}

/// Walks the corpus once per epoch, sealing greedy word-count batches into
/// jobs. The learning rate decays once per sealed job, driven by the number
/// of words pushed so far. Ends with one sentinel per worker.
fn produce_jobs<S: SentenceStream + Sync + ?Sized>(
    sentences: &S,
    params: &ProducerParams,
    job_tx: &Sender<Option<Job>>,
) -> usize {
    let mut job_batch: Vec<Vec<String>> = Vec::new();
    let mut batch_size = 0usize;
    let mut pushed_words = 0u64;
    let mut next_lr = params.start_lr;
    let mut job_no = 0usize;

    'producing: for _ in 0..params.epochs {
        for sentence in sentences.sentences() {
            let sentence_length = sentence.len();
            // Does this sentence still fit the current batch?
            if batch_size + sentence_length <= params.batch_words {
                job_batch.push(sentence);
                batch_size += sentence_length;
                continue;
            }
            if !job_batch.is_empty() {
                debug!(
                    "queueing job #{job_no} ({batch_size} words, {} sentences) at lr {next_lr:.5}",
                    job_batch.len()
                );
                let job = Job {
                    sentences: std::mem::take(&mut job_batch),
                    lr: next_lr,
                };
                job_no += 1;
                if job_tx.send(Some(job)).is_err() {
                    break 'producing;
                }
                if params.end_lr < next_lr {
                    pushed_words += batch_size as u64;
                    let progress = pushed_words as f64 / params.total_words as f64;
                    next_lr = (params.start_lr
                        - (params.start_lr - params.end_lr) * progress as f32)
                        .max(params.end_lr);
                }
            }
            // The sentence that didn't fit opens the next batch, even when
            // it alone exceeds batch_words.
            job_batch = vec![sentence];
            batch_size = sentence_length;
        }
    }

    // The final partial batch still becomes a job.
    if !job_batch.is_empty() {
        debug!(
            "queueing job #{job_no} ({batch_size} words, {} sentences) at lr {next_lr:.5}",
            job_batch.len()
        );
        job_no += 1;
        let _ = job_tx.send(Some(Job {
            sentences: job_batch,
            lr: next_lr,
        }));
    }

    if job_no == 0 && params.first_train {
        warn!("train() called with an empty iterator; the corpus must offer restartable iteration");
    }

    for _ in 0..params.workers {
        if job_tx.send(None).is_err() {
            break;
        }
    }
    debug!("job loop exiting, total {job_no} jobs");
    job_no
}

impl Sent2Vec {
    /// Pulls jobs until the shutdown sentinel, training every sentence and
    /// pushing one progress report per job (and one completion marker on
    /// exit).
    fn worker_loop(
        &self,
        jobs: &Receiver<Option<Job>>,
        progress: &Sender<Option<Progress>>,
        rng: &mut StdRng,
    ) {
        let Some(dict) = self.dict.as_ref() else {
            let _ = progress.send(None);
            return;
        };
        let d = self.config.vector_size;
        let mut hidden = vec![0.0f32; d];
        let mut grad = vec![0.0f32; d];
        let mut jobs_processed = 0usize;

        while let Ok(job) = jobs.recv() {
            let Some(job) = job else {
                let _ = progress.send(None);
                break;
            };
            let mut report = Progress::default();
            for sentence in &job.sentences {
                report.raw_words += sentence.len() as u64;
                let (ntokens, words) = dict.get_line(sentence);
                report.trained_words += ntokens as u64;
                if words.len() <= 1 {
                    continue;
                }
                for i in 0..words.len() {
                    // Frequent words are stochastically skipped; rare words
                    // have discard scores above 1 and always pass.
                    if rng.gen::<f64>() > dict.pdiscard()[words[i]] {
                        continue;
                    }
                    report.examples += 1;
                    let mut context = words.clone();
                    context[i] = 0; // the "no word" id
                    let input = dict.add_ngrams_train(
                        &context,
                        self.config.word_ngrams,
                        self.config.dropout_k,
                        rng,
                    );
                    report.loss += self.step(&input, words[i], job.lr, &mut hidden, &mut grad);
                }
            }
            jobs_processed += 1;
            if progress.send(Some(report)).is_err() {
                break;
            }
        }
        debug!("worker exiting, processed {jobs_processed} jobs");
    }

    /// Trains the model over `epochs` passes of the corpus.
    ///
    /// The job queue holds `queue_factor * workers` batches, the progress
    /// queue one more batch per worker; both block when full. Progress is
    /// logged at most once per `report_delay` seconds. Returns the number of
    /// trained (in-vocabulary) words.
    pub fn train<S: SentenceStream + Sync + ?Sized>(
        &mut self,
        sentences: &S,
        queue_factor: usize,
        report_delay: f64,
    ) -> Result<u64, Sent2VecError> {
        let (size, ntokens) = match self.dict.as_ref() {
            Some(d) if !d.is_empty() => (d.size(), d.ntokens()),
            _ => return Err(Sent2VecError::VocabularyNotBuilt("train")),
        };
        let workers = self.config.workers.max(1);
        info!(
            "training model with {workers} workers on {size} vocabulary and {} features",
            self.config.vector_size
        );

        let start_lr = self.config.lr;
        let end_lr = self.config.min_lr;
        if start_lr > self.min_lr_yet_reached {
            warn!("effective learning rate higher than previous training cycles");
        }
        self.min_lr_yet_reached = start_lr;

        let epochs = self.config.epochs.max(1);
        let total_words = ntokens * epochs as u64;
        let params = ProducerParams {
            start_lr,
            end_lr,
            total_words,
            batch_words: self.config.batch_words,
            epochs,
            workers,
            first_train: self.train_count == 0,
        };

        let (job_tx, job_rx) = bounded::<Option<Job>>(queue_factor * workers);
        let (progress_tx, progress_rx) = bounded::<Option<Progress>>((queue_factor + 1) * workers);

        let mut trained_word_count = 0u64;
        let mut raw_word_count = 0u64;
        let mut nexamples = 0u64;
        let mut job_tally = 0usize;
        let mut loss = 0.0f64;
        let start = Instant::now();

        let model: &Sent2Vec = self;
        thread::scope(|s| {
            for w in 0..workers {
                let job_rx = job_rx.clone();
                let progress_tx = progress_tx.clone();
                let mut rng = StdRng::seed_from_u64(model.config.seed.wrapping_add(w as u64 + 1));
                s.spawn(move || model.worker_loop(&job_rx, &progress_tx, &mut rng));
            }
            s.spawn(move || produce_jobs(sentences, &params, &job_tx));

            // Only the workers may keep these endpoints alive.
            drop(job_rx);
            drop(progress_tx);

            let mut unfinished = workers;
            let mut next_report = report_delay;
            while unfinished > 0 {
                match progress_rx.recv() {
                    Err(_) => break,
                    Ok(None) => {
                        unfinished -= 1;
                        debug!("worker thread finished; awaiting finish of {unfinished} more threads");
                    }
                    Ok(Some(report)) => {
                        job_tally += 1;
                        trained_word_count += report.trained_words;
                        raw_word_count += report.raw_words;
                        nexamples += report.examples;
                        loss += report.loss;
                        let elapsed = start.elapsed().as_secs_f64();
                        if elapsed >= next_report {
                            info!(
                                "PROGRESS: at {:.2}% words, {:.0} words/s",
                                100.0 * raw_word_count as f64 / total_words as f64,
                                trained_word_count as f64 / elapsed
                            );
                            next_report = elapsed + report_delay;
                        }
                    }
                }
            }
        });

        let elapsed = start.elapsed().as_secs_f64();
        info!(
            "training on {raw_word_count} raw words ({trained_word_count} effective words, \
             {nexamples} examples) took {elapsed:.1}s, {:.0} effective words/s",
            trained_word_count as f64 / elapsed.max(1e-9)
        );
        if job_tally < 10 * workers {
            warn!("under 10 jobs per worker: consider a smaller batch_words for smoother learning-rate decay");
        }
        if total_words != raw_word_count {
            warn!(
                "supplied raw word count ({raw_word_count}) did not equal expected count \
                 ({total_words}); did the corpus change since build_vocab?"
            );
        }

        self.train_count += 1;
        self.total_train_time += elapsed;
        self.loss = loss;
        Ok(trained_word_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Sent2VecConfig;

    fn sentences(raw: &[&[&str]]) -> Vec<Vec<String>> {
        raw.iter()
            .map(|s| s.iter().map(|w| w.to_string()).collect())
            .collect()
    }

    fn tiny_config() -> Sent2VecConfig {
        Sent2VecConfig {
            vector_size: 10,
            min_count: 1,
            bucket: 100,
            neg: 3,
            workers: 1,
            epochs: 1,
            t: 1.0, // keep every token so the workers actually train
            max_vocab_size: 1000,
            ..Default::default()
        }
    }

    #[test]
    fn train_before_build_vocab_fails() {
        let mut model = Sent2Vec::new(tiny_config());
        let corpus = sentences(&[&["a", "b"]]);
        let err = model.train(&corpus, 2, 1.0).unwrap_err();
        assert!(matches!(err, Sent2VecError::VocabularyNotBuilt(_)));
    }

    #[test]
    fn producer_seals_one_job_when_batch_words_exceeds_corpus() {
        let corpus = sentences(&[&["a", "b", "c"], &["d", "e"]]);
        let params = ProducerParams {
            start_lr: 0.2,
            end_lr: 0.001,
            total_words: 5,
            batch_words: 10_000,
            epochs: 1,
            workers: 1,
            first_train: true,
        };
        let (job_tx, job_rx) = bounded(8);
        let job_no = produce_jobs(&corpus, &params, &job_tx);
        drop(job_tx);

        assert_eq!(job_no, 1);
        let job = job_rx.recv().unwrap().unwrap();
        assert_eq!(job.sentences.len(), 2);
        assert_eq!(job.lr, 0.2);
        // One sentinel per worker, then the channel is empty.
        assert!(job_rx.recv().unwrap().is_none());
        assert!(job_rx.recv().is_err());
    }

    #[test]
    fn producer_decays_lr_per_sealed_job() {
        let corpus = sentences(&[&["a", "b", "c"], &["d", "e", "f"], &["g", "h", "i"]]);
        let params = ProducerParams {
            start_lr: 0.2,
            end_lr: 0.001,
            total_words: 9,
            batch_words: 4,
            epochs: 1,
            workers: 2,
            first_train: true,
        };
        let (job_tx, job_rx) = bounded(16);
        let job_no = produce_jobs(&corpus, &params, &job_tx);
        drop(job_tx);

        assert_eq!(job_no, 3);
        let mut lrs = Vec::new();
        let mut sentinels = 0;
        while let Ok(msg) = job_rx.recv() {
            match msg {
                Some(job) => {
                    assert_eq!(job.sentences.len(), 1);
                    lrs.push(job.lr);
                }
                None => sentinels += 1,
            }
        }
        assert_eq!(sentinels, 2);
        assert_eq!(lrs[0], 0.2);
        assert!(lrs[1] < lrs[0]);
        assert!(lrs[2] < lrs[1]);
        assert!(lrs[2] >= 0.001);
    }

    #[test]
    fn oversized_sentence_forms_its_own_job() {
        let corpus = sentences(&[&["a", "b", "c", "d", "e"], &["f", "g"]]);
        let params = ProducerParams {
            start_lr: 0.2,
            end_lr: 0.001,
            total_words: 7,
            batch_words: 3,
            epochs: 1,
            workers: 1,
            first_train: true,
        };
        let (job_tx, job_rx) = bounded(8);
        let job_no = produce_jobs(&corpus, &params, &job_tx);
        drop(job_tx);
        assert_eq!(job_no, 2);
        let first = job_rx.recv().unwrap().unwrap();
        assert_eq!(first.sentences[0].len(), 5);
    }

    #[test]
    fn worker_emits_one_report_per_job_and_a_completion_marker() {
        let corpus = sentences(&[&["a", "b", "a", "b", "c"]]);
        let mut model = Sent2Vec::new(tiny_config());
        model.build_vocab(&corpus, false).unwrap();

        let (job_tx, job_rx) = bounded(4);
        let (progress_tx, progress_rx) = bounded(4);
        job_tx
            .send(Some(Job {
                sentences: corpus.clone(),
                lr: 0.2,
            }))
            .unwrap();
        job_tx.send(None).unwrap();

        let mut rng = StdRng::seed_from_u64(42);
        model.worker_loop(&job_rx, &progress_tx, &mut rng);

        let report = progress_rx.recv().unwrap().expect("expected a data report");
        assert_eq!(report.raw_words, 5);
        assert_eq!(report.trained_words, 5);
        assert!(report.examples > 0);
        assert!(report.loss.is_finite());
        assert!(progress_rx.recv().unwrap().is_none());
        assert!(progress_rx.try_recv().is_err());
    }

    #[test]
    fn single_worker_scenario_trains_all_tokens() {
        let corpus = sentences(&[&["a", "b", "a", "b", "c"]]);
        let mut model = Sent2Vec::new(tiny_config());
        model.build_vocab(&corpus, false).unwrap();
        let ntokens = model.dictionary().unwrap().ntokens();

        let trained = model.train(&corpus, 2, 1.0).unwrap();
        assert!(trained > 0);
        assert!(trained <= ntokens);
        assert_eq!(model.train_count(), 1);
        assert!(model.last_loss().is_finite());
    }

    #[test]
    fn multi_worker_multi_epoch_training_runs_to_completion() {
        let corpus = sentences(&[
            &["the", "quick", "brown", "fox"],
            &["jumps", "over", "the", "lazy", "dog"],
            &["the", "dog", "sleeps"],
        ]);
        let mut model = Sent2Vec::new(Sent2VecConfig {
            workers: 3,
            epochs: 4,
            batch_words: 5,
            ..tiny_config()
        });
        model.build_vocab(&corpus, false).unwrap();
        let ntokens = model.dictionary().unwrap().ntokens();

        let trained = model.train(&corpus, 2, 1.0).unwrap();
        assert_eq!(trained, ntokens * 4);
        assert_eq!(model.train_count(), 1);

        // A second call keeps accumulating the invocation counters.
        model.train(&corpus, 2, 1.0).unwrap();
        assert_eq!(model.train_count(), 2);
        assert!(model.total_train_time() > 0.0);
    }
}
