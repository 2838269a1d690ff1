//! Sentence sources for vocabulary building and training.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

/// A restartable stream of tokenized sentences.
///
/// Multi-epoch training walks the corpus once per epoch, and `train` is
/// called after `build_vocab` has already consumed it once, so every
/// implementor must produce a fresh iterator on each `sentences` call.
/// A single-pass generator cannot satisfy this contract; the distinction is
/// enforced by the trait rather than checked at run time.
pub trait SentenceStream {
    fn sentences(&self) -> Box<dyn Iterator<Item = Vec<String>> + '_>;
}

impl SentenceStream for Vec<Vec<String>> {
    fn sentences(&self) -> Box<dyn Iterator<Item = Vec<String>> + '_> {
        Box::new(self.iter().cloned())
    }
}

impl SentenceStream for [Vec<String>] {
    fn sentences(&self) -> Box<dyn Iterator<Item = Vec<String>> + '_> {
        Box::new(self.iter().cloned())
    }
}

/// A text corpus with one sentence per line, whitespace tokenized.
///
/// The file is reopened on every pass, which makes the stream restartable.
/// Blank lines are skipped.
pub struct FileCorpus {
    path: PathBuf,
}

impl FileCorpus {
    /// Checks that `path` is readable and builds a corpus over it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        File::open(&path).with_context(|| format!("error opening corpus file {path:?}"))?;
        Ok(FileCorpus { path })
    }
}

impl SentenceStream for FileCorpus {
    fn sentences(&self) -> Box<dyn Iterator<Item = Vec<String>> + '_> {
        let lines = match File::open(&self.path) {
            Ok(f) => Some(BufReader::new(f).lines()),
            Err(err) => {
                warn!("error reopening corpus file {:?}: {err}", self.path);
                None
            }
        };
        Box::new(FileSentences { lines })
    }
}

struct FileSentences {
    lines: Option<Lines<BufReader<File>>>,
}

impl Iterator for FileSentences {
    type Item = Vec<String>;

    fn next(&mut self) -> Option<Vec<String>> {
        loop {
            match self.lines.as_mut()?.next() {
                None => return None,
                Some(Err(err)) => {
                    // An I/O error mid-stream ends the pass.
                    warn!("error reading corpus: {err}");
                    self.lines = None;
                    return None;
                }
                Some(Ok(line)) => {
                    let sentence: Vec<String> =
                        line.split_whitespace().map(str::to_string).collect();
                    if !sentence.is_empty() {
                        return Some(sentence);
                    }
                }
            }
        }
    }
}
