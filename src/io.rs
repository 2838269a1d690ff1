//! Model persistence and vector export.
//!
//! `save`/`load` snapshot the whole model with bincode, so a loaded model
//! can keep training or answer queries. `save_word_vectors` writes the
//! word rows in the word2vec text/binary format.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::AtomicUsize;

use aligned_box::AlignedBox;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dictionary::Dictionary;
use crate::model::{alloc_cells, Real, Sent2Vec, Sent2VecConfig};
use crate::Sent2VecError;

#[derive(Serialize, Deserialize)]
struct ModelDisk {
    config: Sent2VecConfig,
    dict: Option<Dictionary>,
    wi: Vec<f32>,
    wo: Vec<f32>,
    negatives: Vec<u32>,
    negpos: usize,
    min_lr_yet_reached: f32,
    train_count: usize,
    total_train_time: f64,
}

fn cells_from(values: &[f32]) -> AlignedBox<[Real]> {
    let cells = alloc_cells(values.len());
    for (cell, &v) in cells.iter().zip(values.iter()) {
        cell.set(v);
    }
    cells
}

impl Sent2Vec {
    /// Writes the full model (dictionary, matrices, negative table,
    /// counters) to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let snapshot = ModelDisk {
            config: self.config.clone(),
            dict: self.dict.clone(),
            wi: self.wi.iter().map(Real::get).collect(),
            wo: self.wo.iter().map(Real::get).collect(),
            negatives: self.negatives.clone(),
            negpos: self.negpos.load(std::sync::atomic::Ordering::Relaxed),
            min_lr_yet_reached: self.min_lr_yet_reached,
            train_count: self.train_count,
            total_train_time: self.total_train_time,
        };
        let fo = BufWriter::new(
            File::create(path.as_ref()).context("error creating model file for write")?,
        );
        bincode::serialize_into(fo, &snapshot).context("error writing model file")?;
        Ok(())
    }

    /// Restores a model saved with [`save`]. The loaded model can continue
    /// training.
    ///
    /// [`save`]: Sent2Vec::save
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let fi = BufReader::new(File::open(path.as_ref()).context("error opening model file")?);
        let disk: ModelDisk = bincode::deserialize_from(fi).context("error reading model file")?;
        let mut dict = disk.dict;
        if let Some(d) = dict.as_mut() {
            // The slot and discard tables are derived state, left out of the
            // snapshot.
            d.rebuild_tables();
        }
        Ok(Sent2Vec {
            config: disk.config,
            dict,
            wi: cells_from(&disk.wi),
            wo: cells_from(&disk.wo),
            negatives: disk.negatives,
            negpos: AtomicUsize::new(disk.negpos),
            min_lr_yet_reached: disk.min_lr_yet_reached,
            train_count: disk.train_count,
            total_train_time: disk.total_train_time,
            loss: 0.0,
        })
    }

    /// Saves the word vectors (the word rows of the input matrix) in the
    /// word2vec format: a `"{words} {size}"` header, then one row per word.
    pub fn save_word_vectors(&self, path: impl AsRef<Path>, binary: bool) -> Result<()> {
        let dict = self
            .dict
            .as_ref()
            .ok_or(Sent2VecError::VocabularyNotBuilt("save_word_vectors"))?;
        let mut fo = BufWriter::new(
            File::create(path.as_ref()).context("error creating output file")?,
        );
        writeln!(fo, "{} {}", dict.size(), self.config.vector_size)
            .context("error writing output file")?;
        for (id, entry) in dict.words().iter().enumerate() {
            write!(fo, "{} ", entry.word).context("error writing output file")?;
            let row = self.input_vector(id);
            if binary {
                fo.write_all(bytemuck::cast_slice::<f32, u8>(&row))
                    .context("error writing output file")?;
            } else {
                for f in &row {
                    write!(fo, "{f} ").context("error writing output file")?;
                }
                writeln!(fo).context("error writing output file")?;
            }
        }
        Ok(())
    }
}
