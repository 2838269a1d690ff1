//! Interactive queries against a trained model: nearest vocabulary words
//! for an entered sentence, or cosine similarity for a `left ||| right`
//! pair.

use std::cmp::Reverse;
use std::io::Write;
use std::path::PathBuf;
use std::process;

use anyhow::{anyhow, Result};
use clap::Parser;
use ordered_float::OrderedFloat;

use sent2vec::{dot, norm, normalize, Sent2Vec};

/// number of closest words that will be shown
const N: usize = 40;

#[derive(Parser)]
#[command(about = "Query a trained sent2vec model", long_about = None)]
struct Options {
    /// A model file produced by `sent2vec --output`
    #[arg(value_name = "FILE")]
    model_file: PathBuf,
}

fn tokenize(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

fn run(options: Options) -> Result<()> {
    let model = Sent2Vec::load(&options.model_file)?;
    let dict = model
        .dictionary()
        .ok_or_else(|| anyhow!("model has no vocabulary"))?;

    loop {
        print!("Enter sentence, or `left ||| right` for similarity (EXIT to break): ");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Err(err) => {
                eprintln!("error reading stdin: {err}");
                break;
            }
            Ok(0) => break,
            Ok(_) => {}
        }
        let line = line.trim();
        if line == "EXIT" {
            break;
        }

        if let Some((left, right)) = line.split_once("|||") {
            let sim = model.similarity(&tokenize(left), &tokenize(right))?;
            println!("Cosine similarity: {sim:.6}");
            continue;
        }

        let mut vec = model.sentence_vector(&tokenize(line))?;
        if norm(&vec) == 0.0 {
            println!("Out of dictionary sentence!");
            continue;
        }
        normalize(&mut vec);

        println!();
        println!("                                              Word       Cosine distance");
        println!("------------------------------------------------------------------------");

        let mut best: Vec<(&str, f32)> = (0..dict.size())
            .map(|id| {
                let mut row = model.input_vector(id);
                normalize(&mut row);
                (dict.words()[id].word.as_str(), dot(&vec, &row))
            })
            .collect();
        best.sort_by_key(|(_word, dist)| Reverse(OrderedFloat(*dist)));
        for (word, dist) in best.iter().take(N) {
            println!("{word:50}\t\t{dist}");
        }
    }
    Ok(())
}

fn main() {
    let options = Options::parse();
    if let Err(err) = run(options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
