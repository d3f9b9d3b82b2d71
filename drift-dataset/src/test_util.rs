use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use flate2::{write::GzEncoder, Compression};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{corpus::Split, vectors::Vectors};

pub fn random_vectors(num_vecs: usize, dimension: usize, seed: u64) -> Vectors {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = (0..num_vecs * dimension)
        .map(|_| rng.gen_range(-1.0..1.0))
        .collect();

    Vectors::new(data, dimension)
}

pub fn random_vectors_normalized(num_vecs: usize, dimension: usize, seed: u64) -> Vectors {
    let mut vectors = random_vectors(num_vecs, dimension, seed);
    vectors.normalize();

    vectors
}

/// Writes a corpus shard in the c4 layout, one `{"text": ..}` line per
/// document, and returns its path.
pub fn write_corpus_file<P: AsRef<Path>>(
    c4_dir: P,
    split: Split,
    index: usize,
    documents: &[&str],
    gzip: bool,
) -> io::Result<PathBuf> {
    let split_dir = c4_dir.as_ref().join(split.dir_name());
    fs::create_dir_all(&split_dir)?;
    let mut path = split_dir.join(split.file_name(index));
    if gzip {
        path.set_extension("json.gz");
    }

    let mut file = BufWriter::new(File::create(&path)?);
    if gzip {
        let mut encoder = GzEncoder::new(file, Compression::default());
        write_documents(&mut encoder, documents)?;
        encoder.finish()?.flush()?;
    } else {
        write_documents(&mut file, documents)?;
        file.flush()?;
    }

    Ok(path)
}

fn write_documents<W: Write>(writer: &mut W, documents: &[&str]) -> io::Result<()> {
    for text in documents {
        let line = serde_json::json!({
            "text": text,
            "timestamp": "2019-04-25T12:57:54Z",
            "url": "https://example.com/",
        });
        serde_json::to_writer(&mut *writer, &line)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// `count` short distinct documents, each well under one snippet window.
pub fn synthetic_documents(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("document number {i} talks about topic {}", i % 7))
        .collect()
}
