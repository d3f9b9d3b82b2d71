use std::{
    fs::File,
    io::{BufWriter, Read},
    path::Path,
};

use rayon::prelude::*;
use tracing::info;

use crate::{
    error::{DatasetError, Result},
    fvecs::{FvecsReader, FvecsWriter},
};

/// A dense block of equally sized `f32` vectors.
#[derive(Clone, Debug, PartialEq)]
pub struct Vectors {
    data: Vec<f32>,
    dimension: usize,
}

impl Vectors {
    pub fn new(data: Vec<f32>, dimension: usize) -> Self {
        assert!(dimension > 0, "vectors need a non-zero dimension");
        assert_eq!(0, data.len() % dimension);
        Self { data, dimension }
    }

    pub fn from_fvecs<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("loading vectors from {:?}", path.as_ref());
        let origin = path.as_ref().display().to_string();
        let reader = FvecsReader::open(path)?;
        Self::collect(reader, origin)
    }

    fn collect<R: Read>(mut reader: FvecsReader<R>, origin: String) -> Result<Self> {
        let mut data = Vec::new();
        for vector in reader.by_ref() {
            data.extend(vector?);
        }
        match reader.dimension() {
            Some(dimension) => Ok(Self::new(data, dimension)),
            None => Err(DatasetError::CorruptRecord {
                origin,
                index: 0,
                reason: "no vectors, dimension unknown".to_string(),
            }),
        }
    }

    pub fn store_fvecs<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer =
            FvecsWriter::with_dimension(BufWriter::new(File::create(path)?), self.dimension);
        for vector in self.iter() {
            writer.write_vector(vector)?;
        }
        writer.finish()?;

        Ok(())
    }

    pub fn num_vecs(&self) -> usize {
        self.data.len() / self.dimension
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f32]> + '_ {
        self.data.chunks_exact(self.dimension)
    }

    /// Scales every vector to unit length. All-zero vectors are left alone.
    pub fn normalize(&mut self) {
        self.data
            .par_chunks_exact_mut(self.dimension)
            .for_each(normalize_vec);
    }
}

pub fn normalize_vec(vector: &mut [f32]) {
    let norm = vector.iter().map(|e| e * e).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|e| *e /= norm);
    }
}
