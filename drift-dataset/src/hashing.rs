//! A deterministic local embedder.
//!
//! Token ids are hashed into `dimension` signed buckets and the result is
//! normalized. Nothing semantic about it, but the output only depends on the
//! tokens, so it works offline and gives identical files on every machine.

use rayon::prelude::*;

use crate::{
    error::{DatasetError, Result},
    model::Model,
    tokenize::Snippet,
    vectors::normalize_vec,
};

const HASH_SEED: u64 = 0x5EED_D21F_7000_0000;

#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(DatasetError::ModelLoadFailure(
                "hashing embedder needs a non-zero dimension".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    pub fn embed_into(&self, tokens: &[usize], output: &mut [f32]) {
        debug_assert_eq!(output.len(), self.dimension);
        output.fill(0.0);
        for &token in tokens {
            let hash = splitmix64(token as u64 ^ HASH_SEED);
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            output[bucket] += sign;
        }
        normalize_vec(output);
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

impl Model for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embeddings_for(&self, snippets: &[Snippet], output: &mut [f32]) -> Result<()> {
        if output.len() != snippets.len() * self.dimension {
            return Err(DatasetError::InvalidConfig(format!(
                "output buffer holds {} floats, expected {}",
                output.len(),
                snippets.len() * self.dimension
            )));
        }
        output
            .par_chunks_exact_mut(self.dimension)
            .zip(snippets.par_iter())
            .for_each(|(vector, snippet)| self.embed_into(snippet, vector));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[tokio::test]
    async fn embeddings_are_unit_length_and_stable() {
        let embedder = HashingEmbedder::new(16).unwrap();
        let snippets = vec![vec![1, 2, 3], vec![4, 5, 6, 7]];
        let mut first = vec![0.0; 32];
        let mut second = vec![0.0; 32];
        embedder.embeddings_for(&snippets, &mut first).await.unwrap();
        embedder.embeddings_for(&snippets, &mut second).await.unwrap();

        assert_eq!(first, second);
        for vector in first.chunks(16) {
            let norm: f32 = vector.iter().map(|e| e * e).sum::<f32>().sqrt();
            assert_relative_eq!(norm, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn extra_token_changes_embedding() {
        let embedder = HashingEmbedder::new(64).unwrap();
        let mut plain = vec![0.0; 64];
        let mut extended = vec![0.0; 64];
        embedder.embed_into(&[10, 20, 30], &mut plain);
        embedder.embed_into(&[10, 20, 30, 40], &mut extended);
        assert_ne!(plain, extended);
    }

    #[tokio::test]
    async fn wrong_buffer_size_is_rejected() {
        let embedder = HashingEmbedder::new(8).unwrap();
        let mut output = vec![0.0; 7];
        assert!(embedder
            .embeddings_for(&[vec![1]], &mut output)
            .await
            .is_err());
    }
}
