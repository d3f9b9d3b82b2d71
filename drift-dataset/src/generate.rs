//! Snippet sampling and embedding generation over a corpus slice.
//!
//! Generation makes two passes over the slice. The first counts the snippets
//! the slice yields, the second collects the ones picked by the seeded
//! sampler. Pollution decisions are replayed identically in both passes.

use std::{
    fs::{self, File},
    io::BufWriter,
    ops::ControlFlow,
    path::{Path, PathBuf},
};

use rand::{rngs::StdRng, seq::IteratorRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    corpus::{CorpusSlice, Documents},
    error::{DatasetError, Result},
    fvecs::{partial_path, FvecsWriter},
    model::Model,
    pollution::{Pollution, Polluter},
    tokenize::{tokens_for, Snippet, SnippetWindows},
};

/// Everything that determines the content of a generated file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GenerationRequest {
    pub slice: CorpusSlice,
    pub num_embeddings: usize,
    pub doc_stride: usize,
    pub max_length: usize,
    pub dimension: usize,
    pub batch_size: usize,
    pub seed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pollution: Option<Pollution>,
}

impl GenerationRequest {
    pub fn validate(&self) -> Result<()> {
        self.slice.validate()?;
        SnippetWindows::new(self.max_length, self.doc_stride)?;
        if self.num_embeddings == 0 {
            return Err(DatasetError::InvalidConfig(
                "number of embeddings must be positive".to_string(),
            ));
        }
        if self.dimension == 0 || self.batch_size == 0 {
            return Err(DatasetError::InvalidConfig(
                "dimension and batch size must be positive".to_string(),
            ));
        }
        if let Some(pollution) = &self.pollution {
            pollution.validate()?;
        }
        Ok(())
    }

    /// `{prefix}_queries_{n/1000}k_files{start}_{end}.fvecs`
    pub fn output_file_name(&self, prefix: &str) -> String {
        format!(
            "{prefix}_queries_{}k_files{}_{}.fvecs",
            self.num_embeddings / 1000,
            self.slice.init_file,
            self.slice.end()
        )
    }
}

/// Where the corpus lives and where results go.
#[derive(Debug, Clone)]
pub struct OutputLocation {
    /// The c4 `en` directory, containing `train/` and `validation/`.
    pub dataset_dir: PathBuf,
    pub prefix: String,
}

impl OutputLocation {
    pub fn new(dataset_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dataset_dir: dataset_dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn embeddings_dir(&self) -> PathBuf {
        self.dataset_dir.join("embeddings")
    }

    pub fn output_path(&self, request: &GenerationRequest) -> PathBuf {
        self.embeddings_dir()
            .join(request.output_file_name(&self.prefix))
    }
}

// Walks every snippet of the slice in order, calling `visit` with its global index.
fn visit_snippets<F>(files: &[PathBuf], request: &GenerationRequest, mut visit: F) -> Result<usize>
where
    F: FnMut(usize, &[usize]) -> ControlFlow<()>,
{
    let windows = SnippetWindows::new(request.max_length, request.doc_stride)?;
    let mut polluter = request
        .pollution
        .as_ref()
        .map(|pollution| Polluter::new(pollution, request.seed));

    let mut snippet_index = 0;
    let mut polluted = 0;
    for document in Documents::new(files.to_vec()) {
        let document = document?;
        let polluted_text = polluter.as_mut().and_then(|p| p.apply(&document));
        if polluted_text.is_some() {
            polluted += 1;
        }
        let tokens = tokens_for(polluted_text.as_deref().unwrap_or(&document))?;
        for window in windows.windows(&tokens) {
            let flow = visit(snippet_index, window);
            snippet_index += 1;
            if flow.is_break() {
                return Ok(snippet_index);
            }
        }
    }
    if request.pollution.is_some() {
        debug!("polluted {polluted} documents");
    }

    Ok(snippet_index)
}

/// Number of snippets, and therefore embeddings, the slice can supply.
/// Runs no inference.
pub fn count_embeddings<P: AsRef<Path>>(request: &GenerationRequest, dataset_dir: P) -> Result<usize> {
    request.validate()?;
    let files = request.slice.file_paths(dataset_dir)?;
    let count = visit_snippets(&files, request, |_, _| ControlFlow::Continue(()))?;
    info!(
        "files {}..{} yield {count} snippets",
        request.slice.init_file,
        request.slice.end()
    );
    Ok(count)
}

/// Draws `count` distinct snippet indices out of `available`, sorted.
pub fn sample_snippet_indices(available: usize, count: usize, seed: u64) -> Result<Vec<usize>> {
    if count > available {
        return Err(DatasetError::InsufficientCorpusData {
            requested: count,
            available,
        });
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut indices = (0..available).choose_multiple(&mut rng, count);
    indices.sort_unstable();
    Ok(indices)
}

/// Picks the snippets for a request, in corpus order.
pub fn select_snippets<P: AsRef<Path>>(
    request: &GenerationRequest,
    dataset_dir: P,
) -> Result<Vec<Snippet>> {
    request.validate()?;
    let files = request.slice.file_paths(dataset_dir)?;
    let available = visit_snippets(&files, request, |_, _| ControlFlow::Continue(()))?;
    info!("{available} snippets available, sampling {}", request.num_embeddings);
    let selected = sample_snippet_indices(available, request.num_embeddings, request.seed)?;

    let mut snippets = Vec::with_capacity(selected.len());
    let mut wanted = selected.iter().peekable();
    visit_snippets(&files, request, |index, window| {
        if wanted.next_if_eq(&&index).is_some() {
            snippets.push(window.to_vec());
        }
        if wanted.peek().is_none() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;

    if snippets.len() != selected.len() {
        // corpus changed between the passes
        return Err(DatasetError::InsufficientCorpusData {
            requested: selected.len(),
            available: snippets.len(),
        });
    }
    Ok(snippets)
}

/// Generates the embeddings described by `request` and writes them to the
/// conventional path under `{dataset_dir}/embeddings`, which is returned.
///
/// The file is first written next to its final path and renamed into place
/// once complete.
pub async fn generate_embeddings<M: Model>(
    model: &M,
    request: &GenerationRequest,
    location: &OutputLocation,
) -> Result<PathBuf> {
    request.validate()?;
    if model.dimension() != request.dimension {
        return Err(DatasetError::InvalidConfig(format!(
            "model produces dimension {} but {} was requested",
            model.dimension(),
            request.dimension
        )));
    }

    let snippets = select_snippets(request, &location.dataset_dir)?;

    fs::create_dir_all(location.embeddings_dir())?;
    let path = location.output_path(request);
    let partial = partial_path(&path);
    let mut writer =
        FvecsWriter::with_dimension(BufWriter::new(File::create(&partial)?), request.dimension);

    let mut buf = vec![0.0_f32; request.batch_size * request.dimension];
    for (batch_index, batch) in snippets.chunks(request.batch_size).enumerate() {
        let output = &mut buf[..batch.len() * request.dimension];
        model.embeddings_for(batch, output).await?;
        for vector in output.chunks_exact(request.dimension) {
            writer.write_vector(vector)?;
        }
        debug!(
            "batch {batch_index}: {}/{} embeddings written",
            writer.count(),
            snippets.len()
        );
    }
    writer.finish()?;
    fs::rename(&partial, &path)?;

    info!("wrote {} embeddings to {path:?}", snippets.len());
    Ok(path)
}

/// Same as [`generate_embeddings`], injecting `keyword` into a `fraction` of
/// the documents first.
pub async fn generate_embeddings_with_word_pollution<M: Model>(
    model: &M,
    request: &GenerationRequest,
    location: &OutputLocation,
    keyword: &str,
    fraction: f64,
) -> Result<PathBuf> {
    let request = GenerationRequest {
        pollution: Some(Pollution::new(keyword, fraction)),
        ..request.clone()
    };
    generate_embeddings(model, &request, location).await
}
