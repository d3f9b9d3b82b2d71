use std::collections::HashMap;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{DatasetError, Result},
    hashing::HashingEmbedder,
    openai::{OpenAIEmbedder, OpenAIModelType, DEFAULT_ENDPOINT},
    tokenize::Snippet,
};

#[allow(async_fn_in_trait)]
pub trait Model {
    fn dimension(&self) -> usize;

    /// Embeds every snippet into consecutive `dimension()` sized slices of
    /// `output`.
    async fn embeddings_for(&self, snippets: &[Snippet], output: &mut [f32]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SupportedModel {
    Hashing,
    OpenaiAda2,
    OpenaiSmall3,
    OpenaiLarge3,
}

impl SupportedModel {
    pub fn name(self) -> &'static str {
        match self {
            Self::Hashing => "hashing",
            Self::OpenaiAda2 => "openai-ada2",
            Self::OpenaiSmall3 => "openai-small3",
            Self::OpenaiLarge3 => "openai-large3",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbedderMetadata {
    pub model: SupportedModel,
    /// embeddings endpoint for the openai models. defaults to the openai api
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(flatten)]
    extra_fields: HashMap<String, Value>,
}

impl Default for EmbedderMetadata {
    fn default() -> Self {
        Self::new(SupportedModel::Hashing)
    }
}

impl EmbedderMetadata {
    pub fn new(model: SupportedModel) -> Self {
        Self {
            model,
            endpoint: None,
            extra_fields: HashMap::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    }

    /// The api key from the configuration, falling back to `OPENAI_API_KEY`.
    pub fn openai_api_key(&self) -> Result<String> {
        match self.extra_fields.get("api_key") {
            Some(Value::String(key)) => Ok(key.clone()),
            Some(_) => Err(DatasetError::ModelLoadFailure(
                "api_key was not a string".to_string(),
            )),
            None => std::env::var("OPENAI_API_KEY").map_err(|_| {
                DatasetError::ModelLoadFailure(
                    "api_key was not present in metadata and OPENAI_API_KEY is not set"
                        .to_string(),
                )
            }),
        }
    }

    /// Identifies the model that produced a file. Never contains secrets.
    pub fn identity(&self) -> String {
        match self.model {
            SupportedModel::Hashing => self.model.name().to_string(),
            _ => format!("{}@{}", self.model.name(), self.endpoint()),
        }
    }

    pub fn load(&self, dimension: usize) -> Result<Embedder> {
        let model = match self.model {
            SupportedModel::Hashing => {
                return Ok(Embedder::Hashing(HashingEmbedder::new(dimension)?));
            }
            SupportedModel::OpenaiAda2 => OpenAIModelType::Ada2,
            SupportedModel::OpenaiSmall3 => OpenAIModelType::Small3,
            SupportedModel::OpenaiLarge3 => OpenAIModelType::Large3,
        };
        let api_key = self.openai_api_key()?;

        Ok(Embedder::OpenAI(OpenAIEmbedder::new(
            model,
            api_key,
            self.endpoint(),
            dimension,
        )?))
    }
}

pub enum Embedder {
    Hashing(HashingEmbedder),
    OpenAI(OpenAIEmbedder),
}

impl Model for Embedder {
    fn dimension(&self) -> usize {
        match self {
            Self::Hashing(e) => e.dimension(),
            Self::OpenAI(e) => e.dimension(),
        }
    }

    async fn embeddings_for(&self, snippets: &[Snippet], output: &mut [f32]) -> Result<()> {
        match self {
            Self::Hashing(e) => e.embeddings_for(snippets, output).await,
            Self::OpenAI(e) => e.embeddings_for(snippets, output).await,
        }
    }
}
