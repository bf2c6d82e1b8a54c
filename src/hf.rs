use crate::error::{Result, ScribeError};
use crate::tokenization::Tokenizer;
use log::{debug, warn};
use std::path::Path;

const BOS_TOKEN: &str = "<s>";
const EOS_TOKEN: &str = "</s>";

pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    bos: Option<u32>,
    eos: Option<u32>,
    pad: u32,
}

impl HfTokenizer {
    /// Loads a `tokenizer.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| ScribeError::Tokenizer(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_tokenizer(inner))
    }

    /// Pads with EOS, the model having no dedicated pad token.
    pub fn from_tokenizer(inner: tokenizers::Tokenizer) -> Self {
        let bos = inner.token_to_id(BOS_TOKEN);
        let eos = inner.token_to_id(EOS_TOKEN);
        if eos.is_none() {
            warn!("Tokenizer has no {} token, padding with id 0", EOS_TOKEN);
        }
        debug!("Special tokens - bos: {:?}, eos: {:?}", bos, eos);

        Self {
            inner,
            bos,
            eos,
            pad: eos.unwrap_or(0),
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

impl Tokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| ScribeError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, false)
            .map_err(|e| ScribeError::Tokenizer(e.to_string()))
    }

    fn bos_token_id(&self) -> Option<u32> {
        self.bos
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.eos
    }

    fn pad_token_id(&self) -> u32 {
        self.pad
    }
}
