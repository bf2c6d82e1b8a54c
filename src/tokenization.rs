use crate::dataset::TrainingRecord;
use crate::error::{Result, ScribeError};
use crate::prompt::{wrap_instruction, START_MARKER};
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Label value excluded from the loss.
pub const IGNORE_INDEX: i64 = -100;

/// Number of learnable tokens decoded for the debug preview.
const PREVIEW_TOKENS: usize = 20;

/// Minimal tokenizer surface the pipeline needs. `encode` must not add
/// special tokens; the pipeline places BOS/EOS itself.
pub trait Tokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    fn decode(&self, ids: &[u32]) -> Result<String>;

    fn bos_token_id(&self) -> Option<u32>;

    fn eos_token_id(&self) -> Option<u32>;

    fn pad_token_id(&self) -> u32;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizationConfig {
    /// Token budget for the rendered prompt, applied before concatenation.
    pub max_prompt_length: usize,
    /// Token budget for the response, applied before concatenation.
    pub max_response_length: usize,
    /// Hard cap on the concatenated sequence.
    pub max_length: usize,
    pub pad_to_multiple_of: Option<usize>,
    /// Examples (by processing index) that get verbose diagnostics.
    pub debug_examples: usize,
}

impl Default for TokenizationConfig {
    fn default() -> Self {
        Self {
            max_prompt_length: 1024,
            max_response_length: 512,
            max_length: 1536,
            pad_to_multiple_of: Some(8),
            debug_examples: 3,
        }
    }
}

impl TokenizationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_prompt_length == 0 || self.max_response_length == 0 || self.max_length == 0 {
            return Err(ScribeError::InvalidConfig(
                "token budgets must be greater than zero".to_string(),
            ));
        }
        if self.pad_to_multiple_of == Some(0) {
            return Err(ScribeError::InvalidConfig(
                "pad_to_multiple_of must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizedExample {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u8>,
    pub labels: Vec<i64>,
}

impl TokenizedExample {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Positions that contribute to the loss.
    pub fn learnable_tokens(&self) -> usize {
        self.labels.iter().filter(|l| **l != IGNORE_INDEX).count()
    }

    fn first_learnable(&self) -> Option<usize> {
        self.labels.iter().position(|l| *l != IGNORE_INDEX)
    }
}

/// Renders the user turn exactly as the inference prompt does.
pub fn render_prompt(user_turn: &str) -> String {
    wrap_instruction(user_turn)
}

/// Tokenizes one pair.
///
/// Prompt and response are truncated to their own budgets before being
/// joined as `[BOS] prompt response [EOS]`; the join is then cut to
/// `max_length`. Labels mask BOS and the prompt span.
pub fn tokenize_pair<T: Tokenizer + ?Sized>(
    tokenizer: &T,
    config: &TokenizationConfig,
    user_turn: &str,
    response: &str,
) -> Result<TokenizedExample> {
    let mut prompt_ids = tokenizer.encode(&render_prompt(user_turn))?;
    prompt_ids.truncate(config.max_prompt_length);

    let mut response_ids = tokenizer.encode(response)?;
    response_ids.truncate(config.max_response_length);

    let bos: Vec<u32> = tokenizer.bos_token_id().into_iter().collect();
    let eos: Vec<u32> = tokenizer.eos_token_id().into_iter().collect();

    let mut input_ids: Vec<u32> = bos
        .iter()
        .chain(prompt_ids.iter())
        .chain(response_ids.iter())
        .chain(eos.iter())
        .copied()
        .collect();
    input_ids.truncate(config.max_length);

    let prompt_span = bos.len() + prompt_ids.len();
    let mut labels: Vec<i64> = Vec::with_capacity(input_ids.len());
    labels.extend(std::iter::repeat(IGNORE_INDEX).take(prompt_span));
    labels.extend(input_ids.iter().skip(prompt_span).map(|id| i64::from(*id)));
    labels.truncate(input_ids.len());

    let attention_mask = vec![1u8; input_ids.len()];

    Ok(TokenizedExample {
        input_ids,
        attention_mask,
        labels,
    })
}

/// Stateful wrapper around [`tokenize_pair`] that numbers examples as they
/// go through and logs diagnostics for the first few.
///
/// The running count is the only mutable state in the pipeline; `&mut self`
/// keeps it to a single worker.
pub struct ExampleProcessor<'t, T: Tokenizer + ?Sized> {
    tokenizer: &'t T,
    config: TokenizationConfig,
    processed: usize,
}

impl<'t, T: Tokenizer + ?Sized> ExampleProcessor<'t, T> {
    pub fn new(tokenizer: &'t T, config: TokenizationConfig) -> Self {
        Self {
            tokenizer,
            config,
            processed: 0,
        }
    }

    pub fn config(&self) -> &TokenizationConfig {
        &self.config
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Restarts numbering, e.g. between the train and validation splits.
    pub fn reset(&mut self) {
        self.processed = 0;
    }

    pub fn process(&mut self, user_turn: &str, response: &str) -> Result<TokenizedExample> {
        let example = tokenize_pair(self.tokenizer, &self.config, user_turn, response)?;

        if self.processed < self.config.debug_examples {
            self.log_example(self.processed, &example)?;
        }
        self.processed += 1;

        Ok(example)
    }

    /// Processes records in order. Records without a user/assistant pair
    /// are skipped with a warning.
    pub fn process_batch(&mut self, records: &[TrainingRecord]) -> Result<Vec<TokenizedExample>> {
        let mut examples = Vec::with_capacity(records.len());

        for record in records {
            match record.turns() {
                Some((user, assistant)) => examples.push(self.process(user, assistant)?),
                None => warn!("Skipping record without a user/assistant pair"),
            }
        }

        if let (Some(min), Some(max)) = (
            examples.iter().map(TokenizedExample::len).min(),
            examples.iter().map(TokenizedExample::len).max(),
        ) {
            let mean =
                examples.iter().map(TokenizedExample::len).sum::<usize>() as f64 / examples.len() as f64;
            info!(
                "Tokenized {} examples - lengths min {}, max {}, mean {:.1}",
                examples.len(),
                min,
                max,
                mean
            );
        }

        Ok(examples)
    }

    fn log_example(&self, index: usize, example: &TokenizedExample) -> Result<()> {
        let learnable = example.learnable_tokens();
        let ratio = if example.is_empty() {
            0.0
        } else {
            learnable as f64 / example.len() as f64 * 100.0
        };

        info!("Example {}:", index);
        info!("  Total length: {} tokens", example.len());
        info!("  Learnable tokens: {} ({:.1}%)", learnable, ratio);

        if let Some(first) = example.first_learnable() {
            let end = (first + PREVIEW_TOKENS).min(example.len());
            let preview = self.tokenizer.decode(&example.input_ids[first..end])?;
            info!("  Learnable text starts with: {}...", preview);

            if !preview.starts_with(START_MARKER) {
                warn!("  Learnable span of example {} does not start with {}", index, START_MARKER);
            }
        }

        Ok(())
    }
}

/// A padded batch, one row per example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub input_ids: Vec<Vec<u32>>,
    pub attention_mask: Vec<Vec<u8>>,
    pub labels: Vec<Vec<i64>>,
}

/// Right-pads every example to the longest one, rounded up to
/// `pad_to_multiple_of`.
pub fn collate(
    examples: &[TokenizedExample],
    pad_token_id: u32,
    pad_to_multiple_of: Option<usize>,
) -> Batch {
    let longest = examples.iter().map(TokenizedExample::len).max().unwrap_or(0);
    let width = match pad_to_multiple_of {
        Some(multiple) if multiple > 0 => longest.div_ceil(multiple) * multiple,
        _ => longest,
    };

    let mut batch = Batch {
        input_ids: Vec::with_capacity(examples.len()),
        attention_mask: Vec::with_capacity(examples.len()),
        labels: Vec::with_capacity(examples.len()),
    };

    for example in examples {
        let padding = width - example.len();

        let mut ids = example.input_ids.clone();
        ids.extend(std::iter::repeat(pad_token_id).take(padding));

        let mut mask = example.attention_mask.clone();
        mask.extend(std::iter::repeat(0u8).take(padding));

        let mut labels = example.labels.clone();
        labels.extend(std::iter::repeat(IGNORE_INDEX).take(padding));

        batch.input_ids.push(ids);
        batch.attention_mask.push(mask);
        batch.labels.push(labels);
    }

    batch
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One token per character, offset past the special ids.
    struct CharTokenizer;

    const BOS: u32 = 1;
    const EOS: u32 = 2;
    const OFFSET: u32 = 3;

    impl Tokenizer for CharTokenizer {
        fn encode(&self, text: &str) -> Result<Vec<u32>> {
            Ok(text.chars().map(|c| c as u32 + OFFSET).collect())
        }

        fn decode(&self, ids: &[u32]) -> Result<String> {
            Ok(ids
                .iter()
                .filter(|id| **id >= OFFSET)
                .filter_map(|id| char::from_u32(id - OFFSET))
                .collect())
        }

        fn bos_token_id(&self) -> Option<u32> {
            Some(BOS)
        }

        fn eos_token_id(&self) -> Option<u32> {
            Some(EOS)
        }

        fn pad_token_id(&self) -> u32 {
            EOS
        }
    }

    fn budgets(prompt: usize, response: usize, total: usize) -> TokenizationConfig {
        TokenizationConfig {
            max_prompt_length: prompt,
            max_response_length: response,
            max_length: total,
            ..TokenizationConfig::default()
        }
    }

    #[test]
    fn test_prompt_span_is_masked() {
        let config = TokenizationConfig::default();
        let example = tokenize_pair(&CharTokenizer, &config, "abc", "<START>x<END>").unwrap();

        let prompt_len = render_prompt("abc").chars().count();
        assert_eq!(example.len(), 1 + prompt_len + 13 + 1);
        assert_eq!(example.input_ids[0], BOS);
        assert_eq!(*example.input_ids.last().unwrap(), EOS);

        assert!(example.labels[..1 + prompt_len].iter().all(|l| *l == IGNORE_INDEX));
        assert_eq!(example.labels[1 + prompt_len], i64::from('<' as u32 + OFFSET));
        assert_eq!(example.learnable_tokens(), 13 + 1);
        assert!(example.attention_mask.iter().all(|m| *m == 1));
    }

    #[test]
    fn test_budgets_are_independent() {
        // A long prompt must not eat into the response budget
        let config = budgets(10, 5, 100);
        let long_prompt = "p".repeat(500);
        let example = tokenize_pair(&CharTokenizer, &config, &long_prompt, "responses").unwrap();

        assert_eq!(example.len(), 1 + 10 + 5 + 1);
        assert_eq!(example.learnable_tokens(), 5 + 1);
    }

    #[test]
    fn test_total_cap_truncates_labels_too() {
        let config = budgets(10, 5, 12);
        let example = tokenize_pair(&CharTokenizer, &config, "a prompt here", "response").unwrap();

        assert_eq!(example.input_ids.len(), 12);
        assert_eq!(example.labels.len(), 12);
        assert_eq!(example.attention_mask.len(), 12);
        assert_eq!(example.learnable_tokens(), 1);
    }

    #[test]
    fn test_total_cap_inside_prompt() {
        let config = budgets(10, 5, 8);
        let example = tokenize_pair(&CharTokenizer, &config, "a prompt here", "response").unwrap();

        assert_eq!(example.len(), 8);
        assert_eq!(example.learnable_tokens(), 0);
    }

    #[test]
    fn test_lengths_always_match() {
        let config = budgets(16, 8, 20);
        for (user, response) in [
            ("", ""),
            ("x", "<START><END>"),
            ("long user turn with context", "<START>a|b|c\nd|e|f<END>"),
        ] {
            let example = tokenize_pair(&CharTokenizer, &config, user, response).unwrap();
            assert_eq!(example.input_ids.len(), example.labels.len());
            assert_eq!(example.input_ids.len(), example.attention_mask.len());
            assert!(example.learnable_tokens() <= config.max_response_length + 1);
            assert!(example.len() <= config.max_length);
        }
    }

    #[test]
    fn test_processor_counts_examples() {
        let mut processor = ExampleProcessor::new(&CharTokenizer, TokenizationConfig::default());
        processor.process("a", "<START>b<END>").unwrap();
        processor.process("c", "<START>d<END>").unwrap();
        assert_eq!(processor.processed(), 2);

        processor.reset();
        assert_eq!(processor.processed(), 0);
    }

    #[test]
    fn test_collate_pads_to_multiple() {
        let config = TokenizationConfig::default();
        let short = tokenize_pair(&CharTokenizer, &config, "a", "<START>b<END>").unwrap();
        let long = tokenize_pair(&CharTokenizer, &config, "abcdef", "<START>b<END>").unwrap();

        let batch = collate(&[short.clone(), long.clone()], EOS, Some(8));
        let width = batch.input_ids[0].len();

        assert_eq!(width % 8, 0);
        assert!(width >= long.len());
        assert_eq!(batch.input_ids[1].len(), width);

        let padding = width - short.len();
        assert!(batch.attention_mask[0][short.len()..].iter().all(|m| *m == 0));
        assert!(batch.labels[0][short.len()..].iter().all(|l| *l == IGNORE_INDEX));
        assert_eq!(
            batch.input_ids[0][short.len()..],
            vec![EOS; padding][..]
        );
    }

    #[test]
    fn test_collate_without_multiple() {
        let config = TokenizationConfig::default();
        let example = tokenize_pair(&CharTokenizer, &config, "a", "b").unwrap();
        let batch = collate(&[example.clone()], 0, None);
        assert_eq!(batch.input_ids[0], example.input_ids);
    }

    #[test]
    fn test_config_validation() {
        assert!(TokenizationConfig::default().validate().is_ok());
        assert!(budgets(0, 5, 10).validate().is_err());

        let config = TokenizationConfig {
            pad_to_multiple_of: Some(0),
            ..TokenizationConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
