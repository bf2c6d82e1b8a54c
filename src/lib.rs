//! # Scribe Field Builder
//!
//! Building blocks for writing banking project documents one field at a time
//! with a fine-tuned language model, and for preparing the data that model
//! is trained on.
//!
//! ## Core Concepts
//!
//! - **Field registry**: the fixed document schema (generation order, ranked
//!   relevant fields per field, column layout of the tabular fields)
//! - **Context assembly**: picks which known fields the model sees for a
//!   target field, under a `minimal`, `related` or `full` strategy
//! - **Prompt wire format**: `[INST] <TASK>..</TASK>\n<CONTEXT>\n..\n</CONTEXT> [/INST]`,
//!   shared byte for byte by inference and training
//! - **Response decoding**: raw model text back to a scalar or to bounded,
//!   fixed-width table rows, with defaults instead of errors
//! - **Training preparation**: JSONL chat records, loss masking over the
//!   prompt span, independent prompt/response token budgets
//!
//! ## Example
//!
//! ```rust,ignore
//! use scribe_field_builder::*;
//! use rand::thread_rng;
//!
//! let registry = FieldRegistry::banking();
//! let context = GenerationContext::new()
//!     .with("client", "ACME Bank")
//!     .with("sector", "Banque")
//!     .with("contexte_proj", "Migration du core banking");
//!
//! let engine = |request: &GenerationRequest<'_>| -> Result<String> {
//!     my_engine::complete(request.prompt, request.seed)
//! };
//!
//! let generation = FieldGenerator::new(&registry, engine)
//!     .generate_field("risques", &context, "smart", &mut thread_rng())?;
//!
//! for row in generation.value.as_rows().unwrap_or_default() {
//!     println!("{}", row.to_pipe_line(5));
//! }
//! ```

pub mod assembler;
pub mod config;
pub mod context;
pub mod dataset;
pub mod decoder;
pub mod error;
pub mod generation;
pub mod prompt;
pub mod schema;
pub mod tokenization;
pub mod utils;
pub mod validation;

#[cfg(feature = "hf-tokenizer")]
pub mod hf;

pub use assembler::{AssembledContext, ContextAssembler, ContextBlock, Strategy};
pub use config::PipelineConfig;
pub use context::{canonical_key, map_request_field, FieldValue, GenerationContext, TableRow};
pub use dataset::{
    split_dataset, validate_record, ChatMessage, DatasetLoader, DatasetStats, LoadedDataset,
    RecordRejection, TrainingRecord,
};
pub use decoder::{decode_rows, DecodedValue, ResponseDecoder, RowDecoder};
pub use error::{Result, ScribeError};
pub use generation::{
    FieldGeneration, FieldGenerator, GenerationMetadata, GenerationRecord, GenerationRequest,
    GenerationSettings, MultiFieldGeneration, TextGenerator,
};
pub use prompt::{compile_prompt, extract_marked, extract_task, wrap_instruction};
pub use schema::{FieldRegistry, FieldSchema, TableKind, TableLayout};
pub use tokenization::{
    collate, tokenize_pair, Batch, ExampleProcessor, TokenizationConfig, TokenizedExample,
    Tokenizer, IGNORE_INDEX,
};
pub use validation::{validate_value, FieldValidation};

#[cfg(feature = "hf-tokenizer")]
pub use hf::HfTokenizer;

use log::{debug, info};
use std::path::Path;

/// Tokenized train and validation sets plus the load statistics of each
/// source.
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    pub train: Vec<TokenizedExample>,
    pub validation: Vec<TokenizedExample>,
    pub train_stats: DatasetStats,
    pub validation_stats: DatasetStats,
}

pub struct TrainingDataBuilder;

impl TrainingDataBuilder {
    /// Loads both JSONL files, drops invalid records and tokenizes the rest
    /// with one sequential processor. Fails only on I/O, tokenizer errors or
    /// a file without a single valid record.
    pub fn build<T: Tokenizer + ?Sized>(
        train_path: impl AsRef<Path>,
        validation_path: impl AsRef<Path>,
        tokenizer: &T,
        config: &TokenizationConfig,
    ) -> Result<PreparedDataset> {
        config.validate()?;

        let loader = DatasetLoader::new();
        let train_set = loader.load_non_empty(train_path)?;
        let validation_set = loader.load_non_empty(validation_path)?;

        info!(
            "Preparing {} training and {} validation records",
            train_set.records.len(),
            validation_set.records.len()
        );

        let mut processor = ExampleProcessor::new(tokenizer, config.clone());
        let train = processor.process_batch(&train_set.records)?;
        debug!("Processed {} training examples", processor.processed());

        processor.reset();
        let validation = processor.process_batch(&validation_set.records)?;

        Ok(PreparedDataset {
            train,
            validation,
            train_stats: train_set.stats,
            validation_stats: validation_set.stats,
        })
    }
}

pub fn prepare_training_data<T: Tokenizer + ?Sized>(
    train_path: impl AsRef<Path>,
    validation_path: impl AsRef<Path>,
    tokenizer: &T,
    config: &TokenizationConfig,
) -> Result<PreparedDataset> {
    TrainingDataBuilder::build(train_path, validation_path, tokenizer, config)
}
