use crate::assembler::{ContextAssembler, Strategy};
use crate::context::{map_request_field, GenerationContext};
use crate::decoder::{DecodedValue, ResponseDecoder};
use crate::error::{Result, ScribeError};
use crate::prompt::compile_prompt;
use crate::schema::FieldRegistry;
use chrono::{DateTime, Utc};
use log::{info, warn};
use rand::Rng;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Upper bound on fields accepted by [`FieldGenerator::generate_fields`].
pub const MAX_FIELDS_PER_CALL: usize = 5;

/// Sampling settings forwarded to the generator with every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GenerationSettings {
    pub max_new_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub repetition_penalty: f32,
    /// Prompt token budget on the engine side.
    pub max_prompt_tokens: usize,
    /// Seeds are drawn from `0..=max_seed`.
    pub max_seed: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            repetition_penalty: 1.2,
            max_prompt_tokens: 1024,
            max_seed: 1_000_000,
        }
    }
}

impl GenerationSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_new_tokens == 0 || self.max_prompt_tokens == 0 {
            return Err(ScribeError::InvalidConfig(
                "generation token budgets must be greater than zero".to_string(),
            ));
        }
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            return Err(ScribeError::InvalidConfig(format!(
                "temperature must be positive, got {}",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(ScribeError::InvalidConfig(format!(
                "top_p must be in (0, 1], got {}",
                self.top_p
            )));
        }
        Ok(())
    }
}

/// One call to the model.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub prompt: &'a str,
    pub seed: u64,
    pub settings: &'a GenerationSettings,
}

/// Port to the text generation engine.
pub trait TextGenerator {
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<String>;
}

impl<F> TextGenerator for F
where
    F: for<'a, 'b> Fn(&'a GenerationRequest<'b>) -> Result<String>,
{
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<String> {
        self(request)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GenerationMetadata {
    /// Task sent to the model after request-field mapping.
    pub task: String,

    /// Strategy tag as requested by the caller.
    pub strategy: String,

    pub resolved_strategy: Strategy,

    /// Context fields shown to the model, in prompt order.
    pub context_fields: Vec<String>,

    pub prompt_chars: usize,
    pub seed: u64,
    pub timestamp: DateTime<Utc>,
}

/// Result of generating one field. Both the raw response and its decoded
/// value are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldGeneration {
    pub field: String,
    pub value: DecodedValue,
    pub raw_response: String,
    pub prompt: String,
    pub metadata: GenerationMetadata,
}

impl FieldGeneration {
    pub fn schema_as_json() -> serde_json::Result<String> {
        let schema = schema_for!(FieldGeneration);
        serde_json::to_string_pretty(&schema)
    }

    pub fn to_record(&self) -> GenerationRecord {
        GenerationRecord {
            timestamp: self.metadata.timestamp,
            field: self.field.clone(),
            prompt: self.prompt.clone(),
            raw_response: Some(self.raw_response.clone()),
            parsed_response: Some(self.value.clone()),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiFieldGeneration {
    pub results: BTreeMap<String, DecodedValue>,
    pub errors: BTreeMap<String, String>,
}

impl MultiFieldGeneration {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// One audit line per generation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub timestamp: DateTime<Utc>,
    pub field: String,
    pub prompt: String,
    pub raw_response: Option<String>,
    pub parsed_response: Option<DecodedValue>,
    pub error: Option<String>,
}

impl GenerationRecord {
    pub fn failure(field: &str, prompt: &str, error: &ScribeError) -> Self {
        Self {
            timestamp: Utc::now(),
            field: field.to_string(),
            prompt: prompt.to_string(),
            raw_response: None,
            parsed_response: None,
            error: Some(error.to_string()),
        }
    }

    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Drives one field through assemble, compile, generate and decode.
pub struct FieldGenerator<'r, G> {
    registry: &'r FieldRegistry,
    generator: G,
    settings: GenerationSettings,
}

impl<'r, G: TextGenerator> FieldGenerator<'r, G> {
    pub fn new(registry: &'r FieldRegistry, generator: G) -> Self {
        Self {
            registry,
            generator,
            settings: GenerationSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Prompt and the fields it shows, without calling the generator.
    pub fn build_prompt<R: Rng + ?Sized>(
        &self,
        field: &str,
        context: &GenerationContext,
        strategy: Strategy,
        rng: &mut R,
    ) -> (String, Vec<String>) {
        let task = map_request_field(field);
        let assembled = ContextAssembler::new(self.registry).assemble(task, context, strategy, rng);
        (compile_prompt(task, &assembled.render()), assembled.used_fields)
    }

    /// Generates one field. A fresh seed is drawn from `rng` for every call.
    pub fn generate_field<R: Rng + ?Sized>(
        &self,
        field: &str,
        context: &GenerationContext,
        strategy_tag: &str,
        rng: &mut R,
    ) -> Result<FieldGeneration> {
        let task = map_request_field(field);
        let strategy = Strategy::from_request_tag(strategy_tag);
        let (prompt, context_fields) = self.build_prompt(task, context, strategy, rng);
        let seed = rng.gen_range(0..=self.settings.max_seed);

        info!(
            "Generating {} (task {}, strategy {}): {} prompt chars, seed {}",
            field,
            task,
            strategy.as_str(),
            prompt.chars().count(),
            seed
        );

        let request = GenerationRequest {
            prompt: &prompt,
            seed,
            settings: &self.settings,
        };
        let raw_response = self
            .generator
            .generate(&request)
            .map_err(|e| ScribeError::Generation {
                field: field.to_string(),
                reason: e.to_string(),
            })?;

        let value = ResponseDecoder::new(self.registry).decode(task, &raw_response);

        Ok(FieldGeneration {
            field: field.to_string(),
            value,
            raw_response,
            metadata: GenerationMetadata {
                task: task.to_string(),
                strategy: strategy_tag.to_string(),
                resolved_strategy: strategy,
                context_fields,
                prompt_chars: prompt.chars().count(),
                seed,
                timestamp: Utc::now(),
            },
            prompt,
        })
    }

    /// Generates up to [`MAX_FIELDS_PER_CALL`] fields against the same
    /// context. Failures are collected per field.
    pub fn generate_fields<R: Rng + ?Sized>(
        &self,
        fields: &[&str],
        context: &GenerationContext,
        strategy_tag: &str,
        rng: &mut R,
    ) -> MultiFieldGeneration {
        if fields.len() > MAX_FIELDS_PER_CALL {
            warn!(
                "{} fields requested, only the first {} are generated",
                fields.len(),
                MAX_FIELDS_PER_CALL
            );
        }

        let mut out = MultiFieldGeneration::default();
        for &field in fields.iter().take(MAX_FIELDS_PER_CALL) {
            match self.generate_field(field, context, strategy_tag, rng) {
                Ok(generation) => {
                    out.results.insert(field.to_string(), generation.value);
                }
                Err(e) => {
                    warn!("Generation failed for {}: {}", field, e);
                    out.errors.insert(field.to_string(), e.to_string());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::RefCell;

    fn context() -> GenerationContext {
        GenerationContext::new()
            .with("client", "ACME Bank")
            .with("sector", "Banque")
            .with("contexte_proj", "Migration du core banking")
            .with("besoin", "Moderniser")
    }

    #[test]
    fn test_generate_scalar_field() {
        let registry = FieldRegistry::banking();
        let generator = |_: &GenerationRequest<'_>| -> Result<String> {
            Ok("<START>Des objectifs clairs.<END>".to_string())
        };
        let fields = FieldGenerator::new(&registry, generator);

        let out = fields
            .generate_field("objectifs", &context(), "minimal", &mut StdRng::seed_from_u64(4))
            .unwrap();

        assert_eq!(out.value, DecodedValue::Text("Des objectifs clairs.".to_string()));
        assert_eq!(out.raw_response, "<START>Des objectifs clairs.<END>");
        assert_eq!(out.metadata.resolved_strategy, Strategy::Minimal);
        assert_eq!(
            out.metadata.context_fields,
            vec!["client", "secteur", "contexte_proj", "besoin"]
        );
        assert!(out.prompt.starts_with("[INST] <TASK>objectifs</TASK>\n<CONTEXT>\nclient: ACME Bank\n"));
        assert_eq!(out.metadata.prompt_chars, out.prompt.chars().count());
        assert!(out.metadata.seed <= 1_000_000);
    }

    #[test]
    fn test_request_field_is_mapped_and_decoded_as_table() {
        let registry = FieldRegistry::banking();
        let seen = RefCell::new(Vec::new());
        let generator = |request: &GenerationRequest<'_>| -> Result<String> {
            seen.borrow_mut().push(request.prompt.to_string());
            Ok("<START>Cadrage|Ateliers|2024-01-01|2024-01-05|MOA<END>".to_string())
        };
        let fields = FieldGenerator::new(&registry, &generator);

        let out = fields
            .generate_field("lots", &context(), "smart", &mut StdRng::seed_from_u64(1))
            .unwrap();

        assert_eq!(out.field, "lots");
        assert_eq!(out.metadata.task, "phases");
        assert!(seen.borrow()[0].contains("<TASK>phases</TASK>"));

        let rows = out.value.as_rows().unwrap();
        assert_eq!(rows[0].get(5), "5");
    }

    #[test]
    fn test_seeds_are_fresh_per_call() {
        let registry = FieldRegistry::banking();
        let seeds = RefCell::new(Vec::new());
        let generator = |request: &GenerationRequest<'_>| -> Result<String> {
            seeds.borrow_mut().push(request.seed);
            Ok("texte".to_string())
        };
        let fields = FieldGenerator::new(&registry, &generator);
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..4 {
            fields
                .generate_field("besoin", &context(), "minimal", &mut rng)
                .unwrap();
        }

        let seeds = seeds.borrow();
        assert!(seeds.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn test_generator_error_is_wrapped() {
        let registry = FieldRegistry::banking();
        let generator = |_: &GenerationRequest<'_>| -> Result<String> {
            Err(ScribeError::Tokenizer("engine down".to_string()))
        };
        let fields = FieldGenerator::new(&registry, generator);

        let err = fields
            .generate_field("besoin", &context(), "full", &mut StdRng::seed_from_u64(0))
            .unwrap_err();
        assert!(matches!(err, ScribeError::Generation { ref field, .. } if field == "besoin"));
    }

    #[test]
    fn test_generate_fields_caps_and_collects_errors() {
        let registry = FieldRegistry::banking();
        let generator = |request: &GenerationRequest<'_>| -> Result<String> {
            if request.prompt.contains("<TASK>risques</TASK>") {
                Err(ScribeError::Tokenizer("boom".to_string()))
            } else {
                Ok("<START>ok<END>".to_string())
            }
        };
        let fields = FieldGenerator::new(&registry, generator);

        let out = fields.generate_fields(
            &["besoin", "objectifs", "risques", "perimetre", "architecture", "impactCO2"],
            &context(),
            "medium",
            &mut StdRng::seed_from_u64(2),
        );

        assert_eq!(out.results.len(), 4);
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors.contains_key("risques"));
        assert!(!out.results.contains_key("impactCO2"));
        assert!(!out.is_success());
    }

    #[test]
    fn test_record_json_line() {
        let registry = FieldRegistry::banking();
        let generator =
            |_: &GenerationRequest<'_>| -> Result<String> { Ok("<START>x<END>".to_string()) };
        let fields = FieldGenerator::new(&registry, generator);

        let out = fields
            .generate_field("besoin", &context(), "minimal", &mut StdRng::seed_from_u64(0))
            .unwrap();
        let line = out.to_record().to_json_line().unwrap();
        let json: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert_eq!(json["field"], "besoin");
        assert_eq!(json["parsed_response"], "x");
        assert!(json["error"].is_null());
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_schema_generation() {
        let schema = FieldGeneration::schema_as_json().unwrap();
        assert!(schema.contains("raw_response"));
        assert!(schema.contains("resolved_strategy"));
    }

    #[test]
    fn test_settings_validation() {
        assert!(GenerationSettings::default().validate().is_ok());

        let bad = GenerationSettings {
            top_p: 1.5,
            ..GenerationSettings::default()
        };
        assert!(bad.validate().is_err());
    }
}
