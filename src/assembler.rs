use crate::context::{FieldValue, GenerationContext, TableRow};
use crate::schema::FieldRegistry;
use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// How many extra random fields the `Full` strategy appends.
pub const FULL_EXTRA_FIELDS: RangeInclusive<usize> = 3..=5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[schemars(description = "Metadata plus the two closest relevant fields; no randomness")]
    Minimal,

    #[schemars(description = "Metadata, three relevant fields and one random extra field")]
    Related,

    #[schemars(description = "Metadata, two relevant fields and three to five random extra fields")]
    Full,
}

impl Strategy {
    /// Resolves a request tag. Unknown tags fall back to `Related`.
    pub fn from_request_tag(tag: &str) -> Self {
        match tag {
            "minimal" => Strategy::Minimal,
            "related" | "smart" | "medium" => Strategy::Related,
            "full" | "debug" => Strategy::Full,
            _ => Strategy::Related,
        }
    }

    /// Length of the ranked relevant-field prefix considered.
    pub fn relevant_prefix(self) -> usize {
        match self {
            Strategy::Minimal => 2,
            Strategy::Related => 3,
            Strategy::Full => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Minimal => "minimal",
            Strategy::Related => "medium",
            Strategy::Full => "full",
        }
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Related
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBlock {
    pub field: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledContext {
    pub blocks: Vec<ContextBlock>,
    /// Fields consulted, in inclusion order.
    pub used_fields: Vec<String>,
}

impl AssembledContext {
    /// Newline-joined blocks, ready for [`crate::prompt::compile_prompt`].
    pub fn render(&self) -> String {
        self.blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn contains(&self, field: &str) -> bool {
        self.used_fields.iter().any(|f| f == field)
    }
}

/// Chooses which known field values are shown to the model for a target
/// field and formats them into the context block.
pub struct ContextAssembler<'r> {
    registry: &'r FieldRegistry,
}

impl<'r> ContextAssembler<'r> {
    pub fn new(registry: &'r FieldRegistry) -> Self {
        Self { registry }
    }

    pub fn assemble<R: Rng + ?Sized>(
        &self,
        target: &str,
        context: &GenerationContext,
        strategy: Strategy,
        rng: &mut R,
    ) -> AssembledContext {
        let context = context.canonicalized();
        let mut out = AssembledContext::default();

        for &field in self.registry.always_included() {
            if field == target {
                continue;
            }
            let Some(value) = context.get(field).filter(|v| !v.is_blank()) else {
                continue;
            };
            if let Some(text) = self.format_block(field, value) {
                out.blocks.push(ContextBlock {
                    field: field.to_string(),
                    text,
                });
            }
            out.used_fields.push(field.to_string());
        }

        let ranked = self.registry.relevant_fields(target);
        let relevant = &ranked[..ranked.len().min(strategy.relevant_prefix())];

        for &field in relevant {
            if field != target {
                self.include(&mut out, field, &context);
            }
        }

        if strategy == Strategy::Minimal {
            return out;
        }

        let mut pool: Vec<&str> = self
            .registry
            .generation_order()
            .iter()
            .copied()
            .filter(|f| *f != target && !relevant.contains(f) && !out.contains(f))
            .collect();

        match strategy {
            Strategy::Related => {
                if let Some(&field) = pool.choose(rng) {
                    debug!("Random extra field for {}: {}", target, field);
                    self.include(&mut out, field, &context);
                }
            }
            Strategy::Full => {
                pool.shuffle(rng);
                let take = rng.gen_range(FULL_EXTRA_FIELDS);
                for &field in pool.iter().take(take) {
                    self.include(&mut out, field, &context);
                }
            }
            Strategy::Minimal => {}
        }

        out
    }

    /// Rows as newline-joined pipe lines, columns in schema order.
    pub fn format_table(&self, field: &str, rows: &[TableRow]) -> String {
        let width = self
            .registry
            .table_layout(field)
            .map(|layout| layout.columns.len())
            .unwrap_or(0);

        rows.iter()
            .map(|row| row.to_pipe_line(width))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn format_block(&self, field: &str, value: &FieldValue) -> Option<String> {
        match value {
            FieldValue::Rows(rows) if self.registry.is_tabular(field) => {
                let table = self.format_table(field, rows);
                if table.is_empty() {
                    None
                } else {
                    Some(format!("{}:\n{}", field, table))
                }
            }
            other => Some(format!("{}: {}", field, other)),
        }
    }

    fn include(&self, out: &mut AssembledContext, field: &str, context: &GenerationContext) {
        if out.contains(field) {
            return;
        }
        let Some(value) = context.get(field) else {
            return;
        };
        if let Some(text) = self.format_block(field, value) {
            out.blocks.push(ContextBlock {
                field: field.to_string(),
                text,
            });
            out.used_fields.push(field.to_string());
        }
    }
}
