use crate::context::{map_request_field, TableRow};
use crate::prompt::extract_marked;
use crate::schema::{FieldRegistry, TableKind};
use crate::utils::{
    business_days_between, extract_date, extract_number, format_amount, map_criticality,
    map_impact, map_probability, DEFAULT_PHASE_DAYS,
};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum DecodedValue {
    Rows(Vec<TableRow>),
    Text(String),
}

impl DecodedValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            DecodedValue::Text(text) => Some(text),
            DecodedValue::Rows(_) => None,
        }
    }

    pub fn as_rows(&self) -> Option<&[TableRow]> {
        match self {
            DecodedValue::Rows(rows) => Some(rows),
            DecodedValue::Text(_) => None,
        }
    }
}

/// Per-kind row parsing used by [`decode_rows`].
pub trait RowDecoder {
    /// Lines considered, after blank lines are dropped.
    fn max_rows(&self) -> usize;

    /// Columns a line needs for [`RowDecoder::full_row`].
    fn min_columns(&self) -> usize;

    fn full_row(&self, parts: &[&str]) -> TableRow;

    /// Row for a short line; `index` is the zero-based line number.
    fn fallback_row(&self, parts: &[&str], index: usize) -> TableRow;
}

fn part<'a>(parts: &[&'a str], index: usize) -> Option<&'a str> {
    parts.get(index).copied()
}

fn part_or<'a>(parts: &[&'a str], index: usize, default: &'a str) -> &'a str {
    part(parts, index).unwrap_or(default)
}

fn nonempty_or<'a>(parts: &[&'a str], index: usize, default: &'a str) -> &'a str {
    part(parts, index).filter(|p| !p.is_empty()).unwrap_or(default)
}

/// Splits text into pipe-delimited rows and hands each line to `decoder`.
///
/// Empty text yields no rows. Non-empty text without any content line
/// yields a single default row.
pub fn decode_rows(decoder: &dyn RowDecoder, text: &str) -> Vec<TableRow> {
    if text.is_empty() {
        return Vec::new();
    }

    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(decoder.max_rows())
        .collect();

    if lines.is_empty() {
        return vec![decoder.fallback_row(&[], 0)];
    }

    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let parts: Vec<&str> = line.split('|').map(str::trim).collect();
            let row = if parts.len() >= decoder.min_columns() {
                decoder.full_row(&parts)
            } else {
                decoder.fallback_row(&parts, i)
            };
            debug!("Line {} ({} columns) -> {:?}", i + 1, parts.len(), row.cells());
            row
        })
        .collect()
}

pub struct ConstraintRows;

impl RowDecoder for ConstraintRows {
    fn max_rows(&self) -> usize {
        5
    }

    fn min_columns(&self) -> usize {
        3
    }

    fn full_row(&self, parts: &[&str]) -> TableRow {
        TableRow::from_cells([
            parts[0],
            parts[1],
            map_criticality(parts[2]),
            nonempty_or(parts, 3, "À définir"),
        ])
    }

    fn fallback_row(&self, parts: &[&str], index: usize) -> TableRow {
        TableRow::from_cells([
            part(parts, 0)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Contrainte {}", index + 1)),
            part_or(parts, 1, "Description à définir").to_string(),
            "Moyen".to_string(),
            "À définir".to_string(),
        ])
    }
}

pub struct RiskRows;

impl RowDecoder for RiskRows {
    fn max_rows(&self) -> usize {
        6
    }

    fn min_columns(&self) -> usize {
        4
    }

    fn full_row(&self, parts: &[&str]) -> TableRow {
        TableRow::from_cells([
            parts[0],
            map_probability(parts[1]),
            map_impact(parts[2]),
            parts[3],
            nonempty_or(parts, 4, "Chef de projet"),
        ])
    }

    fn fallback_row(&self, parts: &[&str], index: usize) -> TableRow {
        TableRow::from_cells([
            part(parts, 0)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Risque {}", index + 1)),
            part(parts, 1).map(map_probability).unwrap_or("Moyenne").to_string(),
            part(parts, 2).map(map_impact).unwrap_or("Moyen").to_string(),
            "Plan d'actions à définir".to_string(),
            "Chef de projet".to_string(),
        ])
    }
}

/// Phase rows keep the wire columns and append the business-day duration.
pub struct PhaseRows;

impl RowDecoder for PhaseRows {
    fn max_rows(&self) -> usize {
        8
    }

    fn min_columns(&self) -> usize {
        4
    }

    fn full_row(&self, parts: &[&str]) -> TableRow {
        let days = business_days_between(parts[2], parts[3]);
        TableRow::from_cells([
            parts[0].to_string(),
            parts[1].to_string(),
            parts[2].to_string(),
            parts[3].to_string(),
            nonempty_or(parts, 4, "Équipe projet").to_string(),
            days.to_string(),
        ])
    }

    fn fallback_row(&self, parts: &[&str], index: usize) -> TableRow {
        TableRow::from_cells([
            part(parts, 0)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Phase {}", index + 1)),
            part_or(parts, 1, "Description à définir").to_string(),
            String::new(),
            String::new(),
            "Équipe projet".to_string(),
            DEFAULT_PHASE_DAYS.to_string(),
        ])
    }
}

pub struct DeliverableRows;

impl RowDecoder for DeliverableRows {
    fn max_rows(&self) -> usize {
        6
    }

    fn min_columns(&self) -> usize {
        3
    }

    fn full_row(&self, parts: &[&str]) -> TableRow {
        TableRow::from_cells([
            parts[0].to_string(),
            parts[1].to_string(),
            extract_date(parts[2]),
            nonempty_or(parts, 3, "NOTRE ENTREPRISE").to_string(),
        ])
    }

    fn fallback_row(&self, parts: &[&str], index: usize) -> TableRow {
        TableRow::from_cells([
            part(parts, 0)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Livrable {}", index + 1)),
            part_or(parts, 1, "Document").to_string(),
            String::new(),
            "NOTRE ENTREPRISE".to_string(),
        ])
    }
}

pub struct MilestoneRows;

impl RowDecoder for MilestoneRows {
    fn max_rows(&self) -> usize {
        5
    }

    fn min_columns(&self) -> usize {
        3
    }

    fn full_row(&self, parts: &[&str]) -> TableRow {
        TableRow::from_cells([
            parts[0].to_string(),
            parts[1].to_string(),
            extract_date(parts[2]),
            nonempty_or(parts, 3, "Critères à définir").to_string(),
        ])
    }

    fn fallback_row(&self, parts: &[&str], index: usize) -> TableRow {
        TableRow::from_cells([
            part(parts, 0)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Jalon {}", index + 1)),
            "Validation".to_string(),
            String::new(),
            "Critères à définir".to_string(),
        ])
    }
}

/// Construction costs: total = man-days x daily rate.
pub struct BuildCostRows;

impl BuildCostRows {
    fn row(profile: String, days: u64, rate: u64, code: &str) -> TableRow {
        TableRow::from_cells([
            profile,
            days.to_string(),
            rate.to_string(),
            days.saturating_mul(rate).to_string(),
            code.to_string(),
        ])
    }
}

impl RowDecoder for BuildCostRows {
    fn max_rows(&self) -> usize {
        7
    }

    fn min_columns(&self) -> usize {
        3
    }

    fn full_row(&self, parts: &[&str]) -> TableRow {
        Self::row(
            parts[0].to_string(),
            extract_number(parts[1]),
            extract_number(parts[2]),
            part_or(parts, 4, ""),
        )
    }

    fn fallback_row(&self, parts: &[&str], index: usize) -> TableRow {
        Self::row(
            part(parts, 0)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Profil {}", index + 1)),
            part(parts, 1).map(extract_number).unwrap_or(0),
            0,
            "",
        )
    }
}

/// Operating costs: the third column is read as an annual price, shown as a
/// monthly price, and the total is quantity x monthly x 12.
pub struct RunCostRows;

impl RunCostRows {
    fn row(item: String, quantity: u64, annual: u64, code: &str) -> TableRow {
        let monthly = annual as f64 / 12.0;
        let total = quantity as f64 * monthly * 12.0;
        TableRow::from_cells([
            item,
            quantity.to_string(),
            format_amount(monthly),
            format_amount(total),
            code.to_string(),
        ])
    }
}

impl RowDecoder for RunCostRows {
    fn max_rows(&self) -> usize {
        7
    }

    fn min_columns(&self) -> usize {
        3
    }

    fn full_row(&self, parts: &[&str]) -> TableRow {
        Self::row(
            parts[0].to_string(),
            extract_number(parts[1]),
            extract_number(parts[2]),
            part_or(parts, 4, ""),
        )
    }

    fn fallback_row(&self, parts: &[&str], index: usize) -> TableRow {
        Self::row(
            part(parts, 0)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Poste {}", index + 1)),
            part(parts, 1).map(extract_number).unwrap_or(0),
            0,
            "",
        )
    }
}

impl TableKind {
    /// The row decoder for this kind of table.
    pub fn decoder(self) -> &'static dyn RowDecoder {
        match self {
            TableKind::Constraints => &ConstraintRows,
            TableKind::Risks => &RiskRows,
            TableKind::Phases => &PhaseRows,
            TableKind::Deliverables => &DeliverableRows,
            TableKind::Milestones => &MilestoneRows,
            TableKind::BuildCosts => &BuildCostRows,
            TableKind::RunCosts => &RunCostRows,
        }
    }
}

/// Decodes raw model output for a field, using the registry to tell
/// tabular fields from scalar ones.
pub struct ResponseDecoder<'r> {
    registry: &'r FieldRegistry,
}

impl<'r> ResponseDecoder<'r> {
    pub fn new(registry: &'r FieldRegistry) -> Self {
        Self { registry }
    }

    /// Scalars keep the text between the markers when both are present and
    /// the raw text verbatim otherwise. Tables are split into rows after the
    /// same marker stripping.
    pub fn decode(&self, field: &str, raw: &str) -> DecodedValue {
        let field = map_request_field(field);
        let text = extract_marked(raw).unwrap_or(raw);

        match self.registry.table_layout(field) {
            Some(layout) => DecodedValue::Rows(decode_rows(layout.kind.decoder(), text)),
            None => DecodedValue::Text(text.to_string()),
        }
    }

    pub fn decode_table(&self, kind: TableKind, raw: &str) -> Vec<TableRow> {
        decode_rows(kind.decoder(), extract_marked(raw).unwrap_or(raw))
    }
}
