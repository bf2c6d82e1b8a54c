use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Document metadata shown to the model for every field, in this order.
pub const ALWAYS_INCLUDED: [&str; 6] = [
    "client",
    "secteur",
    "typeProjet",
    "complexite",
    "libelle",
    "annee",
];

/// Canonical order in which the document fields are generated.
pub const FIELD_GENERATION_ORDER: [&str; 23] = [
    "contexte_proj",
    "besoin",
    "objectifs",
    "perimetre",
    "horsPerimetre",
    "contraintes",
    "risques",
    "descriptionSolution",
    "architecture",
    "composantsDimensionnement",
    "phases",
    "jalons",
    "livrables",
    "conditionsHorsCrash",
    "conditionsCrashSite",
    "resilienceApplicative",
    "praPlanDegrade",
    "sauvegardes",
    "administrationSupervision",
    "impactCO2",
    "modalitesPartage",
    "coutsConstruction",
    "coutsFonctionnement",
];

/// Closed set of tabular field types. Each kind owns one row decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    #[schemars(description = "Project constraints: type, description, criticality, mitigation")]
    Constraints,

    #[schemars(description = "Risk register: risk, probability, impact, action plan, owner")]
    Risks,

    #[schemars(description = "Delivery phases: name, description, start, end, teams, plus a derived duration")]
    Phases,

    #[schemars(description = "Deliverables: name, description, due date, owner")]
    Deliverables,

    #[schemars(description = "Milestones: name, type, date, acceptance criteria")]
    Milestones,

    #[schemars(description = "Build costs: profile, man-days, daily rate, total, code")]
    BuildCosts,

    #[schemars(description = "Run costs: item, quantity, unit price, total, code")]
    RunCosts,
}

/// Column layout of a tabular field, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    pub kind: TableKind,
    pub columns: &'static [&'static str],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    pub id: &'static str,
    /// Position in [`FIELD_GENERATION_ORDER`].
    pub position: usize,
    /// Fields most useful as context, closest first.
    pub relevant: &'static [&'static str],
    pub table: Option<TableLayout>,
}

impl FieldSchema {
    pub fn is_tabular(&self) -> bool {
        self.table.is_some()
    }
}

struct FieldDef {
    id: &'static str,
    relevant: &'static [&'static str],
    table: Option<(TableKind, &'static [&'static str])>,
}

const fn scalar(id: &'static str, relevant: &'static [&'static str]) -> FieldDef {
    FieldDef {
        id,
        relevant,
        table: None,
    }
}

const fn table(
    id: &'static str,
    relevant: &'static [&'static str],
    kind: TableKind,
    columns: &'static [&'static str],
) -> FieldDef {
    FieldDef {
        id,
        relevant,
        table: Some((kind, columns)),
    }
}

const BANKING_FIELDS: [FieldDef; 23] = [
    scalar("contexte_proj", &["besoin", "objectifs"]),
    scalar("besoin", &["contexte_proj", "objectifs", "perimetre"]),
    scalar("objectifs", &["contexte_proj", "besoin", "perimetre"]),
    scalar(
        "perimetre",
        &["contexte_proj", "besoin", "objectifs", "horsPerimetre"],
    ),
    scalar("horsPerimetre", &["perimetre", "contexte_proj"]),
    table(
        "contraintes",
        &["contexte_proj", "besoin", "complexite"],
        TableKind::Constraints,
        &["type", "description", "criticité", "mitigation"],
    ),
    table(
        "risques",
        &["contraintes", "contexte_proj", "objectifs"],
        TableKind::Risks,
        &["risque", "probabilité", "impact", "planActions", "responsable"],
    ),
    scalar("descriptionSolution", &["besoin", "objectifs", "architecture"]),
    scalar(
        "architecture",
        &["descriptionSolution", "besoin", "composantsDimensionnement"],
    ),
    scalar(
        "composantsDimensionnement",
        &["architecture", "perimetre", "plageService"],
    ),
    table(
        "phases",
        &["perimetre", "objectifs", "complexite"],
        TableKind::Phases,
        &["phase", "description", "dateDébut", "dateFin", "équipes"],
    ),
    table(
        "jalons",
        &["phases", "livrables", "objectifs"],
        TableKind::Milestones,
        &["nom", "type", "date", "critères"],
    ),
    table(
        "livrables",
        &["phases", "objectifs", "perimetre"],
        TableKind::Deliverables,
        &["nom", "description", "date", "responsable"],
    ),
    scalar(
        "conditionsHorsCrash",
        &["architecture", "plageService", "resilienceApplicative"],
    ),
    scalar(
        "conditionsCrashSite",
        &["conditionsHorsCrash", "dicp", "dima", "pdma"],
    ),
    scalar(
        "resilienceApplicative",
        &["architecture", "conditionsHorsCrash", "praPlanDegrade"],
    ),
    scalar("praPlanDegrade", &["resilienceApplicative", "dicp", "dima"]),
    scalar("sauvegardes", &["pdma", "rgpd", "administrationSupervision"]),
    scalar("administrationSupervision", &["plageService", "tauxContingence"]),
    scalar("impactCO2", &["composantsDimensionnement", "architecture"]),
    scalar("modalitesPartage", &["rgpd", "psee", "lienDocumentation"]),
    table(
        "coutsConstruction",
        &["phases", "perimetre", "complexite"],
        TableKind::BuildCosts,
        &["profil", "nombre_jh", "tjm", "total", "code"],
    ),
    table(
        "coutsFonctionnement",
        &["coutsConstruction", "architecture", "administrationSupervision"],
        TableKind::RunCosts,
        &["poste", "quantite", "coutUnitaire", "total", "code"],
    ),
];

/// Immutable field metadata shared by the assembler and the decoder.
///
/// Built once at start-up and handed out by reference; nothing mutates it
/// afterwards, so concurrent readers need no locking.
#[derive(Debug, Clone)]
pub struct FieldRegistry {
    fields: BTreeMap<&'static str, FieldSchema>,
    order: Vec<&'static str>,
    always_included: Vec<&'static str>,
}

impl FieldRegistry {
    /// The banking project document schema.
    pub fn banking() -> Self {
        let fields = BANKING_FIELDS
            .iter()
            .enumerate()
            .map(|(position, def)| {
                let schema = FieldSchema {
                    id: def.id,
                    position,
                    relevant: def.relevant,
                    table: def
                        .table
                        .map(|(kind, columns)| TableLayout { kind, columns }),
                };
                (def.id, schema)
            })
            .collect();

        Self {
            fields,
            order: FIELD_GENERATION_ORDER.to_vec(),
            always_included: ALWAYS_INCLUDED.to_vec(),
        }
    }

    pub fn field(&self, id: &str) -> Option<&FieldSchema> {
        self.fields.get(id)
    }

    /// Ranked relevant fields; unknown identifiers yield an empty slice.
    pub fn relevant_fields(&self, id: &str) -> &[&'static str] {
        self.fields.get(id).map(|f| f.relevant).unwrap_or(&[])
    }

    pub fn table_layout(&self, id: &str) -> Option<&TableLayout> {
        self.fields.get(id).and_then(|f| f.table.as_ref())
    }

    pub fn is_tabular(&self, id: &str) -> bool {
        self.table_layout(id).is_some()
    }

    pub fn generation_order(&self) -> &[&'static str] {
        &self.order
    }

    pub fn always_included(&self) -> &[&'static str] {
        &self.always_included
    }

    /// Tabular fields in generation order.
    pub fn table_fields(&self) -> Vec<&'static str> {
        self.order
            .iter()
            .copied()
            .filter(|id| self.is_tabular(id))
            .collect()
    }
}

impl Default for FieldRegistry {
    fn default() -> Self {
        Self::banking()
    }
}
