use crate::error::{Result, ScribeError};
use crate::prompt::{mark_response, task_block, END_MARKER, START_MARKER};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

pub const USER_ROLE: &str = "user";
pub const ASSISTANT_ROLE: &str = "assistant";

/// Seed used by [`split_dataset`] when the caller does not pick one.
pub const DEFAULT_SPLIT_SEED: u64 = 42;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: USER_ROLE.to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ASSISTANT_ROLE.to_string(),
            content: content.into(),
        }
    }
}

/// One line of the training JSONL: `{"messages": [user, assistant]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingRecord {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl TrainingRecord {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(user), ChatMessage::assistant(assistant)],
        }
    }

    /// Builds a record whose user turn matches what inference sends inside
    /// the instruction framing, with the answer wrapped in markers.
    pub fn from_generation(task: &str, context_block: &str, response: &str) -> Self {
        Self::new(task_block(task, context_block), mark_response(response))
    }

    /// `(user, assistant)` contents when the record has that exact shape.
    pub fn turns(&self) -> Option<(&str, &str)> {
        match self.messages.as_slice() {
            [user, assistant] if user.role == USER_ROLE && assistant.role == ASSISTANT_ROLE => {
                Some((user.content.as_str(), assistant.content.as_str()))
            }
            _ => None,
        }
    }

    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Why a record was left out of the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordRejection {
    #[error("expected 2 messages, found {0}")]
    MessageCount(usize),

    #[error("expected roles user/assistant, found {first}/{second}")]
    Roles { first: String, second: String },

    #[error("assistant turn is not wrapped in <START>...<END>")]
    MissingMarkers,
}

/// Checks shape, roles and the marker framing of the assistant turn.
pub fn validate_record(record: &TrainingRecord) -> std::result::Result<(), RecordRejection> {
    let [user, assistant] = record.messages.as_slice() else {
        return Err(RecordRejection::MessageCount(record.messages.len()));
    };

    if user.role != USER_ROLE || assistant.role != ASSISTANT_ROLE {
        return Err(RecordRejection::Roles {
            first: user.role.clone(),
            second: assistant.role.clone(),
        });
    }

    let content = assistant.content.as_str();
    if !content.starts_with(START_MARKER) || !content.ends_with(END_MARKER) {
        return Err(RecordRejection::MissingMarkers);
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetStats {
    /// Records kept.
    pub valid: usize,
    /// Well-formed JSON that failed [`validate_record`].
    pub invalid: usize,
    /// Lines that were not valid JSON records.
    pub error: usize,
}

impl DatasetStats {
    pub fn processed(&self) -> usize {
        self.valid + self.invalid + self.error
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadedDataset {
    pub records: Vec<TrainingRecord>,
    pub stats: DatasetStats,
}

/// Reads JSONL training data, keeping valid records and counting the rest.
#[derive(Debug, Clone, Default)]
pub struct DatasetLoader;

impl DatasetLoader {
    pub fn new() -> Self {
        Self
    }

    /// Loads from any buffered reader. Blank lines are ignored; malformed
    /// lines and rejected records are counted, never fatal.
    pub fn load<R: BufRead>(&self, reader: R, source: &str) -> Result<LoadedDataset> {
        let mut dataset = LoadedDataset::default();

        for (line_number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let record: TrainingRecord = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(e) => {
                    warn!("{}:{} is not a JSON record: {}", source, line_number + 1, e);
                    dataset.stats.error += 1;
                    continue;
                }
            };

            match validate_record(&record) {
                Ok(()) => {
                    dataset.records.push(record);
                    dataset.stats.valid += 1;
                }
                Err(reason) => {
                    warn!("{}:{} rejected: {}", source, line_number + 1, reason);
                    dataset.stats.invalid += 1;
                }
            }
        }

        info!(
            "Loaded {} - valid: {}, invalid: {}, errors: {}",
            source, dataset.stats.valid, dataset.stats.invalid, dataset.stats.error
        );

        Ok(dataset)
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<LoadedDataset> {
        let path = path.as_ref();
        let file = File::open(path)?;
        self.load(BufReader::new(file), &path.display().to_string())
    }

    /// Like [`DatasetLoader::load_file`] but fails when nothing usable was
    /// found.
    pub fn load_non_empty(&self, path: impl AsRef<Path>) -> Result<LoadedDataset> {
        let path = path.as_ref();
        let dataset = self.load_file(path)?;
        if dataset.records.is_empty() {
            return Err(ScribeError::EmptyDataset(path.display().to_string()));
        }
        Ok(dataset)
    }
}

/// Shuffles with a fixed seed and splits off the trailing `val_fraction`
/// as the validation set.
pub fn split_dataset(
    mut records: Vec<TrainingRecord>,
    val_fraction: f64,
    seed: u64,
) -> (Vec<TrainingRecord>, Vec<TrainingRecord>) {
    let val_fraction = if val_fraction.is_finite() {
        val_fraction.clamp(0.0, 1.0)
    } else {
        warn!("Validation fraction {} is not finite, using 0", val_fraction);
        0.0
    };

    let mut rng = StdRng::seed_from_u64(seed);
    records.shuffle(&mut rng);

    let split_at = (records.len() as f64 * (1.0 - val_fraction)) as usize;
    let validation = records.split_off(split_at.min(records.len()));

    info!(
        "Split dataset - train: {}, validation: {}",
        records.len(),
        validation.len()
    );

    (records, validation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn record_line(user: &str, assistant: &str) -> String {
        TrainingRecord::new(user, assistant).to_json_line().unwrap()
    }

    #[test]
    fn test_from_generation_shape() {
        let record = TrainingRecord::from_generation("risques", "client: ACME", "a|b|c");
        let (user, assistant) = record.turns().unwrap();

        assert_eq!(user, "<TASK>risques</TASK>\n<CONTEXT>\nclient: ACME\n</CONTEXT>");
        assert_eq!(assistant, "<START>a|b|c<END>");
        assert!(validate_record(&record).is_ok());
    }

    #[test]
    fn test_rejections() {
        let one = TrainingRecord {
            messages: vec![ChatMessage::user("x")],
        };
        assert_eq!(validate_record(&one), Err(RecordRejection::MessageCount(1)));

        let swapped = TrainingRecord {
            messages: vec![ChatMessage::assistant("x"), ChatMessage::user("y")],
        };
        assert!(matches!(
            validate_record(&swapped),
            Err(RecordRejection::Roles { .. })
        ));

        let unmarked = TrainingRecord::new("x", "plain answer");
        assert_eq!(validate_record(&unmarked), Err(RecordRejection::MissingMarkers));

        let half = TrainingRecord::new("x", "<START>answer");
        assert_eq!(validate_record(&half), Err(RecordRejection::MissingMarkers));
    }

    #[test]
    fn test_markers_must_frame_raw_content() {
        for content in ["  <START>answer<END>", "<START>answer<END>\n", " <START>answer<END> "] {
            let record = TrainingRecord::new("x", content);
            assert_eq!(
                validate_record(&record),
                Err(RecordRejection::MissingMarkers),
                "{:?}",
                content
            );
        }
    }

    #[test]
    fn test_loader_counts() {
        let data = [
            record_line("<TASK>a</TASK>", "<START>ok<END>"),
            String::new(),
            "{not json".to_string(),
            record_line("<TASK>b</TASK>", "no markers"),
            r#"{"other": 1}"#.to_string(),
            record_line("<TASK>c</TASK>", "<START>ok too<END>"),
        ]
        .join("\n");

        let dataset = DatasetLoader::new()
            .load(Cursor::new(data), "memory")
            .unwrap();

        assert_eq!(dataset.records.len(), 2);
        assert_eq!(
            dataset.stats,
            DatasetStats {
                valid: 2,
                invalid: 2,
                error: 1
            }
        );
        assert_eq!(dataset.stats.processed(), 5);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = DatasetLoader::new().load_file("/definitely/not/here.jsonl");
        assert!(matches!(result, Err(ScribeError::Io(_))));
    }

    #[test]
    fn test_split_is_seeded() {
        let records: Vec<TrainingRecord> = (0..10)
            .map(|i| TrainingRecord::new(format!("u{}", i), "<START>a<END>"))
            .collect();

        let (train_a, val_a) = split_dataset(records.clone(), 0.2, DEFAULT_SPLIT_SEED);
        let (train_b, val_b) = split_dataset(records, 0.2, DEFAULT_SPLIT_SEED);

        assert_eq!(train_a.len(), 8);
        assert_eq!(val_a.len(), 2);
        assert_eq!(train_a, train_b);
        assert_eq!(val_a, val_b);
    }

    #[test]
    fn test_split_extremes() {
        let records = vec![TrainingRecord::new("u", "<START>a<END>"); 3];

        let (train, val) = split_dataset(records.clone(), 0.0, 1);
        assert_eq!((train.len(), val.len()), (3, 0));

        let (train, val) = split_dataset(records, 1.0, 1);
        assert_eq!((train.len(), val.len()), (0, 3));
    }
}
