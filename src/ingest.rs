use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, info};

use crate::models::Record;

/// Column layout of the wellness survey export.
#[derive(Debug, Deserialize)]
struct SurveyRow {
    #[serde(rename = "1. Age")]
    age: Option<String>,
    #[serde(rename = "2. Gender")]
    gender: Option<String>,
    #[serde(rename = "3. University")]
    university: Option<String>,
    #[serde(rename = "4. Department")]
    department: Option<String>,
    #[serde(rename = "5. Academic Year")]
    academic_year: Option<String>,
    #[serde(rename = "6. Current CGPA")]
    cgpa: Option<String>,
    #[serde(rename = "7. Did you receive a waiver or scholarship at your university?")]
    scholarship: Option<String>,
    #[serde(rename = "Anxiety Value")]
    anxiety_value: Option<String>,
    #[serde(rename = "Anxiety Label")]
    anxiety_label: Option<String>,
    #[serde(rename = "Stress Value")]
    stress_value: Option<String>,
    #[serde(rename = "Stress Label")]
    stress_label: Option<String>,
    #[serde(rename = "Depression Value")]
    depression_value: Option<String>,
    #[serde(rename = "Depression Label")]
    depression_label: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IngestRow {
    pub record: Record,
    pub scholarship: Option<String>,
    pub anxiety_label: Option<String>,
    pub stress_label: Option<String>,
    pub depression_label: Option<String>,
}

#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub rows: Vec<IngestRow>,
    pub skipped: usize,
}

impl IngestOutcome {
    pub fn into_records(self) -> Vec<Record> {
        self.rows.into_iter().map(|row| row.record).collect()
    }
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_score(value: Option<String>) -> Option<i32> {
    present(value).and_then(|v| v.parse().ok())
}

/// Validates one survey row. Rows without age, gender or any raw score are
/// dropped rather than stored partially.
fn validate(row: SurveyRow, id: i64) -> Option<IngestRow> {
    let age = present(row.age)?;
    let gender = present(row.gender)?;
    let anxiety_score = parse_score(row.anxiety_value)?;
    let stress_score = parse_score(row.stress_value)?;
    let depression_score = parse_score(row.depression_value)?;

    Some(IngestRow {
        record: Record {
            id,
            university: present(row.university).unwrap_or_else(|| "Unknown".to_string()),
            anxiety_score,
            stress_score,
            depression_score,
            age: Some(age),
            gender: Some(gender),
            department: present(row.department),
            academic_year: present(row.academic_year),
            cgpa: present(row.cgpa),
        },
        scholarship: present(row.scholarship),
        anxiety_label: present(row.anxiety_label),
        stress_label: present(row.stress_label),
        depression_label: present(row.depression_label),
    })
}

/// Reads a survey export. Ids are assigned sequentially from 1 in file order,
/// matching what a fresh `BIGSERIAL` table hands out.
pub fn read_csv(path: &Path) -> anyhow::Result<IngestOutcome> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut outcome = IngestOutcome::default();

    for (line, result) in reader.deserialize::<SurveyRow>().enumerate() {
        let row = result.with_context(|| format!("malformed row {}", line + 1))?;
        let next_id = outcome.rows.len() as i64 + 1;
        match validate(row, next_id) {
            Some(valid) => outcome.rows.push(valid),
            None => {
                debug!(row = line + 1, "skipping row with missing mandatory attributes");
                outcome.skipped += 1;
            }
        }
    }

    info!(
        parsed = outcome.rows.len(),
        skipped = outcome.skipped,
        "parsed survey export {}",
        path.display()
    );
    Ok(outcome)
}

/// Small fixed record set used by `seed` and in tests.
pub fn seed_records() -> Vec<Record> {
    let rows = vec![
        (1, "Independent University, Bangladesh (IUB)", 10, 5, 2, "CSE"),
        (2, "Independent University, Bangladesh (IUB)", 2, 8, 9, "BBA"),
        (3, "Independent University, Bangladesh (IUB)", 7, 7, 7, "CSE"),
        (4, "North South University (NSU)", 15, 12, 18, "EEE"),
        (5, "North South University (NSU)", 4, 20, 6, "Economics"),
        (6, "North South University (NSU)", 9, 3, 11, "CSE"),
        (7, "BRAC University", 18, 21, 14, "Architecture"),
        (8, "BRAC University", 0, 6, 1, "BBA"),
        (9, "BRAC University", 12, 12, 12, "Pharmacy"),
        (10, "Independent University, Bangladesh (IUB)", 6, 17, 20, "English"),
        (11, "North South University (NSU)", 21, 9, 3, "EEE"),
        (12, "BRAC University", 3, 14, 22, "CSE"),
    ];

    rows.into_iter()
        .map(|(id, university, anxiety, stress, depression, department)| {
            let mut record = Record::new(id, university, anxiety, stress, depression);
            record.age = Some("18-22".to_string());
            record.gender = Some(if id % 2 == 0 { "Female" } else { "Male" }.to_string());
            record.department = Some(department.to_string());
            record
        })
        .collect()
}
