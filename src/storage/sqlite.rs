use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::error::Result;
use crate::models::{
    CaseRecord, DiagnosisRecord, JudgedDifferential, NewCase, RankedDiagnosis, SemanticCategory,
    SemanticJudgement, SeverityJudgement, SeverityLevel, StoredDifferential, Verdicts,
};

const MAX_DIAGNOSIS_NAME_CHARS: usize = 512;

/// Source filter that selects every case.
pub const ALL_SOURCES: &str = "all";

pub struct Storage {
    conn: Connection,
}

impl Storage {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let storage = Self { conn };
        storage.init_db()?;
        Ok(storage)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self { conn };
        storage.init_db()?;
        Ok(storage)
    }

    fn init_db(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS cases (
                id INTEGER PRIMARY KEY,
                source TEXT NOT NULL,
                text TEXT NOT NULL,
                gold_diagnosis TEXT
            );

            CREATE TABLE IF NOT EXISTS models (
                id INTEGER PRIMARY KEY,
                name TEXT UNIQUE NOT NULL
            );

            CREATE TABLE IF NOT EXISTS prompts (
                id INTEGER PRIMARY KEY,
                name TEXT UNIQUE NOT NULL
            );

            CREATE TABLE IF NOT EXISTS differential_diagnoses (
                id INTEGER PRIMARY KEY,
                case_id INTEGER NOT NULL REFERENCES cases(id),
                model_id INTEGER NOT NULL REFERENCES models(id),
                prompt_id INTEGER NOT NULL REFERENCES prompts(id),
                raw_response TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS diagnosis_ranks (
                id INTEGER PRIMARY KEY,
                differential_diagnosis_id INTEGER NOT NULL REFERENCES differential_diagnoses(id),
                case_id INTEGER NOT NULL REFERENCES cases(id),
                rank_position INTEGER,
                predicted_diagnosis TEXT NOT NULL,
                reasoning TEXT
            );

            CREATE TABLE IF NOT EXISTS severity_judgements (
                id INTEGER PRIMARY KEY,
                differential_diagnosis_id INTEGER NOT NULL REFERENCES differential_diagnoses(id),
                judge_model_id INTEGER NOT NULL REFERENCES models(id),
                disease TEXT NOT NULL,
                severity TEXT NOT NULL,
                reasoning TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS semantic_judgements (
                id INTEGER PRIMARY KEY,
                differential_diagnosis_id INTEGER NOT NULL REFERENCES differential_diagnoses(id),
                judge_model_id INTEGER NOT NULL REFERENCES models(id),
                golden_diagnosis TEXT NOT NULL,
                diagnosis TEXT NOT NULL,
                category_code INTEGER NOT NULL,
                reasoning TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cases_source ON cases(source);
            CREATE INDEX IF NOT EXISTS idx_differential_diagnoses_case_id ON differential_diagnoses(case_id);
            CREATE INDEX IF NOT EXISTS idx_diagnosis_ranks_diagnosis_id ON diagnosis_ranks(differential_diagnosis_id);
            CREATE INDEX IF NOT EXISTS idx_severity_judgements_diagnosis_id ON severity_judgements(differential_diagnosis_id);
            CREATE INDEX IF NOT EXISTS idx_semantic_judgements_diagnosis_id ON semantic_judgements(differential_diagnosis_id);
            "#,
        )?;

        Ok(())
    }

    pub fn add_case(&self, case: &NewCase) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO cases (source, text, gold_diagnosis) VALUES (?1, ?2, ?3)",
            params![case.source, case.text, case.gold_diagnosis],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Cases in id order. `source` of [`ALL_SOURCES`] disables the filter.
    pub fn get_cases(&self, source: &str, limit: Option<usize>) -> Result<Vec<CaseRecord>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, source, text, gold_diagnosis
            FROM cases
            WHERE ?1 = 'all' OR source = ?1
            ORDER BY id
            LIMIT ?2
            "#,
        )?;

        let cases = stmt.query_map(params![source, limit], |row| {
            Ok(CaseRecord {
                id: row.get(0)?,
                source: row.get(1)?,
                text: row.get(2)?,
                gold_diagnosis: row.get(3)?,
            })
        })?;

        let cases = cases.collect::<std::result::Result<Vec<_>, _>>()?;
        tracing::debug!("Fetched {} cases for source {}", cases.len(), source);
        Ok(cases)
    }

    pub fn insert_or_fetch_model(&self, name: &str) -> Result<i64> {
        self.insert_or_fetch("models", name)
    }

    pub fn insert_or_fetch_prompt(&self, name: &str) -> Result<i64> {
        self.insert_or_fetch("prompts", name)
    }

    fn insert_or_fetch(&self, table: &str, name: &str) -> Result<i64> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT id FROM {} WHERE name = ?1", table),
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            return Ok(id);
        }

        tracing::debug!("{} not found in {}, creating it", name, table);
        self.conn.execute(
            &format!("INSERT INTO {} (name) VALUES (?1)", table),
            params![name],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Stores every record and its ranks in one transaction and returns the
    /// new differential-diagnosis ids in input order. Ranks without a
    /// diagnosis name are skipped.
    pub fn add_batch_differential_diagnoses(&mut self, records: &[DiagnosisRecord]) -> Result<Vec<i64>> {
        let tx = self.conn.transaction()?;
        let created_at = Utc::now().to_rfc3339();
        let mut ids = Vec::with_capacity(records.len());

        for record in records {
            tx.execute(
                r#"
                INSERT INTO differential_diagnoses (case_id, model_id, prompt_id, raw_response, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    record.case_id,
                    record.model_id,
                    record.prompt_id,
                    record.raw_response,
                    created_at,
                ],
            )?;
            let diagnosis_id = tx.last_insert_rowid();

            let mut stored = 0;
            for rank in &record.ranks {
                let Some(name) = rank.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
                    tracing::debug!("Skipping unnamed rank for case {}", record.case_id);
                    continue;
                };
                let name: String = name.chars().take(MAX_DIAGNOSIS_NAME_CHARS).collect();
                let reasoning = rank.reasoning.as_deref().map(str::trim);

                tx.execute(
                    r#"
                    INSERT INTO diagnosis_ranks (differential_diagnosis_id, case_id, rank_position, predicted_diagnosis, reasoning)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                    params![diagnosis_id, record.case_id, rank.rank, name, reasoning],
                )?;
                stored += 1;
            }

            tracing::debug!(
                "Stored differential diagnosis {} for case {} with {} ranks",
                diagnosis_id,
                record.case_id,
                stored
            );
            ids.push(diagnosis_id);
        }

        tx.commit()?;
        tracing::info!("Stored {} differential diagnoses", ids.len());
        Ok(ids)
    }

    pub fn get_ranks(&self, differential_diagnosis_id: i64) -> Result<Vec<RankedDiagnosis>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT rank_position, predicted_diagnosis, reasoning
            FROM diagnosis_ranks
            WHERE differential_diagnosis_id = ?1
            ORDER BY rank_position IS NULL, rank_position, id
            "#,
        )?;

        let ranks = stmt.query_map(params![differential_diagnosis_id], |row| {
            Ok(RankedDiagnosis {
                rank: row.get(0)?,
                name: row.get(1)?,
                reasoning: row.get(2)?,
            })
        })?;

        ranks.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Differentials produced by `model_name`, in id order, with their ranks.
    pub fn get_differentials(
        &self,
        source: &str,
        model_name: &str,
        limit: Option<usize>,
    ) -> Result<Vec<StoredDifferential>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = self.conn.prepare(
            r#"
            SELECT d.id, d.case_id, c.gold_diagnosis
            FROM differential_diagnoses d
            JOIN cases c ON c.id = d.case_id
            JOIN models m ON m.id = d.model_id
            WHERE m.name = ?2 AND (?1 = 'all' OR c.source = ?1)
            ORDER BY d.id
            LIMIT ?3
            "#,
        )?;

        let rows = stmt.query_map(params![source, model_name, limit], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, Option<String>>(2)?))
        })?;
        let rows = rows.collect::<std::result::Result<Vec<_>, _>>()?;

        let mut differentials = Vec::with_capacity(rows.len());
        for (id, case_id, gold_diagnosis) in rows {
            differentials.push(StoredDifferential {
                id,
                case_id,
                gold_diagnosis,
                ranks: self.get_ranks(id)?,
            });
        }

        tracing::debug!(
            "Fetched {} differentials by {} for source {}",
            differentials.len(),
            model_name,
            source
        );
        Ok(differentials)
    }

    /// Stores judge verdicts in one transaction and returns how many
    /// verdict rows were written.
    pub fn add_judgements(&mut self, judge_model_id: i64, judged: &[JudgedDifferential]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let created_at = Utc::now().to_rfc3339();
        let mut written = 0;

        for entry in judged {
            match &entry.verdicts {
                Verdicts::Severity(severity) => {
                    for judgement in &severity.judged {
                        tx.execute(
                            r#"
                            INSERT INTO severity_judgements (differential_diagnosis_id, judge_model_id, disease, severity, reasoning, created_at)
                            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                            "#,
                            params![
                                entry.differential_id,
                                judge_model_id,
                                judgement.disease,
                                judgement.severity.to_string(),
                                judgement.reasoning,
                                created_at,
                            ],
                        )?;
                        written += 1;
                    }
                }
                Verdicts::Semantic(evaluation) => {
                    for judgement in &evaluation.evaluations.judged {
                        tx.execute(
                            r#"
                            INSERT INTO semantic_judgements (differential_diagnosis_id, judge_model_id, golden_diagnosis, diagnosis, category_code, reasoning, created_at)
                            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                            "#,
                            params![
                                entry.differential_id,
                                judge_model_id,
                                evaluation.golden_diagnosis,
                                judgement.diagnosis,
                                judgement.category.code(),
                                judgement.reasoning,
                                created_at,
                            ],
                        )?;
                        written += 1;
                    }
                }
            }
        }

        tx.commit()?;
        tracing::info!("Stored {} judgements for {} differentials", written, judged.len());
        Ok(written)
    }

    pub fn get_severity_judgements(&self, differential_diagnosis_id: i64) -> Result<Vec<SeverityJudgement>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT disease, severity, reasoning
            FROM severity_judgements
            WHERE differential_diagnosis_id = ?1
            ORDER BY id
            "#,
        )?;

        let rows = stmt.query_map(params![differential_diagnosis_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, Option<String>>(2)?))
        })?;
        let rows = rows.collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(disease, severity, reasoning)| {
                SeverityLevel::parse(&severity).map(|severity| SeverityJudgement {
                    disease,
                    severity,
                    reasoning,
                })
            })
            .collect())
    }

    pub fn get_semantic_judgements(&self, differential_diagnosis_id: i64) -> Result<Vec<SemanticJudgement>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT diagnosis, category_code, reasoning
            FROM semantic_judgements
            WHERE differential_diagnosis_id = ?1
            ORDER BY id
            "#,
        )?;

        let rows = stmt.query_map(params![differential_diagnosis_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u8>(1)?, row.get::<_, Option<String>>(2)?))
        })?;
        let rows = rows.collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(diagnosis, code, reasoning)| {
                SemanticCategory::from_code(code).map(|category| SemanticJudgement {
                    diagnosis,
                    category,
                    reasoning,
                })
            })
            .collect())
    }

    pub fn count_cases(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM cases", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(source: &str, text: &str) -> NewCase {
        NewCase {
            source: source.to_string(),
            text: text.to_string(),
            gold_diagnosis: Some("Fabry disease".to_string()),
        }
    }

    fn rank(rank: u32, name: Option<&str>) -> RankedDiagnosis {
        RankedDiagnosis {
            rank: Some(rank),
            name: name.map(String::from),
            reasoning: Some(" fits ".to_string()),
        }
    }

    #[test]
    fn test_get_cases_filters_by_source() {
        let storage = Storage::in_memory().unwrap();
        storage.add_case(&case("PUMCH", "a")).unwrap();
        storage.add_case(&case("RAMEDIS", "b")).unwrap();
        storage.add_case(&case("PUMCH", "c")).unwrap();

        let pumch = storage.get_cases("PUMCH", None).unwrap();
        assert_eq!(pumch.iter().map(|c| c.text.as_str()).collect::<Vec<_>>(), vec!["a", "c"]);

        assert_eq!(storage.get_cases(ALL_SOURCES, None).unwrap().len(), 3);
        assert_eq!(storage.get_cases(ALL_SOURCES, Some(2)).unwrap().len(), 2);
        assert!(storage.get_cases("missing", None).unwrap().is_empty());
        assert_eq!(storage.count_cases().unwrap(), 3);
    }

    #[test]
    fn test_insert_or_fetch_is_idempotent() {
        let storage = Storage::in_memory().unwrap();
        let first = storage.insert_or_fetch_model("llama3-70b").unwrap();
        assert_eq!(storage.insert_or_fetch_model("llama3-70b").unwrap(), first);
        assert_ne!(storage.insert_or_fetch_model("c35sonnet").unwrap(), first);

        let prompt = storage.insert_or_fetch_prompt("dxgpt_improved").unwrap();
        assert_eq!(storage.insert_or_fetch_prompt("dxgpt_improved").unwrap(), prompt);
    }

    #[test]
    fn test_add_batch_and_get_ranks() {
        let mut storage = Storage::in_memory().unwrap();
        let case_id = storage.add_case(&case("PUMCH", "fever")).unwrap();
        let model_id = storage.insert_or_fetch_model("m").unwrap();
        let prompt_id = storage.insert_or_fetch_prompt("p").unwrap();

        let record = DiagnosisRecord {
            case_id,
            model_id,
            prompt_id,
            raw_response: "+1. Flu: fits".to_string(),
            ranks: vec![rank(2, Some("Cold")), rank(1, Some("Flu")), rank(3, None)],
        };
        let ids = storage.add_batch_differential_diagnoses(&[record]).unwrap();
        assert_eq!(ids.len(), 1);

        let ranks = storage.get_ranks(ids[0]).unwrap();
        assert_eq!(ranks.len(), 2);
        assert_eq!(ranks[0].name.as_deref(), Some("Flu"));
        assert_eq!(ranks[0].reasoning.as_deref(), Some("fits"));
        assert_eq!(ranks[1].rank, Some(2));
    }

    #[test]
    fn test_differentials_and_judgements() {
        let mut storage = Storage::in_memory().unwrap();
        let pumch = storage.add_case(&case("PUMCH", "fever")).unwrap();
        let other = storage.add_case(&case("RAMEDIS", "rash")).unwrap();
        let model_id = storage.insert_or_fetch_model("m").unwrap();
        let other_model = storage.insert_or_fetch_model("n").unwrap();
        let prompt_id = storage.insert_or_fetch_prompt("p").unwrap();

        let record = |case_id, model_id| DiagnosisRecord {
            case_id,
            model_id,
            prompt_id,
            raw_response: String::new(),
            ranks: vec![rank(1, Some("Flu")), rank(2, Some("Cold"))],
        };
        let ids = storage
            .add_batch_differential_diagnoses(&[
                record(pumch, model_id),
                record(other, model_id),
                record(pumch, other_model),
            ])
            .unwrap();

        let stored = storage.get_differentials("PUMCH", "m", None).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, ids[0]);
        assert_eq!(stored[0].gold_diagnosis.as_deref(), Some("Fabry disease"));
        assert_eq!(stored[0].diagnosis_names(), vec!["Flu", "Cold"]);
        assert_eq!(storage.get_differentials(ALL_SOURCES, "m", None).unwrap().len(), 2);
        assert_eq!(storage.get_differentials(ALL_SOURCES, "m", Some(1)).unwrap().len(), 1);

        let judge_id = storage.insert_or_fetch_model("judge").unwrap();
        let severity = JudgedDifferential {
            differential_id: ids[0],
            verdicts: Verdicts::Severity(crate::models::Judged {
                judged: vec![SeverityJudgement {
                    disease: "Flu".to_string(),
                    severity: SeverityLevel::Mild,
                    reasoning: None,
                }],
                not_judged: Vec::new(),
            }),
        };
        let semantic = JudgedDifferential {
            differential_id: ids[1],
            verdicts: Verdicts::Semantic(crate::models::SemanticEvaluation {
                golden_diagnosis: "Fabry disease".to_string(),
                evaluations: crate::models::Judged {
                    judged: vec![SemanticJudgement {
                        diagnosis: "Cold".to_string(),
                        category: SemanticCategory::NotRelated,
                        reasoning: Some("unrelated".to_string()),
                    }],
                    not_judged: Vec::new(),
                },
            }),
        };
        assert_eq!(storage.add_judgements(judge_id, &[severity, semantic]).unwrap(), 2);

        let severities = storage.get_severity_judgements(ids[0]).unwrap();
        assert_eq!(severities[0].severity, SeverityLevel::Mild);
        let semantics = storage.get_semantic_judgements(ids[1]).unwrap();
        assert_eq!(semantics[0].category, SemanticCategory::NotRelated);
        assert!(storage.get_semantic_judgements(ids[0]).unwrap().is_empty());
    }

    #[test]
    fn test_on_disk_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.db");

        {
            let storage = Storage::new(&path).unwrap();
            storage.add_case(&case("PUMCH", "a")).unwrap();
        }

        let reopened = Storage::new(&path).unwrap();
        assert_eq!(reopened.get_cases("PUMCH", None).unwrap().len(), 1);
    }
}
