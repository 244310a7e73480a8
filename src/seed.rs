//! Job definitions loaded from a file for the `run` command, plus the
//! built-in set used by `demo`.

use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::error::RelayError;
use crate::store::{FIELD_MESSAGES, MemoryJobStore};

/// One job as written in a seed file. `messages` is kept as raw JSON so that
/// malformed payloads reach the dispatcher unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobSeed {
    #[serde(default)]
    pub messages: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobSeedFile {
    #[serde(default)]
    pub jobs: Vec<JobSeed>,
}

impl JobSeedFile {
    /// Parse a `.json` or `.toml` file, chosen by extension.
    pub fn load(path: &Path) -> Result<Self, RelayError> {
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(serde_json::from_str(&contents)?),
            Some("toml") => Ok(toml::from_str(&contents)?),
            _ => Err(RelayError::Config(format!(
                "unsupported job file {}: expected .json or .toml",
                path.display()
            ))),
        }
    }

    /// Built-in jobs covering the interesting paths through the engine.
    pub fn demo() -> Self {
        let long = format!("Long notice: {}", "lorem ipsum ".repeat(30));
        let jobs = [
            json!([
                {"phone": "+1 555 0100", "message": "Appointment confirmed&See you at 10:00", "person": {"name": "Ana"}},
                {"phone": "5550101", "message": "Your case was updated", "caseNumber": "C-1042"}
            ]),
            json!([
                {"phone": "555 0102", "message": "Reminder sent"},
                {"phone": "not-a-number", "message": "This one cannot be sent"}
            ]),
            json!([
                {"phone": "+48 600 100 200", "message": long}
            ]),
            json!("oops"),
        ];
        Self {
            jobs: jobs
                .into_iter()
                .map(|messages| JobSeed {
                    messages: Some(messages),
                    extra: Map::new(),
                })
                .collect(),
        }
    }

    /// Insert every job as `pending` and return the ids in file order.
    pub fn seed(&self, store: &MemoryJobStore) -> Vec<String> {
        self.jobs
            .iter()
            .map(|job| {
                let mut fields = job.extra.clone();
                if let Some(messages) = &job.messages {
                    fields.insert(FIELD_MESSAGES.to_string(), messages.clone());
                }
                store.insert_job(fields)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::JobStatus;
    use std::io::Write;

    fn file_with(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_json_jobs() {
        let file = file_with(
            ".json",
            r#"{"jobs": [{"messages": [{"phone": "555", "message": "hi"}], "owner": "ops"}, {}]}"#,
        );
        let seeds = JobSeedFile::load(file.path()).unwrap();
        assert_eq!(seeds.jobs.len(), 2);
        assert!(seeds.jobs[0].messages.as_ref().unwrap().is_array());
        assert_eq!(seeds.jobs[0].extra["owner"], "ops");
        assert!(seeds.jobs[1].messages.is_none());
    }

    #[test]
    fn loads_toml_jobs() {
        let file = file_with(
            ".toml",
            r#"
            [[jobs]]
            messages = [{ phone = "555", message = "hi&bye" }]

            [[jobs]]
            messages = "oops"
            "#,
        );
        let seeds = JobSeedFile::load(file.path()).unwrap();
        assert_eq!(seeds.jobs.len(), 2);
        assert_eq!(seeds.jobs[0].messages.as_ref().unwrap()[0]["message"], "hi&bye");
        assert_eq!(seeds.jobs[1].messages, Some(json!("oops")));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let file = file_with(".yaml", "jobs: []");
        assert!(matches!(
            JobSeedFile::load(file.path()),
            Err(RelayError::Config(_))
        ));
    }

    #[test]
    fn seeding_inserts_pending_jobs() {
        let store = MemoryJobStore::new();
        let ids = JobSeedFile::demo().seed(&store);
        assert_eq!(ids.len(), 4);
        for id in &ids {
            assert_eq!(store.get(id).unwrap().status(), Some(JobStatus::Pending));
        }
        assert_eq!(store.get(&ids[3]).unwrap().raw_messages(), Some(&json!("oops")));
    }
}
