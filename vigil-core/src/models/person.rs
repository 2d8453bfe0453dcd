use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonStatus {
    Missing,
    Found,
    Active,
}

impl PersonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonStatus::Missing => "missing",
            PersonStatus::Found => "found",
            PersonStatus::Active => "active",
        }
    }
}

impl FromStr for PersonStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "missing" => Ok(PersonStatus::Missing),
            "found" => Ok(PersonStatus::Found),
            "active" => Ok(PersonStatus::Active),
            other => Err(format!("unknown person status '{}'", other)),
        }
    }
}

impl fmt::Display for PersonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEmbedding {
    pub vector: Vec<f32>,
    pub uploaded_at: DateTime<Utc>,
}

/// A person as seen by the matcher. Owned by person management; the registry
/// cache only holds read-only copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonRecord {
    pub id: Uuid,
    pub name: String,
    pub status: PersonStatus,
    pub priority: Priority,
    pub embeddings: Vec<StoredEmbedding>,
}

impl PersonRecord {
    /// Only missing persons with at least one embedding take part in matching.
    pub fn is_match_eligible(&self) -> bool {
        self.status == PersonStatus::Missing && !self.embeddings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(status: PersonStatus, embeddings: usize) -> PersonRecord {
        PersonRecord {
            id: Uuid::new_v4(),
            name: "Test".to_string(),
            status,
            priority: Priority::Medium,
            embeddings: (0..embeddings)
                .map(|_| StoredEmbedding {
                    vector: vec![0.0; 128],
                    uploaded_at: Utc::now(),
                })
                .collect(),
        }
    }

    #[test]
    fn eligibility_requires_missing_status_and_embeddings() {
        assert!(person(PersonStatus::Missing, 1).is_match_eligible());
        assert!(!person(PersonStatus::Missing, 0).is_match_eligible());
        assert!(!person(PersonStatus::Found, 2).is_match_eligible());
        assert!(!person(PersonStatus::Active, 2).is_match_eligible());
    }

    #[test]
    fn status_round_trips_through_text() {
        for s in [PersonStatus::Missing, PersonStatus::Found, PersonStatus::Active] {
            assert_eq!(s.as_str().parse::<PersonStatus>().unwrap(), s);
        }
        assert!("lost".parse::<PersonStatus>().is_err());
        assert_eq!("critical".parse::<Priority>().unwrap(), Priority::Critical);
    }
}
