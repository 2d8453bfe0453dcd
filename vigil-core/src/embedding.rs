//! Face embeddings: fixed-length feature vectors produced by the upstream
//! face-encoding model.

use serde::{Deserialize, Serialize};

use crate::error::MatchError;

/// Length of every face embedding accepted by the matcher.
pub const EMBEDDING_DIM: usize = 128;

/// A validated query embedding: exactly [`EMBEDDING_DIM`] finite values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Result<Self, MatchError> {
        if values.len() != EMBEDDING_DIM {
            return Err(MatchError::InvalidEncoding(format!(
                "expected {}-dimensional vector, got {} values",
                EMBEDDING_DIM,
                values.len()
            )));
        }
        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            return Err(MatchError::InvalidEncoding(format!(
                "element {} is not a finite number",
                pos
            )));
        }
        Ok(Self(values))
    }

    /// Validate an untyped JSON value, so wrong-typed input is reported as
    /// `InvalidEncoding` instead of a transport-level rejection.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, MatchError> {
        let items = value.as_array().ok_or_else(|| {
            MatchError::InvalidEncoding(format!(
                "a {}-dimensional numeric array is required",
                EMBEDDING_DIM
            ))
        })?;

        let values = items
            .iter()
            .enumerate()
            .map(|(i, v)| {
                v.as_f64().map(|f| f as f32).ok_or_else(|| {
                    MatchError::InvalidEncoding(format!("element {} is not a number", i))
                })
            })
            .collect::<Result<Vec<f32>, _>>()?;

        Self::new(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.0.clone()
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = MatchError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(e: Embedding) -> Self {
        e.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_exactly_128_values() {
        assert!(Embedding::new(vec![0.1; EMBEDDING_DIM]).is_ok());
    }

    #[test]
    fn rejects_wrong_length() {
        let err = Embedding::new(vec![0.1; 127]).unwrap_err();
        assert!(matches!(err, MatchError::InvalidEncoding(_)));
        assert!(Embedding::new(vec![]).is_err());
        assert!(Embedding::new(vec![0.0; 129]).is_err());
    }

    #[test]
    fn rejects_non_finite_values() {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[5] = f32::NAN;
        let err = Embedding::new(v).unwrap_err();
        assert_eq!(
            err,
            MatchError::InvalidEncoding("element 5 is not a finite number".to_string())
        );
    }

    #[test]
    fn from_json_rejects_non_arrays_and_strings() {
        assert!(Embedding::from_json(&json!("abc")).is_err());
        assert!(Embedding::from_json(&json!(null)).is_err());

        let mut items: Vec<serde_json::Value> = vec![json!(0.5); EMBEDDING_DIM];
        items[3] = json!("0.5");
        let err = Embedding::from_json(&serde_json::Value::Array(items)).unwrap_err();
        assert_eq!(
            err,
            MatchError::InvalidEncoding("element 3 is not a number".to_string())
        );
    }

    #[test]
    fn from_json_accepts_integers_and_floats() {
        let mut items: Vec<serde_json::Value> = vec![json!(0.25); EMBEDDING_DIM];
        items[0] = json!(1);
        let e = Embedding::from_json(&serde_json::Value::Array(items)).unwrap();
        assert_eq!(e.as_slice()[0], 1.0);
        assert_eq!(e.as_slice()[1], 0.25);
    }

    #[test]
    fn deserialize_validates_length() {
        let short: Result<Embedding, _> = serde_json::from_value(json!([0.1, 0.2]));
        assert!(short.is_err());
    }
}
