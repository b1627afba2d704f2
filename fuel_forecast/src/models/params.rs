//! Hyperparameter values, bound sets and grids

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single hyperparameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

/// Hyperparameters bound to values
pub type ParamSet = BTreeMap<String, ParamValue>;

/// Candidate values per hyperparameter
pub type ParamGrid = BTreeMap<String, Vec<ParamValue>>;

/// Render a parameter set as `a=1, b=0.1`
pub fn describe(params: &ParamSet) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Typed, validated access to a [`ParamSet`].
///
/// Every lookup marks its key as known; [`ParamReader::finish`] rejects any
/// key that no lookup asked for.
pub struct ParamReader<'a> {
    family: &'a str,
    params: &'a ParamSet,
    known: Vec<&'static str>,
}

impl<'a> ParamReader<'a> {
    pub fn new(family: &'a str, params: &'a ParamSet) -> Self {
        Self {
            family,
            params,
            known: Vec::new(),
        }
    }

    fn invalid(&self, key: &str, expected: &str) -> ForecastError {
        ForecastError::InvalidParameter(format!(
            "{}: '{key}' must be {expected}, got {:?}",
            self.family, self.params[key]
        ))
    }

    pub fn float(&mut self, key: &'static str, default: f64) -> Result<f64> {
        self.known.push(key);
        match self.params.get(key) {
            None => Ok(default),
            Some(ParamValue::Float(v)) => Ok(*v),
            Some(ParamValue::Int(v)) => Ok(*v as f64),
            Some(_) => Err(self.invalid(key, "a number")),
        }
    }

    pub fn usize(&mut self, key: &'static str, default: usize) -> Result<usize> {
        self.known.push(key);
        match self.params.get(key) {
            None => Ok(default),
            Some(ParamValue::Int(v)) if *v >= 0 => Ok(*v as usize),
            Some(ParamValue::Float(v)) if *v >= 0.0 && v.fract() == 0.0 => Ok(*v as usize),
            Some(_) => Err(self.invalid(key, "a non-negative integer")),
        }
    }

    pub fn optional_usize(&mut self, key: &'static str) -> Result<Option<usize>> {
        if self.params.contains_key(key) {
            self.usize(key, 0).map(Some)
        } else {
            self.known.push(key);
            Ok(None)
        }
    }

    pub fn u64(&mut self, key: &'static str, default: u64) -> Result<u64> {
        self.usize(key, default as usize).map(|v| v as u64)
    }

    /// Reject keys that were never read
    pub fn finish(self) -> Result<()> {
        let unknown: Vec<&String> = self
            .params
            .keys()
            .filter(|k| !self.known.contains(&k.as_str()))
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(ForecastError::InvalidParameter(format!(
                "{}: unknown hyperparameters {:?}",
                self.family, unknown
            )))
        }
    }
}
