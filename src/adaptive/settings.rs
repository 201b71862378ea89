use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const STEP: &str = "step";
pub const KP: &str = "kp";
pub const KI: &str = "ki";
pub const KD: &str = "kd";
pub const TEMP: &str = "temp";
pub const COOLING: &str = "cooling";
pub const EPSILON: &str = "epsilon";
pub const CONFIDENCE: &str = "confidence";
pub const PRIOR_ALPHA: &str = "prior_alpha";
pub const PRIOR_BETA: &str = "prior_beta";
pub const ELITE_FRACTION: &str = "elite_fraction";
pub const POPULATION_SIZE: &str = "population_size";
pub const NOISE: &str = "noise";
pub const STEP_SCALE: &str = "step_scale";
pub const ALPHA: &str = "alpha";
pub const LAMBDA: &str = "lambda";
pub const FEATURE_DIM: &str = "feature_dim";

pub const DIRECTION: &str = "direction";
pub const INTEGRAL: &str = "integral";
pub const PREV_ERROR: &str = "prev_error";

/// Keys that carry running algorithm state rather than configuration.
pub const RUNNING_STATE_KEYS: &[&str] = &[DIRECTION, INTEGRAL, PREV_ERROR, TEMP];

/// Hyperparameters and algorithm-private running state, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(HashMap<String, Decimal>);

impl Settings {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Builds settings from a loosely-typed JSON bag. Numbers and numeric
    /// strings are kept, anything else is dropped so the default applies.
    pub fn from_json(map: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut settings = Self::new();
        for (key, value) in map {
            match json_to_decimal(value) {
                Some(decimal) => {
                    settings.0.insert(key.clone(), decimal);
                }
                None => {
                    tracing::debug!(setting = %key, value = %value, "ignoring non-numeric setting");
                }
            }
        }
        settings
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .0
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.to_string())))
            .collect();
        serde_json::Value::Object(map)
    }

    pub fn get_decimal(&self, key: &str, default: Decimal) -> Decimal {
        self.0.get(key).copied().unwrap_or(default)
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.0
            .get(key)
            .and_then(|v| v.to_f64())
            .unwrap_or(default)
    }

    pub fn get(&self, key: &str) -> Option<Decimal> {
        self.0.get(key).copied()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Decimal) {
        self.0.insert(key.into(), value);
    }

    pub fn with(mut self, key: impl Into<String>, value: Decimal) -> Self {
        self.set(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Decimal> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Decimal)> {
        self.0.iter()
    }

    /// Replaces configured hyperparameters with `incoming` while keeping the
    /// running-state keys already present here.
    pub fn merge_config(&mut self, incoming: &Settings) {
        let preserved: Vec<(String, Decimal)> = RUNNING_STATE_KEYS
            .iter()
            .filter_map(|k| self.0.get(*k).map(|v| (k.to_string(), *v)))
            .collect();
        self.0 = incoming.0.clone();
        for (k, v) in preserved {
            self.0.insert(k, v);
        }
    }
}

impl FromIterator<(String, Decimal)> for Settings {
    fn from_iter<T: IntoIterator<Item = (String, Decimal)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

pub fn get_as_decimal(settings: &Settings, key: &str, default: Decimal) -> Decimal {
    settings.get_decimal(key, default)
}

pub fn get_as_f64(settings: &Settings, key: &str, default: f64) -> f64 {
    settings.get_f64(key, default)
}

fn json_to_decimal(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else if let Some(u) = n.as_u64() {
                Some(Decimal::from(u))
            } else {
                // Shortest round-trip text keeps 0.1 as 0.1 rather than its binary expansion.
                Decimal::from_str(&n.to_string())
                    .ok()
                    .or_else(|| n.as_f64().and_then(Decimal::from_f64))
            }
        }
        serde_json::Value::String(s) => Decimal::from_str(s.trim())
            .ok()
            .or_else(|| Decimal::from_scientific(s.trim()).ok()),
        _ => None,
    }
}
