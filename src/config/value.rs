use std::collections::BTreeMap;

use crate::config::ease::Ease;
use crate::foundation::error::{SpoolError, SpoolResult};

/// A single keyframe of a conf curve, in node-local seconds.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Keyframe {
    /// Node-local time of the key, seconds from the node's absolute start.
    pub t: f64,
    /// Value at the key.
    pub value: f64,
    /// Easing toward the next key.
    #[serde(default)]
    pub ease: Ease,
}

/// Keyframe curve for a numeric conf entry.
///
/// Sampled at `current_time - node.start`; times before the first key clamp to
/// the first value, times after the last clamp to the last.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Curve {
    /// Keys sorted by `t`.
    pub keys: Vec<Keyframe>,
}

impl Curve {
    /// Validate key ordering.
    pub fn validate(&self) -> SpoolResult<()> {
        if self.keys.is_empty() {
            return Err(SpoolError::validation("curve must have at least one key"));
        }
        for pair in self.keys.windows(2) {
            if pair[0].t > pair[1].t {
                return Err(SpoolError::validation("curve keys must be sorted by t"));
            }
        }
        Ok(())
    }

    /// Sample the curve at node-local time `t`.
    pub fn sample(&self, t: f64) -> f64 {
        let Some(first) = self.keys.first() else {
            return 0.0;
        };
        if t <= first.t {
            return first.value;
        }
        for pair in self.keys.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if t < b.t {
                let span = b.t - a.t;
                if span <= 0.0 {
                    return b.value;
                }
                let p = a.ease.apply((t - a.t) / span);
                return a.value + (b.value - a.value) * p;
            }
        }
        self.keys.last().map(|k| k.value).unwrap_or(0.0)
    }
}

/// A declarative, unit-bearing config value.
///
/// Strings carry units (`"50%"`, `"120px"`) or time expressions and are
/// resolved lazily by the unit resolver / time-expression parser; numbers are
/// raw seconds or pixels depending on the key.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ConfValue {
    Bool(bool),
    Num(f64),
    Str(String),
    Curve(Curve),
}

impl ConfValue {
    /// Raw numeric value, if this entry is a plain number.
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Self::Num(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean value, if this entry is a flag.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// String value, if this entry is a unit-bearing string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Sample through the keyframe curve at node-local time `t`, or fall back
    /// to the raw numeric value.
    pub fn sample(&self, t: f64) -> Option<f64> {
        match self {
            Self::Curve(c) => Some(c.sample(t)),
            Self::Num(v) => Some(*v),
            _ => None,
        }
    }
}

/// Declarative config map of a node.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Conf(pub BTreeMap<String, ConfValue>);

impl Conf {
    /// Empty config.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&ConfValue> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: ConfValue) {
        self.0.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<ConfValue> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Numeric value of `key`, resolved through its curve at node-local time
    /// `t` when one is configured.
    pub fn sample(&self, key: &str, t: f64) -> Option<f64> {
        self.get(key).and_then(|v| v.sample(t))
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(ConfValue::as_bool)
    }
}

impl FromIterator<(String, ConfValue)> for Conf {
    fn from_iter<I: IntoIterator<Item = (String, ConfValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Curve {
        Curve {
            keys: vec![
                Keyframe {
                    t: 0.0,
                    value: 0.0,
                    ease: Ease::Linear,
                },
                Keyframe {
                    t: 2.0,
                    value: 10.0,
                    ease: Ease::Linear,
                },
            ],
        }
    }

    #[test]
    fn curve_samples_linearly_between_keys() {
        let c = ramp();
        assert_eq!(c.sample(0.0), 0.0);
        assert_eq!(c.sample(1.0), 5.0);
        assert_eq!(c.sample(2.0), 10.0);
    }

    #[test]
    fn curve_clamps_outside_key_span() {
        let c = ramp();
        assert_eq!(c.sample(-1.0), 0.0);
        assert_eq!(c.sample(99.0), 10.0);
    }

    #[test]
    fn curve_validate_rejects_unsorted_keys() {
        let mut c = ramp();
        c.keys.reverse();
        assert!(c.validate().is_err());
        assert!(ramp().validate().is_ok());
    }

    #[test]
    fn conf_value_json_shapes() {
        let v: ConfValue = serde_json::from_str("4.5").unwrap();
        assert_eq!(v.as_num(), Some(4.5));
        let v: ConfValue = serde_json::from_str("\"50%\"").unwrap();
        assert_eq!(v.as_str(), Some("50%"));
        let v: ConfValue =
            serde_json::from_str(r#"{"keys":[{"t":0.0,"value":1.0}]}"#).unwrap();
        assert_eq!(v.sample(0.0), Some(1.0));
    }

    #[test]
    fn conf_sample_prefers_curve_over_raw() {
        let mut conf = Conf::new();
        conf.set("opacity", ConfValue::Curve(ramp()));
        conf.set("x", ConfValue::Num(7.0));
        assert_eq!(conf.sample("opacity", 1.0), Some(5.0));
        assert_eq!(conf.sample("x", 1.0), Some(7.0));
        assert_eq!(conf.sample("missing", 1.0), None);
    }
}
