use crate::config::value::ConfValue;

/// A declarative time expression from a node's config.
///
/// Times are parent-relative: plain seconds offset from the parent's start,
/// percentages are taken of the parent's duration, `contain` asks the
/// material collaborator for the source's natural length.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimeExpr {
    /// Absolute seconds (relative to the parent's start for start/end keys).
    Secs(f64),
    /// `"N%"` of the parent duration.
    Percent(f64),
    /// `"N%+k"` / `"N%-k"`: percent of parent duration plus a fixed offset.
    PercentOffset { percent: f64, offset: f64 },
    /// `"contain"`: the material's natural source length.
    Contain,
}

impl TimeExpr {
    /// Parse a conf value into a time expression.
    ///
    /// Returns `None` for unparseable input; callers proceed best-effort with
    /// the raw value rather than failing the tree.
    pub fn parse(value: &ConfValue) -> Option<Self> {
        match value {
            ConfValue::Num(v) => Some(Self::Secs(*v)),
            ConfValue::Str(s) => Self::parse_str(s),
            _ => None,
        }
    }

    /// Parse the string form.
    pub fn parse_str(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("contain") {
            return Some(Self::Contain);
        }
        if let Some(idx) = s.find('%') {
            let percent: f64 = s[..idx].trim().parse().ok()?;
            let rest = s[idx + 1..].trim();
            if rest.is_empty() {
                return Some(Self::Percent(percent));
            }
            let (sign, num) = match rest.as_bytes()[0] {
                b'+' => (1.0, &rest[1..]),
                b'-' => (-1.0, &rest[1..]),
                _ => return None,
            };
            let offset: f64 = num.trim().parse().ok()?;
            return Some(Self::PercentOffset {
                percent,
                offset: sign * offset,
            });
        }
        s.parse().ok().map(Self::Secs)
    }

    /// True when the expression references the parent's (possibly not yet
    /// known) duration, which makes the owning end/duration flexible.
    pub fn is_percent(&self) -> bool {
        matches!(self, Self::Percent(_) | Self::PercentOffset { .. })
    }

    /// Resolve to parent-relative seconds.
    ///
    /// `parent_duration` is the duration of the nearest annotated ancestor;
    /// `natural` is the material's natural length for `contain`. Returns
    /// `None` when the required referent is unavailable.
    pub fn resolve(&self, parent_duration: Option<f64>, natural: Option<f64>) -> Option<f64> {
        match *self {
            Self::Secs(v) => Some(v),
            Self::Percent(p) => parent_duration.map(|d| d * p / 100.0),
            Self::PercentOffset { percent, offset } => {
                parent_duration.map(|d| d * percent / 100.0 + offset)
            }
            Self::Contain => natural,
        }
    }
}
