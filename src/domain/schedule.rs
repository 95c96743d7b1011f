use chrono::{DateTime, Days, Months, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Interval between two rounds of a tour.
#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    #[default]
    Weekly,
    Biweekly,
    Monthly,
    Quarterly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Biweekly => "biweekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
        }
    }
}

/// Unknown or empty frequencies fall back to weekly instead of failing.
impl From<&str> for Frequency {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" => Self::Daily,
            "weekly" => Self::Weekly,
            "biweekly" => Self::Biweekly,
            "monthly" => Self::Monthly,
            "quarterly" => Self::Quarterly,
            other => {
                tracing::warn!(frequency = other, "Unknown frequency, defaulting to weekly");
                Self::Weekly
            }
        }
    }
}

impl<'de> Deserialize<'de> for Frequency {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(Frequency::from).unwrap_or_default())
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Computes the due date of the round following `base`.
///
/// `base` must be the previous due date (or the start date for the first
/// round), never the current time, so processing delays do not accumulate.
/// Calendar-month steps clamp to the last day of the target month.
pub fn next_due_date(base: DateTime<Utc>, frequency: Frequency) -> DateTime<Utc> {
    let next = match frequency {
        Frequency::Daily => base.checked_add_days(Days::new(1)),
        Frequency::Weekly => base.checked_add_days(Days::new(7)),
        Frequency::Biweekly => base.checked_add_days(Days::new(14)),
        Frequency::Monthly => base.checked_add_months(Months::new(1)),
        Frequency::Quarterly => base.checked_add_months(Months::new(3)),
    };
    next.unwrap_or(DateTime::<Utc>::MAX_UTC)
}
