//! Past / now / forward split of the date index around a reference day.

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub past: Vec<usize>,
    pub now: Vec<usize>,
    pub forward: Vec<usize>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.past.len() + self.now.len() + self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Splits `days` by comparison with `reference`, preserving index order.
pub fn partition(days: &[NaiveDate], reference: NaiveDate) -> Partition {
    let mut out = Partition::default();
    for (idx, day) in days.iter().enumerate() {
        match day.cmp(&reference) {
            std::cmp::Ordering::Less => out.past.push(idx),
            std::cmp::Ordering::Equal => out.now.push(idx),
            std::cmp::Ordering::Greater => out.forward.push(idx),
        }
    }
    out
}

/// Parses the calendar day from an ISO date or date-time string.
///
/// Anything after the leading `YYYY-MM-DD` is ignored.
pub fn parse_calendar_day(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let head = trimmed.get(..10)?;
    if let Some(rest) = trimmed.get(10..) {
        if !(rest.is_empty() || rest.starts_with('T') || rest.starts_with(' ')) {
            return None;
        }
    }
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// Source of "today" for partitioning requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceClock {
    pub timezone: Tz,
    pub fixed_today: Option<NaiveDate>,
}

impl Default for ReferenceClock {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Asia::Bangkok,
            fixed_today: None,
        }
    }
}

impl ReferenceClock {
    pub fn fixed(day: NaiveDate) -> Self {
        Self {
            fixed_today: Some(day),
            ..Self::default()
        }
    }

    pub fn today(&self) -> NaiveDate {
        match self.fixed_today {
            Some(day) => day,
            None => Utc::now().with_timezone(&self.timezone).date_naive(),
        }
    }
}
