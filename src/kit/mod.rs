//! Kit statistics from `/api/kit/statistics`

use chrono::{Duration, Local, NaiveDate};
use chrono_humanize::{Accuracy, HumanTime, Tense};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const STATISTICS_URL: &str = "/api/kit/statistics";

/// Format of the `added` dates
pub const FMT_DAY: &str = "%Y-%m-%d";

/// Ages above this many days also get a readable distance
const READABLE_AFTER_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(default)]
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    #[serde(default)]
    pub added: String,
    #[serde(default)]
    pub statistics: Vec<Statistic>,
    #[serde(default)]
    pub components: Vec<Component>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    #[serde(default)]
    pub models: Vec<Model>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    #[serde(default)]
    pub added: String,
    #[serde(default)]
    pub statistics: Vec<Statistic>,
}

/// A named statistic. Besides `n` and `units` the server sends arbitrary
/// summary keys (sum, median, ...), kept sorted by key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistic {
    pub name: String,
    #[serde(default)]
    pub n: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(flatten)]
    pub values: Map<String, Value>,
}

impl Statistic {
    /// `name  n=3  sum=120 km  ...`
    pub fn summary(&self) -> String {
        let mut parts = vec![self.name.clone(), format!("n={}", format_value(&self.n, None))];
        for (key, value) in &self.values {
            parts.push(format!("{}={}", key, format_value(value, self.units.as_deref())));
        }
        parts.join("  ")
    }
}

/// Format a number with optional units, trimming noisy decimals
pub fn format_value(value: &Value, units: Option<&str>) -> String {
    let text = match value {
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) => {
                let formatted = format!("{:.2}", f);
                formatted.trim_end_matches('0').trim_end_matches('.').to_string()
            }
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    };
    match units {
        Some(units) if !units.is_empty() && !value.is_null() => format!("{} {}", text, units),
        _ => text,
    }
}

/// Calendar days between `added` and `today`
pub fn age_days(added: &str, today: NaiveDate) -> Option<i64> {
    let date = NaiveDate::parse_from_str(added, FMT_DAY).ok()?;
    Some((today - date).num_days())
}

/// Rough distance like "4 months", for ages beyond a week
pub fn readable_distance(days: i64) -> String {
    HumanTime::from(Duration::days(days)).to_text_en(Accuracy::Rough, Tense::Present)
}

/// `"120d  (4 months)"`, or `None` when the date cannot be parsed
pub fn age_text(added: &str, today: NaiveDate) -> Option<String> {
    let days = age_days(added, today)?;
    if days > READABLE_AFTER_DAYS {
        Some(format!("{}d  ({})", days, readable_distance(days)))
    } else {
        Some(format!("{}d", days))
    }
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// One line of the statistics view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Heading(String),
    Subheading(String),
    Age(String),
    Statistic(String),
    Blank,
}

/// Flatten groups into display lines: each item, then each of its models
pub fn lines(groups: &[Group], today: NaiveDate) -> Vec<Line> {
    let mut lines = Vec::new();
    for group in groups {
        for item in &group.items {
            lines.push(Line::Heading(format!("{} / {}", item.name, group.name)));
            push_age(&mut lines, &item.added, today);
            lines.extend(item.statistics.iter().map(|s| Line::Statistic(s.summary())));

            for component in &item.components {
                for model in &component.models {
                    lines.push(Line::Subheading(format!("{} / {}", model.name, component.name)));
                    push_age(&mut lines, &model.added, today);
                    lines.extend(model.statistics.iter().map(|s| Line::Statistic(s.summary())));
                }
            }
            lines.push(Line::Blank);
        }
    }
    lines
}

fn push_age(lines: &mut Vec<Line>, added: &str, today: NaiveDate) {
    match age_text(added, today) {
        Some(age) => lines.push(Line::Age(format!("Age {}", age))),
        None if added.is_empty() => {}
        None => tracing::debug!("Unparseable kit date '{}'", added),
    }
}
