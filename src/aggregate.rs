//! Source-side aggregation: fold several records of one day into one.
//!
//! ```text
//! records (same day) ──► Aggregator::fold ──► Aggregate
//!   numeric fields        summed, scaled, rounded
//!   list fields           space-joined, first-seen order
//!   category field        most frequent value ("primary") + sorted uniques
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};

use jiff::civil::Date;

use crate::model::Record;

/// Pulls one optional text value out of a record.
pub type Extract = fn(&Record) -> Option<String>;

/// A numeric field summed across records.
#[derive(Debug, Clone)]
struct Sum {
    name: &'static str,
    field: &'static str,
    per_unit: f64,
    decimals: i32,
}

/// Describes how records of one day fold into an [`Aggregate`].
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    sums: Vec<Sum>,
    lists: Vec<(&'static str, Extract)>,
    category: Option<Extract>,
}

/// The folded view of one day's records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    pub count: usize,
    pub sums: BTreeMap<&'static str, f64>,
    pub lists: BTreeMap<&'static str, String>,

    /// Most frequent category value; ties go to the first seen. Empty when
    /// no record has one.
    pub primary: String,

    /// Distinct category values, sorted and space-joined.
    pub unique: String,
}

impl Aggregate {
    pub fn sum(&self, name: &str) -> f64 {
        self.sums.get(name).copied().unwrap_or(0.0)
    }

    pub fn list(&self, name: &str) -> &str {
        self.lists.get(name).map_or("", String::as_str)
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sums numeric `field` into `name`, dividing by `per_unit` and rounding
    /// to `decimals` places. Missing or non-numeric values count as zero.
    #[must_use]
    pub fn sum(mut self, name: &'static str, field: &'static str, per_unit: f64, decimals: i32) -> Self {
        self.sums.push(Sum {
            name,
            field,
            per_unit,
            decimals,
        });
        self
    }

    /// Space-joins the extracted values of every record into `name`.
    #[must_use]
    pub fn list(mut self, name: &'static str, extract: Extract) -> Self {
        self.lists.push((name, extract));
        self
    }

    /// Tracks the categorical value used for `primary` and `unique`.
    #[must_use]
    pub fn category(mut self, extract: Extract) -> Self {
        self.category = Some(extract);
        self
    }

    pub fn fold(&self, records: &[Record]) -> Aggregate {
        let mut aggregate = Aggregate {
            count: records.len(),
            ..Aggregate::default()
        };

        for sum in &self.sums {
            let total: f64 = records
                .iter()
                .filter_map(|r| r.get(sum.field).and_then(serde_json::Value::as_f64))
                .sum();
            aggregate
                .sums
                .insert(sum.name, round_to(total / sum.per_unit, sum.decimals));
        }

        for (name, extract) in &self.lists {
            let joined = records
                .iter()
                .filter_map(*extract)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            aggregate.lists.insert(*name, joined);
        }

        if let Some(extract) = self.category {
            let values: Vec<String> = records
                .iter()
                .filter_map(extract)
                .filter(|s| !s.is_empty())
                .collect();
            aggregate.primary = most_frequent(&values).unwrap_or_default();
            aggregate.unique = values
                .iter()
                .map(String::as_str)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect::<Vec<_>>()
                .join(" ");
        }

        aggregate
    }
}

/// Groups records by day, dropping records without one. Days come out in
/// order; records keep their input order within a day.
pub fn group_by_day<F>(records: Vec<Record>, day_of: F) -> BTreeMap<Date, Vec<Record>>
where
    F: Fn(&Record) -> Option<Date>,
{
    let mut by_day: BTreeMap<Date, Vec<Record>> = BTreeMap::new();
    for record in records {
        if let Some(day) = day_of(&record) {
            by_day.entry(day).or_default().push(record);
        }
    }
    by_day
}

/// Rounds half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

fn most_frequent(values: &[String]) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for v in values {
        *counts.entry(v.as_str()).or_default() += 1;
    }
    // First seen wins ties: only a strictly higher count replaces the leader.
    let mut best: Option<(&str, usize)> = None;
    for v in values {
        let n = counts[v.as_str()];
        if best.is_none_or(|(_, m)| n > m) {
            best = Some((v.as_str(), n));
        }
    }
    best.map(|(v, _)| v.to_string())
}
