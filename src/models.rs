use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of an SDMX CSV response, before normalization.
///
/// The upstream column set varies by dataflow; columns the server omits are
/// simply absent keys. The normalizer declares which canonical fields they
/// feed and default-fills the rest.
pub type RawRow = BTreeMap<String, String>;

/// A registered indicator and the dataflow it reports under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndicatorRecord {
    pub code: String,
    pub name: String,
    pub dataflow: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdg_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl IndicatorRecord {
    /// Category is the code prefix up to the first underscore (`CME_MRY0T4` -> `CME`).
    pub fn category(&self) -> &str {
        self.code.split('_').next().unwrap_or(&self.code)
    }
}

/// A dataflow as listed by the SDMX registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataflowRecord {
    pub id: String,
    pub agency: String,
    pub version: String,
    pub name: String,
}

/// One dimension of a dataflow's data-structure definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dimension {
    pub id: String,
    pub position: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codelist: Option<String>,
}

/// An attribute of a data-structure definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attribute {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codelist: Option<String>,
}

/// Dimension/attribute schema for one dataflow, fetched lazily and cached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataflowSchema {
    pub id: String,
    pub name: String,
    pub version: String,
    pub dimensions: Vec<Dimension>,
    pub time_dimension: String,
    pub primary_measure: String,
    pub attributes: Vec<Attribute>,
}

impl DataflowSchema {
    pub const TIME_DIMENSION: &'static str = "TIME_PERIOD";
    pub const PRIMARY_MEASURE: &'static str = "OBS_VALUE";
}

/// Provenance block attached to every metadata cache file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Watermark {
    pub platform: String,
    pub version: String,
    pub synced_at: DateTime<Utc>,
    pub source: String,
    pub agency: String,
    pub content_type: String,
    #[serde(default)]
    pub counts: BTreeMap<String, usize>,
}

impl Watermark {
    pub fn new(source: &str, agency: &str, content_type: &str) -> Self {
        Self {
            platform: "ucd-rs".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            synced_at: Utc::now(),
            source: source.into(),
            agency: agency.into(),
            content_type: content_type.into(),
            counts: BTreeMap::new(),
        }
    }

    pub fn with_count(mut self, item: &str, count: usize) -> Self {
        self.counts.insert(item.into(), count);
        self
    }
}

/// Canonical observation, one row per (indicator, area, period, disaggregation).
///
/// `period` folds sub-annual granularity into a decimal year: `YYYY-MM`
/// becomes `year + month/12`, annual periods stay integral.
///
/// The trailing enrichment fields stay `None` until the post-production
/// enrichment stage fills them from the static country table and the
/// indicator registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservationRow {
    pub indicator: String,
    pub iso3: String,
    pub country: Option<String>,
    pub period: f64,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub sex: Option<String>,
    pub age: Option<String>,
    pub wealth_quintile: Option<String>,
    pub residence: Option<String>,
    pub maternal_edu_lvl: Option<String>,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub obs_status: Option<String>,
    pub data_source: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub income_group: Option<String>,
    #[serde(default)]
    pub continent: Option<String>,
    #[serde(default)]
    pub indicator_name: Option<String>,
    #[serde(default)]
    pub indicator_category: Option<String>,
}

impl ObservationRow {
    pub fn new(indicator: &str, iso3: &str, period: f64, value: Option<f64>) -> Self {
        Self {
            indicator: indicator.into(),
            iso3: iso3.into(),
            country: None,
            period,
            value,
            unit: None,
            sex: None,
            age: None,
            wealth_quintile: None,
            residence: None,
            maternal_edu_lvl: None,
            lower_bound: None,
            upper_bound: None,
            obs_status: None,
            data_source: None,
            region: None,
            income_group: None,
            continent: None,
            indicator_name: None,
            indicator_category: None,
        }
    }

    /// Integer year component of the period.
    pub fn year(&self) -> i32 {
        self.period.floor() as i32
    }
}

/// Column-major result table, the final shape handed to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Index of a named column, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Render a float the way the tables print it: up to 4 decimals, trimmed.
pub fn fmt_value(v: Option<f64>) -> String {
    match v {
        Some(x) if x.is_finite() => {
            let s = format!("{:.4}", x);
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        }
        _ => String::new(),
    }
}
