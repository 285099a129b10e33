//! Post-production transforms over normalized observations.
//!
//! Every stage is a pure function over the row collection; the caller
//! composes them in a fixed order (enrich, dropna, MRV, latest, pivot,
//! simplify). Grouping follows (iso3, indicator) throughout.

use std::collections::BTreeMap;
use std::str::FromStr;

use log::warn;

use crate::countries;
use crate::error::Error;
use crate::models::{ObservationRow, RawRow, Table, fmt_value};
use crate::registry::Registry;

/// Metadata columns the enrichment stage can attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaField {
    Region,
    IncomeGroup,
    Continent,
    IndicatorName,
    IndicatorCategory,
}

impl FromStr for MetaField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "region" => Ok(Self::Region),
            "income_group" => Ok(Self::IncomeGroup),
            "continent" => Ok(Self::Continent),
            "indicator_name" => Ok(Self::IndicatorName),
            "indicator_category" => Ok(Self::IndicatorCategory),
            other => Err(Error::InvalidQuery(format!(
                "unknown metadata field {other:?}"
            ))),
        }
    }
}

/// Stage 1: attach country classifications and indicator metadata.
pub fn enrich(rows: &mut [ObservationRow], fields: &[MetaField], registry: &Registry) {
    for row in rows.iter_mut() {
        let info = countries::lookup(&row.iso3);
        for field in fields {
            match field {
                MetaField::Region => {
                    row.region = info.and_then(|i| i.region).map(str::to_string);
                }
                MetaField::IncomeGroup => {
                    row.income_group = info.and_then(|i| i.income_group).map(str::to_string);
                }
                MetaField::Continent => {
                    row.continent = info.and_then(|i| i.continent).map(str::to_string);
                }
                MetaField::IndicatorName => {
                    row.indicator_name = registry
                        .indicator_info(&row.indicator)
                        .map(|r| r.name.clone());
                }
                MetaField::IndicatorCategory => {
                    row.indicator_category = Some(
                        row.indicator
                            .split('_')
                            .next()
                            .unwrap_or(&row.indicator)
                            .to_string(),
                    );
                }
            }
        }
    }
}

/// Stage 2: remove rows with a missing value or an unusable period.
pub fn drop_missing(rows: Vec<ObservationRow>) -> Vec<ObservationRow> {
    rows.into_iter()
        .filter(|r| r.value.is_some() && r.period.is_finite())
        .collect()
}

fn group_key(row: &ObservationRow) -> (String, String) {
    (row.iso3.clone(), row.indicator.clone())
}

fn grouped(rows: Vec<ObservationRow>) -> BTreeMap<(String, String), Vec<ObservationRow>> {
    let mut groups: BTreeMap<(String, String), Vec<ObservationRow>> = BTreeMap::new();
    for row in rows {
        groups.entry(group_key(&row)).or_default().push(row);
    }
    groups
}

/// Stage 3: keep the N most recent observations per (iso3, indicator).
pub fn most_recent(rows: Vec<ObservationRow>, n: usize) -> Vec<ObservationRow> {
    let mut out = Vec::new();
    for (_, mut group) in grouped(rows) {
        group.sort_by(|a, b| b.period.total_cmp(&a.period));
        group.truncate(n);
        out.extend(group);
    }
    out
}

/// Stage 4: keep exactly the max-period row with a non-missing value per
/// (iso3, indicator). Running it on its own output is a no-op.
pub fn latest(rows: Vec<ObservationRow>) -> Vec<ObservationRow> {
    let with_values = rows.into_iter().filter(|r| r.value.is_some()).collect();
    let mut out = Vec::new();
    for (_, mut group) in grouped(with_values) {
        group.sort_by(|a, b| b.period.total_cmp(&a.period));
        out.extend(group.into_iter().next());
    }
    out
}

fn period_label(p: f64) -> String {
    fmt_value(Some(p))
}

fn distinct_indicators(rows: &[ObservationRow]) -> Vec<String> {
    let mut out: Vec<String> = rows.iter().map(|r| r.indicator.clone()).collect();
    out.sort();
    out.dedup();
    out
}

/// Enrichment columns actually populated somewhere in the row set, with
/// their accessors, in stable output order.
fn enrichment_columns(
    rows: &[ObservationRow],
) -> Vec<(&'static str, fn(&ObservationRow) -> Option<&str>)> {
    let all: [(&'static str, fn(&ObservationRow) -> Option<&str>); 5] = [
        ("region", |r| r.region.as_deref()),
        ("income_group", |r| r.income_group.as_deref()),
        ("continent", |r| r.continent.as_deref()),
        ("indicator_name", |r| r.indicator_name.as_deref()),
        ("indicator_category", |r| r.indicator_category.as_deref()),
    ];
    all.into_iter()
        .filter(|(_, get)| rows.iter().any(|r| get(r).is_some()))
        .collect()
}

/// Stage 5a: long -> wide with one `y<year>` column per distinct period.
///
/// Designed for single-indicator views; with several indicators the shape
/// gets combinatorially awkward, so the indicator joins the row index and
/// a warning points at the indicators-as-columns pivot instead.
pub fn pivot_years(rows: &[ObservationRow]) -> Table {
    let indicators = distinct_indicators(rows);
    let multi = indicators.len() > 1;
    if multi {
        warn!(
            "wide format with {} indicators produces an awkward shape; consider wide_indicators",
            indicators.len()
        );
    }

    let mut periods: Vec<String> = rows.iter().map(|r| period_label(r.period)).collect();
    periods.sort_by(|a, b| {
        a.parse::<f64>()
            .unwrap_or(f64::MAX)
            .total_cmp(&b.parse::<f64>().unwrap_or(f64::MAX))
    });
    periods.dedup();

    let has_country = rows.iter().any(|r| r.country.is_some());
    let extra = enrichment_columns(rows);

    let mut columns = vec!["iso3".to_string()];
    if has_country {
        columns.push("country".into());
    }
    for (name, _) in &extra {
        columns.push((*name).into());
    }
    if multi {
        columns.push("indicator".into());
    }
    let fixed = columns.len();
    for p in &periods {
        columns.push(format!("y{p}"));
    }

    // Row index -> (fixed cells, per-period value), first value wins.
    let mut index: BTreeMap<Vec<String>, BTreeMap<String, String>> = BTreeMap::new();
    for row in rows {
        let mut cells = vec![row.iso3.clone()];
        if has_country {
            cells.push(row.country.clone().unwrap_or_default());
        }
        for (_, get) in &extra {
            cells.push(get(row).unwrap_or_default().to_string());
        }
        if multi {
            cells.push(row.indicator.clone());
        }
        let entry = index.entry(cells).or_default();
        entry
            .entry(period_label(row.period))
            .or_insert_with(|| fmt_value(row.value));
    }

    let mut table = Table::new(columns);
    for (cells, values) in index {
        let mut out = cells;
        out.reserve(periods.len());
        for p in &periods {
            out.push(values.get(p).cloned().unwrap_or_default());
        }
        debug_assert_eq!(out.len(), fixed + periods.len());
        table.rows.push(out);
    }
    table
}

/// Stage 5b: long -> wide with one column per indicator, for side-by-side
/// comparison. With a single indicator the pivot adds nothing, so the long
/// shape is returned with a warning.
pub fn pivot_indicators(rows: &[ObservationRow]) -> Table {
    let indicators = distinct_indicators(rows);
    if indicators.len() <= 1 {
        warn!("wide_indicators format is designed for multiple indicators");
        return long_table(rows, false);
    }

    let has_country = rows.iter().any(|r| r.country.is_some());
    let extra = enrichment_columns(rows);

    let mut columns = vec!["iso3".to_string()];
    if has_country {
        columns.push("country".into());
    }
    columns.push("period".into());
    for (name, _) in &extra {
        columns.push((*name).into());
    }
    columns.extend(indicators.iter().cloned());

    let mut index: BTreeMap<Vec<String>, BTreeMap<String, String>> = BTreeMap::new();
    for row in rows {
        let mut cells = vec![row.iso3.clone()];
        if has_country {
            cells.push(row.country.clone().unwrap_or_default());
        }
        cells.push(period_label(row.period));
        for (_, get) in &extra {
            cells.push(get(row).unwrap_or_default().to_string());
        }
        let entry = index.entry(cells).or_default();
        entry
            .entry(row.indicator.clone())
            .or_insert_with(|| fmt_value(row.value));
    }

    let mut table = Table::new(columns);
    for (cells, values) in index {
        let mut out = cells;
        for ind in &indicators {
            out.push(values.get(ind).cloned().unwrap_or_default());
        }
        table.rows.push(out);
    }
    table
}

/// Long-format table. With `simplify`, only the essential column set (plus
/// any populated enrichment columns) survives.
pub fn long_table(rows: &[ObservationRow], simplify: bool) -> Table {
    let extra = enrichment_columns(rows);
    let mut columns: Vec<String>;
    if simplify {
        columns = ["iso3", "country", "indicator", "period", "value"]
            .iter()
            .map(|s| s.to_string())
            .collect();
    } else {
        columns = [
            "indicator",
            "iso3",
            "country",
            "period",
            "value",
            "unit",
            "sex",
            "age",
            "wealth_quintile",
            "residence",
            "maternal_edu_lvl",
            "lower_bound",
            "upper_bound",
            "obs_status",
            "data_source",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
    }
    for (name, _) in &extra {
        columns.push((*name).into());
    }

    let mut table = Table::new(columns.clone());
    for row in rows {
        let mut cells = Vec::with_capacity(columns.len());
        for col in &columns {
            let cell = match col.as_str() {
                "indicator" => row.indicator.clone(),
                "iso3" => row.iso3.clone(),
                "country" => row.country.clone().unwrap_or_default(),
                "period" => period_label(row.period),
                "value" => fmt_value(row.value),
                "unit" => row.unit.clone().unwrap_or_default(),
                "sex" => row.sex.clone().unwrap_or_default(),
                "age" => row.age.clone().unwrap_or_default(),
                "wealth_quintile" => row.wealth_quintile.clone().unwrap_or_default(),
                "residence" => row.residence.clone().unwrap_or_default(),
                "maternal_edu_lvl" => row.maternal_edu_lvl.clone().unwrap_or_default(),
                "lower_bound" => fmt_value(row.lower_bound),
                "upper_bound" => fmt_value(row.upper_bound),
                "obs_status" => row.obs_status.clone().unwrap_or_default(),
                "data_source" => row.data_source.clone().unwrap_or_default(),
                "region" => row.region.clone().unwrap_or_default(),
                "income_group" => row.income_group.clone().unwrap_or_default(),
                "continent" => row.continent.clone().unwrap_or_default(),
                "indicator_name" => row.indicator_name.clone().unwrap_or_default(),
                "indicator_category" => row.indicator_category.clone().unwrap_or_default(),
                _ => String::new(),
            };
            cells.push(cell);
        }
        table.rows.push(cells);
    }
    table
}

/// Table over raw (unnormalized) rows: the column union in sorted order.
pub fn raw_table(raw: &[RawRow]) -> Table {
    let mut columns: Vec<String> = raw.iter().flat_map(|r| r.keys().cloned()).collect();
    columns.sort();
    columns.dedup();
    let mut table = Table::new(columns.clone());
    for row in raw {
        table
            .rows
            .push(columns.iter().map(|c| row.get(c).cloned().unwrap_or_default()).collect());
    }
    table
}
