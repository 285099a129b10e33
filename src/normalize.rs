//! Map raw SDMX CSV rows onto the canonical observation schema.
//!
//! Responses are requested with `labels=both`, so headers and coded cells
//! arrive as `CODE: Label` pairs. Headers are matched on the code part via
//! a fixed column map; unknown columns are ignored and absent optional
//! columns default to `None`.

use std::sync::LazyLock;

use ahash::AHashSet;
use log::{info, warn};
use regex::Regex;

use crate::error::{Error, Result};
use crate::models::{ObservationRow, RawRow};

static PERIOD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{2})$").expect("period regex"));

/// Total codes accepted when collapsing a disaggregated dimension.
const TOTAL: &[&str] = &["_T"];
/// Age accepts regionally meaningful all-ages codes on top of `_T`.
const AGE_TOTALS: &[&str] = &["_T", "Y0T4", "Y0T14", "ALLAGE"];

/// Dimensions collapsed to their totals by default.
const COLLAPSE_DIMS: &[&str] = &["sex", "age", "wealth_quintile", "residence", "maternal_edu_lvl"];

/// Convert a server period string to the decimal timeline.
///
/// `YYYY-MM` becomes `year + month/12` (month in 1..=12); anything else is
/// parsed as a plain integer year.
pub fn parse_period(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Some(caps) = PERIOD_RE.captures(s) {
        let year: f64 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        if (1..=12).contains(&month) {
            return Some(year + f64::from(month) / 12.0);
        }
        return None;
    }
    s.parse::<i32>().ok().map(f64::from)
}

/// Code part of a `CODE: Label` cell or header.
fn code_of(cell: &str) -> &str {
    match cell.split_once(':') {
        Some((code, _)) => code.trim(),
        None => cell.trim(),
    }
}

/// Label part of a `CODE: Label` cell, if present.
fn label_of(cell: &str) -> Option<&str> {
    cell.split_once(':').map(|(_, label)| label.trim())
}

/// Find a raw column by its SDMX code, ignoring the attached label.
fn column<'a>(row: &'a RawRow, code: &str) -> Option<&'a str> {
    row.iter()
        .find(|(header, _)| code_of(header) == code)
        .map(|(_, value)| value.as_str())
        .filter(|v| !v.trim().is_empty())
}

fn coded(row: &RawRow, code: &str) -> Option<String> {
    column(row, code).map(|v| code_of(v).to_string())
}

fn numeric(row: &RawRow, code: &str) -> Option<f64> {
    column(row, code).and_then(|v| code_of(v).parse::<f64>().ok())
}

/// Map raw rows to canonical observations. Rows without an indicator, a
/// REF_AREA, or a parseable period are dropped with a warning.
pub fn normalize(raw: &[RawRow]) -> Vec<ObservationRow> {
    let mut out = Vec::with_capacity(raw.len());
    let mut dropped = 0usize;
    for row in raw {
        let indicator = coded(row, "INDICATOR");
        let iso3 = coded(row, "REF_AREA");
        let period = column(row, "TIME_PERIOD").and_then(parse_period);
        let (Some(indicator), Some(iso3), Some(period)) = (indicator, iso3, period) else {
            dropped += 1;
            continue;
        };
        let mut obs = ObservationRow::new(&indicator, &iso3, period, numeric(row, "OBS_VALUE"));
        obs.country = column(row, "REF_AREA")
            .and_then(label_of)
            .map(str::to_string);
        obs.unit = coded(row, "UNIT_MEASURE");
        obs.sex = coded(row, "SEX");
        obs.age = coded(row, "AGE");
        obs.wealth_quintile = coded(row, "WEALTH_QUINTILE");
        obs.residence = coded(row, "RESIDENCE");
        obs.maternal_edu_lvl = coded(row, "MATERNAL_EDU_LVL");
        obs.lower_bound = numeric(row, "LOWER_BOUND");
        obs.upper_bound = numeric(row, "UPPER_BOUND");
        obs.obs_status = coded(row, "OBS_STATUS");
        obs.data_source = column(row, "DATA_SOURCE").map(str::to_string);
        out.push(obs);
    }
    if dropped > 0 {
        warn!("dropped {dropped} raw row(s) without indicator, area, or parseable period");
    }
    out
}

fn dim_value<'a>(row: &'a ObservationRow, dim: &str) -> Option<&'a str> {
    match dim {
        "sex" => row.sex.as_deref(),
        "age" => row.age.as_deref(),
        "wealth_quintile" => row.wealth_quintile.as_deref(),
        "residence" => row.residence.as_deref(),
        "maternal_edu_lvl" => row.maternal_edu_lvl.as_deref(),
        _ => None,
    }
}

/// Collapse disaggregated dimensions to their total codes.
///
/// For each dimension that carries more than one distinct value, only rows
/// at a total code survive. This keeps the default aggregate view from
/// double-counting disaggregated series; what was collapsed is announced,
/// not silently dropped.
pub fn collapse_disaggregations(mut rows: Vec<ObservationRow>) -> Vec<ObservationRow> {
    for dim in COLLAPSE_DIMS {
        let mut distinct: Vec<&str> = rows.iter().filter_map(|r| dim_value(r, dim)).collect();
        distinct.sort();
        distinct.dedup();
        if distinct.len() <= 1 {
            continue;
        }
        let totals: &[&str] = if *dim == "age" { AGE_TOTALS } else { TOTAL };
        info!(
            "{dim} is disaggregated ({}); keeping totals only",
            distinct.join(", ")
        );
        rows.retain(|r| match dim_value(r, dim) {
            Some(v) => totals.contains(&v),
            None => true,
        });
    }
    rows
}

/// Enforce the full-row uniqueness invariant.
///
/// Duplicates are compared across every field. By default they are a hard
/// error carrying the duplicate count; with `ignore_duplicates` the extras
/// are removed and counted in a warning instead.
pub fn enforce_unique(
    rows: Vec<ObservationRow>,
    ignore_duplicates: bool,
) -> Result<Vec<ObservationRow>> {
    let mut seen: AHashSet<String> = AHashSet::with_capacity(rows.len());
    let mut unique = Vec::with_capacity(rows.len());
    let mut duplicates = 0usize;
    for row in rows {
        let key = serde_json::to_string(&row).map_err(Error::from)?;
        if seen.insert(key) {
            unique.push(row);
        } else {
            duplicates += 1;
        }
    }
    if duplicates > 0 {
        if !ignore_duplicates {
            return Err(Error::DuplicateRows { count: duplicates });
        }
        warn!("removed {duplicates} duplicate row(s)");
    }
    Ok(unique)
}

/// Post-fetch country filter (REF_AREA is never part of the SDMX key).
pub fn filter_countries(rows: Vec<ObservationRow>, countries: &[String]) -> Vec<ObservationRow> {
    let wanted: AHashSet<String> = countries.iter().map(|c| c.to_uppercase()).collect();
    rows.into_iter()
        .filter(|r| wanted.contains(&r.iso3.to_uppercase()))
        .collect()
}
