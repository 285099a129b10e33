//! Translate user-level request parameters into SDMX REST page requests.
//!
//! The indicator filter is embedded in the dot-delimited SDMX key; country
//! selection is deliberately NOT part of the key (the upstream key syntax
//! does not reliably combine REF_AREA with indicator selection), so it is
//! applied as a post-fetch filter. The builder only describes pages; the
//! orchestrator decides when to stop requesting them.

use std::sync::LazyLock;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use regex::Regex;

use crate::error::{Error, Result};
use crate::metadata::MetadataStore;
use crate::registry::Registry;

/// Rows requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}$").expect("year regex"));

// Allow -, _, . unescaped in codes (common for indicator ids)
const SAFE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// User-level request parameters, pre-validation.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pub indicators: Vec<String>,
    pub dataflows: Vec<String>,
    pub countries: Option<Vec<String>>,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    pub sex: Option<String>,
    pub page_size: Option<usize>,
}

/// One page of one dataflow query.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub url: String,
    pub offset: usize,
    pub limit: usize,
}

/// A validated query against a single dataflow. Pages are derived on
/// demand; the plan itself holds no cursor state.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub dataflow: String,
    pub version: String,
    pub key: String,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    pub page_size: usize,
    base_url: String,
    agency: String,
}

impl QueryPlan {
    /// Page descriptor for cursor `(index * page_size, page_size)`.
    pub fn page(&self, index: usize) -> PageRequest {
        let offset = index * self.page_size;
        let mut url = format!(
            "{}/data/{},{},{}/{}?format=csv&labels=both",
            self.base_url, self.agency, self.dataflow, self.version, self.key
        );
        if let Some(y) = self.start_year {
            url.push_str(&format!("&startPeriod={y}"));
        }
        if let Some(y) = self.end_year {
            url.push_str(&format!("&endPeriod={y}"));
        }
        url.push_str(&format!("&startAt={offset}&count={}", self.page_size));
        PageRequest {
            url,
            offset,
            limit: self.page_size,
        }
    }

    /// Canonical identity of this query, used as the memoization key.
    pub fn cache_key(&self) -> String {
        format!(
            "{}/{}@{}:{}..{}#{}",
            self.dataflow,
            self.key,
            self.version,
            self.start_year.map_or(String::new(), |y| y.to_string()),
            self.end_year.map_or(String::new(), |y| y.to_string()),
            self.page_size
        )
    }

    /// Same query pointed at another dataflow (fallback transitions).
    pub fn with_dataflow(&self, dataflow: &str, version: &str) -> QueryPlan {
        QueryPlan {
            dataflow: dataflow.to_string(),
            version: version.to_string(),
            ..self.clone()
        }
    }
}

/// Validate parameters and produce one plan per requested dataflow.
pub fn build(
    params: &QueryParams,
    registry: &Registry,
    store: &MetadataStore,
    base_url: &str,
    agency: &str,
) -> Result<Vec<QueryPlan>> {
    if params.indicators.is_empty() && params.dataflows.is_empty() {
        return Err(Error::InvalidQuery(
            "either an indicator or a dataflow must be supplied".into(),
        ));
    }
    validate_year_opt("start_year", params.start_year)?;
    validate_year_opt("end_year", params.end_year)?;
    if let (Some(start), Some(end)) = (params.start_year, params.end_year) {
        if start > end {
            return Err(Error::InvalidQuery(format!(
                "start_year {start} is after end_year {end}"
            )));
        }
    }
    if let Some(countries) = &params.countries {
        for code in countries {
            if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(Error::InvalidQuery(format!(
                    "country code {code:?} is not ISO 3166-1 alpha-3"
                )));
            }
        }
    }

    let dataflows = if params.dataflows.is_empty() {
        vec![registry.resolve_dataflow(&params.indicators[0]).to_string()]
    } else {
        params.dataflows.clone()
    };

    let key = data_key(&params.indicators, params.sex.as_deref());
    let page_size = params.page_size.unwrap_or(DEFAULT_PAGE_SIZE);

    Ok(dataflows
        .into_iter()
        .map(|flow| {
            let version = store.dataflow_version(&flow);
            QueryPlan {
                dataflow: flow,
                version,
                key: key.clone(),
                start_year: params.start_year,
                end_year: params.end_year,
                page_size,
                base_url: base_url.trim_end_matches('/').to_string(),
                agency: agency.to_string(),
            }
        })
        .collect())
}

/// Dot-delimited SDMX key: empty REF_AREA segment, indicators joined with
/// `+`, then the sex filter. No indicators at all selects the whole flow.
fn data_key(indicators: &[String], sex: Option<&str>) -> String {
    if indicators.is_empty() && sex.is_none() {
        return "all".into();
    }
    let joined = indicators
        .iter()
        .map(|s| utf8_percent_encode(s.trim(), SAFE).to_string())
        .collect::<Vec<_>>()
        .join("+");
    format!(".{joined}.{}", sex.unwrap_or(""))
}

/// Parse a year string under the strict 4-digit rule.
pub fn parse_year(label: &str, s: &str) -> Result<i32> {
    if !YEAR_RE.is_match(s) {
        return Err(Error::InvalidQuery(format!(
            "{label} {s:?} is not a 4-digit year"
        )));
    }
    s.parse::<i32>()
        .map_err(|_| Error::InvalidQuery(format!("{label} {s:?} is not a 4-digit year")))
}

fn validate_year_opt(label: &str, year: Option<i32>) -> Result<()> {
    if let Some(y) = year {
        if !YEAR_RE.is_match(&y.to_string()) {
            return Err(Error::InvalidQuery(format!(
                "{label} {y} is not a 4-digit year"
            )));
        }
    }
    Ok(())
}
