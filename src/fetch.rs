//! Execute query plans and fall back across dataflows.
//!
//! Paging, retry classification, and fallback interact as follows: the
//! transport retries transient failures internally; this module walks pages
//! sequentially and treats an empty or 404-class answer as "this dataflow
//! has nothing", which makes the query eligible for the per-prefix
//! alternatives list. Anything else propagates immediately. All cursor and
//! fallback state lives inside the call.

use std::time::Duration;

use ahash::AHashMap;
use log::{info, warn};

use crate::api::{FetchError, Transport};
use crate::error::Result;
use crate::models::RawRow;
use crate::query::QueryPlan;

/// Pause between page requests, to stay polite with the warehouse.
const PAGE_DELAY_MS: u64 = 200;

/// Safety cap to avoid pathological jobs.
const MAX_PAGES: usize = 1000;

/// Parse an SDMX CSV body into raw rows. Absent columns stay absent keys.
pub fn parse_csv_rows(body: &str) -> Result<Vec<RawRow>> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(body.as_bytes());
    let mut rows = Vec::new();
    for record in reader.deserialize::<RawRow>() {
        rows.push(record?);
    }
    Ok(rows)
}

/// Fetch every page of one plan, concatenated.
///
/// A page with zero rows, or fewer rows than requested, is the last page.
/// A 404-class answer yields an empty result (fallback decides what that
/// means); other errors propagate.
pub fn execute(transport: &dyn Transport, plan: &QueryPlan) -> Result<Vec<RawRow>> {
    let mut out: Vec<RawRow> = Vec::new();
    for index in 0..MAX_PAGES {
        let page = plan.page(index);
        let body = match transport.get_text(&page.url) {
            Ok(body) => body,
            Err(FetchError::NotFound { .. }) => {
                info!("dataflow {} has no data for this query", plan.dataflow);
                return Ok(out);
            }
            Err(e) => return Err(e.into()),
        };
        let rows = parse_csv_rows(&body)?;
        let n = rows.len();
        out.extend(rows);
        if n == 0 || n < page.limit {
            return Ok(out);
        }
        std::thread::sleep(Duration::from_millis(PAGE_DELAY_MS));
    }
    warn!(
        "page cap ({MAX_PAGES}) reached for dataflow {}, result truncated",
        plan.dataflow
    );
    Ok(out)
}

/// Try the primary plan, then each alternative in order; first non-empty
/// result wins. Exhausting every alternative is not an error -- the empty
/// result is a valid (if unhelpful) answer.
pub fn execute_with_fallback(
    transport: &dyn Transport,
    primary: &QueryPlan,
    alternatives: &[QueryPlan],
) -> Result<Vec<RawRow>> {
    let rows = execute(transport, primary)?;
    if !rows.is_empty() {
        return Ok(rows);
    }
    let mut tried = vec![primary.dataflow.clone()];
    for alt in alternatives {
        if tried.contains(&alt.dataflow) {
            continue;
        }
        tried.push(alt.dataflow.clone());
        info!("falling back to dataflow {}", alt.dataflow);
        let rows = execute(transport, alt)?;
        if !rows.is_empty() {
            info!("fallback dataflow {} returned {} row(s)", alt.dataflow, rows.len());
            return Ok(rows);
        }
    }
    info!(
        "no data in {} or any alternative dataflow",
        primary.dataflow
    );
    Ok(Vec::new())
}

/// Explicit memoization store for identical queries within one process.
///
/// Fetches are idempotent and side-effect-free upstream, so a hit can skip
/// the network and fallback logic entirely. Keyed by the plan's canonical
/// cache key; unbounded, living only as long as its owner.
#[derive(Debug, Default)]
pub struct MemoCache {
    map: AHashMap<String, Vec<RawRow>>,
}

impl MemoCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Vec<RawRow>> {
        self.map.get(key)
    }

    pub fn put(&mut self, key: String, rows: Vec<RawRow>) {
        self.map.insert(key, rows);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}
