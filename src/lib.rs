//! ucd_rs
//!
//! A lightweight Rust library for retrieving, caching, and reshaping
//! indicator data from the UNICEF SDMX warehouse. Pairs with the `ucd` CLI.
//!
//! ### Features
//! - Fetch indicators for one or more countries and year ranges
//! - Indicator -> dataflow resolution with curated overrides, prefix
//!   inference, and ordered dataflow fallback
//! - Versioned, file-backed metadata cache with dated vintage snapshots
//! - Post-production reshaping: enrichment, MRV windowing, latest-value
//!   selection, long/wide pivots, column simplification
//!
//! ### Example
//! ```no_run
//! use ucd_rs::{Client, GetOptions};
//!
//! let client = Client::new();
//! let table = client.get(&GetOptions {
//!     indicators: vec!["CME_MRY0T4".into()],
//!     countries: Some(vec!["ALB".into(), "USA".into(), "BRA".into()]),
//!     start_year: Some(2015),
//!     end_year: Some(2023),
//!     ..GetOptions::default()
//! })?;
//! println!("{} rows", table.len());
//! # Ok::<(), ucd_rs::Error>(())
//! ```

pub mod api;
pub mod countries;
pub mod error;
pub mod fetch;
pub mod metadata;
pub mod models;
pub mod normalize;
pub mod postprod;
pub mod query;
pub mod registry;
pub mod storage;
pub mod xml;

use std::cell::RefCell;
use std::str::FromStr;

use crate::api::Transport;
use crate::fetch::MemoCache;
use crate::models::RawRow;
use crate::query::QueryParams;

pub use crate::error::{Error, Result};
pub use crate::metadata::{CacheInfo, MetadataStore, SyncCounts};
pub use crate::models::{DataflowRecord, DataflowSchema, IndicatorRecord, ObservationRow, Table};
pub use crate::postprod::MetaField;
pub use crate::registry::Registry;

/// Output shape of [`Client::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// One row per observation.
    #[default]
    Long,
    /// Areas as rows, `y<year>` value columns.
    Wide,
    /// (area, period) rows, one value column per indicator.
    WideIndicators,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "long" => Ok(Self::Long),
            "wide" => Ok(Self::Wide),
            "wide_indicators" => Ok(Self::WideIndicators),
            other => Err(Error::InvalidQuery(format!(
                "unknown output format {other:?} (expected long, wide, or wide_indicators)"
            ))),
        }
    }
}

/// Parameters of one data request.
#[derive(Debug, Clone)]
pub struct GetOptions {
    /// Indicator codes. May be empty when `dataflows` is given.
    pub indicators: Vec<String>,
    /// Dataflow ids. Resolved from the first indicator when empty.
    pub dataflows: Vec<String>,
    /// ISO3 filter, applied post-fetch. `None` means all areas.
    pub countries: Option<Vec<String>>,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    /// Sex filter embedded in the SDMX key. Default `_T` (total).
    pub sex: Option<String>,
    /// Normalize into the canonical schema. `false` behaves like `raw`.
    pub tidy: bool,
    /// Keep the country-name column from the API labels.
    pub country_names: bool,
    pub max_retries: u32,
    /// Memoize identical queries within this client's lifetime.
    pub cache: bool,
    pub format: OutputFormat,
    /// Keep only the latest non-missing value per (iso3, indicator).
    pub latest: bool,
    pub add_metadata: Vec<MetaField>,
    /// Remove rows with missing values.
    pub dropna: bool,
    /// Reduce to the essential column set.
    pub simplify: bool,
    /// Keep only the N most recent observations per (iso3, indicator).
    pub mrv: Option<usize>,
    /// Return the server's columns untouched.
    pub raw: bool,
    /// Drop exact duplicate rows instead of failing on them.
    pub ignore_duplicates: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            indicators: Vec::new(),
            dataflows: Vec::new(),
            countries: None,
            start_year: None,
            end_year: None,
            sex: Some("_T".into()),
            tidy: true,
            country_names: true,
            max_retries: 3,
            cache: false,
            format: OutputFormat::Long,
            latest: false,
            add_metadata: Vec::new(),
            dropna: false,
            simplify: false,
            mrv: None,
            raw: false,
            ignore_duplicates: false,
        }
    }
}

/// Synchronous client for the UNICEF SDMX data warehouse.
///
/// Owns the HTTP transport, the indicator registry, the metadata store,
/// and the optional per-client memoization cache. All I/O is blocking and
/// sequential; query state never outlives a call.
pub struct Client {
    transport: Box<dyn Transport>,
    registry: Registry,
    store: MetadataStore,
    memo: RefCell<MemoCache>,
    base_url: String,
    agency: String,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Client against the live warehouse, with the cached indicator map
    /// when one is available.
    pub fn new() -> Self {
        Self::with_retries(3)
    }

    pub fn with_retries(max_retries: u32) -> Self {
        let store = MetadataStore::new(max_retries);
        let mut registry = Registry::seeded();
        if store.cache_info().available {
            registry.load_indicators(store.load_indicators());
        }
        Self {
            transport: Box::new(api::HttpTransport::new(max_retries)),
            registry,
            store,
            memo: RefCell::new(MemoCache::new()),
            base_url: api::BASE_URL.into(),
            agency: api::AGENCY.into(),
        }
    }

    /// Client over explicit collaborators. Tests plug canned transports in
    /// here.
    pub fn with_parts(
        transport: Box<dyn Transport>,
        store: MetadataStore,
        registry: Registry,
        base_url: &str,
    ) -> Self {
        Self {
            transport,
            registry,
            store,
            memo: RefCell::new(MemoCache::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
            agency: api::AGENCY.into(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Fetch and reshape into the requested table format.
    pub fn get(&self, opts: &GetOptions) -> Result<Table> {
        if opts.raw || !opts.tidy {
            let raw = self.fetch_raw(opts)?;
            return Ok(postprod::raw_table(&raw));
        }
        let rows = self.get_rows(opts)?;
        Ok(match opts.format {
            OutputFormat::Long => postprod::long_table(&rows, opts.simplify),
            OutputFormat::Wide => postprod::pivot_years(&rows),
            OutputFormat::WideIndicators => postprod::pivot_indicators(&rows),
        })
    }

    /// Fetch and normalize, applying every row-level post-production stage
    /// (enrichment, dropna, MRV, latest) but no pivoting.
    pub fn get_rows(&self, opts: &GetOptions) -> Result<Vec<ObservationRow>> {
        let raw = self.fetch_raw(opts)?;
        let mut rows = normalize::normalize(&raw);
        rows = normalize::collapse_disaggregations(rows);
        if let Some(countries) = &opts.countries {
            rows = normalize::filter_countries(rows, countries);
        }
        rows = normalize::enforce_unique(rows, opts.ignore_duplicates)?;
        if !opts.country_names {
            for row in &mut rows {
                row.country = None;
            }
        }
        if !opts.add_metadata.is_empty() {
            postprod::enrich(&mut rows, &opts.add_metadata, &self.registry);
        }
        if opts.dropna {
            rows = postprod::drop_missing(rows);
        }
        if let Some(n) = opts.mrv {
            if n > 0 {
                rows = postprod::most_recent(rows, n);
            }
        }
        if opts.latest {
            rows = postprod::latest(rows);
        }
        Ok(rows)
    }

    fn fetch_raw(&self, opts: &GetOptions) -> Result<Vec<RawRow>> {
        let params = QueryParams {
            indicators: opts.indicators.clone(),
            dataflows: opts.dataflows.clone(),
            countries: opts.countries.clone(),
            start_year: opts.start_year,
            end_year: opts.end_year,
            sex: opts.sex.clone(),
            page_size: None,
        };
        let plans = query::build(
            &params,
            &self.registry,
            &self.store,
            &self.base_url,
            &self.agency,
        )?;

        // Alternatives are keyed off the first indicator's prefix; a
        // dataflow-only query has nothing to fall back to.
        let alternatives: Vec<String> = match opts.indicators.first() {
            Some(code) => self.registry.fallback_dataflows(code),
            None => Vec::new(),
        };

        let mut out: Vec<RawRow> = Vec::new();
        for plan in &plans {
            if opts.cache {
                if let Some(hit) = self.memo.borrow().get(&plan.cache_key()) {
                    out.extend(hit.iter().cloned());
                    continue;
                }
            }
            let alt_plans: Vec<_> = alternatives
                .iter()
                .map(|flow| plan.with_dataflow(flow, &self.store.dataflow_version(flow)))
                .collect();
            let rows = fetch::execute_with_fallback(self.transport.as_ref(), plan, &alt_plans)?;
            if opts.cache {
                self.memo
                    .borrow_mut()
                    .put(plan.cache_key(), rows.clone());
            }
            out.extend(rows);
        }
        Ok(out)
    }

    /// All dataflows known to the warehouse (cache first, then network).
    pub fn list_dataflows(&self) -> Result<Vec<DataflowRecord>> {
        self.store.list_dataflows()
    }

    /// Dataflow an indicator reports under. Total; see [`Registry`].
    pub fn resolve_dataflow(&self, code: &str) -> String {
        self.registry.resolve_dataflow(code).to_string()
    }

    /// Run a metadata sync (see [`MetadataStore::sync`]).
    pub fn sync_metadata(&self, force: bool) -> Result<SyncCounts> {
        self.store.sync(force)
    }

    /// Reload the indicator map from the metadata cache. Returns the size
    /// of the catalog afterwards; failures keep the current catalog.
    pub fn refresh_indicator_cache(&mut self) -> usize {
        self.registry.load_indicators(self.store.load_indicators())
    }

    pub fn cache_info(&self) -> CacheInfo {
        self.store.cache_info()
    }
}

/// Fetch with a one-shot default client. See [`Client::get`].
pub fn get_unicef(opts: &GetOptions) -> Result<Table> {
    Client::with_retries(opts.max_retries).get(opts)
}

/// List dataflows with a one-shot default client.
pub fn list_dataflows() -> Result<Vec<DataflowRecord>> {
    Client::new().list_dataflows()
}

/// Resolve the dataflow for an indicator with a one-shot default client.
pub fn get_dataflow_for_indicator(code: &str) -> String {
    Client::new().resolve_dataflow(code)
}

/// Reload the indicator cache with a one-shot default client.
pub fn refresh_indicator_cache() -> usize {
    let mut client = Client::new();
    client.refresh_indicator_cache()
}

/// Inspect the metadata cache with a one-shot default client.
pub fn get_cache_info() -> CacheInfo {
    Client::new().cache_info()
}
