//! Versioned, file-backed cache of UNICEF SDMX metadata.
//!
//! The "current" cache is a directory of watermark-tagged YAML files,
//! fully replaced by every sync. Each sync also writes an immutable dated
//! vintage snapshot and appends a sync-history record, so consumers can pin
//! to a known-good snapshot and operators can audit metadata drift.
//!
//! A missing file or a file without a watermark is "cache unavailable",
//! never an error by itself: readers fall back to the network or to the
//! seed catalog.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::api::{self, Transport};
use crate::error::{Error, Result};
use crate::models::{DataflowRecord, DataflowSchema, IndicatorRecord, Watermark};
use crate::registry::Registry;
use crate::xml;

/// Re-sync automatically once the current cache is older than this.
pub const STALE_AFTER_DAYS: i64 = 30;

/// Codelists pulled by every sync.
const CODELIST_IDS: &[&str] = &[
    "CL_REF_AREA",
    "CL_SEX",
    "CL_AGE",
    "CL_WEALTH_QUINTILE",
    "CL_RESIDENCE",
    "CL_UNIT_MEASURE",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DataflowsFile {
    watermark: Watermark,
    dataflows: BTreeMap<String, DataflowRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndicatorsFile {
    watermark: Watermark,
    indicators: BTreeMap<String, IndicatorRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CodelistsFile {
    watermark: Watermark,
    codelists: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AreasFile {
    watermark: Watermark,
    areas: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SchemaFile {
    watermark: Watermark,
    schema: DataflowSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryFile {
    watermark: Watermark,
    entries: Vec<SyncCounts>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VintageSummary {
    watermark: Watermark,
    counts: BTreeMap<String, usize>,
}

/// Outcome of one sync run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncCounts {
    pub synced_at: String,
    pub dataflows: usize,
    pub codelists: usize,
    pub indicators: usize,
    pub schemas: usize,
    pub errors: Vec<String>,
    #[serde(default)]
    pub skipped: bool,
}

/// What `get_cache_info` reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheInfo {
    pub cache_dir: PathBuf,
    pub available: bool,
    pub watermark: Option<Watermark>,
    pub stale: bool,
    pub vintages: Vec<String>,
}

pub struct MetadataStore {
    cache_dir: PathBuf,
    base_url: String,
    agency: String,
    transport: Box<dyn Transport>,
    // Some(schema) = cached, None = recorded fetch failure; absent = untried.
    schemas: RefCell<HashMap<String, Option<DataflowSchema>>>,
}

impl MetadataStore {
    /// Store over the default cache directory and live HTTP transport.
    pub fn new(max_retries: u32) -> Self {
        Self::with_transport(
            default_cache_dir(),
            api::BASE_URL,
            api::AGENCY,
            Box::new(api::HttpTransport::new(max_retries)),
        )
    }

    pub fn with_transport(
        cache_dir: PathBuf,
        base_url: &str,
        agency: &str,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            cache_dir,
            base_url: base_url.trim_end_matches('/').to_string(),
            agency: agency.to_string(),
            transport,
            schemas: RefCell::new(HashMap::new()),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Dataflow records, from the cache when available, else from the
    /// network (without writing -- only `sync` writes).
    pub fn list_dataflows(&self) -> Result<Vec<DataflowRecord>> {
        if let Ok(file) = self.load_yaml::<DataflowsFile>("dataflows.yaml") {
            return Ok(file.dataflows.into_values().collect());
        }
        info!("dataflow cache unavailable, fetching from {}", self.base_url);
        self.fetch_dataflows()
    }

    /// Version string for a dataflow, defaulting to `1.0` when unknown.
    pub fn dataflow_version(&self, id: &str) -> String {
        if let Ok(file) = self.load_yaml::<DataflowsFile>("dataflows.yaml") {
            if let Some(df) = file.dataflows.get(id) {
                return df.version.clone();
            }
        }
        "1.0".into()
    }

    /// Lazily fetch and cache one dataflow's schema.
    ///
    /// A failure is recorded in memory so repeated lookups in the same
    /// process do not hammer the endpoint; it surfaces as `SchemaFetch`.
    pub fn get_schema(&self, id: &str) -> Result<DataflowSchema> {
        if let Some(cached) = self.schemas.borrow().get(id) {
            return match cached {
                Some(s) => Ok(s.clone()),
                None => Err(Error::SchemaFetch {
                    dataflow: id.into(),
                    reason: "previous fetch failed".into(),
                }),
            };
        }
        if let Ok(file) = self.load_yaml::<SchemaFile>(&format!("dataflows/{id}.yaml")) {
            self.schemas
                .borrow_mut()
                .insert(id.to_string(), Some(file.schema.clone()));
            return Ok(file.schema);
        }
        match self.fetch_schema(id) {
            Ok(schema) => {
                self.schemas
                    .borrow_mut()
                    .insert(id.to_string(), Some(schema.clone()));
                Ok(schema)
            }
            Err(e) => {
                self.schemas.borrow_mut().insert(id.to_string(), None);
                Err(Error::SchemaFetch {
                    dataflow: id.into(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Indicator map for the registry. Errors mean "cache unavailable".
    pub fn load_indicators(&self) -> Result<HashMap<String, IndicatorRecord>> {
        let file = self.load_yaml::<IndicatorsFile>("indicators.yaml")?;
        Ok(file.indicators.into_iter().collect())
    }

    /// True when the current cache is missing or older than
    /// [`STALE_AFTER_DAYS`].
    pub fn is_stale(&self) -> bool {
        match self.load_yaml::<DataflowsFile>("dataflows.yaml") {
            Ok(file) => {
                let age = Utc::now() - file.watermark.synced_at;
                age.num_days() >= STALE_AFTER_DAYS
            }
            Err(_) => true,
        }
    }

    pub fn cache_info(&self) -> CacheInfo {
        let watermark = self
            .load_yaml::<DataflowsFile>("dataflows.yaml")
            .ok()
            .map(|f| f.watermark);
        CacheInfo {
            cache_dir: self.cache_dir.clone(),
            available: watermark.is_some(),
            stale: self.is_stale(),
            watermark,
            vintages: self.list_vintages(),
        }
    }

    /// Dated vintage snapshots present on disk, oldest first.
    pub fn list_vintages(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Ok(entries) = fs::read_dir(self.cache_dir.join("vintages")) {
            for entry in entries.flatten() {
                if entry.path().is_dir() {
                    out.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }
        out.sort();
        out
    }

    /// Fetch all metadata and fully replace the current cache, the dated
    /// vintage snapshot, and the sync history.
    ///
    /// With `force == false` a fresh cache short-circuits to a skipped
    /// result. Individual codelist/schema failures are recorded and do not
    /// abort the sync.
    pub fn sync(&self, force: bool) -> Result<SyncCounts> {
        if !force && !self.is_stale() {
            info!("metadata cache is fresh, skipping sync (use force to override)");
            return Ok(SyncCounts {
                synced_at: Utc::now().to_rfc3339(),
                skipped: true,
                ..SyncCounts::default()
            });
        }

        let mut counts = SyncCounts {
            synced_at: Utc::now().to_rfc3339(),
            ..SyncCounts::default()
        };
        let mut written: Vec<PathBuf> = Vec::new();

        // Dataflows. A failure here aborts: everything else hangs off them.
        let dataflows = self.fetch_dataflows()?;
        counts.dataflows = dataflows.len();
        let source = format!("{}/dataflow/{}", self.base_url, self.agency);
        let file = DataflowsFile {
            watermark: Watermark::new(&source, &self.agency, "dataflows")
                .with_count("dataflows", dataflows.len()),
            dataflows: dataflows
                .iter()
                .map(|d| (d.id.clone(), d.clone()))
                .collect(),
        };
        written.push(self.save_yaml("dataflows.yaml", &file)?);

        // Codelists, isolated per list.
        let mut codelists: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for cl_id in CODELIST_IDS {
            match self.fetch_codelist(cl_id) {
                Ok(codes) => {
                    codelists.insert((*cl_id).to_string(), codes.into_iter().collect());
                }
                Err(e) => {
                    warn!("could not fetch codelist {cl_id}: {e}");
                    counts.errors.push(format!("codelist {cl_id}: {e}"));
                }
            }
        }
        counts.codelists = codelists.len();
        let source = format!("{}/codelist/{}", self.base_url, self.agency);
        let file = CodelistsFile {
            watermark: Watermark::new(&source, &self.agency, "codelists")
                .with_count("codelists", codelists.len()),
            codelists: codelists.clone(),
        };
        written.push(self.save_yaml("codelists.yaml", &file)?);

        // Countries vs regions out of CL_REF_AREA: three alphabetic
        // characters is a country, anything else an aggregate.
        let ref_area = codelists.get("CL_REF_AREA").cloned().unwrap_or_default();
        let (countries, regions): (BTreeMap<_, _>, BTreeMap<_, _>) = ref_area
            .into_iter()
            .partition(|(code, _)| code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()));
        written.push(self.save_yaml(
            "countries.yaml",
            &AreasFile {
                watermark: Watermark::new(&source, &self.agency, "countries")
                    .with_count("countries", countries.len()),
                areas: countries,
            },
        )?);
        written.push(self.save_yaml(
            "regions.yaml",
            &AreasFile {
                watermark: Watermark::new(&source, &self.agency, "regions")
                    .with_count("regions", regions.len()),
                areas: regions,
            },
        )?);

        // Indicator catalog from the seed registry.
        let registry = Registry::seeded();
        let indicators: BTreeMap<String, IndicatorRecord> = registry
            .list_indicators()
            .into_iter()
            .map(|r| (r.code.clone(), r.clone()))
            .collect();
        counts.indicators = indicators.len();
        let file = IndicatorsFile {
            watermark: Watermark::new("seed catalog", &self.agency, "indicators")
                .with_count("indicators", indicators.len()),
            indicators: indicators.clone(),
        };
        written.push(self.save_yaml("indicators.yaml", &file)?);

        // Per-dataflow schemas for every dataflow the catalog references,
        // isolated per dataflow.
        let mut flows: Vec<String> = indicators.values().map(|r| r.dataflow.clone()).collect();
        flows.sort();
        flows.dedup();
        for flow in &flows {
            match self.fetch_schema(flow) {
                Ok(schema) => {
                    let source = format!("{}/dataflow/{}/{flow}", self.base_url, self.agency);
                    let file = SchemaFile {
                        watermark: Watermark::new(&source, &self.agency, "schema")
                            .with_count("dimensions", schema.dimensions.len()),
                        schema: schema.clone(),
                    };
                    written.push(self.save_yaml(&format!("dataflows/{flow}.yaml"), &file)?);
                    self.schemas
                        .borrow_mut()
                        .insert(flow.clone(), Some(schema));
                    counts.schemas += 1;
                }
                Err(e) => {
                    let err = Error::SchemaFetch {
                        dataflow: flow.clone(),
                        reason: e.to_string(),
                    };
                    warn!("{err}");
                    counts.errors.push(err.to_string());
                    self.schemas.borrow_mut().insert(flow.clone(), None);
                }
            }
        }

        self.write_vintage(&written, &counts)?;
        self.append_history(&counts)?;

        info!(
            "sync complete: {} dataflows, {} codelists, {} indicators, {} schemas, {} error(s)",
            counts.dataflows,
            counts.codelists,
            counts.indicators,
            counts.schemas,
            counts.errors.len()
        );
        Ok(counts)
    }

    // --- network ---------------------------------------------------------

    fn fetch_dataflows(&self) -> Result<Vec<DataflowRecord>> {
        let url = format!(
            "{}/dataflow/{}?references=none&detail=full",
            self.base_url, self.agency
        );
        let body = self.transport.get_text(&url).map_err(Error::from)?;
        xml::parse_dataflows(&body, &self.agency)
    }

    fn fetch_codelist(&self, id: &str) -> Result<Vec<(String, String)>> {
        let url = format!("{}/codelist/{}/{id}/latest", self.base_url, self.agency);
        let body = self.transport.get_text(&url).map_err(Error::from)?;
        xml::parse_codelist(&body)
    }

    fn fetch_schema(&self, id: &str) -> Result<DataflowSchema> {
        let version = self.dataflow_version(id);
        let url = format!(
            "{}/dataflow/{}/{id}/{version}?references=children",
            self.base_url, self.agency
        );
        let body = self.transport.get_text(&url).map_err(Error::from)?;
        xml::parse_schema(&body, id, &version)
    }

    // --- disk ------------------------------------------------------------

    fn save_yaml<T: Serialize>(&self, rel: &str, value: &T) -> Result<PathBuf> {
        let path = self.cache_dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_yaml::to_string(value)?;
        fs::write(&path, text)?;
        Ok(path)
    }

    fn load_yaml<T: DeserializeOwned>(&self, rel: &str) -> Result<T> {
        let path = self.cache_dir.join(rel);
        let text = fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Immutable copy of the files just written, keyed by sync date.
    fn write_vintage(&self, written: &[PathBuf], counts: &SyncCounts) -> Result<()> {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let vintage_dir = self.cache_dir.join("vintages").join(&date);
        for path in written {
            let rel = path
                .strip_prefix(&self.cache_dir)
                .unwrap_or(path.as_path());
            let dest = vintage_dir.join(rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(path, dest)?;
        }
        let mut item_counts = BTreeMap::new();
        item_counts.insert("dataflows".into(), counts.dataflows);
        item_counts.insert("codelists".into(), counts.codelists);
        item_counts.insert("indicators".into(), counts.indicators);
        item_counts.insert("schemas".into(), counts.schemas);
        let summary = VintageSummary {
            watermark: Watermark::new("sync", &self.agency, "vintage_summary"),
            counts: item_counts,
        };
        let text = serde_yaml::to_string(&summary)?;
        fs::create_dir_all(&vintage_dir)?;
        fs::write(vintage_dir.join("summary.yaml"), text)?;
        Ok(())
    }

    fn append_history(&self, counts: &SyncCounts) -> Result<()> {
        let mut entries = self
            .load_yaml::<HistoryFile>("sync_history.yaml")
            .map(|f| f.entries)
            .unwrap_or_default();
        entries.push(counts.clone());
        let file = HistoryFile {
            watermark: Watermark::new("sync", &self.agency, "sync_history")
                .with_count("entries", entries.len()),
            entries,
        };
        self.save_yaml("sync_history.yaml", &file)?;
        Ok(())
    }
}

/// Platform cache directory, falling back to `./metadata`.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("ucd-rs").join("metadata"))
        .unwrap_or_else(|| PathBuf::from("metadata"))
}
