//! Indicator registry: indicator -> dataflow resolution.
//!
//! Resolution is a deterministic, total function. Order: curated override
//! table, then the loaded indicator map, then prefix inference, then the
//! global catch-all dataflow. Each resolution logs which rule fired.
//!
//! The override/prefix tables are immutable data injected at construction,
//! not module globals; tests can build a registry around their own tables.

use std::collections::HashMap;

use log::{info, warn};

use crate::models::IndicatorRecord;

/// Catch-all dataflow used when no other rule matches.
pub const DEFAULT_DATAFLOW: &str = "GLOBAL_DATAFLOW";

/// Indicators known to report under a different dataflow than their
/// registered category. Checked before everything else.
const OVERRIDES: &[(&str, &str)] = &[
    ("PT_F_20-24_MRD_U15", "PT_CM"),
    ("PT_F_20-24_MRD_U18_TND", "PT_CM"),
    ("PT_M_20-24_MRD_U18", "PT_CM"),
    ("PT_F_0-14_FGM", "PT_FGM"),
    ("PT_F_15-49_FGM", "PT_FGM"),
];

/// Code prefix (up to the first underscore) -> dataflow.
const PREFIXES: &[(&str, &str)] = &[
    ("CME", "CME"),
    ("NT", "NUTRITION"),
    ("ED", "EDUCATION_UIS_SDG"),
    ("IM", "IMMUNISATION"),
    ("HVA", "HIV_AIDS"),
    ("WS", "WASH_HOUSEHOLDS"),
    ("MNCH", "MNCH"),
    ("PT", "PT"),
    ("ECD", "ECD"),
    ("PV", "CHLD_PVTY"),
];

/// Ordered alternative dataflows tried by the fetch orchestrator when the
/// primary yields nothing. Always ends at the global dataflow.
const FALLBACKS: &[(&str, &[&str])] = &[
    ("CME", &["CME", DEFAULT_DATAFLOW]),
    ("NT", &["NUTRITION", DEFAULT_DATAFLOW]),
    ("ED", &["EDUCATION_UIS_SDG", "EDUCATION", DEFAULT_DATAFLOW]),
    ("IM", &["IMMUNISATION", DEFAULT_DATAFLOW]),
    ("HVA", &["HIV_AIDS", DEFAULT_DATAFLOW]),
    ("WS", &["WASH_HOUSEHOLDS", DEFAULT_DATAFLOW]),
    ("MNCH", &["MNCH", DEFAULT_DATAFLOW]),
    ("PT", &["PT", "PT_CM", "PT_FGM", DEFAULT_DATAFLOW]),
    ("ECD", &["ECD", DEFAULT_DATAFLOW]),
    ("PV", &["CHLD_PVTY", DEFAULT_DATAFLOW]),
];

/// Seed catalog of common SDG indicators, used until a metadata sync
/// provides the full cached map.
#[rustfmt::skip]
const SEED_INDICATORS: &[(&str, &str, &str, &str, &str)] = &[
    ("CME_MRM0", "Neonatal mortality rate", "CME", "3.2.2", "Deaths per 1,000 live births"),
    ("CME_MRY0T4", "Under-5 mortality rate", "CME", "3.2.1", "Deaths per 1,000 live births"),
    ("NT_ANT_HAZ_NE2_MOD", "Stunting prevalence (moderate + severe)", "NUTRITION", "2.2.1", "Percentage"),
    ("NT_ANT_WHZ_NE2", "Wasting prevalence", "NUTRITION", "2.2.2", "Percentage"),
    ("NT_ANT_WHZ_PO2_MOD", "Overweight prevalence (moderate + severe)", "NUTRITION", "2.2.2", "Percentage"),
    ("ED_ANAR_L02", "Adjusted net attendance rate, primary education", "EDUCATION_UIS_SDG", "4.1.1", "Percentage"),
    ("ED_CR_L1_UIS_MOD", "Completion rate, primary education", "EDUCATION_UIS_SDG", "4.1.1", "Percentage"),
    ("ED_CR_L2_UIS_MOD", "Completion rate, lower secondary education", "EDUCATION_UIS_SDG", "4.1.1", "Percentage"),
    ("ED_READ_L2", "Reading proficiency, end of lower secondary", "EDUCATION_UIS_SDG", "4.1.1", "Percentage"),
    ("ED_MAT_L2", "Mathematics proficiency, end of lower secondary", "EDUCATION_UIS_SDG", "4.1.1", "Percentage"),
    ("IM_DTP3", "DTP3 immunization coverage", "IMMUNISATION", "3.b.1", "Percentage"),
    ("IM_MCV1", "Measles immunization coverage (MCV1)", "IMMUNISATION", "3.b.1", "Percentage"),
    ("HVA_EPI_INF_RT", "HIV incidence rate", "HIV_AIDS", "3.3.1", "Per 1,000 uninfected population"),
    ("WS_PPL_W-SM", "Population using safely managed drinking water services", "WASH_HOUSEHOLDS", "6.1.1", "Percentage"),
    ("WS_PPL_S-SM", "Population using safely managed sanitation services", "WASH_HOUSEHOLDS", "6.2.1", "Percentage"),
    ("WS_PPL_H-B", "Population with basic handwashing facilities", "WASH_HOUSEHOLDS", "6.2.1", "Percentage"),
    ("MNCH_MMR", "Maternal mortality ratio", "MNCH", "3.1.1", "Deaths per 100,000 live births"),
    ("MNCH_SAB", "Skilled attendance at birth", "MNCH", "3.1.2", "Percentage"),
    ("MNCH_ABR", "Adolescent birth rate", "MNCH", "3.7.2", "Births per 1,000 women aged 15-19"),
    ("PT_CHLD_Y0T4_REG", "Birth registration (children under 5)", "PT", "16.9.1", "Percentage"),
    ("PT_CHLD_1-14_PS-PSY-V_CGVR", "Violent discipline (children 1-14)", "PT", "16.2.1", "Percentage"),
    ("PT_F_20-24_MRD_U18_TND", "Child marriage before age 18 (women 20-24)", "PT_CM", "5.3.1", "Percentage"),
    ("PT_F_15-49_FGM", "Female genital mutilation prevalence (women 15-49)", "PT_FGM", "5.3.2", "Percentage"),
    ("ECD_CHLD_LMPSL", "Children developmentally on track", "ECD", "4.2.1", "Percentage"),
    ("PV_CHLD_DPRV-S-L1-HS", "Child multidimensional poverty (severe, >=1 dimension)", "CHLD_PVTY", "1.2.1", "Percentage"),
];

/// Where the current indicator map came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrySource {
    Seed,
    Cache,
}

#[derive(Debug, Clone)]
pub struct Registry {
    overrides: HashMap<String, String>,
    indicators: HashMap<String, IndicatorRecord>,
    prefixes: HashMap<String, String>,
    default_dataflow: String,
    source: RegistrySource,
}

impl Default for Registry {
    fn default() -> Self {
        Self::seeded()
    }
}

impl Registry {
    /// Registry over the built-in seed catalog and curated tables.
    pub fn seeded() -> Self {
        let indicators = SEED_INDICATORS
            .iter()
            .map(|(code, name, dataflow, sdg, unit)| {
                (
                    (*code).to_string(),
                    IndicatorRecord {
                        code: (*code).into(),
                        name: (*name).into(),
                        dataflow: (*dataflow).into(),
                        sdg_target: Some((*sdg).into()),
                        unit: Some((*unit).into()),
                    },
                )
            })
            .collect();
        Self::with_indicators(indicators, RegistrySource::Seed)
    }

    /// Registry over an explicit indicator map (e.g. loaded from the
    /// metadata cache). The curated override/prefix tables still apply.
    pub fn with_indicators(
        indicators: HashMap<String, IndicatorRecord>,
        source: RegistrySource,
    ) -> Self {
        Self {
            overrides: OVERRIDES
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            indicators,
            prefixes: PREFIXES
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            default_dataflow: DEFAULT_DATAFLOW.into(),
            source,
        }
    }

    /// Replace the indicator map with one loaded from a cache. A load
    /// failure is non-fatal: the current map stays and resolution falls
    /// through to prefix inference.
    pub fn load_indicators(
        &mut self,
        loaded: crate::error::Result<HashMap<String, IndicatorRecord>>,
    ) -> usize {
        match loaded {
            Ok(map) if !map.is_empty() => {
                self.indicators = map;
                self.source = RegistrySource::Cache;
                self.indicators.len()
            }
            Ok(_) => {
                warn!("indicator cache is empty, keeping current catalog");
                self.indicators.len()
            }
            Err(e) => {
                warn!("indicator cache unavailable ({e}), keeping current catalog");
                self.indicators.len()
            }
        }
    }

    /// Resolve the dataflow an indicator reports under. Total: worst case
    /// returns the global default.
    pub fn resolve_dataflow(&self, code: &str) -> &str {
        if let Some(flow) = self.overrides.get(code) {
            info!("resolved {code} -> {flow} (override table)");
            return flow;
        }
        if let Some(rec) = self.indicators.get(code) {
            info!("resolved {code} -> {} (indicator registry)", rec.dataflow);
            return &rec.dataflow;
        }
        let prefix = code.split('_').next().unwrap_or(code);
        if let Some(flow) = self.prefixes.get(prefix) {
            info!("resolved {code} -> {flow} (prefix {prefix})");
            return flow;
        }
        info!("resolved {code} -> {} (default)", self.default_dataflow);
        &self.default_dataflow
    }

    /// Ordered alternative dataflows for an indicator, tried by the
    /// orchestrator after the primary comes up empty.
    pub fn fallback_dataflows(&self, code: &str) -> Vec<String> {
        let prefix = code.split('_').next().unwrap_or(code);
        let alts = FALLBACKS
            .iter()
            .find(|(p, _)| *p == prefix)
            .map(|(_, flows)| *flows)
            .unwrap_or(&[DEFAULT_DATAFLOW]);
        alts.iter().map(|f| (*f).to_string()).collect()
    }

    pub fn indicator_info(&self, code: &str) -> Option<&IndicatorRecord> {
        self.indicators.get(code)
    }

    /// All registered indicators, sorted by code.
    pub fn list_indicators(&self) -> Vec<&IndicatorRecord> {
        let mut out: Vec<_> = self.indicators.values().collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        out
    }

    /// Case-insensitive substring search over code and name.
    pub fn search_indicators(&self, query: &str) -> Vec<&IndicatorRecord> {
        let q = query.to_lowercase();
        let mut out: Vec<_> = self
            .indicators
            .values()
            .filter(|r| r.code.to_lowercase().contains(&q) || r.name.to_lowercase().contains(&q))
            .collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        out
    }

    /// Distinct categories (code prefixes), sorted.
    pub fn list_categories(&self) -> Vec<String> {
        let mut cats: Vec<String> = self
            .indicators
            .values()
            .map(|r| r.category().to_string())
            .collect();
        cats.sort();
        cats.dedup();
        cats
    }

    pub fn indicators_for_dataflow(&self, dataflow: &str) -> Vec<&IndicatorRecord> {
        let mut out: Vec<_> = self
            .indicators
            .values()
            .filter(|r| r.dataflow == dataflow)
            .collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        out
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    pub fn source(&self) -> RegistrySource {
        self.source
    }
}
