//! Metadata sync against canned SDMX-ML structure documents.

use std::sync::{Arc, Mutex};

use tempfile::tempdir;
use ucd_rs::Error;
use ucd_rs::api::{FetchError, Transport};
use ucd_rs::metadata::MetadataStore;

const BASE: &str = "https://sdmx.example.test/rest";

const DATAFLOWS_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<mes:Structure xmlns:mes="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/message"
               xmlns:str="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/structure"
               xmlns:com="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/common">
  <mes:Structures>
    <str:Dataflows>
      <str:Dataflow id="CME" agencyID="UNICEF" version="1.0">
        <com:Name xml:lang="en">Child Mortality Estimates</com:Name>
        <com:Name xml:lang="fr">Estimations de la mortalite</com:Name>
      </str:Dataflow>
      <str:Dataflow id="GLOBAL_DATAFLOW" agencyID="UNICEF" version="1.0">
        <com:Name xml:lang="en">Global dataflow</com:Name>
      </str:Dataflow>
    </str:Dataflows>
  </mes:Structures>
</mes:Structure>
"#;

const REF_AREA_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<mes:Structure xmlns:mes="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/message"
               xmlns:str="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/structure"
               xmlns:com="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/common">
  <str:Codelist id="CL_REF_AREA" agencyID="UNICEF" version="1.0">
    <str:Code id="ALB"><com:Name>Albania</com:Name></str:Code>
    <str:Code id="USA"><com:Name>United States</com:Name></str:Code>
    <str:Code id="UNICEF_SSA"><com:Name>Sub-Saharan Africa</com:Name></str:Code>
    <str:Code id="WORLD"/>
  </str:Codelist>
</mes:Structure>
"#;

const SEX_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<str:Codelist xmlns:str="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/structure"
              xmlns:com="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/common"
              id="CL_SEX" agencyID="UNICEF" version="1.0">
  <str:Code id="_T"><com:Name>Total</com:Name></str:Code>
  <str:Code id="F"><com:Name>Female</com:Name></str:Code>
  <str:Code id="M"><com:Name>Male</com:Name></str:Code>
</str:Codelist>
"#;

const CME_SCHEMA_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<mes:Structure xmlns:mes="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/message"
               xmlns:str="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/structure"
               xmlns:com="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/common">
  <mes:Structures>
    <str:Dataflows>
      <str:Dataflow id="CME" agencyID="UNICEF" version="1.0">
        <com:Name>Child Mortality Estimates</com:Name>
      </str:Dataflow>
    </str:Dataflows>
    <str:DataStructures>
      <str:DataStructure id="DSD_CME" agencyID="UNICEF" version="1.0">
        <str:DataStructureComponents>
          <str:DimensionList>
            <str:Dimension id="REF_AREA" position="1">
              <str:LocalRepresentation>
                <str:Enumeration><Ref id="CL_REF_AREA" package="codelist"/></str:Enumeration>
              </str:LocalRepresentation>
            </str:Dimension>
            <str:Dimension id="INDICATOR" position="2">
              <str:LocalRepresentation>
                <str:Enumeration><Ref id="CL_CME_INDICATOR" package="codelist"/></str:Enumeration>
              </str:LocalRepresentation>
            </str:Dimension>
            <str:Dimension id="SEX" position="3">
              <str:LocalRepresentation>
                <str:Enumeration><Ref id="CL_SEX" package="codelist"/></str:Enumeration>
              </str:LocalRepresentation>
            </str:Dimension>
            <str:TimeDimension id="TIME_PERIOD" position="4"/>
          </str:DimensionList>
          <str:AttributeList>
            <str:Attribute id="UNIT_MEASURE">
              <str:LocalRepresentation>
                <str:Enumeration><Ref id="CL_UNIT_MEASURE" package="codelist"/></str:Enumeration>
              </str:LocalRepresentation>
            </str:Attribute>
            <str:Attribute id="OBS_STATUS"/>
          </str:AttributeList>
          <str:MeasureList>
            <str:PrimaryMeasure id="OBS_VALUE"/>
          </str:MeasureList>
        </str:DataStructureComponents>
      </str:DataStructure>
    </str:DataStructures>
  </mes:Structures>
</mes:Structure>
"#;

#[derive(Clone, Default)]
struct StructureTransport {
    requests: Arc<Mutex<Vec<String>>>,
}

impl Transport for StructureTransport {
    fn get_text(&self, url: &str) -> Result<String, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        if url.contains("/dataflow/UNICEF?") {
            return Ok(DATAFLOWS_XML.to_string());
        }
        if url.contains("/codelist/UNICEF/CL_REF_AREA/") {
            return Ok(REF_AREA_XML.to_string());
        }
        if url.contains("/codelist/UNICEF/CL_SEX/") {
            return Ok(SEX_XML.to_string());
        }
        if url.contains("/dataflow/UNICEF/CME/") {
            return Ok(CME_SCHEMA_XML.to_string());
        }
        // Everything else (other codelists, other dataflow schemas) is
        // missing upstream.
        Err(FetchError::NotFound { url: url.into() })
    }
}

fn store(dir: &tempfile::TempDir) -> (MetadataStore, StructureTransport) {
    let transport = StructureTransport::default();
    let store = MetadataStore::with_transport(
        dir.path().to_path_buf(),
        BASE,
        "UNICEF",
        Box::new(transport.clone()),
    );
    (store, transport)
}

#[test]
fn sync_writes_current_cache_vintage_and_history() {
    let dir = tempdir().unwrap();
    let (store, _transport) = store(&dir);

    let counts = store.sync(true).unwrap();
    assert!(!counts.skipped);
    assert_eq!(counts.dataflows, 2);
    assert_eq!(counts.codelists, 2);
    assert!(counts.indicators > 0);
    assert_eq!(counts.schemas, 1); // only CME's schema exists upstream

    // Isolated failures are recorded, not fatal.
    assert!(counts.errors.iter().any(|e| e.contains("CL_AGE")));
    assert!(counts.errors.iter().any(|e| e.contains("NUTRITION")));

    for file in [
        "dataflows.yaml",
        "codelists.yaml",
        "countries.yaml",
        "regions.yaml",
        "indicators.yaml",
        "sync_history.yaml",
        "dataflows/CME.yaml",
    ] {
        assert!(dir.path().join(file).exists(), "missing {file}");
    }

    let vintages = store.list_vintages();
    assert_eq!(vintages.len(), 1);
    let vintage_dir = dir.path().join("vintages").join(&vintages[0]);
    assert!(vintage_dir.join("summary.yaml").exists());
    assert!(vintage_dir.join("dataflows.yaml").exists());

    let info = store.cache_info();
    assert!(info.available);
    assert!(!info.stale);
    let watermark = info.watermark.unwrap();
    assert_eq!(watermark.platform, "ucd-rs");
    assert_eq!(watermark.agency, "UNICEF");
}

#[test]
fn countries_and_regions_split_out_of_ref_area() {
    let dir = tempdir().unwrap();
    let (store, _transport) = store(&dir);
    store.sync(true).unwrap();

    let countries = std::fs::read_to_string(dir.path().join("countries.yaml")).unwrap();
    assert!(countries.contains("ALB"));
    assert!(countries.contains("USA"));
    assert!(!countries.contains("UNICEF_SSA"));

    let regions = std::fs::read_to_string(dir.path().join("regions.yaml")).unwrap();
    assert!(regions.contains("UNICEF_SSA"));
    assert!(regions.contains("WORLD"));
}

#[test]
fn fresh_cache_skips_sync_unless_forced() {
    let dir = tempdir().unwrap();
    let (store, transport) = store(&dir);

    store.sync(true).unwrap();
    let calls = transport.requests.lock().unwrap().len();

    let counts = store.sync(false).unwrap();
    assert!(counts.skipped);
    assert_eq!(transport.requests.lock().unwrap().len(), calls);

    // A forced re-sync runs again and appends to the history.
    store.sync(true).unwrap();
    let history = std::fs::read_to_string(dir.path().join("sync_history.yaml")).unwrap();
    assert!(history.matches("synced_at").count() >= 2);
}

#[test]
fn list_dataflows_prefers_cache_and_falls_back_to_network() {
    let dir = tempdir().unwrap();
    let (store, transport) = store(&dir);

    // No cache yet: network fetch.
    let flows = store.list_dataflows().unwrap();
    assert_eq!(flows.len(), 2);
    assert!(
        flows
            .iter()
            .any(|f| f.id == "CME" && f.name == "Child Mortality Estimates")
    );
    let calls_before = transport.requests.lock().unwrap().len();

    store.sync(true).unwrap();
    let calls_after_sync = transport.requests.lock().unwrap().len();
    assert!(calls_after_sync > calls_before);

    // Cached now: no further requests.
    let flows = store.list_dataflows().unwrap();
    assert_eq!(flows.len(), 2);
    assert_eq!(transport.requests.lock().unwrap().len(), calls_after_sync);
}

#[test]
fn schema_is_lazy_cached_and_failures_are_isolated() {
    let dir = tempdir().unwrap();
    let (store, transport) = store(&dir);

    let schema = store.get_schema("CME").unwrap();
    assert_eq!(schema.id, "CME");
    assert_eq!(schema.name, "Child Mortality Estimates");
    assert_eq!(schema.time_dimension, "TIME_PERIOD");
    assert_eq!(schema.primary_measure, "OBS_VALUE");
    assert_eq!(schema.dimensions.len(), 3);
    assert_eq!(schema.dimensions[0].id, "REF_AREA");
    assert_eq!(schema.dimensions[0].codelist.as_deref(), Some("CL_REF_AREA"));
    assert_eq!(schema.dimensions[2].id, "SEX");
    assert_eq!(schema.attributes.len(), 2);
    assert_eq!(schema.attributes[1].codelist, None);

    // Second lookup is served from memory.
    let calls = transport.requests.lock().unwrap().len();
    store.get_schema("CME").unwrap();
    assert_eq!(transport.requests.lock().unwrap().len(), calls);

    // A missing schema fails with the typed error and is marked so the
    // next lookup does not refetch.
    let err = store.get_schema("NUTRITION").unwrap_err();
    assert!(matches!(err, Error::SchemaFetch { ref dataflow, .. } if dataflow == "NUTRITION"));
    let calls = transport.requests.lock().unwrap().len();
    let err = store.get_schema("NUTRITION").unwrap_err();
    assert!(matches!(err, Error::SchemaFetch { .. }));
    assert_eq!(transport.requests.lock().unwrap().len(), calls);
}

#[test]
fn dataflow_version_defaults_without_cache() {
    let dir = tempdir().unwrap();
    let (store, _transport) = store(&dir);
    assert_eq!(store.dataflow_version("CME"), "1.0");
}

#[test]
fn indicator_map_round_trips_through_cache() {
    let dir = tempdir().unwrap();
    let (store, _transport) = store(&dir);

    // Unavailable before the first sync.
    assert!(store.load_indicators().is_err());

    store.sync(true).unwrap();
    let map = store.load_indicators().unwrap();
    assert!(map.contains_key("CME_MRY0T4"));
    assert_eq!(map["CME_MRY0T4"].dataflow, "CME");
}
