//! End-to-end fetch -> normalize -> post-production against canned CSV.

use tempfile::tempdir;
use ucd_rs::api::{FetchError, Transport};
use ucd_rs::metadata::MetadataStore;
use ucd_rs::registry::Registry;
use ucd_rs::{Client, GetOptions, OutputFormat};

const BASE: &str = "https://sdmx.example.test/rest";

const HEADER: &str = "DATAFLOW,REF_AREA: Geographic area,INDICATOR: Indicator,SEX: Sex,TIME_PERIOD: Time period,OBS_VALUE: Observation Value,LOWER_BOUND: Lower bound,UPPER_BOUND: Upper bound";

fn cme_row(iso3: &str, name: &str, sex: &str, year: i32, value: f64) -> String {
    format!(
        "UNICEF:CME(1.0),{iso3}: {name},CME_MRY0T4: Under-five mortality rate,{sex},{year},{value},,"
    )
}

struct CmeTransport {
    body: String,
}

impl Transport for CmeTransport {
    fn get_text(&self, url: &str) -> Result<String, FetchError> {
        if url.contains(",CME,") {
            Ok(self.body.clone())
        } else {
            Err(FetchError::NotFound { url: url.into() })
        }
    }
}

fn client(body: String) -> (Client, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let store = MetadataStore::with_transport(
        dir.path().to_path_buf(),
        BASE,
        "UNICEF",
        Box::new(CmeTransport { body: body.clone() }),
    );
    let client = Client::with_parts(
        Box::new(CmeTransport { body }),
        store,
        Registry::seeded(),
        BASE,
    );
    (client, dir)
}

fn canned_body() -> String {
    let mut lines = vec![HEADER.to_string()];
    for (iso3, name) in [
        ("ALB", "Albania"),
        ("USA", "United States"),
        ("BRA", "Brazil"),
    ] {
        for year in [2015, 2018, 2021, 2023] {
            lines.push(cme_row(
                iso3,
                name,
                "_T: Total",
                year,
                10.0 - f64::from(year % 7),
            ));
            lines.push(cme_row(iso3, name, "F: Female", year, 9.0));
            lines.push(cme_row(iso3, name, "M: Male", year, 11.0));
        }
    }
    // An area the caller did not ask for.
    lines.push(cme_row("XKX", "Kosovo", "_T: Total", 2021, 12.0));
    lines.join("\n") + "\n"
}

#[test]
fn requested_countries_years_and_totals_only() {
    let (client, _dir) = client(canned_body());
    let rows = client
        .get_rows(&GetOptions {
            indicators: vec!["CME_MRY0T4".into()],
            countries: Some(vec!["ALB".into(), "USA".into(), "BRA".into()]),
            start_year: Some(2015),
            end_year: Some(2023),
            ..GetOptions::default()
        })
        .unwrap();

    assert!(!rows.is_empty());
    assert_eq!(rows.len(), 12); // 3 countries x 4 years, totals only
    for row in &rows {
        assert_eq!(row.sex.as_deref(), Some("_T"));
        assert!(["ALB", "USA", "BRA"].contains(&row.iso3.as_str()));
        assert!(row.period >= 2015.0 && row.period <= 2023.0);
        assert_eq!(row.indicator, "CME_MRY0T4");
    }
}

#[test]
fn country_names_come_from_the_labels() {
    let (client, _dir) = client(canned_body());
    let rows = client
        .get_rows(&GetOptions {
            indicators: vec!["CME_MRY0T4".into()],
            countries: Some(vec!["ALB".into()]),
            ..GetOptions::default()
        })
        .unwrap();
    assert!(rows.iter().all(|r| r.country.as_deref() == Some("Albania")));

    let rows = client
        .get_rows(&GetOptions {
            indicators: vec!["CME_MRY0T4".into()],
            countries: Some(vec!["ALB".into()]),
            country_names: false,
            ..GetOptions::default()
        })
        .unwrap();
    assert!(rows.iter().all(|r| r.country.is_none()));
}

#[test]
fn wide_format_produces_year_columns() {
    let mut lines = vec![HEADER.to_string()];
    for (iso3, name) in [("ALB", "Albania"), ("USA", "United States")] {
        for year in [2020, 2021, 2022] {
            lines.push(cme_row(iso3, name, "_T: Total", year, f64::from(year)));
        }
    }
    let (client, _dir) = client(lines.join("\n") + "\n");

    let table = client
        .get(&GetOptions {
            indicators: vec!["CME_MRY0T4".into()],
            format: OutputFormat::Wide,
            ..GetOptions::default()
        })
        .unwrap();

    assert_eq!(table.len(), 2);
    assert_eq!(
        table.columns,
        vec!["iso3", "country", "y2020", "y2021", "y2022"]
    );
}

#[test]
fn raw_mode_returns_server_columns() {
    let (client, _dir) = client(canned_body());
    let table = client
        .get(&GetOptions {
            indicators: vec!["CME_MRY0T4".into()],
            raw: true,
            ..GetOptions::default()
        })
        .unwrap();
    assert!(table.columns.iter().any(|c| c.starts_with("REF_AREA")));
    assert!(table.columns.iter().any(|c| c.starts_with("OBS_VALUE")));
    // Untouched: the extra area and disaggregations are still there.
    assert_eq!(table.len(), 37);
}

#[test]
fn latest_with_metadata_and_simplify() {
    let (client, _dir) = client(canned_body());
    let table = client
        .get(&GetOptions {
            indicators: vec!["CME_MRY0T4".into()],
            countries: Some(vec!["ALB".into(), "USA".into()]),
            latest: true,
            add_metadata: vec![ucd_rs::MetaField::Region, ucd_rs::MetaField::IncomeGroup],
            simplify: true,
            ..GetOptions::default()
        })
        .unwrap();

    assert_eq!(table.len(), 2); // one row per country
    assert_eq!(
        table.columns,
        vec![
            "iso3",
            "country",
            "indicator",
            "period",
            "value",
            "region",
            "income_group"
        ]
    );
    let idx_period = table.column_index("period").unwrap();
    let idx_region = table.column_index("region").unwrap();
    for row in &table.rows {
        assert_eq!(row[idx_period], "2023");
        assert!(!row[idx_region].is_empty());
    }
}

#[test]
fn empty_answer_is_not_an_error() {
    let (client, _dir) = client(format!("{HEADER}\n"));
    let table = client
        .get(&GetOptions {
            indicators: vec!["CME_MRY0T4".into()],
            ..GetOptions::default()
        })
        .unwrap();
    assert!(table.is_empty());
}
