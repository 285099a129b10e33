//! Tests that hit the live UNICEF SDMX API.
//!
//! Run with: cargo test --features online
#![cfg(feature = "online")]

use ucd_rs::{Client, GetOptions};

#[test]
fn live_fetch_under5_mortality() {
    let client = Client::new();
    let rows = client
        .get_rows(&GetOptions {
            indicators: vec!["CME_MRY0T4".into()],
            countries: Some(vec!["ALB".into()]),
            start_year: Some(2015),
            end_year: Some(2020),
            ..GetOptions::default()
        })
        .expect("live fetch");
    assert!(!rows.is_empty());
    assert!(rows.iter().all(|r| r.iso3 == "ALB"));
    assert!(rows.iter().all(|r| r.sex.as_deref() == Some("_T")));
}

#[test]
fn live_list_dataflows() {
    let flows = Client::new().list_dataflows().expect("live dataflow list");
    assert!(!flows.is_empty());
    assert!(flows.iter().any(|f| f.id == "CME"));
}
