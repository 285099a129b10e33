use std::collections::BTreeMap;

use ucd_rs::Error;
use ucd_rs::models::{ObservationRow, RawRow};
use ucd_rs::normalize;

fn raw_row(pairs: &[(&str, &str)]) -> RawRow {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<BTreeMap<_, _>>()
}

fn sample_raw(iso3_label: &str, period: &str, value: &str, sex: &str) -> RawRow {
    raw_row(&[
        ("DATAFLOW", "UNICEF:CME(1.0)"),
        ("REF_AREA: Geographic area", iso3_label),
        ("INDICATOR: Indicator", "CME_MRY0T4: Under-five mortality rate"),
        ("SEX: Sex", sex),
        ("TIME_PERIOD: Time period", period),
        ("OBS_VALUE: Observation Value", value),
        (
            "UNIT_MEASURE: Unit of measure",
            "D_PER_1000_B: Deaths per 1,000 live births",
        ),
        ("OBS_STATUS: Observation status", "A: Normal value"),
    ])
}

#[test]
fn period_round_trip() {
    assert_eq!(normalize::parse_period("2020-06"), Some(2020.5));
    assert_eq!(normalize::parse_period("2020"), Some(2020.0));
    assert_eq!(normalize::parse_period("2020-01"), Some(2020.0 + 1.0 / 12.0));
    assert_eq!(normalize::parse_period("2020-12"), Some(2021.0));
    // Out-of-range month is not a period at all.
    assert_eq!(normalize::parse_period("2020-13"), None);
    assert_eq!(normalize::parse_period("abc"), None);
}

#[test]
fn labels_both_cells_split_into_code_and_label() {
    let rows = normalize::normalize(&[sample_raw("ALB: Albania", "2020", "9.8", "_T: Total")]);
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.indicator, "CME_MRY0T4");
    assert_eq!(row.iso3, "ALB");
    assert_eq!(row.country.as_deref(), Some("Albania"));
    assert_eq!(row.period, 2020.0);
    assert_eq!(row.value, Some(9.8));
    assert_eq!(row.sex.as_deref(), Some("_T"));
    assert_eq!(row.unit.as_deref(), Some("D_PER_1000_B"));
    assert_eq!(row.obs_status.as_deref(), Some("A"));
}

#[test]
fn absent_optional_columns_default_to_none() {
    let rows = normalize::normalize(&[raw_row(&[
        ("REF_AREA: Geographic area", "USA: United States"),
        ("INDICATOR: Indicator", "CME_MRY0T4: Under-five mortality rate"),
        ("TIME_PERIOD: Time period", "2019"),
        ("OBS_VALUE: Observation Value", "6.5"),
    ])]);
    let row = &rows[0];
    assert_eq!(row.sex, None);
    assert_eq!(row.age, None);
    assert_eq!(row.wealth_quintile, None);
    assert_eq!(row.maternal_edu_lvl, None);
    assert_eq!(row.lower_bound, None);
}

#[test]
fn missing_value_becomes_none_and_bad_rows_are_dropped() {
    let rows = normalize::normalize(&[
        sample_raw("ALB: Albania", "2020", "", "_T: Total"),
        // Unparseable period: dropped.
        sample_raw("ALB: Albania", "someday", "9.8", "_T: Total"),
        // No REF_AREA at all: dropped.
        raw_row(&[
            ("INDICATOR: Indicator", "CME_MRY0T4: x"),
            ("TIME_PERIOD: Time period", "2020"),
            ("OBS_VALUE: Observation Value", "1"),
        ]),
    ]);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value, None);
}

#[test]
fn disaggregated_sex_collapses_to_total() {
    let rows = normalize::normalize(&[
        sample_raw("ALB: Albania", "2020", "9.8", "_T: Total"),
        sample_raw("ALB: Albania", "2020", "10.4", "M: Male"),
        sample_raw("ALB: Albania", "2020", "9.1", "F: Female"),
    ]);
    let collapsed = normalize::collapse_disaggregations(rows);
    assert_eq!(collapsed.len(), 1);
    assert_eq!(collapsed[0].sex.as_deref(), Some("_T"));
}

#[test]
fn single_valued_dimension_is_left_alone() {
    // Only one distinct sex value: nothing to collapse, even though it is
    // not the total code.
    let rows = normalize::normalize(&[
        sample_raw("ALB: Albania", "2020", "9.1", "F: Female"),
        sample_raw("USA: United States", "2020", "5.9", "F: Female"),
    ]);
    let collapsed = normalize::collapse_disaggregations(rows);
    assert_eq!(collapsed.len(), 2);
}

#[test]
fn age_accepts_regional_total_codes() {
    let mut under5 = ObservationRow::new("NT_X", "ALB", 2020.0, Some(1.0));
    under5.age = Some("Y0T4".into());
    let mut school_age = ObservationRow::new("NT_X", "ALB", 2020.0, Some(2.0));
    school_age.age = Some("Y5T9".into());
    let collapsed = normalize::collapse_disaggregations(vec![under5, school_age]);
    assert_eq!(collapsed.len(), 1);
    assert_eq!(collapsed[0].age.as_deref(), Some("Y0T4"));
}

#[test]
fn duplicate_rows_are_an_error_by_default() {
    let row = ObservationRow::new("CME_MRY0T4", "ALB", 2020.0, Some(9.8));
    let err = normalize::enforce_unique(vec![row.clone(), row.clone()], false).unwrap_err();
    match err {
        Error::DuplicateRows { count } => assert_eq!(count, 1),
        other => panic!("expected DuplicateRows, got {other:?}"),
    }
}

#[test]
fn duplicates_can_be_silently_removed_on_request() {
    let row = ObservationRow::new("CME_MRY0T4", "ALB", 2020.0, Some(9.8));
    let out = normalize::enforce_unique(vec![row.clone(), row.clone()], true).unwrap();
    assert_eq!(out.len(), 1);
}

#[test]
fn near_duplicates_differing_in_any_field_survive() {
    // Same business key, different obs_status: a legitimate re-observation
    // under the full-row rule.
    let a = ObservationRow::new("CME_MRY0T4", "ALB", 2020.0, Some(9.8));
    let mut b = a.clone();
    b.obs_status = Some("E".into());
    let out = normalize::enforce_unique(vec![a, b], false).unwrap();
    assert_eq!(out.len(), 2);
}

#[test]
fn country_filter_is_applied_post_fetch() {
    let rows = vec![
        ObservationRow::new("CME_MRY0T4", "ALB", 2020.0, Some(9.8)),
        ObservationRow::new("CME_MRY0T4", "USA", 2020.0, Some(6.3)),
        ObservationRow::new("CME_MRY0T4", "XKX", 2020.0, Some(12.0)),
    ];
    let filtered = normalize::filter_countries(rows, &["alb".into(), "USA".into()]);
    assert_eq!(filtered.len(), 2);
    assert!(filtered.iter().all(|r| r.iso3 == "ALB" || r.iso3 == "USA"));
}
