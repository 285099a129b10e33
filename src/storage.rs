use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::Result;
use csv::WriterBuilder;

use crate::models::{ObservationRow, Table};

/// Save normalized observations as CSV with header.
pub fn save_csv<P: AsRef<Path>>(rows: &[ObservationRow], path: P) -> Result<()> {
    let mut wtr = WriterBuilder::new().from_path(path)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Save normalized observations as pretty JSON array.
pub fn save_json<P: AsRef<Path>>(rows: &[ObservationRow], path: P) -> Result<()> {
    let mut f = File::create(path)?;
    let s = serde_json::to_string_pretty(rows)?;
    f.write_all(s.as_bytes())?;
    Ok(())
}

/// Save a result table (long or pivoted) as CSV.
pub fn save_table_csv<P: AsRef<Path>>(table: &Table, path: P) -> Result<()> {
    let mut wtr = WriterBuilder::new().from_path(path)?;
    wtr.write_record(&table.columns)?;
    for row in &table.rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ObservationRow, Table};
    use tempfile::tempdir;

    #[test]
    fn write_csv_and_json() {
        let dir = tempdir().unwrap();
        let csvp = dir.path().join("x.csv");
        let jsonp = dir.path().join("x.json");
        let mut row = ObservationRow::new("CME_MRY0T4", "ALB", 2020.0, Some(9.8));
        row.country = Some("Albania".into());
        row.sex = Some("_T".into());
        let rows = vec![row];
        save_csv(&rows, &csvp).unwrap();
        save_json(&rows, &jsonp).unwrap();
        assert!(csvp.exists());
        assert!(jsonp.exists());
        let text = std::fs::read_to_string(&csvp).unwrap();
        assert!(text.contains("CME_MRY0T4"));
    }

    #[test]
    fn write_table_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.csv");
        let mut table = Table::new(vec!["iso3".into(), "y2020".into()]);
        table.rows.push(vec!["ALB".into(), "9.8".into()]);
        save_table_csv(&table, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("iso3,y2020"));
    }
}
