//! SDMX-ML structure-document extraction.
//!
//! Event-driven readers for the three structure payloads the metadata store
//! consumes: dataflow lists, codelists, and data-structure definitions.
//! Namespace prefixes vary across SDMX servers, so elements are matched on
//! their local name only.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::{Error, Result};
use crate::models::{Attribute, DataflowRecord, DataflowSchema, Dimension};

fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|&b| b == b':') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

fn attr(e: &BytesStart, key: &str) -> Result<Option<String>> {
    let found = e
        .try_get_attribute(key)
        .map_err(|err| Error::Xml(err.to_string()))?;
    match found {
        Some(a) => {
            let v = a
                .unescape_value()
                .map_err(|err| Error::Xml(err.to_string()))?;
            Ok(Some(v.into_owned()))
        }
        None => Ok(None),
    }
}

/// Parse a `dataflow/{agency}` listing into records.
pub fn parse_dataflows(xml: &str, default_agency: &str) -> Result<Vec<DataflowRecord>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut out = Vec::new();
    let mut pending: Option<DataflowRecord> = None;
    let mut await_name = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                match local_name(e.name().as_ref()) {
                    b"Dataflow" => {
                        let id = attr(e, "id")?.unwrap_or_default();
                        pending = Some(DataflowRecord {
                            id: id.clone(),
                            agency: attr(e, "agencyID")?
                                .unwrap_or_else(|| default_agency.to_string()),
                            version: attr(e, "version")?.unwrap_or_else(|| "1.0".into()),
                            name: id,
                        });
                        await_name = false;
                    }
                    b"Name" if pending.is_some() => await_name = true,
                    _ => {}
                }
            }
            Ok(Event::Text(ref t)) if await_name => {
                if let Some(df) = pending.as_mut() {
                    // First Name element wins; SDMX repeats it per language.
                    if df.name == df.id {
                        df.name = t
                            .unescape()
                            .map_err(|err| Error::Xml(err.to_string()))?
                            .into_owned();
                    }
                }
                await_name = false;
            }
            Ok(Event::End(ref e)) => match local_name(e.name().as_ref()) {
                b"Dataflow" => {
                    if let Some(df) = pending.take() {
                        out.push(df);
                    }
                }
                b"Name" => await_name = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e.to_string())),
            _ => {}
        }
    }
    Ok(out)
}

/// Parse a codelist document into `(code, label)` pairs.
pub fn parse_codelist(xml: &str) -> Result<Vec<(String, String)>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut out = Vec::new();
    let mut pending: Option<String> = None;
    let mut await_name = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match local_name(e.name().as_ref()) {
                b"Code" => {
                    pending = attr(e, "id")?;
                    await_name = false;
                }
                b"Name" if pending.is_some() => await_name = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) => {
                // Self-closing Code carries no Name; keep the id as label.
                if local_name(e.name().as_ref()) == b"Code" {
                    if let Some(code) = attr(e, "id")? {
                        out.push((code.clone(), code));
                    }
                }
            }
            Ok(Event::Text(ref t)) if await_name => {
                if let Some(code) = pending.take() {
                    let label = t
                        .unescape()
                        .map_err(|err| Error::Xml(err.to_string()))?
                        .into_owned();
                    out.push((code, label));
                }
                await_name = false;
            }
            Ok(Event::End(ref e)) => {
                if local_name(e.name().as_ref()) == b"Code" {
                    // Code without a Name keeps its id as label.
                    if let Some(code) = pending.take() {
                        out.push((code.clone(), code));
                    }
                    await_name = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e.to_string())),
            _ => {}
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Component {
    Dimension,
    Attribute,
    None,
}

/// Parse the data-structure definition embedded in a
/// `dataflow/{agency}/{id}/{version}?references=children` document.
pub fn parse_schema(xml: &str, id: &str, version: &str) -> Result<DataflowSchema> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut schema = DataflowSchema {
        id: id.to_string(),
        name: id.to_string(),
        version: version.to_string(),
        dimensions: Vec::new(),
        time_dimension: DataflowSchema::TIME_DIMENSION.into(),
        primary_measure: DataflowSchema::PRIMARY_MEASURE.into(),
        attributes: Vec::new(),
    };
    let mut current = Component::None;
    let mut await_name = false;
    let mut named = false;
    let mut in_dataflow = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                match local_name(e.name().as_ref()) {
                    b"Dataflow" => {
                        in_dataflow = true;
                        await_name = false;
                    }
                    b"Name" if in_dataflow && !named => await_name = true,
                    b"Dimension" => {
                        let position = attr(e, "position")?
                            .and_then(|p| p.parse::<u32>().ok())
                            .unwrap_or(schema.dimensions.len() as u32 + 1);
                        schema.dimensions.push(Dimension {
                            id: attr(e, "id")?.unwrap_or_default(),
                            position,
                            codelist: None,
                        });
                        current = Component::Dimension;
                    }
                    b"TimeDimension" => {
                        if let Some(tid) = attr(e, "id")? {
                            schema.time_dimension = tid;
                        }
                        current = Component::None;
                    }
                    b"PrimaryMeasure" => {
                        if let Some(pid) = attr(e, "id")? {
                            schema.primary_measure = pid;
                        }
                        current = Component::None;
                    }
                    b"Attribute" => {
                        schema.attributes.push(Attribute {
                            id: attr(e, "id")?.unwrap_or_default(),
                            codelist: None,
                        });
                        current = Component::Attribute;
                    }
                    b"Ref" => {
                        if attr(e, "package")?.as_deref() == Some("codelist") {
                            let codelist = attr(e, "id")?;
                            match current {
                                Component::Dimension => {
                                    if let Some(d) = schema.dimensions.last_mut() {
                                        d.codelist = codelist;
                                    }
                                }
                                Component::Attribute => {
                                    if let Some(a) = schema.attributes.last_mut() {
                                        a.codelist = codelist;
                                    }
                                }
                                Component::None => {}
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref t)) if await_name => {
                schema.name = t
                    .unescape()
                    .map_err(|err| Error::Xml(err.to_string()))?
                    .into_owned();
                await_name = false;
                named = true;
            }
            Ok(Event::End(ref e)) => match local_name(e.name().as_ref()) {
                b"Dimension" | b"Attribute" => current = Component::None,
                b"Dataflow" => in_dataflow = false,
                b"Name" => await_name = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e.to_string())),
            _ => {}
        }
    }

    schema.dimensions.sort_by_key(|d| d.position);
    Ok(schema)
}
