//! Parsers for euca2ools' tab-separated output.
//!
//! Every record is one line whose first field names the record type
//! (`IMAGE`, `VOLUME`, `INSTANCE`, ...). Empty fields are kept, so positions
//! are stable.

use crate::{Image, Instance};

fn records<'a>(output: &'a str, kind: &'a str) -> impl Iterator<Item = Vec<&'a str>> + 'a {
    output
        .lines()
        .map(|line| line.split('\t').map(str::trim).collect::<Vec<_>>())
        .filter(move |fields| fields.first() == Some(&kind))
}

fn field(fields: &[&str], index: usize) -> Option<String> {
    fields
        .get(index)
        .filter(|f| !f.is_empty())
        .map(|f| (*f).to_owned())
}

/// `IMAGE  <id>  <location>  <owner>  <state>  <visibility> ...`
pub fn parse_images(output: &str) -> Vec<Image> {
    records(output, "IMAGE")
        .filter_map(|fields| {
            Some(Image {
                id: field(&fields, 1)?,
                location: field(&fields, 2)?,
                state: field(&fields, 4).unwrap_or_default(),
            })
        })
        .collect()
}

/// `VOLUME  <id>  <size>  <snapshot>  <zone>  <status>  <created>`
///
/// Returns `(id, status)` pairs.
pub fn parse_volumes(output: &str) -> Vec<(String, String)> {
    records(output, "VOLUME")
        .filter_map(|fields| Some((field(&fields, 1)?, field(&fields, 5).unwrap_or_default())))
        .collect()
}

/// `INSTANCE  <id>  <image>  <public>  <private>  <state>  <key>  <index>
/// <product codes>  <type>  <launch time>  <zone>  <kernel>  <ramdisk>`
pub fn parse_instances(output: &str) -> Vec<Instance> {
    records(output, "INSTANCE")
        .filter_map(|fields| {
            Some(Instance {
                id: field(&fields, 1)?,
                state: field(&fields, 5).unwrap_or_default(),
                availability_zone: field(&fields, 11),
            })
        })
        .collect()
}
