//! Attribute-value records shared by training and classification.
//!
//! A [`Record`] stores its values positionally and shares an [`Schema`] with
//! every other record of the same dataset, so all records of a dataset carry
//! the same attribute names by construction.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{IdsError, Result};

/// Attribute names of a dataset. The first name is the category attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    names: Vec<String>,
}

impl Schema {
    pub fn new<I, S>(names: I) -> Result<Arc<Self>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(IdsError::format(1, "header has no columns"));
        }

        let mut seen = BTreeSet::new();
        for name in &names {
            if name.is_empty() {
                return Err(IdsError::format(1, "header contains an empty attribute name"));
            }
            if !seen.insert(name.as_str()) {
                return Err(IdsError::format(1, format!("duplicate attribute name {name}")));
            }
        }

        Ok(Arc::new(Schema { names }))
    }

    pub fn category(&self) -> &str {
        &self.names[0]
    }

    /// Feature attribute names in header order, category excluded.
    pub fn features(&self) -> &[String] {
        &self.names[1..]
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    schema: Arc<Schema>,
    values: Vec<String>,
}

impl Record {
    pub fn new(schema: Arc<Schema>, values: Vec<String>) -> Result<Self> {
        if values.len() != schema.len() {
            return Err(IdsError::Arity {
                expected: schema.len(),
                found: values.len(),
            });
        }
        Ok(Record { schema, values })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Value of `attribute`, or `None` if the schema has no such attribute.
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.schema
            .index_of(attribute)
            .map(|index| self.values[index].as_str())
    }

    pub(crate) fn value_at(&self, index: usize) -> &str {
        &self.values[index]
    }

    /// Category value. Empty for records built for classification.
    pub fn label(&self) -> &str {
        &self.values[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.schema
            .names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Non-empty, immutable collection of records with a common schema.
#[derive(Debug, Clone)]
pub struct Dataset {
    schema: Arc<Schema>,
    records: Vec<Record>,
}

impl Dataset {
    pub fn new(schema: Arc<Schema>, records: Vec<Record>) -> Result<Self> {
        if records.is_empty() {
            return Err(IdsError::EmptyDataset);
        }
        if let Some(stray) = records.iter().find(|r| *r.schema != *schema) {
            return Err(IdsError::format(
                0,
                format!("record attributes {:?} do not match header", stray.schema.names),
            ));
        }
        Ok(Dataset { schema, records })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(BufReader::new(file))
    }

    /// Parses CSV: a header row whose first column names the category
    /// attribute, then one record per row.
    pub fn from_reader<R: Read>(source: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(source);

        let schema = Schema::new(reader.headers()?.iter())?;

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row?;
            if row.len() != schema.len() {
                let line = row.position().map(|p| p.line()).unwrap_or_default();
                return Err(IdsError::format(
                    line,
                    format!("expected {} columns, found {}", schema.len(), row.len()),
                ));
            }
            records.push(Record {
                schema: Arc::clone(&schema),
                values: row.iter().map(str::to_owned).collect(),
            });
        }

        Self::new(schema, records)
    }

    pub fn write<W: Write>(&self, sink: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(sink);
        writer.write_record(self.schema.names())?;
        for record in &self.records {
            writer.write_record(&record.values)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn category(&self) -> &str {
        self.schema.category()
    }

    pub fn attributes(&self) -> &[String] {
        self.schema.features()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn shuffled<R: Rng + ?Sized>(&self, rng: &mut R) -> Dataset {
        let mut records = self.records.clone();
        records.shuffle(rng);
        Dataset {
            schema: Arc::clone(&self.schema),
            records,
        }
    }

    /// Splits at `ratio` of the records (clamped to `0.0..=1.0`).
    pub fn split(&self, ratio: f64) -> (&[Record], &[Record]) {
        let point = (self.records.len() as f64 * ratio.clamp(0.0, 1.0)) as usize;
        self.records.split_at(point)
    }
}

/// Distinct values of `attribute`. Records lacking the attribute contribute
/// the empty string.
pub fn unique_values<'a>(records: &'a [Record], attribute: &str) -> BTreeSet<&'a str> {
    records
        .iter()
        .map(|r| r.get(attribute).unwrap_or_default())
        .collect()
}

/// Most frequent value of `attribute`; equal counts go to the smallest value.
pub fn most_common<'a>(records: &'a [Record], attribute: &str) -> Option<&'a str> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        *counts.entry(record.get(attribute).unwrap_or_default()).or_default() += 1;
    }
    max_count(&counts)
}

pub(crate) fn max_count<'a>(counts: &BTreeMap<&'a str, usize>) -> Option<&'a str> {
    let mut best: Option<(&str, usize)> = None;
    for (&value, &count) in counts {
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}
