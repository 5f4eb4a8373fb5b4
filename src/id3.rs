//! ID3 decision-tree induction and classification over string-valued
//! attributes.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{IdsError, Result};
use crate::record::{max_count, Dataset, Record, Schema};

/// Prefix of the description of a leaf decided by majority vote.
pub const GUESS_PREFIX: &str = "Guessing: ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Node {
    Leaf {
        label: String,
        description: String,
    },
    Internal {
        attribute: String,
        /// Most common category of the training subset that produced this
        /// node. Returned when a classified value has no child.
        majority: String,
        children: BTreeMap<String, Node>,
    },
}

/// Raised (not as an error) when classification meets an attribute value
/// that had no training support at some node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnseenValue {
    pub attribute: String,
    /// `None` when the record does not carry the attribute at all.
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prediction<'t> {
    pub label: &'t str,
    pub unseen: Option<UnseenValue>,
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    pub fn classify(&self, record: &Record) -> &str {
        self.trace(record).label
    }

    /// Walks `record` down the tree. A value with no matching child stops the
    /// walk at that node and yields the node's majority label.
    pub fn trace(&self, record: &Record) -> Prediction<'_> {
        let mut node = self;
        loop {
            match node {
                Node::Leaf { label, .. } => {
                    return Prediction {
                        label: label.as_str(),
                        unseen: None,
                    };
                }
                Node::Internal {
                    attribute,
                    majority,
                    children,
                } => {
                    let value = record.get(attribute);
                    match value.and_then(|v| children.get(v)) {
                        Some(child) => node = child,
                        None => {
                            return Prediction {
                                label: majority.as_str(),
                                unseen: Some(UnseenValue {
                                    attribute: attribute.clone(),
                                    value: value.map(str::to_owned),
                                }),
                            };
                        }
                    }
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Node::Leaf { .. } => 0,
            Node::Internal { children, .. } => {
                1 + children.values().map(Node::depth).max().unwrap_or(0)
            }
        }
    }

    pub fn leaf_count(&self) -> usize {
        match self {
            Node::Leaf { .. } => 1,
            Node::Internal { children, .. } => children.values().map(Node::leaf_count).sum(),
        }
    }
}

/// A tree induced once and then shared read-only by the classification loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionTree {
    root: Node,
    category: String,
    attributes: Vec<String>,
}

impl DecisionTree {
    pub fn train(dataset: &Dataset) -> Result<Self> {
        Self::induce(dataset.records(), dataset.attributes())
    }

    pub fn induce(records: &[Record], attributes: &[String]) -> Result<Self> {
        let first = records.first().ok_or(IdsError::EmptyInput("induce"))?;
        let category = first.schema().category().to_owned();
        let root = induce(records, attributes)?;
        Ok(DecisionTree {
            root,
            category,
            attributes: attributes.to_vec(),
        })
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Attributes the tree was induced over, in the order given.
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    pub fn classify(&self, record: &Record) -> &str {
        self.root.classify(record)
    }

    pub fn trace(&self, record: &Record) -> Prediction<'_> {
        self.root.trace(record)
    }

    pub fn accuracy(&self, records: &[Record]) -> f64 {
        accuracy(&self.root, records)
    }
}

pub fn entropy(records: &[Record]) -> Result<f64> {
    if records.is_empty() {
        return Err(IdsError::EmptyInput("entropy"));
    }
    Ok(label_entropy(records.iter()))
}

pub fn gain(records: &[Record], attribute: &str) -> Result<f64> {
    let schema = shared_schema(records, "gain")?;
    let index = resolve(schema, attribute)?;
    let refs: Vec<&Record> = records.iter().collect();
    Ok(gain_at(&refs, index))
}

/// Gain of every attribute, in the order given.
pub fn gains(records: &[Record], attributes: &[String]) -> Result<Vec<(String, f64)>> {
    attributes
        .iter()
        .map(|attribute| Ok((attribute.clone(), gain(records, attribute)?)))
        .collect()
}

pub fn induce(records: &[Record], attributes: &[String]) -> Result<Node> {
    let schema = shared_schema(records, "induce")?;
    let indices = attributes
        .iter()
        .map(|attribute| resolve(schema, attribute))
        .collect::<Result<Vec<_>>>()?;
    let refs: Vec<&Record> = records.iter().collect();
    Ok(grow(&refs, &indices, schema))
}

/// Percentage of `records` whose predicted label equals their own label.
pub fn accuracy(tree: &Node, records: &[Record]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let correct = records
        .iter()
        .filter(|record| tree.classify(record) == record.label())
        .count();
    correct as f64 / records.len() as f64 * 100.0
}

/// Schema of the first record, provided every record carries the same one.
fn shared_schema<'a>(records: &'a [Record], operation: &'static str) -> Result<&'a Arc<Schema>> {
    let first = records.first().ok_or(IdsError::EmptyInput(operation))?;
    let schema = first.schema();
    for record in &records[1..] {
        let other = record.schema();
        if Arc::ptr_eq(schema, other) || **schema == **other {
            continue;
        }
        if other.len() != schema.len() {
            return Err(IdsError::Arity {
                expected: schema.len(),
                found: other.len(),
            });
        }
        return Err(IdsError::format(
            0,
            format!("record attributes {:?} do not match {:?}", other.names(), schema.names()),
        ));
    }
    Ok(schema)
}

fn resolve(schema: &Schema, attribute: &str) -> Result<usize> {
    schema
        .index_of(attribute)
        .filter(|&index| index != 0)
        .ok_or_else(|| IdsError::UnknownAttribute(attribute.to_owned()))
}

// `records` is never empty here: the entry points check, and partitions only
// hold values that occurred.
fn grow(records: &[&Record], attributes: &[usize], schema: &Schema) -> Node {
    let counts = label_counts(records.iter().copied());
    let majority = max_count(&counts).unwrap_or_default().to_owned();

    if counts.len() == 1 {
        return Node::Leaf {
            description: majority.clone(),
            label: majority,
        };
    }

    if attributes.is_empty() {
        return Node::Leaf {
            description: format!("{GUESS_PREFIX}{majority}"),
            label: majority,
        };
    }

    let split = best_attribute(records, attributes);
    let remaining: Vec<usize> = attributes.iter().copied().filter(|&a| a != split).collect();

    let children = partition(records, split)
        .into_iter()
        .map(|(value, subset)| (value.to_owned(), grow(&subset, &remaining, schema)))
        .collect();

    Node::Internal {
        attribute: schema.names()[split].clone(),
        majority,
        children,
    }
}

/// First attribute with the highest gain; later ones win only when strictly
/// greater.
fn best_attribute(records: &[&Record], attributes: &[usize]) -> usize {
    let mut best = attributes[0];
    let mut best_gain = gain_at(records, best);
    for &candidate in &attributes[1..] {
        let candidate_gain = gain_at(records, candidate);
        if candidate_gain > best_gain {
            best = candidate;
            best_gain = candidate_gain;
        }
    }
    best
}

fn partition<'a>(records: &[&'a Record], index: usize) -> BTreeMap<&'a str, Vec<&'a Record>> {
    let mut subsets: BTreeMap<&str, Vec<&Record>> = BTreeMap::new();
    for &record in records {
        subsets.entry(record.value_at(index)).or_default().push(record);
    }
    subsets
}

fn label_counts<'a>(records: impl IntoIterator<Item = &'a Record>) -> BTreeMap<&'a str, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.label()).or_default() += 1;
    }
    counts
}

// Terms are summed in sorted order so that attributes inducing the same
// partition shape get bit-identical gains, whatever their value names.
fn label_entropy<'a>(records: impl IntoIterator<Item = &'a Record>) -> f64 {
    let counts = label_counts(records);
    let total: usize = counts.values().sum();
    let mut sizes: Vec<usize> = counts.into_values().collect();
    sizes.sort_unstable();
    sizes.into_iter().fold(0.0, |acc, count| {
        let p = count as f64 / total as f64;
        acc - p * p.log2()
    })
}

fn gain_at(records: &[&Record], index: usize) -> f64 {
    let total = records.len() as f64;
    let mut terms: Vec<(usize, f64)> = partition(records, index)
        .into_values()
        .map(|subset| (subset.len(), label_entropy(subset.into_iter())))
        .collect();
    terms.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));

    terms.into_iter().fold(label_entropy(records.iter().copied()), |acc, (size, h)| {
        acc - size as f64 / total * h
    })
}
