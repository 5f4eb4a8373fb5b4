//! Turns packet events into feature records and either appends them to the
//! training file or classifies them.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Local};
use crossbeam_channel::Sender;
use log::{debug, info, warn};
use serde::Serialize;

use crate::error::{IdsError, Result};
use crate::flow::FlowTracker;
use crate::id3::DecisionTree;
use crate::packet::{DnsFeatures, PacketEvent, HEADER, MALICIOUS};
use crate::record::{Record, Schema};

/// A packet the tree labeled malicious.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub flow: String,
    pub detected_at: DateTime<Local>,
    pub record: Record,
}

pub trait DetectionSink {
    fn report(&mut self, detection: Detection) -> Result<()>;
}

/// Logs each detection as a warning with the record as JSON.
pub struct LogSink;

impl DetectionSink for LogSink {
    fn report(&mut self, detection: Detection) -> Result<()> {
        warn!(
            "Detected malicious packet from {}: {}",
            detection.flow,
            serde_json::to_string(&detection.record)?
        );
        Ok(())
    }
}

impl DetectionSink for Sender<Detection> {
    fn report(&mut self, detection: Detection) -> Result<()> {
        // a dropped receiver just means nobody is listening anymore
        if self.send(detection).is_err() {
            debug!("Detection receiver dropped");
        }
        Ok(())
    }
}

/// Appends feature rows to a CSV training file, one flush per row.
pub struct TrainingWriter {
    writer: csv::Writer<Box<dyn Write>>,
}

impl TrainingWriter {
    /// Opens `path` for appending, writing the header first if the file is
    /// missing or empty. An existing file must start with exactly [`HEADER`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let needs_header = match fs::metadata(path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => return Err(e.into()),
        };
        if !needs_header {
            check_header(path)?;
        }

        let file: File = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = Self::new(Box::new(file));
        if needs_header {
            info!("Creating training file {}", path.display());
            writer.write_header()?;
        }
        Ok(writer)
    }

    /// Wraps `sink` as is; no header is written.
    pub fn new(sink: Box<dyn Write>) -> Self {
        TrainingWriter {
            writer: csv::WriterBuilder::new().has_headers(false).from_writer(sink),
        }
    }

    pub fn write_header(&mut self) -> Result<()> {
        self.writer.write_record(HEADER)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn append(&mut self, features: &DnsFeatures) -> Result<()> {
        self.writer.write_record(features.encode())?;
        self.writer.flush()?;
        Ok(())
    }
}

fn check_header(path: &Path) -> Result<()> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut header = csv::StringRecord::new();
    reader.read_record(&mut header)?;
    if header.iter().ne(HEADER) {
        return Err(IdsError::format(
            1,
            format!(
                "{} has header {:?}, expected {}",
                path.display(),
                header.iter().collect::<Vec<_>>(),
                HEADER.join(",")
            ),
        ));
    }
    Ok(())
}

pub enum Mode {
    Train {
        writer: TrainingWriter,
        malicious: bool,
    },
    Classify {
        tree: DecisionTree,
        sink: Box<dyn DetectionSink>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub packets: u64,
    pub dns_queries: u64,
    pub rows_written: u64,
    pub detections: u64,
    pub unseen_fallbacks: u64,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} packets, {} DNS queries, {} rows written, {} detections, {} unseen-value fallbacks",
            self.packets, self.dns_queries, self.rows_written, self.detections, self.unseen_fallbacks
        )
    }
}

/// Owns the flow state and the mode's output for one run. Events must be fed
/// in arrival order.
pub struct Pipeline {
    mode: Mode,
    flows: FlowTracker,
    schema: Arc<Schema>,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn training(writer: TrainingWriter, malicious: bool, flows: FlowTracker) -> Result<Self> {
        Ok(Pipeline {
            mode: Mode::Train { writer, malicious },
            flows,
            schema: DnsFeatures::schema()?,
            stats: PipelineStats::default(),
        })
    }

    /// Fails if the tree splits on an attribute live packets do not carry.
    pub fn classifying(
        tree: DecisionTree,
        sink: Box<dyn DetectionSink>,
        flows: FlowTracker,
    ) -> Result<Self> {
        let schema = DnsFeatures::schema()?;
        if let Some(unknown) = tree
            .attributes()
            .iter()
            .find(|attribute| schema.index_of(attribute).map_or(true, |index| index == 0))
        {
            return Err(IdsError::format(
                1,
                format!("training attribute {unknown} is not produced from live packets"),
            ));
        }

        Ok(Pipeline {
            mode: Mode::Classify { tree, sink },
            flows,
            schema,
            stats: PipelineStats::default(),
        })
    }

    pub fn flows(&self) -> &FlowTracker {
        &self.flows
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Handles one event. Flow state is only updated once the event's output
    /// has succeeded.
    pub fn process(&mut self, event: &PacketEvent) -> Result<()> {
        self.stats.packets += 1;
        let flow = event.flow_key();

        let Some(query) = &event.query else {
            debug!("Not a DNS query from {flow}, skipping packet");
            return Ok(());
        };
        self.stats.dns_queries += 1;

        let since_last = self.flows.elapsed(&flow, event.arrived);

        match &mut self.mode {
            Mode::Train { writer, malicious } => {
                let features = DnsFeatures::new(Some(*malicious), event.source_port, query, since_last);
                writer.append(&features)?;
                self.stats.rows_written += 1;
            }
            Mode::Classify { tree, sink } => {
                let features = DnsFeatures::new(None, event.source_port, query, since_last);
                let record = features.to_record(&self.schema)?;

                let prediction = tree.trace(&record);
                if let Some(unseen) = &prediction.unseen {
                    self.stats.unseen_fallbacks += 1;
                    debug!(
                        "Unseen {} value {:?} from {flow}, using majority label {}",
                        unseen.attribute, unseen.value, prediction.label
                    );
                }

                if prediction.label == MALICIOUS {
                    self.stats.detections += 1;
                    sink.report(Detection {
                        flow: flow.clone(),
                        detected_at: DateTime::<Local>::from(event.arrived),
                        record,
                    })?;
                }
            }
        }

        self.flows.touch(&flow, event.arrived);
        Ok(())
    }

    /// Processes events until the source is exhausted.
    pub fn run<I>(&mut self, events: I) -> Result<PipelineStats>
    where
        I: IntoIterator<Item = PacketEvent>,
    {
        for event in events {
            self.process(&event)?;
        }
        Ok(self.stats.clone())
    }
}
