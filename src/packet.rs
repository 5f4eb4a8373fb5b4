//! DNS query features and their one string encoding.
//!
//! The training writer and the classifier both go through
//! [`DnsFeatures::encode`], so a value is rendered identically whether it is
//! stored in the training file or looked up in the tree.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::error::Result;
use crate::flow::{flow_key, format_duration};
use crate::record::{Record, Schema};

pub const CATEGORY: &str = "IsMalicious";

/// Category value the detector alerts on.
pub const MALICIOUS: &str = "true";

/// Training file columns, category first.
pub const HEADER: [&str; 10] = [
    CATEGORY,
    "TimeSinceLastPacket",
    "SourcePort",
    "QClass",
    "QType",
    "QName",
    "AA",
    "TC",
    "RD",
    "RA",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DnsQuestion {
    pub qclass: u16,
    pub qtype: u16,
    /// Fully qualified, with trailing dot.
    pub qname: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct DnsFlags {
    /// Authoritative answer
    pub aa: bool,
    /// Truncated
    pub tc: bool,
    /// Recursion desired
    pub rd: bool,
    /// Recursion available
    pub ra: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DnsQuery {
    pub question: DnsQuestion,
    pub flags: DnsFlags,
}

/// One decoded datagram as handed over by the capture layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketEvent {
    pub source: IpAddr,
    pub source_port: u16,
    pub arrived: SystemTime,
    /// `Some` only for DNS queries carrying at least one question.
    pub query: Option<DnsQuery>,
}

impl PacketEvent {
    pub fn flow_key(&self) -> String {
        flow_key(self.source, self.source_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DnsFeatures {
    /// `None` when the packet is being classified rather than recorded.
    pub is_malicious: Option<bool>,
    pub time_since_last_packet: Duration,
    pub source_port: u16,
    pub qclass: u16,
    pub qtype: u16,
    pub qname: String,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
}

impl DnsFeatures {
    pub fn new(
        is_malicious: Option<bool>,
        source_port: u16,
        query: &DnsQuery,
        time_since_last_packet: Duration,
    ) -> Self {
        DnsFeatures {
            is_malicious,
            time_since_last_packet,
            source_port,
            qclass: query.question.qclass,
            qtype: query.question.qtype,
            qname: query.question.qname.clone(),
            aa: query.flags.aa,
            tc: query.flags.tc,
            rd: query.flags.rd,
            ra: query.flags.ra,
        }
    }

    pub fn schema() -> Result<Arc<Schema>> {
        Schema::new(HEADER)
    }

    /// Column values in [`HEADER`] order.
    pub fn encode(&self) -> [String; 10] {
        [
            self.is_malicious.map(|m| m.to_string()).unwrap_or_default(),
            format_duration(self.time_since_last_packet),
            self.source_port.to_string(),
            self.qclass.to_string(),
            self.qtype.to_string(),
            self.qname.clone(),
            self.aa.to_string(),
            self.tc.to_string(),
            self.rd.to_string(),
            self.ra.to_string(),
        ]
    }

    /// `schema` must be the one returned by [`DnsFeatures::schema`].
    pub fn to_record(&self, schema: &Arc<Schema>) -> Result<Record> {
        Record::new(Arc::clone(schema), self.encode().into())
    }
}
