//! DNS intrusion detection with an ID3 decision tree.
//!
//! Packets become [`packet::DnsFeatures`], which are either appended to a
//! training file or classified by a [`id3::DecisionTree`] induced from one.

pub mod bench;
pub mod capture;
pub mod error;
pub mod flow;
pub mod id3;
pub mod packet;
pub mod pipeline;
pub mod record;
pub mod render;


pub use error::{IdsError, Result};
