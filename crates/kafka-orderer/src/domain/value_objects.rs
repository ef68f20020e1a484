//! Value objects for the ordering channel.

use serde::{Deserialize, Serialize};
use shared_types::LogOffset;
use std::fmt;
use std::str::FromStr;

/// Identifies the ordering channel inside the replicated log.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainPartition {
    pub topic: String,
    pub partition: i32,
}

impl ChainPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl Default for ChainPartition {
    fn default() -> Self {
        Self::new("orderer", 0)
    }
}

impl fmt::Display for ChainPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// Retained offsets of a partition.
///
/// `oldest` is the lowest retained offset, `newest` is one past the highest
/// written offset (where the next record will land).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRange {
    pub oldest: LogOffset,
    pub newest: LogOffset,
}

impl OffsetRange {
    pub fn new(oldest: LogOffset, newest: LogOffset) -> Self {
        Self { oldest, newest }
    }

    /// True when `offset` can be read now or will be the next record written.
    pub fn can_resume_at(&self, offset: LogOffset) -> bool {
        offset >= self.oldest && offset <= self.newest
    }

    pub fn is_empty(&self) -> bool {
        self.oldest == self.newest
    }

    pub fn len(&self) -> u64 {
        (self.newest - self.oldest).max(0) as u64
    }
}

/// First broker release that speaks record batches (message format v2).
pub const RECORD_BATCH_VERSION: [u32; 3] = [0, 11, 0];

/// Minimum broker version the client assumes, e.g. `0.11.0.0`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProtocolVersion(Vec<u32>);

impl ProtocolVersion {
    pub fn parts(&self) -> &[u32] {
        &self.0
    }

    /// Component-wise comparison; missing trailing components count as zero.
    pub fn at_least(&self, floor: &[u32]) -> bool {
        let component = |v: &[u32], i: usize| v.get(i).copied().unwrap_or(0);
        let len = self.0.len().max(floor.len());
        (0..len)
            .map(|i| (component(self.parts(), i), component(floor, i)))
            .find(|(ours, theirs)| ours != theirs)
            .map_or(true, |(ours, theirs)| ours > theirs)
    }

    pub fn supports_record_batches(&self) -> bool {
        self.at_least(&RECORD_BATCH_VERSION)
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self(vec![0, 11, 0, 0])
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split('.')
            .map(|p| {
                p.parse::<u32>()
                    .map_err(|_| format!("{s:?} is not a dotted numeric version"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if !(3..=4).contains(&parts.len()) {
            return Err(format!("{s:?} must have 3 or 4 components"));
        }
        Ok(Self(parts))
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.0.iter().map(u32::to_string).collect();
        f.write_str(&joined.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_range_resume_bounds() {
        let range = OffsetRange::new(100, 1100);
        assert!(range.can_resume_at(100));
        assert!(range.can_resume_at(1100));
        assert!(!range.can_resume_at(99));
        assert!(!range.can_resume_at(1101));
        assert_eq!(range.len(), 1000);
    }

    #[test]
    fn test_protocol_version_parse() {
        let v: ProtocolVersion = "0.11.0.0".parse().unwrap();
        assert_eq!(v, ProtocolVersion::default());
        assert_eq!(v.to_string(), "0.11.0.0");
        assert_eq!(v.parts(), &[0, 11, 0, 0]);
        assert!("0.10.2".parse::<ProtocolVersion>().is_ok());
    }

    #[test]
    fn test_record_batch_floor() {
        let version = |s: &str| s.parse::<ProtocolVersion>().unwrap();
        assert!(!version("0.9.0.1").supports_record_batches());
        assert!(!version("0.10.2.1").supports_record_batches());
        assert!(version("0.11.0").supports_record_batches());
        assert!(version("0.11.0.0").supports_record_batches());
        assert!(version("2.8.1").supports_record_batches());
        assert!(version("1.0.0").at_least(&[0, 11, 0]));
        assert!(!version("0.11.0").at_least(&[0, 11, 0, 1]));
    }

    #[test]
    fn test_protocol_version_rejects_malformed() {
        assert!("0.9".parse::<ProtocolVersion>().is_err());
        assert!("0.9.0.1.2".parse::<ProtocolVersion>().is_err());
        assert!("0.x.0".parse::<ProtocolVersion>().is_err());
        assert!("".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn test_partition_display() {
        assert_eq!(ChainPartition::default().to_string(), "orderer/0");
    }
}
