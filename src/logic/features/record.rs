//! Flow records - wire line → RawRecord → PacketRecord
//!
//! A line is valid iff it splits into exactly five comma-separated fields.
//! Numeric coercion is a separate, explicit step so the raw values can be
//! persisted verbatim whatever the scorer decides.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::layout::{FEATURE_COUNT, PACKET_SIZE, PROTOCOL, TIME_INTERVAL};
use crate::logic::error::CoercionError;

/// Field delimiter on the wire and in the stores
pub const FIELD_DELIMITER: char = ',';

/// Field-complete record before numeric coercion
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawRecord {
    pub packet_size: String,
    pub protocol: String,
    pub src_ip: String,
    pub dst_ip: String,
    pub time_interval: String,
}

impl RawRecord {
    /// Parse one wire line. Returns `None` unless the line has exactly
    /// five fields.
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut fields = line.split(FIELD_DELIMITER);
        let record = Self {
            packet_size: fields.next()?.to_string(),
            protocol: fields.next()?.to_string(),
            src_ip: fields.next()?.to_string(),
            dst_ip: fields.next()?.to_string(),
            time_interval: fields.next()?.to_string(),
        };

        if fields.next().is_some() {
            return None;
        }
        Some(record)
    }

    /// Fields in layout order
    pub fn fields(&self) -> [&str; FEATURE_COUNT] {
        [
            &self.packet_size,
            &self.protocol,
            &self.src_ip,
            &self.dst_ip,
            &self.time_interval,
        ]
    }

    /// Render as a store row (no trailing newline)
    pub fn to_row(&self) -> String {
        self.fields().join(",")
    }
}

impl fmt::Display for RawRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.fields().join(", "))
    }
}

/// One observed flow sample after coercion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketRecord {
    pub packet_size: f64,
    pub protocol: f64,
    pub src_ip: String,
    pub dst_ip: String,
    pub time_interval: f64,
}

impl TryFrom<&RawRecord> for PacketRecord {
    type Error = CoercionError;

    fn try_from(raw: &RawRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            packet_size: parse_number("packet_size", &raw.packet_size)?,
            protocol: parse_number("protocol", &raw.protocol)?,
            src_ip: raw.src_ip.clone(),
            dst_ip: raw.dst_ip.clone(),
            time_interval: parse_number("time_interval", &raw.time_interval)?,
        })
    }
}

impl PacketRecord {
    /// Value of a numeric layout column; `None` for the categorical ones
    pub fn numeric(&self, column: usize) -> Option<f64> {
        match column {
            PACKET_SIZE => Some(self.packet_size),
            PROTOCOL => Some(self.protocol),
            TIME_INTERVAL => Some(self.time_interval),
            _ => None,
        }
    }

    /// Back to wire form
    pub fn to_raw(&self) -> RawRecord {
        RawRecord {
            packet_size: self.packet_size.to_string(),
            protocol: self.protocol.to_string(),
            src_ip: self.src_ip.clone(),
            dst_ip: self.dst_ip.clone(),
            time_interval: self.time_interval.to_string(),
        }
    }
}

/// Parse a numeric field. Surrounding whitespace is tolerated; NaN,
/// infinities and values that overflow the `f32` feature matrix count as
/// missing.
pub fn parse_number(field: &'static str, value: &str) -> Result<f64, CoercionError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| (*v as f32).is_finite())
        .ok_or_else(|| CoercionError {
            field,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_line() {
        let record = RawRecord::parse_line("1200,6,192.168.0.1,10.0.0.1,0.005").unwrap();
        assert_eq!(record.packet_size, "1200");
        assert_eq!(record.protocol, "6");
        assert_eq!(record.src_ip, "192.168.0.1");
        assert_eq!(record.dst_ip, "10.0.0.1");
        assert_eq!(record.time_interval, "0.005");
        assert_eq!(record.to_row(), "1200,6,192.168.0.1,10.0.0.1,0.005");
    }

    #[test]
    fn test_reject_wrong_field_count() {
        assert!(RawRecord::parse_line("1200,6").is_none());
        assert!(RawRecord::parse_line("").is_none());
        assert!(RawRecord::parse_line("1,2,3,4").is_none());
        assert!(RawRecord::parse_line("1,2,3,4,5,6").is_none());
        // Empty fields still count as fields
        assert!(RawRecord::parse_line(",,,,").is_some());
    }

    #[test]
    fn test_coercion() {
        let raw = RawRecord::parse_line("1200,6,a,b,0.005").unwrap();
        let packet = PacketRecord::try_from(&raw).unwrap();
        assert_eq!(packet.packet_size, 1200.0);
        assert_eq!(packet.protocol, 6.0);
        assert_eq!(packet.time_interval, 0.005);
        assert_eq!(packet.src_ip, "a");
    }

    #[test]
    fn test_coercion_names_failing_field() {
        let raw = RawRecord::parse_line("1200,tcp,a,b,0.005").unwrap();
        let err = PacketRecord::try_from(&raw).unwrap_err();
        assert_eq!(err.field, "protocol");
        assert_eq!(err.value, "tcp");

        let raw = RawRecord::parse_line("1200,6,a,b,nan").unwrap();
        assert_eq!(PacketRecord::try_from(&raw).unwrap_err().field, "time_interval");
    }

    #[test]
    fn test_out_of_range_values_still_coerce() {
        // Range checks belong to calibration; at serving time extreme values
        // are exactly what the scorer should see.
        let raw = RawRecord::parse_line("99999,999,256.256.256.256,8.8.8.8,100").unwrap();
        let packet = PacketRecord::try_from(&raw).unwrap();
        assert_eq!(packet.protocol, 999.0);
    }

    #[test]
    fn test_values_overflowing_f32_rejected() {
        let raw = RawRecord::parse_line("1e39,6,a,b,0.005").unwrap();
        let err = PacketRecord::try_from(&raw).unwrap_err();
        assert_eq!(err.field, "packet_size");
        assert_eq!(err.value, "1e39");

        let raw = RawRecord::parse_line("3e38,6,a,b,-1e40").unwrap();
        assert_eq!(PacketRecord::try_from(&raw).unwrap_err().field, "time_interval");
    }

    #[test]
    fn test_numeric_columns() {
        let raw = RawRecord::parse_line("1200,6,a,b,0.005").unwrap();
        let packet = PacketRecord::try_from(&raw).unwrap();
        assert_eq!(packet.numeric(PACKET_SIZE), Some(1200.0));
        assert_eq!(packet.numeric(PROTOCOL), Some(6.0));
        assert_eq!(packet.numeric(TIME_INTERVAL), Some(0.005));
        assert_eq!(packet.numeric(super::super::layout::SRC_IP), None);
    }
}
