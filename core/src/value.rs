//! Tagged values stored in the [`DataContext`](crate::context::DataContext).
//!
//! Every value a module emits is one of the [`DataValue`] variants, and every data
//! contract entry names the matching [`ValueType`]. The orchestrator compares the
//! two when it merges an output, so consumers never have to guess a payload's shape.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Text,
    Bool,
    Integer,
    TextList,
    Addresses,
    OpenPorts,
    Banner,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Text => "text",
            ValueType::Bool => "bool",
            ValueType::Integer => "integer",
            ValueType::TextList => "text_list",
            ValueType::Addresses => "addresses",
            ValueType::OpenPorts => "open_ports",
            ValueType::Banner => "banner",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ValueType::Text),
            "bool" => Ok(ValueType::Bool),
            "integer" => Ok(ValueType::Integer),
            "text_list" => Ok(ValueType::TextList),
            "addresses" => Ok(ValueType::Addresses),
            "open_ports" => Ok(ValueType::OpenPorts),
            "banner" => Ok(ValueType::Banner),
            other => Err(format!("unknown value type `{other}`")),
        }
    }
}

/// Open ports found on one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPorts {
    pub target: IpAddr,
    pub ports: Vec<u16>,
}

/// Negotiated TLS parameters captured during a handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsDetails {
    pub version: Option<String>,
    pub common_name: Option<String>,
    pub subject_alt_names: Vec<String>,
}

/// Result of one banner acquisition attempt. `banner == None` with no TLS details
/// is the negative result for that port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannerRecord {
    pub target: IpAddr,
    pub port: u16,
    pub banner: Option<String>,
    pub protocol: Option<String>,
    pub tls: Option<TlsDetails>,
}

impl BannerRecord {
    pub fn empty(target: IpAddr, port: u16) -> Self {
        Self {
            target,
            port,
            banner: None,
            protocol: None,
            tls: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.banner.is_none() && self.tls.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DataValue {
    Text(String),
    Bool(bool),
    Integer(i64),
    TextList(Vec<String>),
    Addresses(Vec<IpAddr>),
    OpenPorts(OpenPorts),
    Banner(BannerRecord),
}

impl DataValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            DataValue::Text(_) => ValueType::Text,
            DataValue::Bool(_) => ValueType::Bool,
            DataValue::Integer(_) => ValueType::Integer,
            DataValue::TextList(_) => ValueType::TextList,
            DataValue::Addresses(_) => ValueType::Addresses,
            DataValue::OpenPorts(_) => ValueType::OpenPorts,
            DataValue::Banner(_) => ValueType::Banner,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            DataValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text_list(&self) -> Option<&[String]> {
        match self {
            DataValue::TextList(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_addresses(&self) -> Option<&[IpAddr]> {
        match self {
            DataValue::Addresses(addrs) => Some(addrs),
            _ => None,
        }
    }

    pub fn as_open_ports(&self) -> Option<&OpenPorts> {
        match self {
            DataValue::OpenPorts(open) => Some(open),
            _ => None,
        }
    }

    pub fn as_banner(&self) -> Option<&BannerRecord> {
        match self {
            DataValue::Banner(record) => Some(record),
            _ => None,
        }
    }
}

impl From<String> for DataValue {
    fn from(s: String) -> Self {
        DataValue::Text(s)
    }
}

impl From<&str> for DataValue {
    fn from(s: &str) -> Self {
        DataValue::Text(s.to_string())
    }
}

impl From<bool> for DataValue {
    fn from(b: bool) -> Self {
        DataValue::Bool(b)
    }
}

impl From<Vec<String>> for DataValue {
    fn from(list: Vec<String>) -> Self {
        DataValue::TextList(list)
    }
}

impl From<Vec<IpAddr>> for DataValue {
    fn from(addrs: Vec<IpAddr>) -> Self {
        DataValue::Addresses(addrs)
    }
}

impl From<OpenPorts> for DataValue {
    fn from(open: OpenPorts) -> Self {
        DataValue::OpenPorts(open)
    }
}

impl From<BannerRecord> for DataValue {
    fn from(record: BannerRecord) -> Self {
        DataValue::Banner(record)
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn value_type_names_round_trip() {
        for ty in [
            ValueType::Text,
            ValueType::Bool,
            ValueType::Integer,
            ValueType::TextList,
            ValueType::Addresses,
            ValueType::OpenPorts,
            ValueType::Banner,
        ] {
            assert_eq!(ty.as_str().parse::<ValueType>(), Ok(ty));
        }
        assert!("any".parse::<ValueType>().is_err());
    }

    #[test]
    fn values_report_their_type() {
        let target = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert_eq!(DataValue::from("x").value_type(), ValueType::Text);
        assert_eq!(
            DataValue::from(vec![target]).value_type(),
            ValueType::Addresses
        );
        assert_eq!(
            DataValue::from(BannerRecord::empty(target, 22)).value_type(),
            ValueType::Banner
        );
    }

    #[test]
    fn empty_banner_record_is_negative() {
        let mut record = BannerRecord::empty(IpAddr::V4(Ipv4Addr::LOCALHOST), 443);
        assert!(record.is_empty());
        record.tls = Some(TlsDetails::default());
        assert!(!record.is_empty());
    }
}
