//! Record types of the catalog sources
//!
//! Only the fields that identify a record (or that derived data reads) are
//! typed; everything else the service returns is kept verbatim in `extra`
//! so a changed field still counts as a changed record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::source::SyncRecord;

/// Anti-shipping activity message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asam {
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SyncRecord for Asam {
    fn natural_key(&self) -> String {
        self.reference.clone()
    }
}

/// Mobile offshore drilling unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Modu {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SyncRecord for Modu {
    fn natural_key(&self) -> String {
        self.name.clone()
    }
}

/// Broadcast navigational warning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationalWarning {
    pub nav_area: String,
    pub msg_year: i32,
    pub msg_number: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SyncRecord for NavigationalWarning {
    fn natural_key(&self) -> String {
        format!("{}/{}/{}", self.nav_area, self.msg_year, self.msg_number)
    }
}

/// Light or buoy from the list of lights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Light {
    pub volume_number: String,
    pub feature_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SyncRecord for Light {
    fn natural_key(&self) -> String {
        format!("{}/{}", self.volume_number, self.feature_number)
    }
}

/// Radio beacon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadioBeacon {
    pub volume_number: String,
    pub feature_number: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SyncRecord for RadioBeacon {
    fn natural_key(&self) -> String {
        format!("{}/{}", self.volume_number, self.feature_number)
    }
}

/// Differential GPS station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DgpsStation {
    pub volume_number: String,
    pub feature_number: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SyncRecord for DgpsStation {
    fn natural_key(&self) -> String {
        format!("{}/{}", self.volume_number, self.feature_number)
    }
}

/// World port index entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    pub port_number: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SyncRecord for Port {
    fn natural_key(&self) -> String {
        self.port_number.to_string()
    }
}

/// Notice to mariners publication file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeToMariners {
    pub ods_entry_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SyncRecord for NoticeToMariners {
    fn natural_key(&self) -> String {
        self.ods_entry_id.to_string()
    }
}

/// Stored electronic publication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectronicPublication {
    pub s3_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_title: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SyncRecord for ElectronicPublication {
    fn natural_key(&self) -> String {
        self.s3_key.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn composite_natural_keys() {
        let warning: NavigationalWarning = serde_json::from_value(json!({
            "navArea": "4", "msgYear": 2024, "msgNumber": 112, "text": "DERELICT"
        }))
        .unwrap();
        assert_eq!(warning.natural_key(), "4/2024/112");

        let light: Light = serde_json::from_value(json!({
            "volumeNumber": "PUB 110", "featureNumber": "14840", "name": "Bishop Rock"
        }))
        .unwrap();
        assert_eq!(light.natural_key(), "PUB 110/14840");
    }

    #[test]
    fn unknown_fields_are_kept() {
        let body = json!({ "portNumber": 41170, "portName": "Aden", "harborSize": "L" });
        let port: Port = serde_json::from_value(body.clone()).unwrap();

        assert_eq!(port.extra.get("harborSize"), Some(&json!("L")));
        assert_eq!(serde_json::to_value(&port).unwrap(), body);
    }
}
