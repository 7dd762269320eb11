//! FHIR R4 wire helpers: bundle probing, observation parsing and
//! construction, value formatting.
//!
//! Server payloads are probed as `serde_json::Value` rather than fully typed
//! structs; FHIR resources are wide and mostly optional, and a missing field
//! must degrade to a placeholder, never fail the whole render.

use crate::error::SmartError;
use crate::session::LaunchSession;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const LOINC_SYSTOLIC: &str = "8480-6";
pub const LOINC_DIASTOLIC: &str = "8462-4";
pub const LOINC_ORAL_TEMPERATURE: &str = "8331-1";

const VITAL_SIGNS_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/observation-category";

/// One component of a multi-component observation (e.g. systolic pressure)
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub code: String,
    pub value: f64,
    pub unit: Option<String>,
}

/// Clinical value of an observation as a closed set of shapes
#[derive(Debug, Clone, PartialEq)]
pub enum ObservationValue {
    Quantity { value: f64, unit: String },
    MultiComponent(Vec<Component>),
    Text(String),
    Unknown,
}

impl ObservationValue {
    /// Render for display.
    ///
    /// Blood-pressure style values print as `systolic/diastolic unit` when
    /// both coded components carry quantities; the unit falls back to mmHg.
    /// Single quantities print as `value unit` with an empty default unit.
    pub fn display(&self) -> String {
        match self {
            ObservationValue::MultiComponent(components) => {
                let systolic = components
                    .iter()
                    .find(|c| c.code == LOINC_SYSTOLIC);
                let diastolic = components
                    .iter()
                    .find(|c| c.code == LOINC_DIASTOLIC);
                match (systolic, diastolic) {
                    (Some(sys), Some(dia)) => {
                        let unit = sys
                            .unit
                            .as_deref()
                            .or(dia.unit.as_deref())
                            .unwrap_or("mmHg");
                        format!("{}/{} {}", sys.value, dia.value, unit)
                    }
                    _ => "Not available".to_string(),
                }
            }
            ObservationValue::Quantity { value, unit } => {
                format!("{} {}", value, unit).trim_end().to_string()
            }
            ObservationValue::Text(text) => text.clone(),
            ObservationValue::Unknown => "Not available".to_string(),
        }
    }

    /// Extract the value from an Observation resource.
    fn from_resource(resource: &Value) -> Self {
        if let Some(components) = resource["component"].as_array() {
            let parsed: Vec<Component> = components
                .iter()
                .filter_map(|component| {
                    let code = component["code"]["coding"]
                        .as_array()
                        .and_then(|c| c.first())
                        .and_then(|c| c["code"].as_str())?;
                    let value = component["valueQuantity"]["value"].as_f64()?;
                    Some(Component {
                        code: code.to_string(),
                        value,
                        unit: component["valueQuantity"]["unit"]
                            .as_str()
                            .map(|s| s.to_string()),
                    })
                })
                .collect();
            if !parsed.is_empty() {
                return ObservationValue::MultiComponent(parsed);
            }
        }

        if let Some(value) = resource["valueQuantity"]["value"].as_f64() {
            return ObservationValue::Quantity {
                value,
                unit: resource["valueQuantity"]["unit"]
                    .as_str()
                    .unwrap_or("")
                    .to_string(),
            };
        }

        if let Some(text) = resource["valueString"].as_str() {
            return ObservationValue::Text(text.to_string());
        }

        ObservationValue::Unknown
    }
}

/// One observation plus its display metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationEntry {
    pub id: String,
    /// Display name from `code.text` ("Unknown" fallback)
    pub display: String,
    /// Parsed effective instant; `None` sorts as the earliest possible time
    pub effective: Option<DateTime<Utc>>,
    /// Raw `effectiveDateTime` string as the server sent it
    pub effective_raw: Option<String>,
    pub value: ObservationValue,
}

impl ObservationEntry {
    /// Parse from an Observation resource, degrading missing fields to
    /// placeholders.
    pub fn from_resource(resource: &Value) -> Self {
        let display = resource["code"]["text"]
            .as_str()
            .or_else(|| {
                resource["code"]["coding"]
                    .as_array()
                    .and_then(|c| c.first())
                    .and_then(|c| c["display"].as_str())
            })
            .unwrap_or("Unknown")
            .to_string();

        let effective_raw = resource["effectiveDateTime"].as_str().map(|s| s.to_string());
        let effective = effective_raw
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Self {
            id: resource["id"].as_str().unwrap_or("").to_string(),
            display,
            effective,
            effective_raw,
            value: ObservationValue::from_resource(resource),
        }
    }

    /// Sort key: effective time, with missing dates pinned to the oldest
    /// possible instant.
    pub fn sort_key(&self) -> DateTime<Utc> {
        self.effective.unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Date string for display
    pub fn effective_display(&self) -> String {
        match (&self.effective, &self.effective_raw) {
            (Some(_), Some(raw)) => raw.clone(),
            _ => "unknown date".to_string(),
        }
    }
}

/// Sort entries strictly descending by effective time.
pub fn sort_entries_desc(entries: &mut [ObservationEntry]) {
    entries.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
}

/// Pull the entries out of a search Bundle.
pub fn bundle_entries(bundle: &Value) -> Vec<ObservationEntry> {
    bundle["entry"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .map(|entry| ObservationEntry::from_resource(&entry["resource"]))
                .collect()
        })
        .unwrap_or_default()
}

/// Continuation URL from a Bundle's `link[]`, if the server has more pages.
pub fn bundle_next_link(bundle: &Value) -> Option<String> {
    bundle["link"].as_array().and_then(|links| {
        links
            .iter()
            .find(|link| link["relation"].as_str() == Some("next"))
            .and_then(|link| link["url"].as_str())
            .map(|s| s.to_string())
    })
}

/// Build a vital-signs Observation resource for a single quantity reading.
pub fn build_observation(
    patient_id: &str,
    code: &str,
    display: &str,
    value: f64,
    unit: &str,
    effective: &str,
) -> Value {
    serde_json::json!({
        "resourceType": "Observation",
        "status": "final",
        "category": [{
            "coding": [{
                "system": VITAL_SIGNS_SYSTEM,
                "code": "vital-signs",
                "display": "Vital Signs"
            }]
        }],
        "code": {
            "coding": [{
                "system": "http://loinc.org",
                "code": code,
                "display": display
            }],
            "text": display
        },
        "subject": {
            "reference": format!("Patient/{}", patient_id)
        },
        "effectiveDateTime": effective,
        "valueQuantity": {
            "value": value,
            "unit": unit,
            "system": "http://unitsofmeasure.org",
            "code": unit
        }
    })
}

/// Simplified FHIR Patient, enough for the patient banner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,
    pub name: String,
    #[serde(rename = "birthDate")]
    pub birth_date: Option<String>,
}

/// Extract a displayable patient name from a FHIR Patient resource.
pub fn extract_patient_name(resource: &Value) -> String {
    if let Some(names) = resource["name"].as_array() {
        if let Some(name) = names.first() {
            let family = name["family"].as_str().unwrap_or("");
            let given = name["given"]
                .as_array()
                .and_then(|g| g.first())
                .and_then(|g| g.as_str())
                .unwrap_or("");
            let full = format!("{} {}", given, family).trim().to_string();
            if !full.is_empty() {
                return full;
            }
        }
    }
    "Unknown Patient".to_string()
}

/// Fetch the launched patient for the banner.
pub async fn fetch_patient(
    http: &reqwest::Client,
    session: &LaunchSession,
) -> Result<Patient, SmartError> {
    let response = http
        .get(format!(
            "{}/Patient/{}",
            session.issuer.trim_end_matches('/'),
            session.patient_id
        ))
        .bearer_auth(&session.access_token)
        .send()
        .await?;

    let resource: Value = crate::http::handle_response(response).await?;
    Ok(Patient {
        id: resource["id"].as_str().unwrap_or(&session.patient_id).to_string(),
        name: extract_patient_name(&resource),
        birth_date: resource["birthDate"].as_str().map(|s| s.to_string()),
    })
}
