//! Decoded-CPER attribute ingestion for the fault-log family.
//!
//! The fault-log collector leaves a decoded rendition of the error record at
//! `<staging>/<id>/Decoded/decoded.json`. The engine consumes it read-only:
//! a handful of attributes are lifted onto the entry, and every field absent
//! from the document stays at the literal `"NA"`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Placeholder for decoded fields that are not present.
pub const NOT_AVAILABLE: &str = "NA";

/// Relative location of the decoded document under a dump directory.
pub const DECODED_FILE: &str = "Decoded/decoded.json";

/// Attributes lifted from a decoded CPER record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CperAttrs {
    /// Header notification type GUID.
    pub notification_type: String,
    /// Section type of the first section descriptor.
    pub section_type: String,
    /// FRU id of the first section descriptor.
    pub fru_id: String,
    /// Section severity of the first section descriptor.
    pub severity: String,
    /// Vendor IP-block signature.
    pub nv_ip_signature: String,
    /// Vendor severity.
    pub nv_severity: String,
    /// Vendor socket number.
    pub nv_socket_number: String,
    /// PCIe vendor id.
    pub pcie_vendor_id: String,
    /// PCIe device id.
    pub pcie_device_id: String,
    /// PCIe class code.
    pub pcie_class_code: String,
    /// PCIe function number.
    pub pcie_function_number: String,
    /// PCIe device number.
    pub pcie_device_number: String,
    /// PCIe segment number.
    pub pcie_segment_number: String,
    /// PCIe device bus number.
    pub pcie_device_bus_number: String,
    /// PCIe secondary bus number.
    pub pcie_secondary_bus_number: String,
    /// PCIe slot number.
    pub pcie_slot_number: String,
}

impl Default for CperAttrs {
    fn default() -> Self {
        let na = || NOT_AVAILABLE.to_string();
        Self {
            notification_type: na(),
            section_type: na(),
            fru_id: na(),
            severity: na(),
            nv_ip_signature: na(),
            nv_severity: na(),
            nv_socket_number: na(),
            pcie_vendor_id: na(),
            pcie_device_id: na(),
            pcie_class_code: na(),
            pcie_function_number: na(),
            pcie_device_number: na(),
            pcie_segment_number: na(),
            pcie_device_bus_number: na(),
            pcie_secondary_bus_number: na(),
            pcie_slot_number: na(),
        }
    }
}

impl CperAttrs {
    /// Read decoded attributes from `<dump_dir>/Decoded/decoded.json`.
    ///
    /// A missing or unreadable document yields the all-`"NA"` default;
    /// decode problems are logged and swallowed so the engine keeps
    /// operating on the remaining artifacts.
    #[must_use]
    pub fn from_dump_dir(dump_dir: &Path) -> Self {
        let path = dump_dir.join(DECODED_FILE);
        if !path.exists() {
            return Self::default();
        }

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read decoded CPER document");
                return Self::default();
            },
        };

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(doc) => Self::from_document(&doc),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse decoded CPER document");
                Self::default()
            },
        }
    }

    /// Lift attributes out of a parsed decoded-CPER document.
    #[must_use]
    pub fn from_document(doc: &Value) -> Self {
        let mut attrs = Self::default();

        if let Some(header) = doc.get("Header") {
            fill(&mut attrs.notification_type, header.get("Notification Type"));
        }

        let section_count = doc
            .get("Header")
            .and_then(|h| h.get("Section Count"))
            .and_then(Value::as_u64)
            .unwrap_or(u64::MAX) as usize;

        let Some(sections) = doc.get("Sections").and_then(Value::as_array) else {
            return attrs;
        };

        // Sections are applied in order and a present field always
        // overwrites, so the last section carrying a field wins.
        for section in sections.iter().take(section_count) {
            if let Some(desc) = section.get("Section Descriptor") {
                fill(&mut attrs.section_type, desc.get("Section Type"));
                fill(&mut attrs.fru_id, desc.get("FRU Id"));
                fill(&mut attrs.severity, desc.get("Section Severity"));
            }

            let Some(body) = section.get("Section") else {
                continue;
            };
            fill(&mut attrs.nv_ip_signature, body.get("IPSignature"));
            fill(&mut attrs.nv_severity, body.get("Severity"));
            fill(&mut attrs.nv_socket_number, body.get("Socket Number"));

            if let Some(device) = body.get("Device ID") {
                fill(&mut attrs.pcie_vendor_id, device.get("Vendor ID"));
                fill(&mut attrs.pcie_device_id, device.get("Device ID"));
                fill(&mut attrs.pcie_class_code, device.get("Class Code"));
                fill(&mut attrs.pcie_function_number, device.get("Function Number"));
                fill(&mut attrs.pcie_device_number, device.get("Device Number"));
                fill(&mut attrs.pcie_segment_number, device.get("Segment Number"));
                fill(
                    &mut attrs.pcie_device_bus_number,
                    device.get("Device Bus Number"),
                );
                fill(
                    &mut attrs.pcie_secondary_bus_number,
                    device.get("Secondary Bus Number"),
                );
                fill(&mut attrs.pcie_slot_number, device.get("Slot Number"));
            }
        }

        attrs
    }
}

/// Set `slot` from a JSON string or number; absent values leave it alone.
fn fill(slot: &mut String, value: Option<&Value>) {
    match value {
        Some(Value::String(s)) => *slot = s.clone(),
        Some(Value::Number(n)) => *slot = n.to_string(),
        _ => {},
    }
}
