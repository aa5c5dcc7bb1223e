//! Plate matching.
//!
//! OCR on plates mostly fails by misreading a single glyph (`8` for `B`,
//! `0` for `O`), so a detection matches a registered plate when both have the
//! same length and differ in at most one position. Insertions and deletions
//! never match.

use crate::types::{Device, PlateRecord};

/// Uppercase and trim a plate before comparison.
pub fn normalize_plate(plate: &str) -> String {
    plate.trim().to_uppercase()
}

/// `true` iff `detected` and `registered` have equal length and Hamming distance ≤ 1.
///
/// Compares characters, not bytes. Callers normalize case first.
pub fn plates_match(detected: &str, registered: &str) -> bool {
    if detected.chars().count() != registered.chars().count() {
        return false;
    }

    let mut diff = 0usize;
    for (a, b) in detected.chars().zip(registered.chars()) {
        if a != b {
            diff += 1;
            if diff > 1 {
                return false;
            }
        }
    }
    true
}

/// The registrant and vehicle a detection resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlateMatch<'a> {
    pub record: &'a PlateRecord,
    pub device: &'a Device,
}

/// Scan every device of every registrant in store order; first match wins.
pub fn find_match<'a>(detected: &str, registry: &'a [PlateRecord]) -> Option<PlateMatch<'a>> {
    let detected = normalize_plate(detected);
    if detected.is_empty() {
        return None;
    }
    registry.iter().find_map(|record| {
        record
            .devices
            .iter()
            .find(|device| plates_match(&detected, &normalize_plate(&device.plate)))
            .map(|device| PlateMatch { record, device })
    })
}
