//! Data models for location codes, schools, areas and couriers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Length of a full location code
pub const CODE_LEN: usize = 6;
/// Length of each of the school/area/point segments
pub const SEGMENT_LEN: usize = 2;
/// Segment alphabet in allocation order
pub const ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Whether a character may appear in a code segment
pub fn is_code_char(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit()
}

/// Check a single 2-character segment
pub fn validate_segment(label: &str, segment: &str) -> Result<()> {
    if segment.len() != SEGMENT_LEN {
        return Err(AppError::InvalidCodeFormat(format!(
            "{} segment must be {} characters, got {}",
            label,
            SEGMENT_LEN,
            segment.len()
        )));
    }
    if !segment.chars().all(is_code_char) {
        return Err(AppError::InvalidCodeFormat(format!(
            "{} segment must contain only uppercase letters and digits",
            label
        )));
    }
    Ok(())
}

/// Check a managed prefix: whole segments only, constrained alphabet
pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.len() > CODE_LEN || prefix.len() % SEGMENT_LEN != 0 {
        return Err(AppError::InvalidCodeFormat(format!(
            "prefix length {} is not a whole number of segments",
            prefix.len()
        )));
    }
    if !prefix.chars().all(is_code_char) {
        return Err(AppError::InvalidCodeFormat(
            "prefix must contain only uppercase letters and digits".to_string(),
        ));
    }
    Ok(())
}

/// A 6-character opaque drop-point identifier: school + area + point
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocationCode(String);

impl LocationCode {
    /// Parse and format-check a code (length and alphabet only)
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.len() != CODE_LEN {
            return Err(AppError::InvalidCodeFormat(format!(
                "code must be {} characters, got {}",
                CODE_LEN,
                raw.len()
            )));
        }
        if !raw.chars().all(is_code_char) {
            return Err(AppError::InvalidCodeFormat(
                "code must contain only uppercase letters and digits".to_string(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    /// Build a code from its three segments
    pub fn compose(school: &str, area: &str, point: &str) -> Result<Self> {
        validate_segment("school", school)?;
        validate_segment("area", area)?;
        validate_segment("point", point)?;
        Ok(Self(format!("{}{}{}", school, area, point)))
    }

    pub fn school(&self) -> &str {
        &self.0[0..2]
    }

    pub fn area(&self) -> &str {
        &self.0[2..4]
    }

    pub fn point(&self) -> &str {
        &self.0[4..6]
    }

    /// School + area, the 4-character prefix
    pub fn area_prefix(&self) -> &str {
        &self.0[0..4]
    }

    pub fn decompose(&self) -> Decomposed {
        Decomposed {
            school: self.school().to_string(),
            area: self.area().to_string(),
            point: self.point().to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for LocationCode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for LocationCode {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<LocationCode> for String {
    fn from(code: LocationCode) -> Self {
        code.0
    }
}

/// The three segments of a location code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decomposed {
    pub school: String,
    pub area: String,
    pub point: String,
}

impl Decomposed {
    pub fn compose(&self) -> Result<LocationCode> {
        LocationCode::compose(&self.school, &self.area, &self.point)
    }
}

/// A school, owner of the first code segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct School {
    pub code: String,
    pub name: String,
    pub is_active: bool,
    /// Courier responsible for this school (non-owning)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// An area within a school, owner of the second code segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Area {
    pub school: String,
    pub area: String,
    pub name: String,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Kind of physical drop point a code identifies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointType {
    Dormitory,
    Teaching,
    Administrative,
    Commercial,
    Other,
}

impl PointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PointType::Dormitory => "dormitory",
            PointType::Teaching => "teaching",
            PointType::Administrative => "administrative",
            PointType::Commercial => "commercial",
            PointType::Other => "other",
        }
    }
}

impl std::str::FromStr for PointType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "dormitory" => Ok(PointType::Dormitory),
            "teaching" => Ok(PointType::Teaching),
            "administrative" => Ok(PointType::Administrative),
            "commercial" => Ok(PointType::Commercial),
            "other" => Ok(PointType::Other),
            _ => Err(format!("Invalid point type: {}", s)),
        }
    }
}

/// Binding status of a code application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingStatus {
    Pending,
    Approved,
    Rejected,
}

impl BindingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingStatus::Pending => "pending",
            BindingStatus::Approved => "approved",
            BindingStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for BindingStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BindingStatus::Pending),
            "approved" => Ok(BindingStatus::Approved),
            "rejected" => Ok(BindingStatus::Rejected),
            _ => Err(format!("Invalid binding status: {}", s)),
        }
    }
}

/// A reservation of a point segment awaiting approval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeApplication {
    pub id: Uuid,
    pub code: LocationCode,
    pub point_type: PointType,
    pub is_public: bool,
    pub requested_by: String,
    pub status: BindingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// An activated location code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeRecord {
    pub code: LocationCode,
    pub point_type: PointType,
    pub binding_status: BindingStatus,
    pub is_public: bool,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Courier authority tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CourierLevel {
    /// Exact drop point
    Point = 1,
    /// School + area
    Area = 2,
    School = 3,
    Global = 4,
}

impl CourierLevel {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Managed prefix length for this tier: `8 - 2 * level`
    pub fn prefix_len(&self) -> usize {
        8 - 2 * self.as_u8() as usize
    }
}

impl TryFrom<u8> for CourierLevel {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(CourierLevel::Point),
            2 => Ok(CourierLevel::Area),
            3 => Ok(CourierLevel::School),
            4 => Ok(CourierLevel::Global),
            _ => Err(format!("Invalid courier level: {}", value)),
        }
    }
}

impl From<CourierLevel> for u8 {
    fn from(level: CourierLevel) -> Self {
        level.as_u8()
    }
}

/// One node of the courier authority tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: Uuid,
    pub name: String,
    pub level: CourierLevel,
    pub managed_prefix: String,
    /// Authorization parent, looked up by id (never owned)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    pub performance_score: f64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Courier {
    pub fn new(
        name: impl Into<String>,
        level: CourierLevel,
        managed_prefix: impl Into<String>,
        parent_id: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            level,
            managed_prefix: managed_prefix.into(),
            parent_id,
            performance_score: 0.0,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Request to create a school
#[derive(Debug, Deserialize)]
pub struct CreateSchoolRequest {
    pub code: String,
    pub name: String,
}

/// Request to create an area
#[derive(Debug, Deserialize)]
pub struct CreateAreaRequest {
    pub area: String,
    pub name: String,
}

/// Request to reserve a point segment
#[derive(Debug, Clone, Deserialize)]
pub struct AllocateRequest {
    pub school: String,
    pub area: String,
    pub point_type: PointType,
    pub requested_by: String,
    #[serde(default)]
    pub preferred_point: Option<String>,
    #[serde(default = "default_true")]
    pub is_public: bool,
}

fn default_true() -> bool {
    true
}

/// Request to create a courier
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCourierRequest {
    pub name: String,
    pub level: CourierLevel,
    #[serde(default)]
    pub managed_prefix: String,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub performance_score: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_code() {
        let code = LocationCode::parse("PK5F3D").unwrap();
        assert_eq!(code.as_str(), "PK5F3D");
        assert_eq!(code.area_prefix(), "PK5F");
    }

    #[test]
    fn test_decompose_segments() {
        let parts = LocationCode::parse("PK5F3D").unwrap().decompose();
        assert_eq!(parts.school, "PK");
        assert_eq!(parts.area, "5F");
        assert_eq!(parts.point, "3D");
    }

    #[test]
    fn test_parse_rejects_bad_length() {
        assert!(matches!(
            LocationCode::parse("PK5F3"),
            Err(AppError::InvalidCodeFormat(_))
        ));
        assert!(LocationCode::parse("PK5F3D1").is_err());
        assert!(LocationCode::parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_alphabet() {
        assert!(LocationCode::parse("pk5f3d").is_err());
        assert!(LocationCode::parse("PK-F3D").is_err());
        // Multi-byte characters must not slip through the length check
        assert!(LocationCode::parse("PK5FÉ").is_err());
    }

    #[test]
    fn test_compose_rejects_bad_segment() {
        assert!(LocationCode::compose("PK", "5", "3D").is_err());
        assert!(LocationCode::compose("PK", "5F", "3d").is_err());
    }

    #[test]
    fn test_validate_prefix() {
        assert!(validate_prefix("").is_ok());
        assert!(validate_prefix("PK").is_ok());
        assert!(validate_prefix("PK5F3D").is_ok());
        assert!(validate_prefix("PK5").is_err());
        assert!(validate_prefix("PK5F3D01").is_err());
        assert!(validate_prefix("pk").is_err());
    }

    #[test]
    fn test_courier_level_prefix_len() {
        assert_eq!(CourierLevel::Global.prefix_len(), 0);
        assert_eq!(CourierLevel::School.prefix_len(), 2);
        assert_eq!(CourierLevel::Area.prefix_len(), 4);
        assert_eq!(CourierLevel::Point.prefix_len(), 6);
    }

    #[test]
    fn test_courier_level_serde() {
        let json = serde_json::to_string(&CourierLevel::Area).unwrap();
        assert_eq!(json, "2");
        let level: CourierLevel = serde_json::from_str("3").unwrap();
        assert_eq!(level, CourierLevel::School);
        assert!(serde_json::from_str::<CourierLevel>("5").is_err());
    }

    #[test]
    fn test_location_code_serde() {
        let code: LocationCode = serde_json::from_str("\"PK5F3D\"").unwrap();
        assert_eq!(code.point(), "3D");
        assert!(serde_json::from_str::<LocationCode>("\"PK5F\"").is_err());
    }

    #[test]
    fn test_point_type_from_str() {
        assert_eq!("dormitory".parse::<PointType>().unwrap(), PointType::Dormitory);
        assert!("castle".parse::<PointType>().is_err());
    }

    #[test]
    fn test_binding_status_round_trip_names() {
        for status in [
            BindingStatus::Pending,
            BindingStatus::Approved,
            BindingStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<BindingStatus>().unwrap(), status);
        }
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn segment() -> impl Strategy<Value = String> {
            "[0-9A-Z]{2}"
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(500))]

            /// Decompose(Compose(s, a, p)) == (s, a, p)
            #[test]
            fn prop_compose_decompose_round_trip(
                school in segment(),
                area in segment(),
                point in segment(),
            ) {
                let code = LocationCode::compose(&school, &area, &point).unwrap();
                let parts = code.decompose();
                prop_assert_eq!(parts.school, school);
                prop_assert_eq!(parts.area, area);
                prop_assert_eq!(parts.point, point);
            }

            #[test]
            fn prop_parse_accepts_exactly_composed_codes(
                school in segment(),
                area in segment(),
                point in segment(),
            ) {
                let raw = format!("{}{}{}", school, area, point);
                let parsed = LocationCode::parse(&raw).unwrap();
                prop_assert_eq!(parsed.decompose().compose().unwrap(), parsed);
            }
        }
    }
}
