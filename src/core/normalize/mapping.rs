//! Declarative schema mapping

use super::coerce::{coerce, coerce_float, is_missing, lookup};
use crate::config::{FieldMapping, GeometryMapping, SchemaMapping};
use crate::core::geometry::{parse_geojson, parse_wkt, GeometryParseError};
use crate::domain::{
    Coord, FieldMap, FieldValue, Geometry, Provenance, ProvisionalRecord, RecordId, RecordRejection,
};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

/// A record that passed schema mapping, geometry still in the source CRS
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub record_id: RecordId,
    pub geometry: Geometry,
    pub attributes: BTreeMap<String, FieldValue>,
    pub provenance: Provenance,
}

struct CompiledField {
    mapping: FieldMapping,
    pattern: Option<Regex>,
}

/// Maps provisional records of one source onto the canonical model
///
/// Checks run in a fixed order (decode, id, geometry, then fields in
/// declaration order) and the first failure is the one reported.
pub struct SchemaNormalizer {
    id_field: String,
    geometry: GeometryMapping,
    decimal_comma: bool,
    fields: Vec<CompiledField>,
}

impl SchemaNormalizer {
    pub fn new(mapping: &SchemaMapping) -> Result<Self, String> {
        let fields = mapping
            .fields
            .iter()
            .map(|field| {
                let pattern = field
                    .pattern
                    .as_deref()
                    .map(|p| {
                        Regex::new(&format!("^(?:{})$", p)).map_err(|e| {
                            format!("invalid pattern for field '{}': {}", field.target, e)
                        })
                    })
                    .transpose()?;
                Ok(CompiledField {
                    mapping: field.clone(),
                    pattern,
                })
            })
            .collect::<Result<Vec<_>, String>>()?;

        Ok(Self {
            id_field: mapping.id_field.clone(),
            geometry: mapping.geometry.clone(),
            decimal_comma: mapping.decimal_comma,
            fields,
        })
    }

    pub fn normalize(&self, record: &ProvisionalRecord) -> Result<NormalizedRecord, RecordRejection> {
        if let Some(error) = &record.decode_error {
            return Err(RecordRejection::type_mismatch(
                "_raw",
                format!("record could not be decoded: {}", error),
            ));
        }

        let record_id = self.record_id(record)?;
        let geometry = self.geometry(record)?;

        let mut attributes = BTreeMap::new();
        for field in &self.fields {
            let value = self.attribute(record, field)?;
            attributes.insert(field.mapping.target.clone(), value);
        }

        Ok(NormalizedRecord {
            record_id,
            geometry,
            attributes,
            provenance: record.provenance.clone(),
        })
    }

    fn record_id(&self, record: &ProvisionalRecord) -> Result<RecordId, RecordRejection> {
        let value = lookup(&record.fields, &self.id_field);
        if is_missing(value) {
            return Err(RecordRejection::missing_field(&self.id_field));
        }
        let text = match value {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => {
                return Err(RecordRejection::type_mismatch(
                    &self.id_field,
                    format!("record id must be a string or number, got {}", other),
                ))
            }
            None => return Err(RecordRejection::missing_field(&self.id_field)),
        };
        RecordId::new(text).map_err(|e| RecordRejection::type_mismatch(&self.id_field, e))
    }

    fn geometry(&self, record: &ProvisionalRecord) -> Result<Geometry, RecordRejection> {
        let fields = &record.fields;
        let parse_error = |field: &str, e: GeometryParseError| match e {
            GeometryParseError::Empty => {
                RecordRejection::invalid_geometry(format!("geometry in '{}' is empty", field))
            }
            GeometryParseError::Malformed(msg) => RecordRejection::invalid_geometry(format!(
                "cannot parse geometry in '{}': {}",
                field, msg
            )),
        };

        match &self.geometry {
            GeometryMapping::Geojson { field } => {
                parse_geojson(required(fields, field)?).map_err(|e| parse_error(field.as_str(), e))
            }
            GeometryMapping::Wkt { field } => {
                let value = required(fields, field)?;
                let text = value.as_str().ok_or_else(|| {
                    RecordRejection::type_mismatch(field, format!("WKT must be a string, got {}", value))
                })?;
                parse_wkt(text).map_err(|e| parse_error(field.as_str(), e))
            }
            GeometryMapping::Xy { x_field, y_field } => {
                let x = coerce_float(required(fields, x_field)?, self.decimal_comma)
                    .map_err(|e| RecordRejection::type_mismatch(x_field, e))?;
                let y = coerce_float(required(fields, y_field)?, self.decimal_comma)
                    .map_err(|e| RecordRejection::type_mismatch(y_field, e))?;
                Ok(Geometry::Point(Coord::new(x, y)))
            }
        }
    }

    fn attribute(
        &self,
        record: &ProvisionalRecord,
        field: &CompiledField,
    ) -> Result<FieldValue, RecordRejection> {
        let mapping = &field.mapping;
        let found = lookup(&record.fields, &mapping.source);

        let raw = match found {
            Some(v) if !is_missing(found) => v,
            _ => match (&mapping.default, mapping.required) {
                (Some(default), _) => default,
                (None, true) => return Err(RecordRejection::missing_field(&mapping.source)),
                (None, false) => return Ok(FieldValue::Null),
            },
        };

        let value = coerce(raw, mapping.field_type, self.decimal_comma)
            .map_err(|e| RecordRejection::type_mismatch(&mapping.source, e))?;
        check_constraints(field, &value)?;
        Ok(value)
    }
}

fn required<'a>(fields: &'a FieldMap, name: &str) -> Result<&'a Value, RecordRejection> {
    match lookup(fields, name) {
        Some(v) if !is_missing(Some(v)) => Ok(v),
        _ => Err(RecordRejection::missing_field(name)),
    }
}

fn check_constraints(field: &CompiledField, value: &FieldValue) -> Result<(), RecordRejection> {
    let mapping = &field.mapping;
    let violation = |detail: String| {
        Err(RecordRejection::constraint_violation(
            Some(mapping.source.as_str()),
            detail,
        ))
    };

    let numeric = match value {
        FieldValue::Integer(i) => Some(*i as f64),
        FieldValue::Float(f) => Some(*f),
        _ => None,
    };
    if let Some(n) = numeric {
        if let Some(min) = mapping.min {
            if n < min {
                return violation(format!("{} is below the minimum {}", n, min));
            }
        }
        if let Some(max) = mapping.max {
            if n > max {
                return violation(format!("{} is above the maximum {}", n, max));
            }
        }
    }

    if let FieldValue::String(s) = value {
        if let Some(max_length) = mapping.max_length {
            let len = s.chars().count();
            if len > max_length {
                return violation(format!(
                    "length {} exceeds the maximum length {}",
                    len, max_length
                ));
            }
        }
    }

    let text = match value {
        FieldValue::String(s) => Some(s.clone()),
        FieldValue::Integer(i) => Some(i.to_string()),
        _ => None,
    };
    if let Some(text) = text {
        if let Some(pattern) = &field.pattern {
            if !pattern.is_match(&text) {
                return violation(format!("'{}' does not match pattern {}", text, pattern));
            }
        }
        if let Some(allowed) = &mapping.allowed {
            if !allowed.iter().any(|a| a == &text) {
                return violation(format!("'{}' is not one of {:?}", text, allowed));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldType;
    use crate::domain::{RejectionReason, SourceCursor, SourceId};
    use serde_json::json;

    fn field(source: &str, target: &str, field_type: FieldType) -> FieldMapping {
        FieldMapping {
            source: source.to_string(),
            target: target.to_string(),
            field_type,
            required: false,
            default: None,
            min: None,
            max: None,
            max_length: None,
            pattern: None,
            allowed: None,
        }
    }

    fn mapping() -> SchemaMapping {
        let mut herd_size = field("HerdSize", "herd_size", FieldType::Integer);
        herd_size.required = true;
        herd_size.min = Some(0.0);

        let mut species = field("Species", "species", FieldType::String);
        species.allowed = Some(vec!["cattle".to_string(), "pig".to_string()]);
        species.default = Some(json!("cattle"));

        let mut cvr = field("Owner.Cvr", "owner_cvr", FieldType::String);
        cvr.pattern = Some(r"\d{8}".to_string());

        SchemaMapping {
            id_field: "HerdNumber".to_string(),
            geometry: GeometryMapping::Xy {
                x_field: "X".to_string(),
                y_field: "Y".to_string(),
            },
            decimal_comma: true,
            fields: vec![herd_size, species, cvr, field("Organic", "organic", FieldType::Boolean)],
        }
    }

    fn record(fields: Value) -> ProvisionalRecord {
        let fields = match fields {
            Value::Object(map) => map.into_iter().collect(),
            _ => panic!("expected an object"),
        };
        ProvisionalRecord {
            fields,
            provenance: Provenance {
                source_id: SourceId::new("chr").unwrap(),
                chunk_start: SourceCursor::Page { offset: 0 },
                chunk_end: SourceCursor::Page { offset: 50 },
                index: 3,
                chunk_records: 50,
            },
            decode_error: None,
        }
    }

    fn normalizer() -> SchemaNormalizer {
        SchemaNormalizer::new(&mapping()).unwrap()
    }

    #[test]
    fn test_normalizes_complete_record() {
        let out = normalizer()
            .normalize(&record(json!({
                "HerdNumber": 12345,
                "X": "512000,5",
                "Y": "6200000",
                "HerdSize": "120",
                "Owner": {"Cvr": "12345678"},
                "Organic": "ja"
            })))
            .unwrap();

        assert_eq!(out.record_id.as_str(), "12345");
        assert_eq!(out.geometry, Geometry::Point(Coord::new(512000.5, 6200000.0)));
        assert_eq!(out.attributes["herd_size"], FieldValue::Integer(120));
        assert_eq!(out.attributes["species"], FieldValue::String("cattle".to_string()));
        assert_eq!(out.attributes["organic"], FieldValue::Boolean(true));
        assert_eq!(out.attributes["owner_cvr"], FieldValue::String("12345678".to_string()));
    }

    #[test]
    fn test_missing_required_field() {
        let err = normalizer()
            .normalize(&record(json!({"HerdNumber": "1", "X": 1, "Y": 2, "HerdSize": " "})))
            .unwrap_err();
        assert_eq!(err.reason, RejectionReason::MissingField);
        assert_eq!(err.field.as_deref(), Some("HerdSize"));
    }

    #[test]
    fn test_optional_field_becomes_null() {
        let out = normalizer()
            .normalize(&record(json!({"HerdNumber": "1", "X": 1, "Y": 2, "HerdSize": 3})))
            .unwrap();
        assert_eq!(out.attributes["organic"], FieldValue::Null);
        assert_eq!(out.attributes["owner_cvr"], FieldValue::Null);
    }

    #[test]
    fn test_first_failure_wins() {
        // missing id is reported even though HerdSize is also invalid
        let err = normalizer()
            .normalize(&record(json!({"X": 1, "Y": 2, "HerdSize": "many"})))
            .unwrap_err();
        assert_eq!(err.reason, RejectionReason::MissingField);
        assert_eq!(err.field.as_deref(), Some("HerdNumber"));
    }

    #[test]
    fn test_type_mismatch_and_constraints() {
        let n = normalizer();
        let err = n
            .normalize(&record(json!({"HerdNumber": "1", "X": 1, "Y": 2, "HerdSize": "many"})))
            .unwrap_err();
        assert_eq!(err.reason, RejectionReason::TypeMismatch);

        let err = n
            .normalize(&record(json!({"HerdNumber": "1", "X": 1, "Y": 2, "HerdSize": -4})))
            .unwrap_err();
        assert_eq!(err.reason, RejectionReason::ConstraintViolation);

        let err = n
            .normalize(&record(json!({
                "HerdNumber": "1", "X": 1, "Y": 2, "HerdSize": 4, "Species": "goat"
            })))
            .unwrap_err();
        assert_eq!(err.reason, RejectionReason::ConstraintViolation);
        assert_eq!(err.field.as_deref(), Some("Species"));

        let err = n
            .normalize(&record(json!({
                "HerdNumber": "1", "X": 1, "Y": 2, "HerdSize": 4, "Owner": {"Cvr": "123"}
            })))
            .unwrap_err();
        assert_eq!(err.reason, RejectionReason::ConstraintViolation);
    }

    #[test]
    fn test_geometry_errors() {
        let n = normalizer();
        let err = n
            .normalize(&record(json!({"HerdNumber": "1", "X": "east", "Y": 2, "HerdSize": 1})))
            .unwrap_err();
        assert_eq!(err.reason, RejectionReason::TypeMismatch);

        let err = n
            .normalize(&record(json!({"HerdNumber": "1", "Y": 2, "HerdSize": 1})))
            .unwrap_err();
        assert_eq!(err.reason, RejectionReason::MissingField);

        let mut wkt = mapping();
        wkt.geometry = GeometryMapping::Wkt {
            field: "wkt".to_string(),
        };
        let err = SchemaNormalizer::new(&wkt)
            .unwrap()
            .normalize(&record(json!({"HerdNumber": "1", "wkt": "POINT EMPTY", "HerdSize": 1})))
            .unwrap_err();
        assert_eq!(err.reason, RejectionReason::InvalidGeometry);
    }

    #[test]
    fn test_decode_error_is_type_mismatch() {
        let mut rec = record(json!({"_raw": "{not json"}));
        rec.decode_error = Some("expected value at line 1".to_string());
        let err = normalizer().normalize(&rec).unwrap_err();
        assert_eq!(err.reason, RejectionReason::TypeMismatch);
        assert_eq!(err.field.as_deref(), Some("_raw"));
    }
}
