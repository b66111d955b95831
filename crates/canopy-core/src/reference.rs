//! Trusted reference trees: registered locations with species labels.

use std::fs;
use std::path::Path;

use geo::Point;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::RunContext;
use crate::error::InputError;
use crate::extent::PointCloudExtent;
use crate::geojson::{FeatureCollection, Geometry};

/// One reference tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencePoint {
    pub id: i64,
    /// None when the registry leaves the species open.
    pub species: Option<String>,
    pub location: Point<f64>,
}

impl ReferencePoint {
    pub fn new(id: i64, species: Option<&str>, x: f64, y: f64) -> Self {
        Self { id, species: species.map(str::to_owned), location: Point::new(x, y) }
    }
}

/// Reference trees of one registry file together with its declared CRS.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceLayer {
    pub points: Vec<ReferencePoint>,
    /// The collection's `crs` member, copied onto footprint exports.
    pub crs: Option<Value>,
}

/// Which GeoJSON properties carry the id and the species label.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceFields {
    pub id_field: String,
    pub species_field: String,
    /// Label values that mean "species unknown", e.g. "Nader te bepalen".
    pub unknown_labels: Vec<String>,
}

impl Default for ReferenceFields {
    fn default() -> Self {
        Self {
            id_field: "OBJECTID".into(),
            species_field: "BOOMSORTIMENT".into(),
            unknown_labels: Vec::new(),
        }
    }
}

/// Load every point feature of a GeoJSON FeatureCollection.
///
/// Any non-point geometry or a feature without an integer id is an input error.
pub fn load_reference_points(path: &Path, fields: &ReferenceFields) -> Result<ReferenceLayer, InputError> {
    let text = fs::read_to_string(path)
        .map_err(|source| InputError::Io { path: path.to_path_buf(), source })?;
    let mut fc: FeatureCollection<Value> = serde_json::from_str(&text)
        .map_err(|source| InputError::Json { path: path.to_path_buf(), source })?;
    let crs = fc.crs.take();
    let points = parse_reference_features(path, fc, fields)?;
    Ok(ReferenceLayer { points, crs })
}

fn parse_reference_features(
    path: &Path,
    fc: FeatureCollection<Value>,
    fields: &ReferenceFields,
) -> Result<Vec<ReferencePoint>, InputError> {
    let mut out = Vec::with_capacity(fc.features.len());
    for (index, feature) in fc.features.into_iter().enumerate() {
        let (x, y) = match feature.geometry {
            Some(Geometry::Point { ref coordinates }) if coordinates.len() >= 2 => {
                (coordinates[0], coordinates[1])
            }
            other => {
                return Err(InputError::GeometryType {
                    path: path.to_path_buf(),
                    index,
                    expected: "Point",
                    found: other.map_or("null", |g| g.type_name()).to_string(),
                })
            }
        };

        let props = feature.properties.as_object();
        let id = props
            .and_then(|p| p.get(&fields.id_field))
            .and_then(value_as_id)
            .ok_or_else(|| InputError::MissingProperty {
                path: path.to_path_buf(),
                index,
                field: fields.id_field.clone(),
            })?;
        let species = props
            .and_then(|p| p.get(&fields.species_field))
            .and_then(value_as_label)
            .filter(|s| !fields.unknown_labels.iter().any(|u| u == s));

        out.push(ReferencePoint { id, species, location: Point::new(x, y) });
    }
    Ok(out)
}

fn value_as_id(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64().filter(|f| f.fract() == 0.0 && f.is_finite()).map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_label(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Keep only references inside the point-cloud extent; the rest can never match
/// and would inflate every percentage metric.
pub fn clip_to_extent(
    points: Vec<ReferencePoint>,
    extent: &PointCloudExtent,
    ctx: &RunContext,
) -> Vec<ReferencePoint> {
    let before = points.len();
    let kept: Vec<ReferencePoint> = points
        .into_iter()
        .filter(|p| extent.contains(p.location.x(), p.location.y()))
        .collect();
    tracing::info!(
        parent: ctx.span(),
        loaded = before,
        inside_extent = kept.len(),
        "reference points clipped to point-cloud extent"
    );
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "type": "FeatureCollection",
        "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::28992"}},
        "features": [
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [10.0, 20.0]},
             "properties": {"OBJECTID": 1, "BOOMSORTIMENT": "Quercus robur"}},
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [11.0, 21.0, 0.0]},
             "properties": {"OBJECTID": "2", "BOOMSORTIMENT": "Nader te bepalen"}},
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [50.0, 50.0]},
             "properties": {"OBJECTID": 3.0, "BOOMSORTIMENT": null}}
        ]
    }"#;

    fn write(text: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(text.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_ids_labels_and_unknowns() {
        let f = write(SAMPLE);
        let fields = ReferenceFields {
            unknown_labels: vec!["Nader te bepalen".into()],
            ..Default::default()
        };
        let layer = load_reference_points(f.path(), &fields).unwrap();
        let crs_name = layer.crs.as_ref().and_then(|c| c.pointer("/properties/name")).and_then(Value::as_str);
        assert_eq!(crs_name, Some("urn:ogc:def:crs:EPSG::28992"));
        let pts = layer.points;
        assert_eq!(pts.len(), 3);
        assert_eq!(pts[0], ReferencePoint::new(1, Some("Quercus robur"), 10.0, 20.0));
        assert_eq!(pts[1].id, 2);
        assert_eq!(pts[1].species, None);
        assert_eq!(pts[2].id, 3);
        assert_eq!(pts[2].species, None);
    }

    #[test]
    fn custom_field_names() {
        let text = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [0, 0]},
             "properties": {"tree": 77, "soort": "Tilia"}}]}"#;
        let f = write(text);
        let fields = ReferenceFields {
            id_field: "tree".into(),
            species_field: "soort".into(),
            unknown_labels: vec![],
        };
        let layer = load_reference_points(f.path(), &fields).unwrap();
        assert_eq!(layer.points, vec![ReferencePoint::new(77, Some("Tilia"), 0.0, 0.0)]);
        assert_eq!(layer.crs, None);
    }

    #[test]
    fn rejects_non_point_geometry_and_missing_ids() {
        let poly = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]},
             "properties": {"OBJECTID": 1}}]}"#;
        let f = write(poly);
        assert!(matches!(
            load_reference_points(f.path(), &ReferenceFields::default()),
            Err(InputError::GeometryType { index: 0, .. })
        ));

        let no_id = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [0, 0]}, "properties": null}]}"#;
        let f = write(no_id);
        assert!(matches!(
            load_reference_points(f.path(), &ReferenceFields::default()),
            Err(InputError::MissingProperty { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_input_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_reference_points(&dir.path().join("none.geojson"), &ReferenceFields::default()),
            Err(InputError::Io { .. })
        ));
    }

    #[test]
    fn clip_keeps_points_inside_extent() {
        let pts = vec![
            ReferencePoint::new(1, None, 0.0, 0.0),
            ReferencePoint::new(2, None, 5.0, 5.0),
            ReferencePoint::new(3, None, 10.0, 10.0),
            ReferencePoint::new(4, None, 10.1, 3.0),
        ];
        let ext = PointCloudExtent::new(0.0, 10.0, 0.0, 10.0, 100);
        let kept = clip_to_extent(pts, &ext, &RunContext::default());
        let ids: Vec<i64> = kept.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
