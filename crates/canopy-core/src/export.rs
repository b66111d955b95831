//! Footprint export: labelled polygons as GeoJSON, and reading them back.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use geo::{Coord, LineString, Polygon};
use serde::Serialize;
use serde_json::Value;

use crate::classify::{Bucket, Classification};
use crate::error::InputError;
use crate::footprint::{Degenerate, Footprint, FootprintSet};
use crate::geojson::{Feature, FeatureCollection, Geometry};
use crate::matching::MatchSet;

/// Properties written on every exported footprint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FootprintProperties {
    pub cluster_id: i64,
    pub bucket: Bucket,
    /// Two or more contained references.
    pub multi: bool,
    /// Contains a reference that another footprint also contains.
    pub shared: bool,
    pub point_count: usize,
}

pub fn polygon_to_geometry(polygon: &Polygon<f64>) -> Geometry {
    let ring = |ls: &LineString<f64>| ls.coords().map(|c| vec![c.x, c.y]).collect::<Vec<_>>();
    let mut rings = vec![ring(polygon.exterior())];
    rings.extend(polygon.interiors().iter().map(ring));
    Geometry::Polygon { coordinates: rings }
}

fn rings_to_polygon(rings: &[Vec<Vec<f64>>]) -> Option<Polygon<f64>> {
    let ring = |r: &Vec<Vec<f64>>| -> Option<LineString<f64>> {
        r.iter()
            .map(|c| (c.len() >= 2).then(|| Coord { x: c[0], y: c[1] }))
            .collect::<Option<Vec<_>>>()
            .map(LineString::from)
    };
    let (exterior, holes) = rings.split_first()?;
    let interiors = holes.iter().map(ring).collect::<Option<Vec<_>>>()?;
    Some(Polygon::new(ring(exterior)?, interiors))
}

/// Build the labelled feature collection for one classified footprint set.
pub fn labelled_features(
    footprints: &[Footprint],
    classes: &Classification,
    matches: &MatchSet,
    crs: Option<Value>,
) -> FeatureCollection<FootprintProperties> {
    let features = footprints
        .iter()
        .enumerate()
        .map(|(i, fp)| {
            let bucket = classes.bucket_of(i);
            Feature::new(
                polygon_to_geometry(&fp.polygon),
                FootprintProperties {
                    cluster_id: fp.cluster_id,
                    bucket,
                    multi: bucket.is_multi(),
                    shared: matches.is_shared(i),
                    point_count: fp.point_count,
                },
            )
        })
        .collect();
    FeatureCollection::new(features, crs)
}

/// Write a labelled export, replacing any file at `path`.
pub fn write_footprints(path: &Path, collection: &FeatureCollection<FootprintProperties>) -> io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let mut w = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut w, collection)?;
    w.flush()
}

/// Read footprints from a polygon GeoJSON.
///
/// `cluster_id` and `point_count` are taken from the properties when present; a
/// feature without `cluster_id` gets its feature index. Polygons with no area are
/// reported in `dropped` like degenerate clusters.
pub fn read_footprints(path: &Path) -> Result<FootprintSet, InputError> {
    let text = fs::read_to_string(path).map_err(|source| InputError::Io { path: path.to_path_buf(), source })?;
    let fc: FeatureCollection<Value> =
        serde_json::from_str(&text).map_err(|source| InputError::Json { path: path.to_path_buf(), source })?;

    let mut set = FootprintSet::default();
    for (index, feature) in fc.features.into_iter().enumerate() {
        let polygon = match &feature.geometry {
            Some(Geometry::Polygon { coordinates }) => rings_to_polygon(coordinates),
            _ => None,
        };
        let Some(polygon) = polygon else {
            return Err(InputError::GeometryType {
                path: path.to_path_buf(),
                index,
                expected: "Polygon",
                found: feature.geometry.as_ref().map_or("null", Geometry::type_name).to_string(),
            });
        };

        let props = &feature.properties;
        let cluster_id = props.get("cluster_id").and_then(Value::as_i64).unwrap_or(index as i64);
        let point_count = props
            .get("point_count")
            .and_then(Value::as_u64)
            .map_or(0, |n| n as usize);

        match Footprint::from_polygon(cluster_id, polygon, point_count) {
            Some(fp) => set.footprints.push(fp),
            None => set.dropped.push(Degenerate::Collinear { cluster_id, point_count }),
        }
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::cluster::Cluster;
    use crate::context::RunContext;
    use crate::footprint::build_footprint;
    use crate::matching::{match_references, ContainmentPolicy};
    use crate::reference::ReferencePoint;

    fn hull(id: i64, xy: &[(f64, f64)]) -> Footprint {
        build_footprint(&Cluster::new(id, xy.iter().map(|&(x, y)| [x, y, 1.0]).collect()), 3).unwrap()
    }

    #[test]
    fn export_then_read_reproduces_buckets() {
        let fps = vec![
            hull(3, &[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (2.0, 2.0)]),
            hull(8, &[(3.0, 3.0), (6.0, 3.0), (6.0, 6.0)]),
            hull(11, &[(10.0, 10.0), (11.0, 10.0), (10.5, 11.3)]),
        ];
        let refs = vec![
            ReferencePoint::new(1, Some("Acer"), 1.0, 1.0),
            ReferencePoint::new(2, Some("Acer"), 3.5, 3.2),
            ReferencePoint::new(3, Some("Tilia"), 2.0, 3.0),
        ];
        let ctx = RunContext::default();
        let m = match_references(&fps, &refs, ContainmentPolicy::Inclusive, &ctx);
        let c = classify(&m.per_footprint);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("hulls.geojson");
        write_footprints(&path, &labelled_features(&fps, &c, &m, None)).unwrap();

        let back = read_footprints(&path).unwrap();
        assert!(back.dropped.is_empty());
        let ids: Vec<i64> = back.footprints.iter().map(|f| f.cluster_id).collect();
        assert_eq!(ids, vec![3, 8, 11]);
        assert_eq!(back.footprints[0].point_count, 5);

        let m2 = match_references(&back.footprints, &refs, ContainmentPolicy::Inclusive, &ctx);
        assert_eq!(classify(&m2.per_footprint), c);
    }

    #[test]
    fn labels_carry_bucket_multi_and_shared() {
        let fps = vec![
            hull(1, &[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)]),
            hull(2, &[(3.0, 3.0), (6.0, 3.0), (6.0, 6.0), (3.0, 6.0)]),
        ];
        let refs = vec![ReferencePoint::new(1, None, 1.0, 1.0), ReferencePoint::new(2, None, 3.5, 3.5)];
        let ctx = RunContext::default();
        let m = match_references(&fps, &refs, ContainmentPolicy::Inclusive, &ctx);
        let c = classify(&m.per_footprint);
        let fc = labelled_features(&fps, &c, &m, None);

        let p0 = &fc.features[0].properties;
        assert_eq!((p0.bucket, p0.multi, p0.shared), (Bucket::H2, true, true));
        let p1 = &fc.features[1].properties;
        assert_eq!((p1.bucket, p1.multi, p1.shared), (Bucket::H1, false, true));

        let json = serde_json::to_value(&fc).unwrap();
        assert_eq!(json["type"], "FeatureCollection");
        assert_eq!(json["features"][0]["properties"]["bucket"], "H2");
        assert_eq!(json["features"][0]["geometry"]["type"], "Polygon");
    }

    #[test]
    fn reading_assigns_index_ids_and_rejects_points() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.geojson");
        fs::write(
            &path,
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {}, "geometry": {"type": "Polygon",
                 "coordinates": [[[0,0],[2,0],[2,2],[0,2],[0,0]]]}},
                {"type": "Feature", "properties": {"cluster_id": 5}, "geometry": {"type": "Polygon",
                 "coordinates": [[[0,0],[1,1],[2,2],[0,0]]]}}
            ]}"#,
        )
        .unwrap();
        let set = read_footprints(&path).unwrap();
        assert_eq!(set.footprints.len(), 1);
        assert_eq!(set.footprints[0].cluster_id, 0);
        assert_eq!(set.dropped, vec![Degenerate::Collinear { cluster_id: 5, point_count: 0 }]);

        fs::write(
            &path,
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [0, 0]}}]}"#,
        )
        .unwrap();
        assert!(matches!(read_footprints(&path), Err(InputError::GeometryType { .. })));
    }
}
