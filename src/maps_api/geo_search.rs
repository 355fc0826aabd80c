use serde::Deserialize;
use thiserror::Error;

use crate::map::geo::{Coordinate, GeoBounds};
use crate::map::markers::IconCategory;

/// Organization type excluded from results while the filter checkbox is
/// unchecked. The server matches on the literal type name.
pub const CREDIT_UNION_TYPE: &str = "Credit Unions";

#[derive(Debug, Error)]
pub enum GeoSearchError {
    #[error("geosearch request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("geosearch returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("malformed geosearch response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("feature is missing property {0}")]
    MissingProperty(&'static str),
    #[error("feature geometry is not a point")]
    NotAPoint,
    #[error("unknown icon group id {0}")]
    UnknownIconGroup(u32),
}

/// One viewport-scoped search request. Built from the current map bounds,
/// zoom, and filter state; read-only once issued.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoQuery {
    pub bounds: GeoBounds,
    pub zoom: u32,
    pub include_credit_unions: bool,
}

impl GeoQuery {
    /// Query parameters for the geosearch GET. The exclusion parameter is
    /// present only while the filter is unchecked.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let b = &self.bounds;
        let mut params = vec![
            ("bounds", format!("{},{},{},{}", b.south(), b.west(), b.north(), b.east())),
            ("zoom", self.zoom.to_string()),
        ];
        if !self.include_credit_unions {
            params.push(("ignore_types", CREDIT_UNION_TYPE.to_string()));
        }
        params
    }
}

/// A lone organization at its own coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct SinglePoint {
    pub coord: Coordinate,
    pub org_id: String,
    pub popup: Option<String>,
}

/// Several organizations collapsed into one marker at the current zoom.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterPoint {
    pub coord: Coordinate,
    pub count: u64,
}

/// One member of a coordinate-sharing icon group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedPoint {
    pub coord: Coordinate,
    pub org_id: String,
    pub popup: String,
    pub category: IconCategory,
}

/// The three point categories of one geosearch response, decoded into tagged
/// variants at the boundary. Nothing downstream touches loose JSON.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoSearchResponse {
    pub single_points: Vec<SinglePoint>,
    pub clusters: Vec<ClusterPoint>,
    pub grouped_points: Vec<Vec<GroupedPoint>>,
}

// Wire shapes: geoJSON-like feature collections keyed by category.

#[derive(Deserialize)]
struct RawResponse {
    clusters: RawCollection,
    single_points: RawCollection,
    grouped_points: Vec<RawCollection>,
}

#[derive(Deserialize, Default)]
struct RawCollection {
    #[serde(default)]
    features: Vec<RawFeature>,
}

#[derive(Deserialize)]
struct RawFeature {
    geometry: RawGeometry,
    #[serde(default)]
    properties: RawProperties,
}

#[derive(Deserialize)]
struct RawGeometry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: Vec<f64>,
}

#[derive(Deserialize, Default)]
struct RawProperties {
    #[serde(rename = "popupContent")]
    popup_content: Option<String>,
    #[serde(rename = "clusterCount")]
    cluster_count: Option<u64>,
    org_id: Option<OrgId>,
    icon_group_id: Option<u32>,
}

/// The server has historically emitted org ids both as strings and as bare
/// numbers; accept either.
#[derive(Deserialize)]
#[serde(untagged)]
enum OrgId {
    Text(String),
    Number(u64),
}

impl OrgId {
    fn into_string(self) -> String {
        match self {
            OrgId::Text(text) => text,
            OrgId::Number(n) => n.to_string(),
        }
    }
}

impl RawFeature {
    fn coord(&self) -> Result<Coordinate, GeoSearchError> {
        if self.geometry.kind != "Point" || self.geometry.coordinates.len() < 2 {
            return Err(GeoSearchError::NotAPoint);
        }
        // geoJSON order is longitude first.
        Ok(Coordinate::new(self.geometry.coordinates[1], self.geometry.coordinates[0]))
    }

    fn org_id(self) -> Result<(String, Option<String>), GeoSearchError> {
        let org_id = self
            .properties
            .org_id
            .ok_or(GeoSearchError::MissingProperty("org_id"))?
            .into_string();
        Ok((org_id, self.properties.popup_content))
    }
}

fn decode_single(feature: RawFeature) -> Result<SinglePoint, GeoSearchError> {
    let coord = feature.coord()?;
    let (org_id, popup) = feature.org_id()?;
    Ok(SinglePoint { coord, org_id, popup })
}

fn decode_cluster(feature: RawFeature) -> Result<ClusterPoint, GeoSearchError> {
    let coord = feature.coord()?;
    let count = feature
        .properties
        .cluster_count
        .ok_or(GeoSearchError::MissingProperty("clusterCount"))?;
    Ok(ClusterPoint { coord, count })
}

fn decode_grouped(feature: RawFeature) -> Result<GroupedPoint, GeoSearchError> {
    let coord = feature.coord()?;
    let group_id = feature
        .properties
        .icon_group_id
        .ok_or(GeoSearchError::MissingProperty("icon_group_id"))?;
    let category =
        IconCategory::from_group_id(group_id).ok_or(GeoSearchError::UnknownIconGroup(group_id))?;
    let (org_id, popup) = feature.org_id()?;
    let popup = popup.ok_or(GeoSearchError::MissingProperty("popupContent"))?;
    Ok(GroupedPoint { coord, org_id, popup, category })
}

/// Decode a geosearch response body into the tagged model.
pub fn decode_response(body: &str) -> Result<GeoSearchResponse, GeoSearchError> {
    let raw: RawResponse = serde_json::from_str(body)?;

    Ok(GeoSearchResponse {
        single_points: raw
            .single_points
            .features
            .into_iter()
            .map(decode_single)
            .collect::<Result<_, _>>()?,
        clusters: raw
            .clusters
            .features
            .into_iter()
            .map(decode_cluster)
            .collect::<Result<_, _>>()?,
        grouped_points: raw
            .grouped_points
            .into_iter()
            .map(|collection| {
                collection
                    .features
                    .into_iter()
                    .map(decode_grouped)
                    .collect::<Result<_, _>>()
            })
            .collect::<Result<_, _>>()?,
    })
}

/// Issues viewport-scoped searches against the geosearch endpoint.
#[derive(Debug, Clone)]
pub struct GeoSearchClient {
    client: reqwest::Client,
    endpoint: String,
}

impl GeoSearchClient {
    pub fn new(search_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/geosearch", search_url.trim_end_matches('/')),
        }
    }

    pub async fn fetch(&self, query: &GeoQuery) -> Result<GeoSearchResponse, GeoSearchError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&query.params())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GeoSearchError::Status(response.status()));
        }
        let body = response.text().await?;
        decode_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn us_query(include_credit_unions: bool) -> GeoQuery {
        GeoQuery {
            bounds: GeoBounds::new(24.446667, -124.785, 49.384472, -66.947028),
            zoom: 4,
            include_credit_unions,
        }
    }

    #[test]
    fn params_carry_bounds_and_zoom() {
        let params = us_query(true).params();
        assert_eq!(
            params,
            vec![
                ("bounds", "24.446667,-124.785,49.384472,-66.947028".to_string()),
                ("zoom", "4".to_string()),
            ]
        );
    }

    #[test]
    fn filter_toggles_only_the_exclusion_param() {
        let included = us_query(true).params();
        let excluded = us_query(false).params();
        assert_eq!(&excluded[..2], &included[..]);
        assert_eq!(
            excluded.last(),
            Some(&("ignore_types", "Credit Unions".to_string()))
        );
    }

    const SAMPLE: &str = r#"{
        "clusters": {"type": "FeatureCollection", "features": [
            {"type": "Feature",
             "geometry": {"type": "Point", "coordinates": [-90.0, 40.0]},
             "properties": {"clusterCount": 7}}
        ]},
        "single_points": {"type": "FeatureCollection", "features": [
            {"type": "Feature",
             "geometry": {"type": "Point", "coordinates": [-97.1384, 49.8951]},
             "properties": {"org_id": 42, "popupContent": "Acme Co-op"}}
        ]},
        "grouped_points": [
            {"type": "FeatureCollection", "features": [
                {"type": "Feature",
                 "geometry": {"type": "Point", "coordinates": [-93.27, 44.98]},
                 "properties": {"org_id": "7", "popupContent": "North Credit Union",
                                "icon_group_id": 0}},
                {"type": "Feature",
                 "geometry": {"type": "Point", "coordinates": [-93.27, 44.98]},
                 "properties": {"org_id": "8", "popupContent": "North Makers",
                                "icon_group_id": 2}}
            ]}
        ]
    }"#;

    #[test]
    fn decodes_all_three_categories() {
        let response = decode_response(SAMPLE).unwrap();

        assert_eq!(response.clusters.len(), 1);
        assert_eq!(response.clusters[0].count, 7);
        assert_eq!(response.clusters[0].coord, Coordinate::new(40.0, -90.0));

        assert_eq!(response.single_points.len(), 1);
        let single = &response.single_points[0];
        assert_eq!(single.org_id, "42");
        assert_eq!(single.popup.as_deref(), Some("Acme Co-op"));

        assert_eq!(response.grouped_points.len(), 1);
        let group = &response.grouped_points[0];
        assert_eq!(group[0].category, IconCategory::Finance);
        assert_eq!(group[1].category, IconCategory::Goods);
    }

    #[test]
    fn popup_text_is_optional_for_single_points() {
        let body = r#"{
            "clusters": {"features": []},
            "single_points": {"features": [
                {"geometry": {"type": "Point", "coordinates": [-97.0, 49.0]},
                 "properties": {"org_id": "5"}}
            ]},
            "grouped_points": []
        }"#;
        let response = decode_response(body).unwrap();
        assert_eq!(response.single_points[0].popup, None);
    }

    #[test]
    fn missing_cluster_count_is_an_error() {
        let body = r#"{
            "clusters": {"features": [
                {"geometry": {"type": "Point", "coordinates": [-90.0, 40.0]},
                 "properties": {}}
            ]},
            "single_points": {"features": []},
            "grouped_points": []
        }"#;
        assert!(matches!(
            decode_response(body),
            Err(GeoSearchError::MissingProperty("clusterCount"))
        ));
    }

    #[test]
    fn unknown_icon_group_is_an_error() {
        let body = r#"{
            "clusters": {"features": []},
            "single_points": {"features": []},
            "grouped_points": [{"features": [
                {"geometry": {"type": "Point", "coordinates": [-93.0, 44.0]},
                 "properties": {"org_id": "1", "popupContent": "X", "icon_group_id": 12}}
            ]}]
        }"#;
        assert!(matches!(
            decode_response(body),
            Err(GeoSearchError::UnknownIconGroup(12))
        ));
    }

    #[test]
    fn non_point_geometry_is_an_error() {
        let body = r#"{
            "clusters": {"features": []},
            "single_points": {"features": [
                {"geometry": {"type": "LineString",
                              "coordinates": [-97.0, 49.0]},
                 "properties": {"org_id": "5"}}
            ]},
            "grouped_points": []
        }"#;
        assert!(matches!(decode_response(body), Err(GeoSearchError::NotAPoint)));
    }

    #[test]
    fn missing_top_level_keys_are_an_error() {
        assert!(matches!(
            decode_response(r#"{"clusters": {"features": []}}"#),
            Err(GeoSearchError::Json(_))
        ));
    }
}
