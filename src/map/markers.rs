use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::map::geo::{Coordinate, GeoBounds};
use crate::map::spider::Spiderfier;
use crate::maps_api::geo_search::GeoSearchResponse;

pub type MarkerId = usize;

/// Closed set of organization categories, mapped by wire index to fixed icon
/// assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IconCategory {
    Finance,
    Food,
    Goods,
    Governance,
    Housing,
    Learning,
    Education,
}

impl IconCategory {
    pub const ALL: [IconCategory; 7] = [
        IconCategory::Finance,
        IconCategory::Food,
        IconCategory::Goods,
        IconCategory::Governance,
        IconCategory::Housing,
        IconCategory::Learning,
        IconCategory::Education,
    ];

    pub fn from_group_id(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn asset_file(self) -> &'static str {
        match self {
            IconCategory::Finance => "finance-small.png",
            IconCategory::Food => "food-small.png",
            IconCategory::Goods => "goods-small.png",
            IconCategory::Governance => "governance-small.png",
            IconCategory::Housing => "housing-small.png",
            IconCategory::Learning => "learn-small.png",
            IconCategory::Education => "education-small.png",
        }
    }
}

/// Cluster badge tiers, by aggregate count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterBadge {
    Small,
    Medium,
    Large,
}

impl ClusterBadge {
    pub fn for_count(count: u64) -> Self {
        if count < 10 {
            ClusterBadge::Small
        } else if count < 100 {
            ClusterBadge::Medium
        } else {
            ClusterBadge::Large
        }
    }

    pub fn radius(self) -> f32 {
        match self {
            ClusterBadge::Small => 14.0,
            ClusterBadge::Medium => 17.0,
            ClusterBadge::Large => 20.0,
        }
    }

    pub fn fill(self) -> egui::Color32 {
        match self {
            ClusterBadge::Small => egui::Color32::from_rgb(110, 204, 57),
            ClusterBadge::Medium => egui::Color32::from_rgb(240, 194, 12),
            ClusterBadge::Large => egui::Color32::from_rgb(241, 128, 23),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkerKind {
    /// Default pin for one organization.
    Pin { org_id: String, popup: Option<String> },
    /// Aggregate of several organizations collapsed at the current zoom.
    Cluster { count: u64 },
    /// One member of a coordinate-sharing icon group.
    Icon {
        org_id: String,
        popup: String,
        category: IconCategory,
        group: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub coord: Coordinate,
    pub kind: MarkerKind,
}

/// Relative path of an organization's detail page, as linked from popups.
pub fn organization_path(org_id: &str) -> String {
    format!("/organizations/{org_id}/")
}

impl Marker {
    /// Org id and display text of this marker's popup. Clusters never carry
    /// popups, and neither do pins whose feature had no popup text.
    pub fn popup_link(&self) -> Option<(&str, &str)> {
        match &self.kind {
            MarkerKind::Pin { org_id, popup } => popup.as_ref().map(|text| (org_id.as_str(), text.as_str())),
            MarkerKind::Cluster { .. } => None,
            MarkerKind::Icon { org_id, popup, .. } => Some((org_id.as_str(), popup.as_str())),
        }
    }
}

struct IndexEntry {
    id: MarkerId,
    position: [f64; 2],
}

impl RTreeObject for IndexEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

impl PointDistance for IndexEntry {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.position[0] - point[0];
        let dy = self.position[1] - point[1];
        dx * dx + dy * dy
    }
}

/// The persistent marker layer. Rebuilt wholesale from every accepted
/// geosearch response; owns the spiderfiers for grouped points and a spatial
/// index for click hit-testing.
#[derive(Default)]
pub struct MarkerLayer {
    markers: Vec<Marker>,
    spiders: Vec<Spiderfier>,
    index: RTree<IndexEntry>,
    open_popup: Option<MarkerId>,
}

impl MarkerLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard all current markers and rebuild from a response.
    pub fn rebuild(&mut self, response: GeoSearchResponse) {
        self.clear();

        for point in response.single_points {
            self.markers.push(Marker {
                coord: point.coord,
                kind: MarkerKind::Pin {
                    org_id: point.org_id,
                    popup: point.popup,
                },
            });
        }

        for cluster in response.clusters {
            self.markers.push(Marker {
                coord: cluster.coord,
                kind: MarkerKind::Cluster { count: cluster.count },
            });
        }

        for group in response.grouped_points {
            let group_index = self.spiders.len();
            let mut spider = Spiderfier::new();
            for member in group {
                let id = self.markers.len();
                self.markers.push(Marker {
                    coord: member.coord,
                    kind: MarkerKind::Icon {
                        org_id: member.org_id,
                        popup: member.popup,
                        category: member.category,
                        group: group_index,
                    },
                });
                spider.register(id);
            }
            self.spiders.push(spider);
        }

        self.index = RTree::bulk_load(
            self.markers
                .iter()
                .enumerate()
                .map(|(id, marker)| IndexEntry {
                    id,
                    position: [marker.coord.longitude(), marker.coord.latitude()],
                })
                .collect(),
        );
    }

    pub fn clear(&mut self) {
        self.markers.clear();
        self.spiders.clear();
        self.index = RTree::new();
        self.open_popup = None;
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn get(&self, id: MarkerId) -> Option<&Marker> {
        self.markers.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (MarkerId, &Marker)> {
        self.markers.iter().enumerate()
    }

    pub fn spider(&self, group: usize) -> Option<&Spiderfier> {
        self.spiders.get(group)
    }

    pub fn spider_mut(&mut self, group: usize) -> Option<&mut Spiderfier> {
        self.spiders.get_mut(group)
    }

    pub fn collapse_spiders(&mut self) {
        for spider in &mut self.spiders {
            spider.collapse();
        }
    }

    /// Markers whose coordinate falls inside a geographic search envelope.
    pub fn hit_candidates(&self, envelope: &GeoBounds) -> Vec<MarkerId> {
        let aabb = AABB::from_corners(
            [envelope.west(), envelope.south()],
            [envelope.east(), envelope.north()],
        );
        self.index.locate_in_envelope(&aabb).map(|e| e.id).collect()
    }

    pub fn open_popup(&self) -> Option<MarkerId> {
        self.open_popup
    }

    pub fn set_open_popup(&mut self, id: MarkerId) {
        self.open_popup = Some(id);
    }

    pub fn close_popup(&mut self) {
        self.open_popup = None;
    }
}
