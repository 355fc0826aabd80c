use egui::epaint::{Color32, Pos2, Rect, Shape, Stroke};
use egui::{pos2, Response, Sense, Ui, Vec2, Widget};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::map::geo::{self, Coordinate, PixelPoint, TileId, MAX_ZOOM};
use crate::map::markers::{self, ClusterBadge, IconCategory, MarkerId, MarkerKind, MarkerLayer};
use crate::map::tiles::MapTile;

/// Screen-space tolerance for marker clicks.
const CLICK_RADIUS: f32 = 14.0;

const PIN_FILL: Color32 = Color32::from_rgb(42, 129, 203);
const SPIDER_LEG: Color32 = Color32::from_gray(90);

#[derive(Default, Clone, Serialize, Deserialize)]
pub struct MapState {
    center: Coordinate,
    zoom: f32,
    dragging: bool,
    drag_start: Option<Pos2>,
}

impl MapState {
    pub fn load(ctx: &egui::Context, id: egui::Id) -> Self {
        ctx.data_mut(|d| d.get_persisted::<Self>(id).unwrap_or_default())
    }

    pub fn store(self, ctx: &egui::Context, id: egui::Id) {
        ctx.data_mut(|d| d.insert_persisted(id, self));
    }

    pub fn center(&self) -> Coordinate {
        self.center
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn set_view(&mut self, center: Coordinate, zoom: f32) {
        self.center = center;
        self.zoom = zoom.clamp(0.0, MAX_ZOOM);
    }

    pub fn zoom_by(&mut self, delta: f32) {
        self.zoom = (self.zoom + delta).clamp(0.0, MAX_ZOOM);
    }
}

/// Interactions the controller reacts to. `MoveEnd` fires once per completed
/// pan gesture and once per zoom step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapEvent {
    MoveEnd,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ClickAction {
    OpenPopup(MarkerId),
    Spiderfy(usize),
    ZoomToward(Coordinate),
}

/// What clicking a marker does. Markers with popup content open it; anything
/// else (clusters, pins without text) pans and zooms a level toward the
/// marker. Members of a collapsed icon group first fan the group out.
pub(crate) fn click_action(layer: &MarkerLayer, id: MarkerId) -> Option<ClickAction> {
    let marker = layer.get(id)?;
    Some(match &marker.kind {
        MarkerKind::Cluster { .. } => ClickAction::ZoomToward(marker.coord),
        MarkerKind::Pin { popup: Some(_), .. } => ClickAction::OpenPopup(id),
        MarkerKind::Pin { popup: None, .. } => ClickAction::ZoomToward(marker.coord),
        MarkerKind::Icon { group, .. } => {
            if layer.spider(*group).is_some_and(|s| s.is_expanded()) {
                ClickAction::OpenPopup(id)
            } else {
                ClickAction::Spiderfy(*group)
            }
        }
    })
}

pub struct Map<'a> {
    id: egui::Id,
    tile_cache: &'a mut LruCache<TileId, MapTile>,
    missing_tiles: &'a mut Vec<TileId>,
    markers: &'a mut MarkerLayer,
    icon_textures: &'a HashMap<IconCategory, egui::TextureHandle>,
    events: &'a mut Vec<MapEvent>,
    link_base: String,
    viewport_size: Vec2,
}

impl<'a> Map<'a> {
    pub fn new(
        id_source: impl std::hash::Hash,
        tile_cache: &'a mut LruCache<TileId, MapTile>,
        missing_tiles: &'a mut Vec<TileId>,
        markers: &'a mut MarkerLayer,
        icon_textures: &'a HashMap<IconCategory, egui::TextureHandle>,
        events: &'a mut Vec<MapEvent>,
    ) -> Self {
        Self {
            id: egui::Id::new(id_source),
            tile_cache,
            missing_tiles,
            markers,
            icon_textures,
            events,
            link_base: String::new(),
            viewport_size: Vec2::new(1024.0, 1024.0),
        }
    }

    pub fn viewport_size(mut self, size: Vec2) -> Self {
        self.viewport_size = size;
        self
    }

    pub fn link_base(mut self, base: &str) -> Self {
        self.link_base = base.trim_end_matches('/').to_string();
        self
    }
}

impl Widget for Map<'_> {
    fn ui(self, ui: &mut Ui) -> Response {
        let mut state = MapState::load(ui.ctx(), self.id);

        let (rect, response) = ui.allocate_exact_size(self.viewport_size, Sense::click_and_drag());
        let painter = ui.painter().with_clip_rect(rect);
        painter.rect_filled(rect, 0.0, Color32::from_gray(40));

        // Drag pans the center in world pixel space.
        if response.dragged() {
            if !state.dragging {
                state.dragging = true;
                state.drag_start = response.hover_pos();
            }
            if let (Some(current), Some(start)) = (response.hover_pos(), state.drag_start) {
                let delta = current - start;
                if delta != Vec2::ZERO {
                    let center = geo::project(state.center, state.zoom);
                    state.center = geo::unproject(
                        PixelPoint {
                            x: center.x - delta.x as f64,
                            y: center.y - delta.y as f64,
                        },
                        state.zoom,
                    );
                    state.drag_start = Some(current);
                }
            }
        } else if state.dragging {
            state.dragging = false;
            state.drag_start = None;
            self.events.push(MapEvent::MoveEnd);
        }

        // Pinch and scroll zoom, clamped to the tile source's range.
        if response.hovered() {
            let zoom_before = state.zoom;
            let pinch = ui.input(|i| i.zoom_delta()) - 1.0;
            if pinch.abs() > f32::EPSILON {
                state.zoom_by(pinch);
            } else {
                let scroll = ui.input(|i| i.smooth_scroll_delta).y;
                if scroll.abs() > f32::EPSILON {
                    // Normalize scroll using tanh
                    state.zoom_by((scroll / 10.0).tanh());
                }
            }
            if (state.zoom - zoom_before).abs() > f32::EPSILON {
                self.events.push(MapEvent::MoveEnd);
            }
        }

        let center_px = geo::project(state.center, state.zoom);
        let to_screen = |p: PixelPoint| -> Pos2 {
            rect.center() + egui::vec2((p.x - center_px.x) as f32, (p.y - center_px.y) as f32)
        };

        // Base tile layer.
        let z = state.zoom.floor().max(0.0) as u32;
        let bounds = geo::visible_bounds(state.center, state.zoom, rect.size());
        for id in geo::visible_tiles(&bounds, z) {
            let (origin, side) = geo::tile_rect(id, state.zoom);
            let tile_rect = Rect::from_min_size(to_screen(origin), Vec2::splat(side as f32));
            if let Some(tile) = self.tile_cache.get_mut(&id) {
                painter.image(
                    tile.texture(ui.ctx()).id(),
                    tile_rect,
                    Rect::from_min_max(pos2(0.0, 0.0), pos2(1.0, 1.0)),
                    Color32::WHITE,
                );
            } else {
                self.missing_tiles.push(id);
                painter.rect_filled(tile_rect, 0.0, Color32::GRAY);
            }
        }

        // Screen position per marker, spider offsets applied. MarkerIds index
        // this vec because the layer enumerates markers in id order.
        let mut positions: Vec<Pos2> = Vec::with_capacity(self.markers.len());
        for (id, marker) in self.markers.iter() {
            let anchor = to_screen(geo::project(marker.coord, state.zoom));
            let mut pos = anchor;
            if let MarkerKind::Icon { group, .. } = &marker.kind {
                if let Some(offset) = self.markers.spider(*group).and_then(|s| s.offset_of(id)) {
                    pos += offset;
                    painter.line_segment([anchor, pos], Stroke::new(1.0, SPIDER_LEG));
                }
            }
            positions.push(pos);
        }

        for ((_, marker), pos) in self.markers.iter().zip(&positions) {
            match &marker.kind {
                MarkerKind::Pin { .. } => paint_pin(&painter, *pos),
                MarkerKind::Cluster { count } => paint_cluster(&painter, *pos, *count),
                MarkerKind::Icon { category, .. } => {
                    if let Some(texture) = self.icon_textures.get(category) {
                        let size = texture.size_vec2().min(Vec2::splat(32.0));
                        painter.image(
                            texture.id(),
                            Rect::from_center_size(*pos, size),
                            Rect::from_min_max(pos2(0.0, 0.0), pos2(1.0, 1.0)),
                            Color32::WHITE,
                        );
                    } else {
                        painter.circle_filled(*pos, 6.0, PIN_FILL);
                    }
                }
            }
        }

        if response.clicked() {
            if let Some(click) = response.interact_pointer_pos() {
                match self.hit_marker(click, &positions, &state, rect) {
                    Some(id) => match click_action(self.markers, id) {
                        Some(ClickAction::OpenPopup(id)) => self.markers.set_open_popup(id),
                        Some(ClickAction::Spiderfy(group)) => {
                            if let Some(spider) = self.markers.spider_mut(group) {
                                spider.expand();
                            }
                        }
                        Some(ClickAction::ZoomToward(coord)) => {
                            state.set_view(coord, state.zoom + 1.0);
                            self.events.push(MapEvent::MoveEnd);
                        }
                        None => {}
                    },
                    None => self.markers.close_popup(),
                }
            }
        }

        // Open popup, anchored above its marker.
        if let Some(id) = self.markers.open_popup() {
            if let (Some(marker), Some(pos)) = (self.markers.get(id), positions.get(id)) {
                if let Some((org_id, text)) = marker.popup_link() {
                    egui::Area::new(self.id.with("popup"))
                        .order(egui::Order::Foreground)
                        .fixed_pos(*pos - egui::vec2(0.0, 26.0))
                        .pivot(egui::Align2::CENTER_BOTTOM)
                        .show(ui.ctx(), |ui| {
                            egui::Frame::popup(ui.style()).show(ui, |ui| {
                                let href =
                                    format!("{}{}", self.link_base, markers::organization_path(org_id));
                                ui.hyperlink_to(text, href);
                            });
                        });
                }
            }
        }

        state.store(ui.ctx(), self.id);

        response
    }
}

impl Map<'_> {
    /// Nearest marker within the click tolerance. Expanded spider feet are
    /// checked against their fanned screen positions; everything else goes
    /// through the layer's spatial index around the clicked coordinate.
    fn hit_marker(
        &self,
        click: Pos2,
        positions: &[Pos2],
        state: &MapState,
        rect: Rect,
    ) -> Option<MarkerId> {
        let mut best: Option<(MarkerId, f32)> = None;
        let mut consider = |id: MarkerId, pos: Pos2| {
            let distance = pos.distance(click);
            if distance <= CLICK_RADIUS && best.map_or(true, |(_, d)| distance < d) {
                best = Some((id, distance));
            }
        };

        // Fanned-out feet sit away from their coordinate, so the spatial
        // index cannot find them; test their screen positions directly.
        for (id, marker) in self.markers.iter() {
            if let MarkerKind::Icon { group, .. } = &marker.kind {
                if self.markers.spider(*group).is_some_and(|s| s.is_expanded()) {
                    consider(id, positions[id]);
                }
            }
        }

        let center_px = geo::project(state.center(), state.zoom());
        let from_screen = |pos: Pos2| {
            geo::unproject(
                PixelPoint {
                    x: center_px.x + (pos.x - rect.center().x) as f64,
                    y: center_px.y + (pos.y - rect.center().y) as f64,
                },
                state.zoom(),
            )
        };
        let tolerance = egui::vec2(CLICK_RADIUS, CLICK_RADIUS);
        let north_west = from_screen(click - tolerance);
        let south_east = from_screen(click + tolerance);
        let envelope = geo::GeoBounds::new(
            south_east.latitude(),
            north_west.longitude(),
            north_west.latitude(),
            south_east.longitude(),
        );
        for id in self.markers.hit_candidates(&envelope) {
            consider(id, positions[id]);
        }

        best.map(|(id, _)| id)
    }
}

fn paint_pin(painter: &egui::Painter, tip: Pos2) {
    let head = pos2(tip.x, tip.y - 14.0);
    painter.add(Shape::convex_polygon(
        vec![tip, pos2(tip.x - 5.0, tip.y - 10.0), pos2(tip.x + 5.0, tip.y - 10.0)],
        PIN_FILL,
        Stroke::NONE,
    ));
    painter.circle(head, 8.0, PIN_FILL, Stroke::new(1.5, Color32::WHITE));
}

fn paint_cluster(painter: &egui::Painter, center: Pos2, count: u64) {
    let badge = ClusterBadge::for_count(count);
    let fill = badge.fill();
    painter.circle_filled(center, badge.radius() + 5.0, fill.gamma_multiply(0.4));
    painter.circle_filled(center, badge.radius(), fill);
    painter.text(
        center,
        egui::Align2::CENTER_CENTER,
        count.to_string(),
        egui::FontId::proportional(12.0),
        Color32::BLACK,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::geo::Coordinate;
    use crate::maps_api::geo_search::{ClusterPoint, GeoSearchResponse, GroupedPoint, SinglePoint};

    fn layer() -> MarkerLayer {
        let mut layer = MarkerLayer::new();
        layer.rebuild(GeoSearchResponse {
            single_points: vec![
                SinglePoint {
                    coord: Coordinate::new(49.8951, -97.1384),
                    org_id: "42".into(),
                    popup: Some("Acme Co-op".into()),
                },
                SinglePoint {
                    coord: Coordinate::new(48.0, -96.0),
                    org_id: "43".into(),
                    popup: None,
                },
            ],
            clusters: vec![ClusterPoint {
                coord: Coordinate::new(40.0, -90.0),
                count: 7,
            }],
            grouped_points: vec![vec![
                GroupedPoint {
                    coord: Coordinate::new(44.98, -93.27),
                    org_id: "7".into(),
                    popup: "North Credit Union".into(),
                    category: crate::map::markers::IconCategory::Finance,
                },
                GroupedPoint {
                    coord: Coordinate::new(44.98, -93.27),
                    org_id: "8".into(),
                    popup: "North Makers".into(),
                    category: crate::map::markers::IconCategory::Goods,
                },
            ]],
        });
        layer
    }

    #[test]
    fn pin_with_popup_opens_it() {
        let layer = layer();
        assert_eq!(click_action(&layer, 0), Some(ClickAction::OpenPopup(0)));
    }

    #[test]
    fn pin_without_popup_zooms_toward_it() {
        let layer = layer();
        assert_eq!(
            click_action(&layer, 1),
            Some(ClickAction::ZoomToward(Coordinate::new(48.0, -96.0)))
        );
    }

    #[test]
    fn cluster_zooms_toward_its_coordinate() {
        let layer = layer();
        assert_eq!(
            click_action(&layer, 2),
            Some(ClickAction::ZoomToward(Coordinate::new(40.0, -90.0)))
        );
    }

    #[test]
    fn grouped_member_spiderfies_then_opens() {
        let mut layer = layer();
        assert_eq!(click_action(&layer, 3), Some(ClickAction::Spiderfy(0)));

        layer.spider_mut(0).unwrap().expand();
        assert_eq!(click_action(&layer, 3), Some(ClickAction::OpenPopup(3)));
        assert_eq!(click_action(&layer, 4), Some(ClickAction::OpenPopup(4)));
    }

    #[test]
    fn click_action_on_unknown_marker_is_none() {
        let layer = layer();
        assert_eq!(click_action(&layer, 99), None);
    }

    #[test]
    fn map_state_clamps_zoom() {
        let mut state = MapState::default();
        state.zoom_by(25.0);
        assert_eq!(state.zoom(), MAX_ZOOM);
        state.zoom_by(-30.0);
        assert_eq!(state.zoom(), 0.0);

        state.set_view(Coordinate::new(39.0, -95.0), 4.5);
        assert_eq!(state.center(), Coordinate::new(39.0, -95.0));
        assert_eq!(state.zoom(), 4.5);
    }
}
