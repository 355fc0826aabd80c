use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;

use lru::LruCache;
use tokio::sync::mpsc;

use crate::config::{MapConfig, CONTINENTAL_US, FIT_PADDING};
use crate::map::geo::{self, TileId};
use crate::map::map::{Map, MapEvent, MapState};
use crate::map::markers::{IconCategory, MarkerKind, MarkerLayer};
use crate::map::tiles::MapTile;
use crate::maps_api::geo_search::{GeoQuery, GeoSearchClient, GeoSearchError, GeoSearchResponse};
use crate::maps_api::tile_retriever::{FetchError, TileRetriever};

const TILE_CACHE_TILES: usize = 512;
const MAP_WIDGET_ID: &str = "continental_us_map";

/// Completed background fetches, posted back to the UI thread.
enum Fetched {
    Tile(TileId, Result<MapTile, FetchError>),
    Icon(IconCategory, Result<egui::ColorImage, FetchError>),
    Search(u64, Result<GeoSearchResponse, GeoSearchError>),
}

/// Monotonically increasing id for geosearch requests. Responses apply only
/// while their sequence number is the latest issued, so a slow response for a
/// stale viewport can never overwrite a newer one. Requests themselves are
/// never cancelled.
#[derive(Debug, Default)]
pub struct RefreshSequence {
    issued: u64,
}

impl RefreshSequence {
    pub fn begin(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    pub fn is_current(&self, seq: u64) -> bool {
        seq == self.issued
    }
}

/// The map view controller: owns the map state, the persistent marker layer,
/// the filter state, and the fetch pipeline. One geosearch request per
/// viewport or filter change; the response replaces the marker set wholesale.
pub struct MapApp {
    config: MapConfig,
    geo_search: GeoSearchClient,
    tile_retriever: TileRetriever,
    tile_cache: LruCache<TileId, MapTile>,
    pending_tiles: HashSet<TileId>,
    icon_textures: HashMap<IconCategory, egui::TextureHandle>,
    pending_icons: HashSet<IconCategory>,
    markers: MarkerLayer,
    include_credit_unions: bool,
    refresh: RefreshSequence,
    viewport: egui::Vec2,
    fitted: bool,
    receiver: mpsc::UnboundedReceiver<Fetched>,
    sender: mpsc::UnboundedSender<Fetched>,
    runtime: tokio::runtime::Runtime,
}

impl MapApp {
    pub fn new(cc: &eframe::CreationContext<'_>, config: MapConfig) -> Self {
        cc.egui_ctx.set_style(dark_style(&cc.egui_ctx));

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .thread_name("fetch-worker")
            .enable_all()
            .build()
            .expect("Unable to create runtime");
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            geo_search: GeoSearchClient::new(&config.search_url),
            tile_retriever: TileRetriever::new(config.tile_url.clone(), config.access_token.clone()),
            config,
            tile_cache: LruCache::new(NonZeroUsize::new(TILE_CACHE_TILES).unwrap_or(NonZeroUsize::MIN)),
            pending_tiles: HashSet::new(),
            icon_textures: HashMap::new(),
            pending_icons: HashSet::new(),
            markers: MarkerLayer::new(),
            include_credit_unions: true,
            refresh: RefreshSequence::default(),
            viewport: egui::vec2(1024.0, 768.0),
            fitted: false,
            receiver,
            sender,
            runtime,
        }
    }

    fn map_id() -> egui::Id {
        egui::Id::new(MAP_WIDGET_ID)
    }

    /// Issue one geosearch request for the current viewport and filter state.
    fn refresh_markers(&mut self, ctx: &egui::Context) {
        let state = MapState::load(ctx, Self::map_id());
        let query = GeoQuery {
            bounds: geo::visible_bounds(state.center(), state.zoom(), self.viewport),
            zoom: state.zoom().floor().max(0.0) as u32,
            include_credit_unions: self.include_credit_unions,
        };
        let seq = self.refresh.begin();

        let client = self.geo_search.clone();
        let sender = self.sender.clone();
        let requester = ctx.clone();
        self.runtime.spawn(async move {
            let result = client.fetch(&query).await;
            if sender.send(Fetched::Search(seq, result)).is_ok() {
                requester.request_repaint();
            }
        });
    }

    /// Both refresh triggers (viewport move end, filter change) first close
    /// any open popup and collapse fanned-out groups.
    fn viewport_changed(&mut self, ctx: &egui::Context) {
        self.markers.close_popup();
        self.markers.collapse_spiders();
        self.refresh_markers(ctx);
    }

    fn request_tiles(&mut self, ctx: &egui::Context, missing: Vec<TileId>) {
        for id in missing {
            if self.pending_tiles.contains(&id) || self.tile_cache.peek(&id).is_some() {
                continue;
            }
            self.pending_tiles.insert(id);

            let retriever = self.tile_retriever.clone();
            let sender = self.sender.clone();
            let requester = ctx.clone();
            self.runtime.spawn(async move {
                let result = retriever.fetch_tile(id).await;
                if sender.send(Fetched::Tile(id, result)).is_ok() {
                    requester.request_repaint();
                }
            });
        }
    }

    /// Fetch icon assets for every category the current marker set uses.
    fn request_icons(&mut self, ctx: &egui::Context) {
        let needed: Vec<IconCategory> = self
            .markers
            .iter()
            .filter_map(|(_, marker)| match &marker.kind {
                MarkerKind::Icon { category, .. }
                    if !self.icon_textures.contains_key(category)
                        && !self.pending_icons.contains(category) =>
                {
                    Some(*category)
                }
                _ => None,
            })
            .collect();

        for category in needed {
            self.pending_icons.insert(category);

            let url = self.config.icon_url(category.asset_file());
            let retriever = self.tile_retriever.clone();
            let sender = self.sender.clone();
            let requester = ctx.clone();
            self.runtime.spawn(async move {
                let result = retriever.fetch_icon(&url).await;
                if sender.send(Fetched::Icon(category, result)).is_ok() {
                    requester.request_repaint();
                }
            });
        }
    }

    fn drain_fetches(&mut self, ctx: &egui::Context) {
        while let Ok(fetched) = self.receiver.try_recv() {
            match fetched {
                Fetched::Tile(id, Ok(tile)) => {
                    self.tile_cache.put(id, tile);
                    self.pending_tiles.remove(&id);
                }
                Fetched::Tile(id, Err(e)) => {
                    self.pending_tiles.remove(&id);
                    log::warn!("error fetching tile {id:?}: {e}");
                }
                Fetched::Icon(category, Ok(image)) => {
                    let texture = ctx.load_texture(
                        category.asset_file(),
                        image,
                        egui::TextureOptions::LINEAR,
                    );
                    self.icon_textures.insert(category, texture);
                    self.pending_icons.remove(&category);
                }
                Fetched::Icon(category, Err(e)) => {
                    self.pending_icons.remove(&category);
                    log::warn!("error fetching icon {:?}: {e}", category.asset_file());
                }
                Fetched::Search(seq, Ok(response)) => {
                    if self.refresh.is_current(seq) {
                        self.markers.rebuild(response);
                    } else {
                        log::debug!("discarding stale geosearch response {seq}");
                    }
                }
                Fetched::Search(seq, Err(e)) => {
                    // Previous markers stay on screen.
                    log::warn!("geosearch request {seq} failed: {e}");
                }
            }
        }
    }

    fn zoom_controls(&mut self, ctx: &egui::Context) {
        egui::Area::new(Self::map_id().with("zoom_control"))
            .anchor(egui::Align2::RIGHT_TOP, egui::vec2(-12.0, 12.0))
            .show(ctx, |ui| {
                egui::Frame::popup(ui.style()).show(ui, |ui| {
                    ui.vertical(|ui| {
                        if ui.button("+").clicked() {
                            self.nudge_zoom(ctx, 1.0);
                        }
                        if ui.button("−").clicked() {
                            self.nudge_zoom(ctx, -1.0);
                        }
                    });
                });
            });
    }

    fn nudge_zoom(&mut self, ctx: &egui::Context, step: f32) {
        let mut state = MapState::load(ctx, Self::map_id());
        let before = state.zoom();
        state.zoom_by(step);
        let changed = state.zoom() != before;
        state.store(ctx, Self::map_id());
        if changed {
            self.viewport_changed(ctx);
        }
    }

    fn filter_control(&mut self, ctx: &egui::Context) {
        egui::Area::new(Self::map_id().with("cu_control"))
            .anchor(egui::Align2::RIGHT_TOP, egui::vec2(-12.0, 92.0))
            .show(ctx, |ui| {
                egui::Frame::popup(ui.style()).show(ui, |ui| {
                    if ui
                        .checkbox(&mut self.include_credit_unions, "Include credit unions")
                        .changed()
                    {
                        self.viewport_changed(ctx);
                    }
                });
            });
    }

    fn attribution(&self, ctx: &egui::Context) {
        egui::Area::new(Self::map_id().with("attribution"))
            .anchor(egui::Align2::RIGHT_BOTTOM, egui::vec2(-8.0, -8.0))
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.style_mut().override_text_style = Some(egui::TextStyle::Small);
                    ui.hyperlink_to("© Mapbox © OpenStreetMap", "https://www.mapbox.com/about/maps/");
                    ui.hyperlink_to("Improve this map", "https://www.mapbox.com/map-feedback/");
                });
            });
        egui::Area::new(Self::map_id().with("logo"))
            .anchor(egui::Align2::LEFT_BOTTOM, egui::vec2(8.0, -8.0))
            .show(ctx, |ui| {
                ui.hyperlink_to("Mapbox", "https://www.mapbox.com/");
            });
    }
}

impl eframe::App for MapApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // F11 toggles fullscreen
        if let Some(fullscreen) = ctx.input(|i| {
            if i.key_pressed(egui::Key::F11) {
                Some(!i.viewport().fullscreen.unwrap_or(false))
            } else {
                None
            }
        }) {
            ctx.send_viewport_cmd(egui::ViewportCommand::Fullscreen(fullscreen));
        }

        self.drain_fetches(ctx);

        let mut events = Vec::new();
        let mut missing_tiles = Vec::new();

        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| {
                let size = ui.available_size();
                self.viewport = size;

                // Fit the initial viewport before the first paint and kick
                // off the initial marker fetch.
                if !self.fitted {
                    let (center, zoom) = geo::fit_bounds(&CONTINENTAL_US, size, FIT_PADDING);
                    let mut state = MapState::load(ctx, Self::map_id());
                    state.set_view(center, zoom);
                    state.store(ctx, Self::map_id());
                    self.fitted = true;
                    self.refresh_markers(ctx);
                }

                let map = Map::new(
                    MAP_WIDGET_ID,
                    &mut self.tile_cache,
                    &mut missing_tiles,
                    &mut self.markers,
                    &self.icon_textures,
                    &mut events,
                )
                .viewport_size(size)
                .link_base(&self.config.site_url);
                ui.add(map);
            });

        self.request_tiles(ctx, missing_tiles);
        self.request_icons(ctx);

        self.zoom_controls(ctx);
        self.filter_control(ctx);
        self.attribution(ctx);

        for event in events {
            match event {
                MapEvent::MoveEnd => self.viewport_changed(ctx),
            }
        }
    }
}

fn dark_style(ctx: &egui::Context) -> egui::Style {
    let mut style = (*ctx.style()).clone();
    style.visuals = egui::Visuals::dark();
    style.visuals.window_fill = egui::Color32::from_rgb(32, 33, 36);
    style.visuals.panel_fill = egui::Color32::from_rgb(32, 33, 36);
    style.visuals.override_text_color = Some(egui::Color32::LIGHT_GRAY);
    style
}
