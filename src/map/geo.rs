use serde::{Deserialize, Serialize};

/// Side length of one map tile in screen pixels (Mapbox `@2x` raster tiles).
pub const TILE_SIZE: f64 = 512.0;

/// Deepest zoom level the tile source serves.
pub const MAX_ZOOM: f32 = 18.0;

/// `(zoom, x, y)` address of a raster tile.
pub type TileId = (u32, u32, u32);

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Geographic bounding box in degrees, south/west inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    south: f64,
    west: f64,
    north: f64,
    east: f64,
}

impl GeoBounds {
    pub const fn new(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self { south, west, north, east }
    }

    pub fn south(&self) -> f64 {
        self.south
    }

    pub fn west(&self) -> f64 {
        self.west
    }

    pub fn north(&self) -> f64 {
        self.north
    }

    pub fn east(&self) -> f64 {
        self.east
    }
}

/// A position in the world pixel plane of the Web Mercator projection at some
/// fractional zoom level. The plane is `TILE_SIZE * 2^zoom` pixels square with
/// the origin at the north-west corner.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

fn world_size(zoom: f32) -> f64 {
    TILE_SIZE * 2.0_f64.powf(zoom as f64)
}

/// Project a geographic coordinate onto the world pixel plane.
pub fn project(coord: Coordinate, zoom: f32) -> PixelPoint {
    let size = world_size(zoom);
    // Latitudes beyond the mercator singularity collapse to the plane edge.
    let siny = coord.latitude().to_radians().sin().clamp(-0.9999, 0.9999);
    PixelPoint {
        x: (coord.longitude() + 180.0) / 360.0 * size,
        y: (0.5 - ((1.0 + siny) / (1.0 - siny)).ln() / (4.0 * std::f64::consts::PI)) * size,
    }
}

/// Inverse of [`project`].
pub fn unproject(point: PixelPoint, zoom: f32) -> Coordinate {
    let size = world_size(zoom);
    let longitude = point.x / size * 360.0 - 180.0;
    let n = std::f64::consts::PI * (1.0 - 2.0 * point.y / size);
    let latitude = n.sinh().atan().to_degrees();
    Coordinate::new(latitude, longitude)
}

/// Tile column/row containing a coordinate at an integer zoom level.
pub fn tile_at(coord: Coordinate, zoom: u32) -> (u32, u32) {
    let n = 2.0_f64.powi(zoom as i32);
    let point = project(coord, zoom as f32);
    let x = (point.x / TILE_SIZE).floor().clamp(0.0, n - 1.0) as u32;
    let y = (point.y / TILE_SIZE).floor().clamp(0.0, n - 1.0) as u32;
    (x, y)
}

/// North-west corner and side length of a tile on the world pixel plane at the
/// current (possibly fractional) zoom.
pub fn tile_rect(id: TileId, zoom: f32) -> (PixelPoint, f64) {
    let (z, x, y) = id;
    let scale = 2.0_f64.powf(zoom as f64 - z as f64);
    let side = TILE_SIZE * scale;
    let origin = PixelPoint {
        x: x as f64 * side,
        y: y as f64 * side,
    };
    (origin, side)
}

/// Geographic bounds visible in a viewport of `size` pixels centered on
/// `center` at `zoom`.
pub fn visible_bounds(center: Coordinate, zoom: f32, size: egui::Vec2) -> GeoBounds {
    let c = project(center, zoom);
    let half_w = size.x as f64 / 2.0;
    let half_h = size.y as f64 / 2.0;
    let north_west = unproject(PixelPoint { x: c.x - half_w, y: c.y - half_h }, zoom);
    let south_east = unproject(PixelPoint { x: c.x + half_w, y: c.y + half_h }, zoom);
    GeoBounds::new(
        south_east.latitude(),
        north_west.longitude(),
        north_west.latitude(),
        south_east.longitude(),
    )
}

/// All tiles intersecting `bounds` at integer zoom `z`, handling bounds that
/// cross the antimeridian.
pub fn visible_tiles(bounds: &GeoBounds, z: u32) -> Vec<TileId> {
    let n = 2u32.pow(z);
    let (west_x, north_y) = tile_at(Coordinate::new(bounds.north(), bounds.west()), z);
    let (east_x, south_y) = tile_at(Coordinate::new(bounds.south(), bounds.east()), z);

    let mut tiles = Vec::new();
    let mut push_columns = |x0: u32, x1: u32| {
        for x in x0..=x1 {
            for y in north_y..=south_y {
                tiles.push((z, x, y));
            }
        }
    };

    if bounds.west() > bounds.east() {
        push_columns(west_x, n - 1);
        push_columns(0, east_x);
    } else {
        push_columns(west_x, east_x);
    }
    tiles
}

/// Center and maximal zoom at which `bounds`, inset by `padding` pixels on
/// every side, fits a viewport of `size` pixels.
pub fn fit_bounds(bounds: &GeoBounds, size: egui::Vec2, padding: f32) -> (Coordinate, f32) {
    let south_west = project(Coordinate::new(bounds.south(), bounds.west()), 0.0);
    let north_east = project(Coordinate::new(bounds.north(), bounds.east()), 0.0);
    let span_x = (north_east.x - south_west.x).max(f64::EPSILON);
    let span_y = (south_west.y - north_east.y).max(f64::EPSILON);

    let avail_x = (size.x - 2.0 * padding).max(1.0) as f64;
    let avail_y = (size.y - 2.0 * padding).max(1.0) as f64;

    let zoom = (avail_x / span_x).min(avail_y / span_y).log2() as f32;
    let center = unproject(
        PixelPoint {
            x: (south_west.x + north_east.x) / 2.0,
            y: (south_west.y + north_east.y) / 2.0,
        },
        0.0,
    );
    (center, zoom.clamp(0.0, MAX_ZOOM))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CONTINENTAL_US, FIT_PADDING};
    use approx::assert_relative_eq;

    #[test]
    fn null_island_projects_to_plane_center() {
        let p = project(Coordinate::new(0.0, 0.0), 0.0);
        assert_relative_eq!(p.x, TILE_SIZE / 2.0);
        assert_relative_eq!(p.y, TILE_SIZE / 2.0, epsilon = 1e-9);
    }

    #[test]
    fn project_unproject_round_trips() {
        for coord in [
            Coordinate::new(49.8951, -97.1384), // Winnipeg
            Coordinate::new(40.7128, -74.006),  // New York
            Coordinate::new(-33.8688, 151.2093), // Sydney
        ] {
            let back = unproject(project(coord, 7.0), 7.0);
            assert_relative_eq!(back.latitude(), coord.latitude(), epsilon = 1e-9);
            assert_relative_eq!(back.longitude(), coord.longitude(), epsilon = 1e-9);
        }
    }

    #[test]
    fn tile_at_known_locations() {
        // The prime meridian / equator intersection sits at the south-east
        // corner of tile (0, 0) for every zoom level.
        assert_eq!(tile_at(Coordinate::new(0.0, 0.0), 1), (1, 1));
        // Continental US midwest lands in the north-west world quadrant.
        let (x, y) = tile_at(Coordinate::new(39.0, -95.0), 4);
        assert_eq!((x, y), (3, 6));
    }

    #[test]
    fn visible_tiles_cover_viewport_bounds() {
        let bounds = GeoBounds::new(40.0, -100.0, 45.0, -90.0);
        let tiles = visible_tiles(&bounds, 5);
        assert!(!tiles.is_empty());
        for (z, x, y) in &tiles {
            assert_eq!(*z, 5);
            assert!(*x < 32 && *y < 32);
        }
        // The corner tiles must be present.
        let nw = tile_at(Coordinate::new(45.0, -100.0), 5);
        let se = tile_at(Coordinate::new(40.0, -90.0), 5);
        assert!(tiles.contains(&(5, nw.0, nw.1)));
        assert!(tiles.contains(&(5, se.0, se.1)));
    }

    #[test]
    fn visible_tiles_wrap_across_antimeridian() {
        let bounds = GeoBounds::new(-10.0, 170.0, 10.0, -170.0);
        let tiles = visible_tiles(&bounds, 3);
        assert!(tiles.iter().any(|&(_, x, _)| x == 7));
        assert!(tiles.iter().any(|&(_, x, _)| x == 0));
    }

    #[test]
    fn fit_bounds_centers_the_continental_us() {
        let size = egui::vec2(1024.0, 768.0);
        let (center, zoom) = fit_bounds(&CONTINENTAL_US, size, FIT_PADDING);

        assert_relative_eq!(center.longitude(), -95.866014, epsilon = 1e-3);
        assert!(center.latitude() > 36.0 && center.latitude() < 39.0);
        assert!(zoom > 3.0 && zoom < 5.0, "zoom = {zoom}");

        // The fitted view must actually contain the padded box.
        let visible = visible_bounds(center, zoom, size);
        assert!(visible.south() < CONTINENTAL_US.south());
        assert!(visible.north() > CONTINENTAL_US.north());
        assert!(visible.west() < CONTINENTAL_US.west());
        assert!(visible.east() > CONTINENTAL_US.east());
    }

    #[test]
    fn visible_bounds_shrink_when_zooming_in() {
        let center = Coordinate::new(39.0, -95.0);
        let size = egui::vec2(800.0, 600.0);
        let far = visible_bounds(center, 4.0, size);
        let near = visible_bounds(center, 6.0, size);
        assert!(near.east() - near.west() < far.east() - far.west());
        assert!(near.north() - near.south() < far.north() - far.south());
    }
}
