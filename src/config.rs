use thiserror::Error;

use crate::map::geo::GeoBounds;

/// Bounding box of the 48 contiguous US states.
/// http://en.wikipedia.org/wiki/Extreme_points_of_the_United_States
/// Southern point used is Western Dry Rocks, Florida
/// Western point used is Umatilla Reef, Washington
/// Northern point used is Northwest Angle, Minnesota
/// Eastern point used is Sail Rock, Maine
pub const CONTINENTAL_US: GeoBounds = GeoBounds::new(24.446667, -124.785, 49.384472, -66.947028);

/// Screen padding, in pixels, applied when fitting the initial viewport.
pub const FIT_PADDING: f32 = 20.0;

const DEFAULT_TILE_URL: &str =
    "https://api.mapbox.com/v4/solidarityeconomy.d591ea8d/{z}/{x}/{y}@2x.png";
const DEFAULT_SITE_URL: &str = "http://localhost:8080";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    MissingVar(&'static str),
}

/// Immutable application configuration, read once at startup and passed into
/// the controller. Optional variables fall back to the compiled defaults.
#[derive(Debug, Clone)]
pub struct MapConfig {
    /// Access token for the tile service.
    pub access_token: String,
    /// Raster tile URL template with `{z}`, `{x}` and `{y}` placeholders.
    pub tile_url: String,
    /// Base URL of the server hosting the geosearch endpoint.
    pub search_url: String,
    /// Base URL for organization pages and icon assets.
    pub site_url: String,
    /// Icon theme directory under `/images/`.
    pub icon_theme: String,
}

impl MapConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let access_token =
            dotenv::var("MAP_BOX_API_TOKEN").map_err(|_| ConfigError::MissingVar("MAP_BOX_API_TOKEN"))?;

        let site_url = trim_base(dotenv::var("COOPMAP_SITE_URL").unwrap_or_else(|_| DEFAULT_SITE_URL.into()));
        let search_url = dotenv::var("COOPMAP_SEARCH_URL").map(trim_base).unwrap_or_else(|_| site_url.clone());
        let tile_url = dotenv::var("COOPMAP_TILE_URL").unwrap_or_else(|_| DEFAULT_TILE_URL.into());

        Ok(Self {
            access_token,
            tile_url,
            search_url,
            site_url,
            icon_theme: "nsfus_solidarity".into(),
        })
    }

    /// Asset URL for a category icon file.
    pub fn icon_url(&self, file: &str) -> String {
        format!("{}/images/{}/{}", self.site_url, self.icon_theme, file)
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> MapConfig {
        MapConfig {
            access_token: "token".into(),
            tile_url: DEFAULT_TILE_URL.into(),
            search_url: "http://localhost:8080".into(),
            site_url: "http://localhost:8080".into(),
            icon_theme: "nsfus_solidarity".into(),
        }
    }

    #[test]
    fn icon_url_includes_theme() {
        let config = test_config();
        assert_eq!(
            config.icon_url("finance-small.png"),
            "http://localhost:8080/images/nsfus_solidarity/finance-small.png"
        );
    }
}
