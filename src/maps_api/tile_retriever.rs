use std::error::Error;

use crate::map::geo::TileId;
use crate::map::tiles::MapTile;

pub type FetchError = Box<dyn Error + Send + Sync>;

/// Fetches raster base-map tiles from the configured tile service.
#[derive(Debug, Clone)]
pub struct TileRetriever {
    client: reqwest::Client,
    template: String,
    access_token: String,
}

impl TileRetriever {
    pub fn new(template: String, access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            template,
            access_token,
        }
    }

    /// Expand the template URL for one tile and append the access token.
    fn tile_url(&self, (z, x, y): TileId) -> String {
        let url = self
            .template
            .replace("{z}", &z.to_string())
            .replace("{x}", &x.to_string())
            .replace("{y}", &y.to_string());
        let separator = if url.contains('?') { '&' } else { '?' };
        format!("{url}{separator}access_token={}", self.access_token)
    }

    /// Asynchronously fetch one tile and decode it into a MapTile.
    pub async fn fetch_tile(&self, id: TileId) -> Result<MapTile, FetchError> {
        let url = self.tile_url(id);
        log::debug!("fetching tile from {url}");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(format!("failed to fetch tile: {}", response.status()).into());
        }
        let bytes = response.bytes().await?;

        let image = image::load_from_memory(&bytes)?.to_rgba8();
        let (width, height) = image.dimensions();

        Ok(MapTile::new(
            id,
            [width as usize, height as usize],
            image.into_raw(),
        ))
    }

    /// Fetch a category icon asset and decode it for texture upload.
    pub async fn fetch_icon(&self, url: &str) -> Result<egui::ColorImage, FetchError> {
        log::debug!("fetching icon from {url}");

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(format!("failed to fetch icon: {}", response.status()).into());
        }
        let bytes = response.bytes().await?;

        let image = image::load_from_memory(&bytes)?.to_rgba8();
        let (width, height) = image.dimensions();
        Ok(egui::ColorImage::from_rgba_unmultiplied(
            [width as usize, height as usize],
            image.as_raw(),
        ))
    }
}
