use crate::map::geo::TileId;

/// One decoded raster tile. The texture is uploaded lazily on first paint so
/// tiles can be decoded off the UI thread without an egui context.
pub struct MapTile {
    id: TileId,
    size: [usize; 2],
    pixels: Vec<u8>,
    texture: Option<egui::TextureHandle>,
}

impl MapTile {
    pub fn new(id: TileId, size: [usize; 2], pixels: Vec<u8>) -> Self {
        Self {
            id,
            size,
            pixels,
            texture: None,
        }
    }

    pub fn texture(&mut self, ctx: &egui::Context) -> &egui::TextureHandle {
        if self.texture.is_none() {
            let image = egui::ColorImage::from_rgba_unmultiplied(self.size, &self.pixels);
            let (z, x, y) = self.id;
            let texture = ctx.load_texture(
                format!("tile_{z}_{x}_{y}"),
                image,
                egui::TextureOptions::LINEAR,
            );
            self.texture = Some(texture);
        }
        self.texture.as_ref().unwrap()
    }
}
