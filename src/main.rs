#![warn(clippy::all, rust_2018_idioms)]
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod config;
mod map;
mod maps_api;
mod ui;

use config::MapConfig;

#[cfg(not(target_arch = "wasm32"))]
fn main() -> eframe::Result<()> {
    env_logger::init();

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size(egui::vec2(1280.0, 860.0))
            .with_min_inner_size(egui::vec2(400.0, 300.0))
            .with_title("CoopMap")
            .with_resizable(true)
            .with_decorations(true),
        ..Default::default()
    };

    let config = match MapConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    eframe::run_native(
        "CoopMap",
        native_options,
        Box::new(|cc| Ok(Box::new(ui::map_app::MapApp::new(cc, config)))),
    )
}
