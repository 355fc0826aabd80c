pub mod geo_search;
pub mod tile_retriever;
