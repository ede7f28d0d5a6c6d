pub mod brand_distribution;
pub mod brand_statistics;
pub mod color_ramp;
pub mod detection;
pub mod grid_manager;
pub mod heatmap_renderer;
pub mod image_helper;
pub mod spatial_heatmap;
pub mod temporal_binner;
pub mod video_summary;
