pub mod composited_image;
pub mod display_surface;
pub mod exemption_policy;
pub mod render_source;
