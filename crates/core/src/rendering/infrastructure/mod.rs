pub mod png_sequence_surface;
