pub mod compositor;
pub mod domain;
pub mod infrastructure;
