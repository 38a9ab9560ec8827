pub mod config;
pub mod frame;
pub mod image;
pub mod my_types;
pub mod optical_flow;
pub mod pipeline;
pub mod pyramid;
pub mod template_matching;
pub mod tracker;
pub mod trajectory;
pub mod video;
pub mod visualization;
