pub mod playlist;
pub mod video;
pub mod youtube;

pub use playlist::*;
pub use video::*;
pub use youtube::*;
