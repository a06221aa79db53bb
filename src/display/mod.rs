pub mod preview;

#[cfg(feature = "sdl-preview")]
pub mod sdl;

pub use preview::{preview_channel, run_preview, LogPreview, Preview, PreviewFrame, PreviewTap};

#[cfg(feature = "sdl-preview")]
pub use sdl::Sdl2Preview;
