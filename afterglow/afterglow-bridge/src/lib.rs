//! Afterglow bridge: implements render_api::RenderBackend on top of afterglow-denoiser.

mod renderer;
mod upload;

pub use renderer::DenoisedRenderer;
pub use upload::FrameUploads;
