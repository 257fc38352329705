//! linecast-pipeline: edge and line detection as a lazily evaluated,
//! cancellable node graph.
//!
//! A grayscale image flows through
//! levels -> blur -> gradient -> Canny -> Hough. Each stage is a [`Filter`]
//! wrapped in a [`Node`] that caches its output per settings generation
//! and input, so retuning one parameter only recomputes the stages
//! downstream of it. [`LinesChain`] wires the whole graph;
//! [`detect_lines`] runs it once without caching.
//!
//! The parallel kernels (windowed suppression, Canny hysteresis, Hough
//! voting) split their work into row or point chunks on the rayon pool
//! and merge the chunk results deterministically, so output does not
//! depend on the configured thread count.

pub mod canny;
pub mod chain;
pub mod chunk;
pub mod diagnostics;
pub mod gradient;
pub mod grayscale;
pub mod hough;
pub mod level;
pub mod node;
pub mod settings;
pub mod suppression;
pub mod types;

pub use canny::Canny;
pub use chain::{LinesChain, LinesChainControls, LinesChainResult};
pub use gradient::{GaussianBlur, Gradient};
pub use hough::Hough;
pub use level::LevelAdjust;
pub use node::{Cancel, Filter, Node, SettingsControl, Source, Upstream};
pub use settings::{
    CannySettings, ChainSettings, GaussianSettings, GradientSettings, HoughSettings,
    LevelSettings, LinesSettings, Validate,
};
pub use types::{
    CannyResult, ConfigError, Dimensions, GradientField, GrayImage, HoughResult, Line,
    PipelineError, Real,
};

/// Build `F` from `settings` and run it on `input`.
fn run_stage<F: Filter>(
    settings: &F::Settings,
    input: &F::Input,
) -> Result<F::Output, PipelineError> {
    F::new(settings)?
        .filter(input)
        .ok_or(PipelineError::NoResult { stage: F::NAME })
}

/// Run the full detection once on a grayscale image.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] for a zero-sized image,
/// [`PipelineError::Config`] for invalid settings, and
/// [`PipelineError::NoResult`] naming the first stage that produced
/// nothing (a disabled stage, or one that failed and logged why).
pub fn detect_lines<T: Real>(
    image: &GrayImage,
    settings: &LinesSettings,
) -> Result<HoughResult<T>, PipelineError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(PipelineError::EmptyInput);
    }
    settings.validate()?;

    let adjusted = run_stage::<LevelAdjust>(&settings.level, image)?;
    let blurred = run_stage::<GaussianBlur>(&settings.gaussian, &adjusted)?;
    let gradient = run_stage::<Gradient<T>>(&settings.gradient, &blurred)?;
    let edges = run_stage::<Canny<T>>(&settings.canny, &gradient)?;
    run_stage::<Hough<T>>(&settings.hough, &edges)
}

/// Decode `bytes` to grayscale and run [`detect_lines`].
///
/// # Errors
///
/// Returns the decoding errors of
/// [`decode_and_grayscale`](grayscale::decode_and_grayscale) and the
/// errors of [`detect_lines`].
pub fn detect_lines_from_bytes<T: Real>(
    bytes: &[u8],
    settings: &LinesSettings,
) -> Result<HoughResult<T>, PipelineError> {
    let gray = grayscale::decode_and_grayscale(bytes)?;
    detect_lines(&gray, settings)
}
