//! The composite lines chain: source → levels → blur → gradient →
//! Canny → Hough.
//!
//! [`LinesChain`] owns one [`Node`] per stage, all sharing one
//! [`Cancel`] flag, plus a [`LinesChainControls`] bundle for pushing
//! settings from another thread. Pulling the chain pulls every stage in
//! order; a settings change anywhere in the chain while the pull is in
//! flight discards the whole composite result.
//!
//! The level bounds and the gradient scale can be fitted to the current
//! image with [`LinesChain::auto_detect_levels`] and
//! [`LinesChain::auto_detect_settings`].

use std::sync::Arc;

use image::GrayImage;
use tracing::{debug, warn};

use crate::canny::Canny;
use crate::gradient::{GaussianBlur, Gradient, detect_gradient_scale};
use crate::hough::Hough;
use crate::level::{LevelAdjust, detect_levels};
use crate::node::{Cancel, Filter, Node, SettingsControl, Source, Upstream};
use crate::settings::{
    CannySettings, ChainSettings, GaussianSettings, GradientSettings, HoughSettings,
    LevelSettings, LinesSettings, Validate,
};
use crate::types::{CannyResult, ConfigError, GradientField, HoughResult, Real};

/// Level adjustment over the image source.
pub type LevelNode = Node<Source<GrayImage>, LevelAdjust>;
/// Blur stage over the level adjustment.
pub type GaussianNode = Node<LevelNode, GaussianBlur>;
/// Gradient stage over the blur.
pub type GradientNode<T> = Node<GaussianNode, Gradient<T>>;
/// Canny stage over the gradient.
pub type CannyNode<T> = Node<GradientNode<T>, Canny<T>>;
/// Hough stage over Canny.
pub type HoughNode<T> = Node<CannyNode<T>, Hough<T>>;

/// Settings generation of every stage, in chain order.
pub type Generations = [u64; 6];

/// One settings control per stage, plus the chain's own switches.
///
/// Clones share the underlying controls.
#[derive(Debug, Clone)]
pub struct LinesChainControls {
    /// Chain-level switches.
    pub chain: SettingsControl<ChainSettings>,
    /// Input level adjustment.
    pub level: SettingsControl<LevelSettings>,
    /// Gaussian pre-blur.
    pub gaussian: SettingsControl<GaussianSettings>,
    /// Sobel gradient.
    pub gradient: SettingsControl<GradientSettings>,
    /// Canny detector.
    pub canny: SettingsControl<CannySettings>,
    /// Hough detector.
    pub hough: SettingsControl<HoughSettings>,
}

impl LinesChainControls {
    /// Controls initialized from `settings`.
    ///
    /// # Errors
    ///
    /// Returns the first stage's [`ConfigError`].
    pub fn new(settings: &LinesSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            chain: SettingsControl::new(settings.chain.clone())?,
            level: SettingsControl::new(settings.level.clone())?,
            gaussian: SettingsControl::new(settings.gaussian.clone())?,
            gradient: SettingsControl::new(settings.gradient.clone())?,
            canny: SettingsControl::new(settings.canny.clone())?,
            hough: SettingsControl::new(settings.hough.clone())?,
        })
    }

    /// Current generation of every control.
    #[must_use]
    pub fn generations(&self) -> Generations {
        [
            self.chain.generation(),
            self.level.generation(),
            self.gaussian.generation(),
            self.gradient.generation(),
            self.canny.generation(),
            self.hough.generation(),
        ]
    }

    /// Current settings of every stage.
    #[must_use]
    pub fn settings(&self) -> LinesSettings {
        LinesSettings {
            chain: self.chain.get(),
            level: self.level.get(),
            gaussian: self.gaussian.get(),
            gradient: self.gradient.get(),
            canny: self.canny.get(),
            hough: self.hough.get(),
        }
    }

    /// Push `settings`, touching only the stages whose settings differ.
    ///
    /// Everything is validated before anything is pushed, so a rejected
    /// update leaves every stage as it was.
    ///
    /// # Errors
    ///
    /// Returns the first stage's [`ConfigError`].
    pub fn set(&self, settings: LinesSettings) -> Result<(), ConfigError> {
        settings.validate()?;
        let current = self.settings();
        if settings.chain != current.chain {
            self.chain.set(settings.chain)?;
        }
        if settings.level != current.level {
            self.level.set(settings.level)?;
        }
        if settings.gaussian != current.gaussian {
            self.gaussian.set(settings.gaussian)?;
        }
        if settings.gradient != current.gradient {
            self.gradient.set(settings.gradient)?;
        }
        if settings.canny != current.canny {
            self.canny.set(settings.canny)?;
        }
        if settings.hough != current.hough {
            self.hough.set(settings.hough)?;
        }
        Ok(())
    }
}

/// Every stage's output from one consistent pull.
#[derive(Debug)]
pub struct LinesChainResult<T> {
    /// Level-adjusted input image.
    pub adjusted: Arc<GrayImage>,
    /// Blurred grayscale image.
    pub blurred: Arc<GrayImage>,
    /// Sobel gradient of `blurred`.
    pub gradient: Arc<GradientField<T>>,
    /// Canny edges of `gradient`.
    pub canny: Arc<CannyResult<T>>,
    /// Hough lines of `canny`.
    pub hough: Arc<HoughResult<T>>,
}

impl<T> Clone for LinesChainResult<T> {
    fn clone(&self) -> Self {
        Self {
            adjusted: Arc::clone(&self.adjusted),
            blurred: Arc::clone(&self.blurred),
            gradient: Arc::clone(&self.gradient),
            canny: Arc::clone(&self.canny),
            hough: Arc::clone(&self.hough),
        }
    }
}

/// Lazily evaluated line detection over a replaceable image.
pub struct LinesChain<T: Real = f64> {
    source: Arc<Source<GrayImage>>,
    level: Arc<LevelNode>,
    gaussian: Arc<GaussianNode>,
    gradient: Arc<GradientNode<T>>,
    canny: Arc<CannyNode<T>>,
    hough: HoughNode<T>,
    controls: LinesChainControls,
    cancel: Cancel,
}

impl<T: Real> LinesChain<T> {
    /// Build the chain with an empty source.
    ///
    /// # Errors
    ///
    /// Returns the first stage's [`ConfigError`].
    pub fn new(settings: &LinesSettings, cancel: Cancel) -> Result<Self, ConfigError> {
        let controls = LinesChainControls::new(settings)?;
        let source = Arc::new(Source::new());
        let level = Arc::new(Node::new(
            Arc::clone(&source),
            controls.level.clone(),
            cancel.clone(),
        )?);
        let gaussian = Arc::new(Node::new(
            Arc::clone(&level),
            controls.gaussian.clone(),
            cancel.clone(),
        )?);
        let gradient = Arc::new(Node::new(
            Arc::clone(&gaussian),
            controls.gradient.clone(),
            cancel.clone(),
        )?);
        let canny = Arc::new(Node::new(
            Arc::clone(&gradient),
            controls.canny.clone(),
            cancel.clone(),
        )?);
        let hough = Node::new(Arc::clone(&canny), controls.hough.clone(), cancel.clone())?;
        Ok(Self {
            source,
            level,
            gaussian,
            gradient,
            canny,
            hough,
            controls,
            cancel,
        })
    }

    /// Replace the input image.
    pub fn set_image(&self, image: GrayImage) {
        self.source.set_data(image);
    }

    /// Settings controls for every stage.
    #[must_use]
    pub const fn controls(&self) -> &LinesChainControls {
        &self.controls
    }

    /// The cancel flag shared by every stage.
    #[must_use]
    pub const fn cancel(&self) -> &Cancel {
        &self.cancel
    }

    fn enabled(&self) -> bool {
        self.controls.chain.get().enable
    }

    /// Fit the level bounds to the current image and push them.
    ///
    /// Returns the pushed settings, or `None` when no image is set.
    ///
    /// # Errors
    ///
    /// Returns the level settings' [`ConfigError`].
    pub fn auto_detect_levels(&self) -> Result<Option<LevelSettings>, ConfigError> {
        let Some(image) = self.source.peek() else {
            warn!("cannot detect levels without an image");
            return Ok(None);
        };
        let mut settings = self.controls.level.get();
        (settings.low, settings.high) = detect_levels(&image, settings.detect_margin);
        debug!(low = settings.low, high = settings.high, "detected levels");
        self.controls.level.set(settings.clone())?;
        Ok(Some(settings))
    }

    /// Fit the gradient scale to the current blurred image and push it.
    ///
    /// The gradient is recomputed at scale 1 outside the graph, so the
    /// cached gradient stays valid until the detected scale is pushed.
    /// Returns the detected scale, or `None` when there is no blurred
    /// image or the gradient stage is disabled.
    ///
    /// # Errors
    ///
    /// Returns the gradient settings' [`ConfigError`].
    pub fn auto_detect_settings(&self) -> Result<Option<f64>, ConfigError> {
        let mut unit = self.controls.gradient.get();
        unit.scale = GradientSettings::DEFAULT_SCALE;
        let stage = Gradient::<T>::new(&unit)?;

        let Some(field) = self
            .gaussian
            .get_result()
            .and_then(|blurred| stage.filter(&blurred))
        else {
            warn!("cannot detect gradient scale without input");
            return Ok(None);
        };

        let scale = detect_gradient_scale(&field, unit.percentile);
        debug!(scale, "detected gradient scale");
        self.controls.gradient.update(|s| s.scale = scale)?;
        Ok(Some(scale))
    }

    /// Pull every stage together.
    ///
    /// Returns `None` when the chain is disabled or cancelled, when any
    /// stage has nothing to report, or when settings or the image
    /// changed while the pull was running.
    #[must_use]
    pub fn chain_results(&self) -> Option<LinesChainResult<T>> {
        let before = self.controls.generations();
        self.collect(&before)
    }

    fn collect(&self, before: &Generations) -> Option<LinesChainResult<T>> {
        if !self.enabled() || self.cancel.get() {
            return None;
        }
        let version = self.source.version();

        let result = LinesChainResult {
            adjusted: self.level.get_result()?,
            blurred: self.gaussian.get_result()?,
            gradient: self.gradient.get_result()?,
            canny: self.canny.get_result()?,
            hough: self.hough.get_result()?,
        };

        if self.controls.generations() != *before {
            debug!("settings changed during chain pull, discarding");
            return None;
        }
        if self.cancel.get() {
            debug!("chain cancelled, discarding");
            return None;
        }
        if self.source.version() != version || !self.hough.has_result() {
            debug!("chain input changed during pull, discarding");
            return None;
        }
        Some(result)
    }
}

impl<T: Real> Upstream for LinesChain<T> {
    type Output = HoughResult<T>;

    fn has_result(&self) -> bool {
        self.enabled() && self.hough.has_result()
    }

    fn get_result(&self) -> Option<Arc<HoughResult<T>>> {
        if !self.enabled() {
            return None;
        }
        self.hough.get_result()
    }
}
