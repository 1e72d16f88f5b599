//! Solve configuration and its builder.
//!
//! Grounded on `fmm/src/new_types.rs`'s `KiFmmBuilderSingleNode`, which
//! accumulates optional fields through a consuming `.tree(..).parameters(..)`
//! chain and validates everything in a final `.build() -> Result<_, String>`.
//! Here the builder is flat (one call per field) since there is no
//! tree-vs-kernel split to preserve, and the terminal `Result` uses a typed
//! [`ConfigError`] rather than a bare `String`.

use crate::error::ConfigError;

/// Per-solve configuration. Lifts the original's global singletons
/// (`MPIRANK`, `MPISIZE`, `IMAGES`, `THETA`, ...) into an explicit value
/// threaded through every component, per the design notes.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Maximum bodies per leaf before subdivision.
    pub ncrit: usize,
    /// Minimum summed NBODY at which traversal spawns a task.
    pub nspawn: usize,
    /// Number of periodic super-levels; 0 disables periodicity.
    pub images: usize,
    /// Multipole acceptance criterion, 0 < theta <= 1.
    pub theta: f64,
    /// Inflate RCRIT by the maximum child radius during the upward pass.
    pub use_rmax: bool,
    /// Use a weighted minimum of `R/theta` and `RMAX` for RCRIT.
    pub use_ropt: bool,
    /// Enable mutual (symmetric) interactions during traversal.
    pub mutual: bool,
    /// Multipole/local expansion order.
    pub expansion_order: usize,
    /// Length of the periodic unit cell, in the kernel's length units.
    pub cycle: f64,
    /// Verbose logging of per-step timings.
    pub verbose: bool,
    /// Number of rayon worker threads; `None` defers to the global pool.
    pub threads: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ncrit: 16,
            nspawn: 1000,
            images: 0,
            theta: 0.4,
            use_rmax: false,
            use_ropt: false,
            mutual: false,
            expansion_order: 6,
            cycle: 2.0 * std::f64::consts::PI,
            verbose: false,
            threads: None,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ConfigBuilder {
    cfg: Config,
}

macro_rules! setter {
    ($name:ident, $field:ident, $ty:ty) => {
        pub fn $name(mut self, v: $ty) -> Self {
            self.cfg.$field = v;
            self
        }
    };
}

impl ConfigBuilder {
    setter!(ncrit, ncrit, usize);
    setter!(nspawn, nspawn, usize);
    setter!(images, images, usize);
    setter!(theta, theta, f64);
    setter!(use_rmax, use_rmax, bool);
    setter!(use_ropt, use_ropt, bool);
    setter!(mutual, mutual, bool);
    setter!(expansion_order, expansion_order, usize);
    setter!(cycle, cycle, f64);
    setter!(verbose, verbose, bool);

    pub fn threads(mut self, n: usize) -> Self {
        self.cfg.threads = Some(n);
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        let cfg = self.cfg;
        if !(cfg.theta > 0.0 && cfg.theta <= 1.0) {
            return Err(ConfigError::InvalidTheta(cfg.theta));
        }
        if cfg.ncrit < 1 {
            return Err(ConfigError::InvalidNcrit(cfg.ncrit));
        }
        if cfg.nspawn < 1 {
            return Err(ConfigError::InvalidNspawn(cfg.nspawn));
        }
        if cfg.images >= 10 {
            return Err(ConfigError::InvalidImages(cfg.images));
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_theta() {
        let err = Config::builder().theta(0.0).build().unwrap_err();
        assert_eq!(err, ConfigError::InvalidTheta(0.0));
    }

    #[test]
    fn default_builds() {
        assert!(Config::builder().build().is_ok());
    }
}
