/// Bisection run options
pub mod options;
pub use options::{BisectOptions, BuildPreference};

/// Depot registry
pub mod depots;
pub use depots::{load_depot_config, DepotInfo, DepotRegistry};

/// Configuration traits
pub mod traits;
pub use traits::Configuration;

/// Everything a bisection run needs to know: the run options plus the depot
/// table. Owned by main, borrowed by the driver.
#[derive(Debug, Clone)]
pub struct BisectConfig {
    pub options: BisectOptions,
    pub depots: DepotRegistry,
}

impl Configuration for BisectConfig {
    fn config_type(&self) -> &str {
        "bisect"
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.options.validate()?;
        self.depots.validate()?;

        Ok(())
    }
}
