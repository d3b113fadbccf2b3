/// Common trait for configuration types
pub trait Configuration {
    /// Returns a string identifier for the configuration type
    fn config_type(&self) -> &str;

    /// Validates the configuration
    fn validate(&self) -> anyhow::Result<()>;
}
