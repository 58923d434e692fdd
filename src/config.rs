use anyhow::{bail, Result};
use url::Url;

pub const DEFAULT_LOGO_BASE: &str = "https://en.wikipedia.org/wiki/Special:Redirect/file";
pub const DEFAULT_SITE_BASE: &str = "https://en.wikipedia.org/wiki/Main_Page";

/// Validated settings for one extraction run.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Case-insensitive template name prefix.
    pub template_prefix: String,
    /// Lower-cased parameter names to collect.
    pub params: Vec<String>,
    /// Case-sensitive suffix a file name must end with.
    pub extension: String,
    pub logo_base: String,
    /// Used for page URLs until the dump names its own `base`.
    pub site_base: String,
    /// Prepended to progress and summary lines.
    pub prefix: String,
    pub progress_interval: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            template_prefix: "infobox".to_string(),
            params: vec!["logo".to_string()],
            extension: ".svg".to_string(),
            logo_base: DEFAULT_LOGO_BASE.to_string(),
            site_base: DEFAULT_SITE_BASE.to_string(),
            prefix: String::new(),
            progress_interval: 1000,
        }
    }
}

impl ExtractConfig {
    pub fn validate(&self) -> Result<()> {
        if self.template_prefix.trim().is_empty() {
            bail!("Template prefix must not be empty");
        }
        if self.params.is_empty() {
            bail!("At least one parameter name is required");
        }
        for (what, value) in [("logo base", &self.logo_base), ("site base", &self.site_base)] {
            if Url::parse(value).is_err() {
                bail!("Invalid {} URL: {}", what, value);
            }
        }
        if self.progress_interval == 0 {
            bail!("Progress interval must be at least 1");
        }
        Ok(())
    }
}

/// Splits a comma-separated list of parameter names, trimming and
/// lower-casing each and dropping empty entries.
pub fn parse_parameter_names(list: &str) -> Vec<String> {
    list.split(',')
        .map(|name| name.trim().to_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ExtractConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.params, vec!["logo"]);
    }

    #[test]
    fn parameter_names_are_normalised() {
        assert_eq!(parse_parameter_names(" Logo, image_logo ,,LOGO_alt"), vec!["logo", "image_logo", "logo_alt"]);
        assert!(parse_parameter_names(" , ").is_empty());
    }

    #[test]
    fn rejects_bad_settings() {
        let config = ExtractConfig {
            params: Vec::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ExtractConfig {
            logo_base: "not a url".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
