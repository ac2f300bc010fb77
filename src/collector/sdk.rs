use crate::config::SdkCheckConfig;

/// How to tell whether a telemetry SDK is already active inside a container
#[derive(Debug, Clone, PartialEq)]
pub struct SdkProbe {
    pub command: Vec<String>,
    pub marker: String,
}

impl SdkProbe {
    pub fn new(command: Vec<String>, marker: impl Into<String>) -> Self {
        Self {
            command,
            marker: marker.into(),
        }
    }

    pub fn from_config(config: &SdkCheckConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.command.clone(), config.marker.clone()))
    }

    /// The key following the marker in `output`, if any.
    ///
    /// `InstrumentationKey=abc; Endpoint=...` yields `abc`; a marker with
    /// nothing after it is not a key.
    pub fn instrumentation_key(&self, output: &str) -> Option<String> {
        if self.marker.is_empty() {
            return None;
        }

        output.lines().find_map(|line| {
            let (_, rest) = line.split_once(self.marker.as_str())?;
            let key = rest
                .split(|c: char| c.is_whitespace() || c == ';' || c == ',')
                .next()
                .unwrap_or_default()
                .trim_matches(|c| c == '"' || c == '\'');
            (!key.is_empty()).then(|| key.to_string())
        })
    }
}

impl Default for SdkProbe {
    fn default() -> Self {
        let config = SdkCheckConfig::default();
        Self::new(config.command, config.marker)
    }
}
