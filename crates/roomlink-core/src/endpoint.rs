use crate::config::SessionConfig;

/// Turns the server address handed out by the token endpoint into the
/// literal address the transport dials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointResolver {
    default_address: String,
    path_suffix: Option<String>,
}

impl EndpointResolver {
    pub fn new(default_address: impl Into<String>, path_suffix: Option<String>) -> Self {
        let path_suffix = path_suffix
            .map(|s| format!("/{}", s.trim_matches('/')))
            .filter(|s| s != "/");
        Self {
            default_address: default_address.into(),
            path_suffix,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.default_signaling_address.clone(),
            config.signaling_path_suffix.clone(),
        )
    }

    /// Resolve `raw`, falling back to the configured default when it is
    /// absent or blank.
    ///
    /// `resolve(Some(&resolve(x))) == resolve(x)` holds for every input.
    pub fn resolve(&self, raw: Option<&str>) -> String {
        let candidate = raw
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "/");
        match candidate.map(|a| self.normalize(a)) {
            Some(address) if !address.is_empty() => address,
            _ => self.normalize(self.default_address.trim()),
        }
    }

    fn normalize(&self, address: &str) -> String {
        let address = websocket_scheme(address);
        match &self.path_suffix {
            Some(suffix) => {
                let mut out = address.strip_suffix('/').unwrap_or(&address).to_string();
                if !out.ends_with(suffix.as_str()) {
                    out.push_str(suffix);
                }
                out
            }
            // Without a suffix every trailing slash goes, otherwise a second
            // pass would strip another one.
            None => address.trim_end_matches('/').to_string(),
        }
    }
}

/// Signaling runs over WebSocket; map http(s) to ws(s).
fn websocket_scheme(address: &str) -> String {
    if let Some(rest) = address.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = address.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        address.to_string()
    }
}
