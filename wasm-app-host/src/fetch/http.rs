use super::{FetchError, ResourceFetcher};

/// Serves resources from an HTTP origin, e.g. `http://localhost:8000/`.
pub struct HttpFetcher {
    base: String,
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        if !base.ends_with('/') {
            base.push('/');
        }
        Self {
            base,
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl ResourceFetcher for HttpFetcher {
    fn fetch(&self, name: &str) -> Result<Vec<u8>, FetchError> {
        if name.is_empty() || name.contains("..") {
            return Err(FetchError::InvalidName(name.to_string()));
        }
        let url = format!("{}{}", self.base, name.trim_start_matches('/'));
        let http_err = |e: reqwest::Error| FetchError::Http {
            name: name.to_string(),
            message: e.to_string(),
        };

        let response = self.client.get(&url).send().map_err(http_err)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(name.to_string()));
        }
        let bytes = response
            .error_for_status()
            .map_err(http_err)?
            .bytes()
            .map_err(http_err)?;
        Ok(bytes.to_vec())
    }
}
