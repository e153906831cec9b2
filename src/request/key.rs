use std::fmt;
use std::sync::Arc;

use super::options::DecodeOptions;
use crate::decode::Transformation;

/// Separates the URI from each key parameter. NUL never appears in a URI, so
/// no URI can spell out another request's parameters.
const PARAM_SEPARATOR: char = '\0';

/// Identity of a request's cacheable output.
///
/// Built from the URI plus every decode option and transformation that
/// changes the pixels. Two requests with equal keys share one execution and
/// one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(Arc<str>);

impl RequestKey {
    /// Derive the key for `uri` decoded with `options` and then passed
    /// through `transformations` in order.
    pub fn new(
        uri: &str,
        options: &DecodeOptions,
        transformations: &[Arc<dyn Transformation>],
    ) -> Self {
        let mut params = options.key_params();
        if !transformations.is_empty() {
            let keys: Vec<String> = transformations.iter().map(|t| t.key()).collect();
            params.push(("_transformations", keys.join(",")));
        }
        let uri = if uri.contains(PARAM_SEPARATOR) {
            uri.replace(PARAM_SEPARATOR, "%00")
        } else {
            uri.to_string()
        };
        if params.is_empty() {
            return Self(Arc::from(uri));
        }

        let mut key = String::with_capacity(uri.len() + 64);
        key.push_str(&uri);
        for (name, value) in params {
            key.push(PARAM_SEPARATOR);
            key.push_str(name);
            key.push('=');
            key.push_str(&value);
        }
        Self(Arc::from(key))
    }

    /// Key used verbatim, e.g. for the download tier where the URI alone matters.
    pub fn from_raw(raw: impl Into<Arc<str>>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Human-readable form for logs: parameters follow the URI after spaces.
impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = self.0.split(PARAM_SEPARATOR);
        if let Some(uri) = parts.next() {
            f.write_str(uri)?;
        }
        for param in parts {
            write!(f, " {param}")?;
        }
        Ok(())
    }
}

impl AsRef<str> for RequestKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
