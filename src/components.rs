//! Ordered fetcher and decoder factory chains.

use std::sync::Arc;

use crate::decode::{Decoder, DecoderFactory, RasterDecoderFactory};
use crate::error::LoadError;
use crate::fetch::{DataUriFetcherFactory, Fetcher, FetcherFactory, FileFetcherFactory};
use crate::request::ImageRequest;

/// First-match registries of fetcher and decoder factories.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    fetcher_factories: Vec<Arc<dyn FetcherFactory>>,
    decoder_factories: Vec<Arc<dyn DecoderFactory>>,
}

impl ComponentRegistry {
    /// An empty registry; nothing matches.
    pub fn new() -> Self {
        Self::default()
    }

    /// Local files, `data:` URIs and the raster decoder. Network, asset and
    /// content fetchers need collaborators and are added by the engine builder.
    pub fn with_defaults() -> Self {
        Self::new()
            .with_fetcher(Arc::new(FileFetcherFactory))
            .with_fetcher(Arc::new(DataUriFetcherFactory))
            .with_decoder(Arc::new(RasterDecoderFactory))
    }

    pub fn with_fetcher(mut self, factory: Arc<dyn FetcherFactory>) -> Self {
        self.fetcher_factories.push(factory);
        self
    }

    pub fn with_decoder(mut self, factory: Arc<dyn DecoderFactory>) -> Self {
        self.decoder_factories.push(factory);
        self
    }

    /// Put a fetcher factory ahead of all existing ones.
    pub fn prepend_fetcher(&mut self, factory: Arc<dyn FetcherFactory>) {
        self.fetcher_factories.insert(0, factory);
    }

    /// Put a decoder factory ahead of all existing ones.
    pub fn prepend_decoder(&mut self, factory: Arc<dyn DecoderFactory>) {
        self.decoder_factories.insert(0, factory);
    }

    pub fn fetcher_names(&self) -> Vec<&'static str> {
        self.fetcher_factories.iter().map(|f| f.name()).collect()
    }

    pub fn decoder_names(&self) -> Vec<&'static str> {
        self.decoder_factories.iter().map(|f| f.name()).collect()
    }

    /// The first fetcher whose factory accepts `request`.
    pub fn new_fetcher(&self, request: &ImageRequest) -> Result<Box<dyn Fetcher>, LoadError> {
        self.fetcher_factories
            .iter()
            .find_map(|factory| factory.create(request))
            .ok_or_else(|| LoadError::NoMatchingHandler {
                kind: "fetcher",
                subject: request.uri().to_string(),
            })
    }

    /// The first decoder whose factory recognizes the content.
    pub fn new_decoder(
        &self,
        request: &ImageRequest,
        header: &[u8],
        mime_type: Option<&str>,
    ) -> Result<Arc<dyn Decoder>, LoadError> {
        self.decoder_factories
            .iter()
            .find_map(|factory| factory.create(request, header, mime_type))
            .ok_or_else(|| LoadError::NoMatchingHandler {
                kind: "decoder",
                subject: format!(
                    "{} ({})",
                    request.uri(),
                    mime_type.unwrap_or("unknown content")
                ),
            })
    }
}
