//! Component K — Render Manager (spec §4.K).

use std::sync::Arc;

use crate::error::{ErrorKind, RenderError};
use crate::provider::Provider;

use super::{RenderOptions, RenderOutcome, TabRenderer};

/// Owns one [`Provider`] (constructed by the caller's injected
/// factory, typically `main.rs`). `start`/`stop` delegate to it.
pub struct RenderManager {
    provider: Arc<dyn Provider>,
}

impl RenderManager {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    pub async fn start(&self) -> Result<(), crate::error::LogicError> {
        self.provider.start().await
    }

    pub async fn stop(&self) {
        self.provider.close().await;
    }

    pub async fn render(&self, options: RenderOptions) -> Result<RenderOutcome, RenderError> {
        let handle = self
            .provider
            .create_handle()
            .await
            .ok_or_else(|| RenderError::new(ErrorKind::BrowserUnavailable, "no browser handle available"))?;

        let renderer = TabRenderer::new();
        let result = renderer.render(&handle, options).await;
        handle.close();
        result
    }
}
