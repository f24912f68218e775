//! Renders a URL's post-JavaScript HTML over the Chrome DevTools
//! Protocol and serves it through a small local HTTP surface.
//!
//! A [`provider::Provider`] (either [`provider::supervisor::SupervisorProvider`]
//! over a supervised headless Chrome pair, or [`provider::external::ExternalProvider`]
//! against a remote debugging endpoint) hands out [`handle::Handle`]s; a
//! [`render::RenderManager`] uses one to drive [`render::tab::TabRenderer`]
//! for each request.

pub mod backoff;
pub mod browser_js;
pub mod cdp;
pub mod config;
pub mod dialog;
pub mod error;
pub mod events;
pub mod handle;
pub mod http;
pub mod process;
pub mod provider;
pub mod render;
pub mod trigger;
pub mod watcher;

pub use error::{ErrorKind, LogicError, RenderError};
pub use render::{RenderManager, RenderOptions, RenderOutcome};
