//! HTTP surface (spec §6): `POST /render` plus a `GET /healthz`
//! liveness probe (`SPEC_FULL.md`'s ambient-stack supplement).

pub mod dto;
pub mod routes;

pub use routes::{build_router, AppState};
