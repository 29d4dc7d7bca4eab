// SensorCache Server - HTTP front end for the telemetry engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # SensorCache Server
//!
//! HTTP ingestion and query API over [`sensorcache::TelemetryService`], with
//! Prometheus metrics and CSV backfill.
//!
//! ## Routes
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | POST | `/temp/` | `{"sensorId": "...", "temp": 21}` → empty `200` |
//! | GET | `/temp/daily_max/{sensorId}/{date}` | integer |
//! | GET | `/temp/daily_min/{sensorId}/{date}` | integer |
//! | GET | `/temp/daily_avg/{sensorId}/{date}` | decimal |
//! | GET | `/temp/weekly_max/{sensorId}` | integer |
//! | GET | `/temp/weekly_min/{sensorId}` | integer |
//! | GET | `/temp/weekly_avg/{sensorId}` | decimal |
//! | GET | `/health`, `/ready`, `/status`, `/metrics` | operational |

pub mod api;
pub mod metrics;
pub mod replay;

pub use api::{router, ApiError, AppState};
