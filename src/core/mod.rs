// src/core/mod.rs

// The scan engine. The TUI in `ui` and `app` only talks to `orchestrator`
// and reads back what the `store` holds.

/// Headless browser seam (Chrome DevTools driver plus a scripted fake for tests).
pub mod browser;

/// Runtime knobs, overridable through environment variables.
pub mod config;

pub mod error;

/// Human-readable explanations and remediation advice for every finding type.
pub mod knowledge_base;

/// Records, scan requests and report read models.
pub mod models;

/// Drives a scan request from target derivation to the terminal execution status.
pub mod orchestrator;

/// Probes and detectors run against each target (DNS, ports, pages, fingerprints).
pub mod scanner;

/// Persistence seam and the in-memory implementation.
pub mod store;

pub mod tracker;
