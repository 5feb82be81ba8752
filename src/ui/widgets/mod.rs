// src/ui/widgets/mod.rs

pub mod analysis_view; // Findings list and knowledge-base details.
pub mod disclaimer_popup;
pub mod footer; // Key hints for the current state.
pub mod input; // Target box and crawl tier.
pub mod summary;
