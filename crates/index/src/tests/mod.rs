//! End-to-end scenarios across the builder, version catalog and search engine.

mod build_scenarios;
