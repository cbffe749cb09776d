//! database entity models for sea-orm.
//!
//! `upstream_*` tables hold normalized vendor advisories, `advisory*` tables
//! hold locally published advisories, and `supported_products`, `mirrors`,
//! `mirror_*` hold the operator-managed catalog.

pub mod advisory;
pub mod advisory_affected_product;
pub mod advisory_cve;
pub mod advisory_fix;
pub mod advisory_package;
pub mod index_state;
pub mod mirror;
pub mod mirror_block;
pub mod mirror_override;
pub mod mirror_repository;
pub mod supported_product;
pub mod upstream_advisory;
pub mod upstream_affected_product;
pub mod upstream_bugzilla_bug;
pub mod upstream_cve;
pub mod upstream_package;
pub mod workflow_run;
