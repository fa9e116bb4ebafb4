//! Grading pipeline.
//!
//! Internal glue that wires the stages together and owns the stage
//! boundaries:
//! normalize → locate → estimate → classify → resolve → score.
//!
//! Algorithmic pieces live in `crate::normalize`, `crate::locator`,
//! `crate::fill`, `crate::classify`, `crate::resolve` and `crate::scoring`.
//! Cancellation is checked at every boundary; a cancelled run returns an
//! error and no report.

mod run;

pub use run::SheetAnalysis;

pub(crate) use run::{analyze_sheet, grade_sheet};
