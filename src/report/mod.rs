pub mod overlay;
pub mod submission;

pub use overlay::{render_overlay, write_overlays, ClassLabels, Overlay, OverlayStyle};
pub use submission::{prediction_string, write_submission, write_submission_file};
