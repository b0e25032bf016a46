pub mod phone;
pub mod template;

pub use phone::{normalize_number, prepare_recipients, NormalizedRecipients, RawRecipient, E164};
pub use template::render_template;
