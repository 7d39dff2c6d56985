pub mod alert;
pub mod notification;
pub mod principal;

pub use alert::{Alert, AlertStatus};
pub use notification::AlertTriggered;
pub use principal::Principal;
