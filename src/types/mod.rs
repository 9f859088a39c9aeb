mod notification;
mod raw;
mod result;

pub use notification::Notification;
pub use raw::{ExecStatus, RawQueryResult};
pub use result::{JsonKind, ResultView};
