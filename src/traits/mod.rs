mod driver;

pub use driver::{Connector, Session};
