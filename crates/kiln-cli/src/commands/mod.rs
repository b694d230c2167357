pub mod dispatch;
pub mod import;
pub mod preview;
pub mod rules;
pub mod scan;
