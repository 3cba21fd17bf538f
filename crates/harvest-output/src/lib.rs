pub mod flatten;
pub mod report;
pub mod sink;

pub use report::render_report;
pub use sink::FileSink;
