pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{pkginfo, settings, write_apk, RecordingRunner};
