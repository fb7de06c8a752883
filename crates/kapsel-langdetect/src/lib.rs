//! # kapsel-langdetect
//!
//! Language detection and the runtime catalog for the kapsel sandbox SDK.
//!
//! Detection binds a blob of source code to a canonical language name; the
//! catalog binds that name to an interpreter/compiler, a file extension and
//! a default container image.
//!
//! ## Example
//!
//! ```rust
//! use kapsel_langdetect::{full, runtime_info};
//!
//! let detected = full("#!/usr/bin/env python3\nprint('hi')", "");
//! assert_eq!(detected.language, "Python");
//!
//! let info = runtime_info(&detected.language).unwrap();
//! assert_eq!(info.file_ext, ".py");
//! ```

mod classify;
mod detect;
mod runtime;

pub use classify::{
    candidates_by_extension, language_by_extension, language_by_filename, language_by_shebang,
};
pub use detect::{full, quick, DetectMethod, DetectOptions, DetectResult, Detector};
pub use runtime::{
    docker_image, file_extension, needs_compilation, run_command, runtime_info,
    supported_languages, RuntimeInfo, RuntimeRegistry, DEFAULT_RUNTIMES,
};
