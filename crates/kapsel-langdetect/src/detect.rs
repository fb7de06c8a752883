//! Language detection pipeline.
//!
//! Stages run in a fixed order and each may resolve or pass:
//! filename/extension, shebang, content lookup, heuristic patterns. A miss
//! is not an error; it is a result with [`DetectMethod::Unknown`] and zero
//! confidence.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::classify;

/// How a language was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectMethod {
    /// Exact filename match.
    Filename,
    /// File extension match.
    Extension,
    /// Shebang line.
    Shebang,
    /// Single content candidate.
    Content,
    /// Best of several content candidates.
    Classifier,
    /// Regex pattern scoring.
    Heuristic,
    /// User-registered extension mapping.
    Custom,
    /// Nothing resolved.
    Unknown,
}

impl fmt::Display for DetectMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Filename => "filename",
            Self::Extension => "extension",
            Self::Shebang => "shebang",
            Self::Content => "content",
            Self::Classifier => "classifier",
            Self::Heuristic => "heuristic",
            Self::Custom => "custom",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Outcome of a detection attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectResult {
    /// Detected language; empty on failure.
    pub language: String,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// The stage that resolved the language.
    pub method: DetectMethod,
}

impl DetectResult {
    fn resolved(language: impl Into<String>, confidence: f64, method: DetectMethod) -> Self {
        Self {
            language: language.into(),
            confidence,
            method,
        }
    }

    /// The failure result: empty language, zero confidence, `unknown`.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            language: String::new(),
            confidence: 0.0,
            method: DetectMethod::Unknown,
        }
    }
}

/// Detection configuration. Each stage can be toggled independently; the
/// filename stage runs whenever a filename is provided.
#[derive(Debug, Clone)]
pub struct DetectOptions {
    /// Filename hint (e.g. `main.py`); empty disables the filename stage.
    pub filename: String,
    /// Enable the content-lookup stage.
    pub use_content: bool,
    /// Enable the shebang stage.
    pub use_shebang: bool,
    /// Enable the heuristic-pattern stage.
    pub use_heuristics: bool,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            filename: String::new(),
            use_content: true,
            use_shebang: true,
            use_heuristics: true,
        }
    }
}

/// Programming-language detector.
///
/// Stateless after construction; two calls with the same inputs yield
/// equal results.
pub struct Detector {
    custom_mappings: HashMap<String, String>,
    patterns: Vec<(&'static str, Vec<Regex>)>,
}

impl Detector {
    /// Detector with the built-in pattern table and no custom mappings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            custom_mappings: HashMap::new(),
            patterns: compile_patterns(),
        }
    }

    /// Map a file extension (with dot) to a language, checked before the
    /// built-in tables in [`Detector::detect_from_filename`].
    pub fn add_mapping(&mut self, extension: impl Into<String>, language: impl Into<String>) {
        self.custom_mappings.insert(extension.into(), language.into());
    }

    /// Identify the language of `code`.
    #[must_use]
    pub fn detect(&self, code: &str, opts: &DetectOptions) -> DetectResult {
        // Stage 1: filename and extension.
        if !opts.filename.is_empty() {
            if let Some(lang) = classify::language_by_filename(&opts.filename) {
                return DetectResult::resolved(lang, 1.0, DetectMethod::Filename);
            }
            if let Some(lang) = classify::language_by_extension(&opts.filename) {
                return DetectResult::resolved(lang, 0.95, DetectMethod::Extension);
            }
        }

        // Stage 2: shebang.
        if opts.use_shebang && code.trim_start().starts_with("#!") {
            if let Some(lang) = classify::language_by_shebang(code) {
                return DetectResult::resolved(lang, 0.95, DetectMethod::Shebang);
            }
        }

        // Stage 3: content candidates for the extension.
        if opts.use_content {
            let candidates = classify::candidates_by_extension(&opts.filename);
            match candidates {
                [] => {}
                [single] => {
                    return DetectResult::resolved(*single, 0.9, DetectMethod::Content);
                }
                several => {
                    if let Some(lang) = classify::classify(code, several) {
                        return DetectResult::resolved(lang, 0.8, DetectMethod::Classifier);
                    }
                }
            }
        }

        // Stage 4: heuristic patterns.
        if opts.use_heuristics {
            if let Some(result) = self.detect_by_patterns(code) {
                return result;
            }
        }

        DetectResult::unknown()
    }

    /// Score the per-language pattern lists and pick the best match.
    ///
    /// Confidence is `clamp(matches / 5, 0.2, 0.8)`. Languages are visited
    /// in alphabetical order and a strictly greater score is required to
    /// displace the current best, so ties resolve deterministically.
    fn detect_by_patterns(&self, code: &str) -> Option<DetectResult> {
        let mut best: Option<(&'static str, usize)> = None;

        for (language, patterns) in &self.patterns {
            let score = patterns.iter().filter(|p| p.is_match(code)).count();
            let beats = match best {
                None => score >= 1,
                Some((_, best_score)) => score > best_score,
            };
            if beats {
                best = Some((language, score));
            }
        }

        best.map(|(language, score)| {
            let confidence = (score as f64 / 5.0).clamp(0.2, 0.8);
            DetectResult::resolved(language, confidence, DetectMethod::Heuristic)
        })
    }

    /// Detect from a filename alone, without looking at code.
    ///
    /// Custom mappings are consulted first; extension matches that name a
    /// known language resolve with full confidence.
    #[must_use]
    pub fn detect_from_filename(&self, filename: &str) -> DetectResult {
        let ext = Path::new(filename)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        if let Some(lang) = self.custom_mappings.get(&ext) {
            return DetectResult::resolved(lang.clone(), 1.0, DetectMethod::Custom);
        }

        if let Some(lang) = classify::language_by_filename(filename) {
            return DetectResult::resolved(lang, 1.0, DetectMethod::Filename);
        }

        if let Some(lang) = classify::language_by_extension(filename) {
            return DetectResult::resolved(lang, 1.0, DetectMethod::Extension);
        }

        DetectResult::unknown()
    }
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

/// Fast detection: content and shebang only, no heuristics. Returns just
/// the language name (empty on failure).
#[must_use]
pub fn quick(code: &str) -> String {
    let detector = Detector::new();
    detector
        .detect(
            code,
            &DetectOptions {
                use_heuristics: false,
                ..DetectOptions::default()
            },
        )
        .language
}

/// Comprehensive detection with every stage enabled.
#[must_use]
pub fn full(code: &str, filename: &str) -> DetectResult {
    let detector = Detector::new();
    detector.detect(
        code,
        &DetectOptions {
            filename: filename.to_string(),
            ..DetectOptions::default()
        },
    )
}

/// Pattern table for the heuristic stage, sorted by language name.
fn compile_patterns() -> Vec<(&'static str, Vec<Regex>)> {
    let table: &[(&str, &[&str])] = &[
        (
            "C",
            &[
                r"(?m)^#include\s*<",
                r"(?m)^int\s+main\s*\(",
                r"printf\s*\(",
                r"(?m)^(void|int|char|float|double)\s+\w+\s*\(",
            ],
        ),
        (
            "C#",
            &[
                r"(?m)^using\s+System",
                r"(?m)^namespace\s+\w+",
                r"(?m)^class\s+\w+",
                r"Console\.(Write|Read)",
                r"(?m)^public\s+(class|interface|enum)",
            ],
        ),
        (
            "C++",
            &[
                r"(?m)^#include\s*<iostream>",
                r"std::",
                r"cout\s*<<",
                r"(?m)^class\s+\w+\s*[:{]",
                r"(?m)^namespace\s+\w+",
            ],
        ),
        (
            "Go",
            &[
                r"(?m)^package\s+\w+",
                r"\bpackage\s+main\b",
                r"(?m)^import\s*\(",
                r"(?m)^func\s+\w*\s*\(",
                r"\bfunc\s+main\s*\(",
                r"(?m)^type\s+\w+\s+(struct|interface)",
                r":=",
                r"fmt\.Print",
                r"fmt\.Sprintf",
                r"fmt\.Errorf",
                r"errors\.New",
                r"make\s*\(\s*(map|chan|\[\])",
                r"go\s+func\s*\(",
                r"<-\s*\w+",
                r"defer\s+",
                r"panic\s*\(",
                r"recover\s*\(",
                r"range\s+\w+",
                r"\[\]byte",
                r"\[\]string",
                r"map\[string\]",
                r"interface\{\}",
                r"struct\s*\{",
            ],
        ),
        (
            "Java",
            &[
                r"(?m)^public\s+class\s+\w+",
                r"(?m)^import\s+java\.",
                r"(?m)^package\s+\w+(\.\w+)*;",
                r"System\.out\.print",
                r"public\s+static\s+void\s+main",
            ],
        ),
        (
            "JavaScript",
            &[
                r"(?m)^const\s+\w+\s*=",
                r"(?m)^let\s+\w+\s*=",
                r"(?m)^var\s+\w+\s*=",
                r"(?m)^function\s+\w+\s*\(",
                r"=>\s*[{\(]",
                r"console\.log\s*\(",
                r"console\.error\s*\(",
                r"console\.warn\s*\(",
                r"require\s*\(",
                r"module\.exports",
                r"exports\.",
                r"document\.",
                r"window\.",
                r"async\s+function",
                r"await\s+",
                r"\.then\s*\(",
                r"\.catch\s*\(",
                r"JSON\.parse",
                r"JSON\.stringify",
                r"Array\.",
                r"Object\.",
                r"Promise\.",
                r"new\s+Promise",
                r"setTimeout\s*\(",
                r"setInterval\s*\(",
            ],
        ),
        (
            "Kotlin",
            &[
                r"(?m)^fun\s+\w+",
                r"(?m)^val\s+\w+",
                r"(?m)^var\s+\w+",
                r"(?m)^class\s+\w+",
                r"println\s*\(",
            ],
        ),
        (
            "PHP",
            &[
                r"(?m)^<\?php",
                r"\$\w+\s*=",
                r"(?m)^function\s+\w+\s*\(",
                r"echo\s+",
                r"->\w+\(",
            ],
        ),
        (
            "Python",
            &[
                r"(?m)^import\s+\w+",
                r"(?m)^from\s+\w+\s+import",
                r"(?m)^def\s+\w+\s*\(",
                r"(?m)^class\s+\w+.*:",
                r"(?m)^\s*print\s*\(",
                r"exec\s*\(",
                r"range\s*\(",
                r"len\s*\(",
                r"str\s*\(",
                r"int\s*\(",
                r"list\s*\(",
                r"dict\s*\(",
                r"\.append\s*\(",
                r"\.join\s*\(",
                r"time\.sleep",
                r"for\s+\w+\s+in\s+",
                r"if\s+__name__\s*==",
                r"lambda\s+\w*:",
                r"\[\s*\w+\s+for\s+\w+\s+in",
            ],
        ),
        (
            "R",
            &[
                r"(?m)^library\s*\(",
                r"<-\s*",
                r"(?m)^function\s*\(",
                r"data\.frame\s*\(",
                r"ggplot\s*\(",
            ],
        ),
        (
            "Ruby",
            &[
                r#"(?m)^require\s+['"]"#,
                r"(?m)^def\s+\w+",
                r"(?m)^class\s+\w+",
                r"(?m)^module\s+\w+",
                r"\.each\s+do\s*\|",
                r"puts\s+",
            ],
        ),
        (
            "Rust",
            &[
                r"(?m)^fn\s+\w+",
                r"\bfn\s+main\s*\(",
                r"(?m)^use\s+\w+",
                r"(?m)^mod\s+\w+",
                r"(?m)^struct\s+\w+",
                r"(?m)^impl\s+",
                r"(?m)^let\s+mut\s+",
                r"(?m)^pub\s+(fn|struct|enum|mod)",
                r"println!\s*\(",
                r"print!\s*\(",
                r"eprintln!\s*\(",
                r"format!\s*\(",
                r"vec!\s*\[",
                r"panic!\s*\(",
                r"->\s*(i32|i64|u32|u64|f32|f64|bool|String|&str|\(\))",
                r"&mut\s+\w+",
                r"&str",
                r"::new\s*\(",
                r"\.unwrap\s*\(",
                r"\.expect\s*\(",
                r"Option<",
                r"Result<",
                r"Some\s*\(",
                r"None\b",
                r"Ok\s*\(",
                r"Err\s*\(",
            ],
        ),
        (
            "SQL",
            &[
                r"(?mi)^SELECT\s+",
                r"(?mi)^INSERT\s+INTO",
                r"(?mi)^UPDATE\s+\w+\s+SET",
                r"(?mi)^CREATE\s+TABLE",
                r"(?mi)^DROP\s+TABLE",
            ],
        ),
        (
            "Scala",
            &[
                r"(?m)^object\s+\w+",
                r"(?m)^def\s+\w+",
                r"(?m)^val\s+\w+",
                r"(?m)^var\s+\w+",
                r"println\s*\(",
            ],
        ),
        (
            "Shell",
            &[
                r"(?m)^#!/bin/(ba)?sh",
                r"(?m)^\s*if\s+\[\s+",
                r"(?m)^\s*for\s+\w+\s+in\s+",
                r"\$\{?\w+\}?",
                r"(?m)^\s*echo\s+",
            ],
        ),
        (
            "Swift",
            &[
                r"(?m)^import\s+(Foundation|UIKit|SwiftUI|Cocoa|Darwin)",
                r"(?m)^func\s+\w+\s*\([^)]*\)\s*(->|\{)",
                r"(?m)^let\s+\w+\s*:\s*\w+",
                r"(?m)^var\s+\w+\s*:\s*\w+",
                r"(?m)^class\s+\w+\s*:\s*\w+",
                r"(?m)^struct\s+\w+",
                r"(?m)^enum\s+\w+",
                r"(?m)^protocol\s+\w+",
                r"guard\s+let",
                r"if\s+let",
                r"@IBOutlet",
                r"@IBAction",
                r"override\s+func",
            ],
        ),
        (
            "TypeScript",
            &[
                r"(?m)^interface\s+\w+",
                r"(?m)^type\s+\w+\s*=",
                r":\s*(string|number|boolean|any)\b",
                r"<[A-Z]\w*>",
            ],
        ),
    ];

    table
        .iter()
        .map(|(language, patterns)| {
            let compiled = patterns
                .iter()
                .map(|p| Regex::new(p).expect("built-in detection pattern must compile"))
                .collect();
            (*language, compiled)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_stage_beats_everything() {
        let detector = Detector::new();
        let result = detector.detect(
            "FROM alpine:3.20",
            &DetectOptions {
                filename: "Dockerfile".to_string(),
                ..DetectOptions::default()
            },
        );
        assert_eq!(result.language, "Dockerfile");
        assert_eq!(result.method, DetectMethod::Filename);
        assert!((result.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn extension_stage_resolves_with_095() {
        let detector = Detector::new();
        let result = detector.detect(
            "print('x')",
            &DetectOptions {
                filename: "script.py".to_string(),
                ..DetectOptions::default()
            },
        );
        assert_eq!(result.language, "Python");
        assert_eq!(result.method, DetectMethod::Extension);
        assert!((result.confidence - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn shebang_stage_resolves_python() {
        let detector = Detector::new();
        let result = detector.detect("#!/usr/bin/env python3\nprint('x')", &DetectOptions::default());
        assert_eq!(result.language, "Python");
        assert_eq!(result.method, DetectMethod::Shebang);
        assert!((result.confidence - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn shebang_stage_respects_toggle() {
        let detector = Detector::new();
        let result = detector.detect(
            "#!/usr/bin/env python3\nprint('x')",
            &DetectOptions {
                use_shebang: false,
                use_content: false,
                ..DetectOptions::default()
            },
        );
        // Falls through to heuristics.
        assert_eq!(result.method, DetectMethod::Heuristic);
    }

    #[test]
    fn ambiguous_header_goes_through_classifier() {
        let detector = Detector::new();
        let result = detector.detect(
            "#include <iostream>\nint main() { std::cout << 1; }",
            &DetectOptions {
                filename: "main.h".to_string(),
                ..DetectOptions::default()
            },
        );
        assert_eq!(result.language, "C++");
        assert_eq!(result.method, DetectMethod::Classifier);
        assert!((result.confidence - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn heuristics_identify_go() {
        let detector = Detector::new();
        let code = "package main\n\nimport \"fmt\"\n\nfunc main() {\n\tfmt.Println(\"hi\")\n}\n";
        let result = detector.detect(code, &DetectOptions::default());
        assert_eq!(result.language, "Go");
        assert_eq!(result.method, DetectMethod::Heuristic);
        assert!(result.confidence >= 0.2 && result.confidence <= 0.8);
    }

    #[test]
    fn heuristics_identify_bare_print_as_python() {
        let detector = Detector::new();
        let result = detector.detect("print(\"Hello\")", &DetectOptions::default());
        assert_eq!(result.language, "Python");
        assert_eq!(result.method, DetectMethod::Heuristic);
    }

    #[test]
    fn unknown_when_every_stage_misses() {
        let detector = Detector::new();
        let result = detector.detect("zzz qqq", &DetectOptions::default());
        assert_eq!(result, DetectResult::unknown());
    }

    #[test]
    fn detection_is_pure() {
        let detector = Detector::new();
        let code = "const x = 1;\nconsole.log(x);";
        let a = detector.detect(code, &DetectOptions::default());
        let b = detector.detect(code, &DetectOptions::default());
        assert_eq!(a, b);
    }

    #[test]
    fn detect_from_filename_prefers_custom_mappings() {
        let mut detector = Detector::new();
        detector.add_mapping(".star", "Python");

        let custom = detector.detect_from_filename("rules.star");
        assert_eq!(custom.language, "Python");
        assert_eq!(custom.method, DetectMethod::Custom);
        assert!((custom.confidence - 1.0).abs() < f64::EPSILON);

        let known = detector.detect_from_filename("main.go");
        assert_eq!(known.language, "Go");
        assert!((known.confidence - 1.0).abs() < f64::EPSILON);

        let miss = detector.detect_from_filename("data.bin");
        assert_eq!(miss.method, DetectMethod::Unknown);
    }

    #[test]
    fn quick_skips_heuristics() {
        assert_eq!(quick("#!/bin/bash\necho hi"), "Shell");
        // Bare code resolves only through heuristics, which quick disables.
        assert_eq!(quick("print(\"Hello\")"), "");
    }

    #[test]
    fn full_uses_the_filename_hint() {
        let result = full("puts 'hi'", "script.rb");
        assert_eq!(result.language, "Ruby");
        assert_eq!(result.method, DetectMethod::Extension);
    }
}
