//! Source-classification tables backing the detector.
//!
//! Exact-filename and extension lookups, shebang parsing, and a small
//! token-scoring classifier for extensions shared by several languages.
//! All tie-breaks are alphabetical over the canonical name so results are
//! deterministic.

use std::path::Path;

/// Well-known exact filenames without a usable extension.
const FILENAMES: &[(&str, &str)] = &[
    ("Dockerfile", "Dockerfile"),
    ("Makefile", "Makefile"),
    ("GNUmakefile", "Makefile"),
    ("Rakefile", "Ruby"),
    ("Gemfile", "Ruby"),
];

/// Extension -> candidate languages. Single-candidate entries resolve
/// immediately; multi-candidate entries go through [`classify`].
const EXTENSIONS: &[(&str, &[&str])] = &[
    (".py", &["Python"]),
    (".go", &["Go"]),
    (".js", &["JavaScript"]),
    (".mjs", &["JavaScript"]),
    (".cjs", &["JavaScript"]),
    (".ts", &["TypeScript"]),
    (".rs", &["Rust"]),
    (".java", &["Java"]),
    (".c", &["C"]),
    (".h", &["C", "C++"]),
    (".cpp", &["C++"]),
    (".cc", &["C++"]),
    (".cxx", &["C++"]),
    (".hpp", &["C++"]),
    (".cs", &["C#"]),
    (".rb", &["Ruby"]),
    (".php", &["PHP"]),
    (".sh", &["Shell"]),
    (".bash", &["Shell"]),
    (".r", &["R"]),
    (".kt", &["Kotlin"]),
    (".kts", &["Kotlin"]),
    (".swift", &["Swift"]),
    (".scala", &["Scala"]),
    (".pl", &["Perl"]),
    (".pm", &["Perl"]),
    (".lua", &["Lua"]),
    (".hs", &["Haskell"]),
    (".ex", &["Elixir"]),
    (".exs", &["Elixir"]),
    (".clj", &["Clojure"]),
    (".sql", &["SQL"]),
];

/// Shebang interpreter -> language.
const INTERPRETERS: &[(&str, &str)] = &[
    ("python", "Python"),
    ("python2", "Python"),
    ("python3", "Python"),
    ("node", "JavaScript"),
    ("nodejs", "JavaScript"),
    ("deno", "TypeScript"),
    ("sh", "Shell"),
    ("bash", "Shell"),
    ("zsh", "Shell"),
    ("dash", "Shell"),
    ("ksh", "Shell"),
    ("ruby", "Ruby"),
    ("perl", "Perl"),
    ("php", "PHP"),
    ("Rscript", "R"),
    ("lua", "Lua"),
    ("elixir", "Elixir"),
    ("runhaskell", "Haskell"),
    ("runghc", "Haskell"),
    ("swift", "Swift"),
    ("scala", "Scala"),
];

/// Marker tokens per language, scored by the classifier when an extension
/// is ambiguous. Intentionally small; the heuristic stage covers the
/// no-filename case.
const MARKERS: &[(&str, &[&str])] = &[
    ("C", &["printf(", "malloc(", "#include <stdio.h>", "void ", "->"]),
    (
        "C++",
        &["std::", "#include <iostream>", "cout", "namespace", "template<", "::"],
    ),
    (
        "JavaScript",
        &["console.log", "=>", "const ", "require(", "module.exports"],
    ),
    (
        "TypeScript",
        &["interface ", ": string", ": number", "console.log", "=>"],
    ),
];

/// Exact-filename lookup (e.g. `Makefile`, `Dockerfile`).
#[must_use]
pub fn language_by_filename(filename: &str) -> Option<&'static str> {
    let base = Path::new(filename).file_name()?.to_str()?;
    FILENAMES
        .iter()
        .find(|(name, _)| *name == base)
        .map(|(_, lang)| *lang)
}

/// Candidate languages for a filename's extension. Empty when the
/// extension is unknown or absent.
#[must_use]
pub fn candidates_by_extension(filename: &str) -> &'static [&'static str] {
    let Some(ext) = extension_of(filename) else {
        return &[];
    };
    EXTENSIONS
        .iter()
        .find(|(e, _)| e.eq_ignore_ascii_case(&ext))
        .map_or(&[], |(_, candidates)| *candidates)
}

/// Unambiguous extension lookup; `None` when unknown or shared by several
/// languages.
#[must_use]
pub fn language_by_extension(filename: &str) -> Option<&'static str> {
    match candidates_by_extension(filename) {
        [single] => Some(*single),
        _ => None,
    }
}

fn extension_of(filename: &str) -> Option<String> {
    let base = Path::new(filename).file_name()?.to_str()?;
    let dot = base.rfind('.')?;
    if dot == 0 {
        // Dotfiles like ".bashrc" have no extension in this sense.
        return None;
    }
    Some(base[dot..].to_string())
}

/// Resolve the interpreter named by a shebang line.
///
/// Handles `#!/usr/bin/env python3` indirection and strips trailing
/// version digits (`python3.12` matches `python3`, then `python`).
#[must_use]
pub fn language_by_shebang(code: &str) -> Option<&'static str> {
    let first_line = code.trim_start().lines().next()?;
    let rest = first_line.strip_prefix("#!")?;

    let mut tokens = rest.split_whitespace();
    let mut program = Path::new(tokens.next()?).file_name()?.to_str()?;
    if program == "env" {
        program = tokens.next()?;
    }

    interpreter_language(program)
        .or_else(|| interpreter_language(program.trim_end_matches(|c: char| c == '.' || c.is_ascii_digit())))
}

fn interpreter_language(program: &str) -> Option<&'static str> {
    INTERPRETERS
        .iter()
        .find(|(name, _)| *name == program)
        .map(|(_, lang)| *lang)
}

/// Pick the best of `candidates` for `code` by marker-token scoring.
///
/// Ties break alphabetically; candidates without marker tables score zero.
/// Returns the alphabetically-first candidate when nothing scores.
#[must_use]
pub fn classify(code: &str, candidates: &[&'static str]) -> Option<&'static str> {
    let mut sorted: Vec<&'static str> = candidates.to_vec();
    sorted.sort_unstable();

    let mut best: Option<(&'static str, usize)> = None;
    for candidate in sorted {
        let score = MARKERS
            .iter()
            .find(|(lang, _)| *lang == candidate)
            .map_or(0, |(_, markers)| {
                markers.iter().filter(|m| code.contains(*m)).count()
            });
        let beats = match best {
            None => true,
            Some((_, best_score)) => score > best_score,
        };
        if beats {
            best = Some((candidate, score));
        }
    }
    best.map(|(lang, _)| lang)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_filenames_resolve() {
        assert_eq!(language_by_filename("Dockerfile"), Some("Dockerfile"));
        assert_eq!(language_by_filename("src/Rakefile"), Some("Ruby"));
        assert_eq!(language_by_filename("main.py"), None);
    }

    #[test]
    fn extensions_resolve_case_insensitively() {
        assert_eq!(language_by_extension("main.py"), Some("Python"));
        assert_eq!(language_by_extension("analysis.R"), Some("R"));
        assert_eq!(language_by_extension("weird.xyz"), None);
        assert_eq!(language_by_extension(".bashrc"), None);
    }

    #[test]
    fn ambiguous_extensions_stay_ambiguous() {
        assert_eq!(language_by_extension("defs.h"), None);
        assert_eq!(candidates_by_extension("defs.h"), &["C", "C++"]);
    }

    #[test]
    fn shebang_handles_env_and_versions() {
        assert_eq!(language_by_shebang("#!/usr/bin/env python3\nx = 1"), Some("Python"));
        assert_eq!(language_by_shebang("#!/bin/bash\necho hi"), Some("Shell"));
        assert_eq!(language_by_shebang("#!/usr/bin/python3.12\n"), Some("Python"));
        assert_eq!(language_by_shebang("print('no shebang')"), None);
    }

    #[test]
    fn classifier_separates_c_from_cpp() {
        let cpp = "#include <iostream>\nint main() { std::cout << 1; }";
        assert_eq!(classify(cpp, &["C", "C++"]), Some("C++"));

        let c = "#include <stdio.h>\nint main() { printf(\"1\"); }";
        assert_eq!(classify(c, &["C", "C++"]), Some("C"));
    }

    #[test]
    fn classifier_tie_breaks_alphabetically() {
        assert_eq!(classify("nothing matches", &["C++", "C"]), Some("C"));
    }
}
