//! Runtime catalog: canonical language name -> execution details.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

/// Execution details for one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    /// Canonical language name.
    pub language: String,
    /// Alternative names, matched case-insensitively.
    pub aliases: Vec<String>,
    /// Interpreter/compiler command.
    pub runtime: String,
    /// Typical file extension, including the dot.
    pub file_ext: String,
    /// Command prefix to execute code; the source path is appended for
    /// interpreted languages.
    pub run_command: Vec<String>,
    /// Optional compile step; the source path is appended as the last
    /// argument. `None` for interpreted languages.
    pub compile_command: Option<Vec<String>>,
    /// Default container image.
    pub docker_image: String,
    /// Whether bare expressions produce output. Reserved for future use.
    pub repl_mode: bool,
}

macro_rules! strings {
    ($($s:expr),* $(,)?) => {
        vec![$($s.to_string()),*]
    };
}

fn defaults() -> BTreeMap<String, RuntimeInfo> {
    let entries = [
        RuntimeInfo {
            language: "Python".to_string(),
            aliases: strings!["python", "python3", "py"],
            runtime: "python3".to_string(),
            file_ext: ".py".to_string(),
            run_command: strings!["python3"],
            compile_command: None,
            docker_image: "python:3.12-slim".to_string(),
            repl_mode: false,
        },
        RuntimeInfo {
            language: "Go".to_string(),
            aliases: strings!["go", "golang"],
            runtime: "go".to_string(),
            file_ext: ".go".to_string(),
            run_command: strings!["go", "run"],
            compile_command: None,
            docker_image: "golang:1.25-alpine".to_string(),
            repl_mode: false,
        },
        RuntimeInfo {
            language: "JavaScript".to_string(),
            aliases: strings!["javascript", "js", "node", "nodejs"],
            runtime: "node".to_string(),
            file_ext: ".js".to_string(),
            run_command: strings!["node"],
            compile_command: None,
            docker_image: "node:22-slim".to_string(),
            repl_mode: false,
        },
        RuntimeInfo {
            language: "TypeScript".to_string(),
            aliases: strings!["typescript", "ts"],
            runtime: "ts-node".to_string(),
            file_ext: ".ts".to_string(),
            run_command: strings!["npx", "ts-node"],
            compile_command: None,
            docker_image: "node:22-slim".to_string(),
            repl_mode: false,
        },
        RuntimeInfo {
            language: "Rust".to_string(),
            aliases: strings!["rust", "rs"],
            runtime: "rustc".to_string(),
            file_ext: ".rs".to_string(),
            run_command: strings!["/tmp/main"],
            compile_command: Some(strings!["rustc", "-o", "/tmp/main"]),
            docker_image: "rust:1.75-slim".to_string(),
            repl_mode: false,
        },
        RuntimeInfo {
            language: "Java".to_string(),
            aliases: strings!["java"],
            runtime: "java".to_string(),
            file_ext: ".java".to_string(),
            run_command: strings!["java"],
            compile_command: Some(strings!["javac"]),
            docker_image: "eclipse-temurin:21-jdk".to_string(),
            repl_mode: false,
        },
        RuntimeInfo {
            language: "C".to_string(),
            aliases: strings!["c"],
            runtime: "gcc".to_string(),
            file_ext: ".c".to_string(),
            run_command: strings!["/tmp/main"],
            compile_command: Some(strings!["gcc", "-o", "/tmp/main"]),
            docker_image: "gcc:14".to_string(),
            repl_mode: false,
        },
        RuntimeInfo {
            language: "C++".to_string(),
            aliases: strings!["cpp", "c++", "cxx"],
            runtime: "g++".to_string(),
            file_ext: ".cpp".to_string(),
            run_command: strings!["/tmp/main"],
            compile_command: Some(strings!["g++", "-o", "/tmp/main"]),
            docker_image: "gcc:14".to_string(),
            repl_mode: false,
        },
        RuntimeInfo {
            language: "Ruby".to_string(),
            aliases: strings!["ruby", "rb"],
            runtime: "ruby".to_string(),
            file_ext: ".rb".to_string(),
            run_command: strings!["ruby"],
            compile_command: None,
            docker_image: "ruby:3.3-slim".to_string(),
            repl_mode: false,
        },
        RuntimeInfo {
            language: "PHP".to_string(),
            aliases: strings!["php"],
            runtime: "php".to_string(),
            file_ext: ".php".to_string(),
            run_command: strings!["php"],
            compile_command: None,
            docker_image: "php:8.3-cli".to_string(),
            repl_mode: false,
        },
        RuntimeInfo {
            language: "Shell".to_string(),
            aliases: strings!["shell", "bash", "sh"],
            runtime: "bash".to_string(),
            file_ext: ".sh".to_string(),
            run_command: strings!["bash"],
            compile_command: None,
            docker_image: "bash:5".to_string(),
            repl_mode: false,
        },
        RuntimeInfo {
            language: "R".to_string(),
            aliases: strings!["r"],
            runtime: "Rscript".to_string(),
            file_ext: ".R".to_string(),
            run_command: strings!["Rscript"],
            compile_command: None,
            docker_image: "r-base:4.3.2".to_string(),
            repl_mode: false,
        },
        RuntimeInfo {
            language: "Kotlin".to_string(),
            aliases: strings!["kotlin", "kt"],
            runtime: "kotlin".to_string(),
            file_ext: ".kt".to_string(),
            run_command: strings!["kotlin"],
            compile_command: None,
            docker_image: "zenika/kotlin:1.9".to_string(),
            repl_mode: false,
        },
        RuntimeInfo {
            language: "Swift".to_string(),
            aliases: strings!["swift"],
            runtime: "swift".to_string(),
            file_ext: ".swift".to_string(),
            run_command: strings!["swift"],
            compile_command: None,
            docker_image: "swift:5.9".to_string(),
            repl_mode: false,
        },
        RuntimeInfo {
            language: "Scala".to_string(),
            aliases: strings!["scala"],
            runtime: "scala".to_string(),
            file_ext: ".scala".to_string(),
            run_command: strings!["scala"],
            compile_command: None,
            docker_image: "sbtscala/scala-sbt:eclipse-temurin-21.0.1_12_1.9.7_3.3.1".to_string(),
            repl_mode: false,
        },
        RuntimeInfo {
            language: "Perl".to_string(),
            aliases: strings!["perl", "pl"],
            runtime: "perl".to_string(),
            file_ext: ".pl".to_string(),
            run_command: strings!["perl"],
            compile_command: None,
            docker_image: "perl:5.38".to_string(),
            repl_mode: false,
        },
        RuntimeInfo {
            language: "Lua".to_string(),
            aliases: strings!["lua"],
            runtime: "lua".to_string(),
            file_ext: ".lua".to_string(),
            run_command: strings!["lua"],
            compile_command: None,
            docker_image: "nickblah/lua:5.4".to_string(),
            repl_mode: false,
        },
        RuntimeInfo {
            language: "Haskell".to_string(),
            aliases: strings!["haskell", "hs"],
            runtime: "runhaskell".to_string(),
            file_ext: ".hs".to_string(),
            run_command: strings!["runhaskell"],
            compile_command: None,
            docker_image: "haskell:9.4".to_string(),
            repl_mode: false,
        },
        RuntimeInfo {
            language: "Elixir".to_string(),
            aliases: strings!["elixir", "ex"],
            runtime: "elixir".to_string(),
            file_ext: ".exs".to_string(),
            run_command: strings!["elixir"],
            compile_command: None,
            docker_image: "elixir:1.16".to_string(),
            repl_mode: false,
        },
        RuntimeInfo {
            language: "Clojure".to_string(),
            aliases: strings!["clojure", "clj"],
            runtime: "clojure".to_string(),
            file_ext: ".clj".to_string(),
            run_command: strings!["clojure"],
            compile_command: None,
            docker_image: "clojure:tools-deps".to_string(),
            repl_mode: false,
        },
        RuntimeInfo {
            language: "SQL".to_string(),
            aliases: strings!["sql"],
            runtime: "sqlite3".to_string(),
            file_ext: ".sql".to_string(),
            run_command: strings!["sqlite3", ":memory:"],
            compile_command: None,
            docker_image: "keinos/sqlite3:latest".to_string(),
            repl_mode: false,
        },
    ];

    entries
        .into_iter()
        .map(|info| (info.language.clone(), info))
        .collect()
}

/// Default runtime table, keyed by canonical name.
pub static DEFAULT_RUNTIMES: LazyLock<BTreeMap<String, RuntimeInfo>> = LazyLock::new(defaults);

/// Lowercased alias -> canonical name, built once.
static ALIASES: LazyLock<HashMap<String, String>> = LazyLock::new(|| {
    let mut aliases = HashMap::new();
    for info in DEFAULT_RUNTIMES.values() {
        aliases.insert(info.language.to_lowercase(), info.language.clone());
        for alias in &info.aliases {
            aliases.insert(alias.to_lowercase(), info.language.clone());
        }
    }
    aliases
});

/// Look up runtime details by canonical name or alias (case-insensitive).
#[must_use]
pub fn runtime_info(language: &str) -> Option<&'static RuntimeInfo> {
    if let Some(info) = DEFAULT_RUNTIMES.get(language) {
        return Some(info);
    }
    ALIASES
        .get(&language.to_lowercase())
        .and_then(|name| DEFAULT_RUNTIMES.get(name))
}

/// Default container image for a language; empty on miss.
#[must_use]
pub fn docker_image(language: &str) -> &'static str {
    runtime_info(language).map_or("", |info| info.docker_image.as_str())
}

/// File extension for a language (including the dot); empty on miss.
#[must_use]
pub fn file_extension(language: &str) -> &'static str {
    runtime_info(language).map_or("", |info| info.file_ext.as_str())
}

/// Run command for a language; empty on miss.
#[must_use]
pub fn run_command(language: &str) -> Vec<String> {
    runtime_info(language).map_or_else(Vec::new, |info| info.run_command.clone())
}

/// Whether the language requires a compile step.
#[must_use]
pub fn needs_compilation(language: &str) -> bool {
    runtime_info(language).is_some_and(|info| info.compile_command.is_some())
}

/// All supported canonical language names, sorted.
#[must_use]
pub fn supported_languages() -> Vec<String> {
    DEFAULT_RUNTIMES.keys().cloned().collect()
}

/// Mutable overlay over the default catalog.
///
/// Initialization copy-registers every default, so registrations never
/// mutate the globals.
#[derive(Debug, Clone)]
pub struct RuntimeRegistry {
    runtimes: BTreeMap<String, RuntimeInfo>,
    aliases: HashMap<String, String>,
}

impl RuntimeRegistry {
    /// Registry pre-populated with the defaults.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            runtimes: BTreeMap::new(),
            aliases: HashMap::new(),
        };
        for (name, info) in DEFAULT_RUNTIMES.iter() {
            registry.register(name, info.clone());
        }
        registry
    }

    /// Add or replace a runtime, updating the alias table.
    pub fn register(&mut self, name: &str, info: RuntimeInfo) {
        self.aliases.insert(name.to_lowercase(), name.to_string());
        for alias in &info.aliases {
            self.aliases.insert(alias.to_lowercase(), name.to_string());
        }
        self.runtimes.insert(name.to_string(), info);
    }

    /// Look up a runtime by canonical name or alias.
    #[must_use]
    pub fn get(&self, language: &str) -> Option<&RuntimeInfo> {
        if let Some(info) = self.runtimes.get(language) {
            return Some(info);
        }
        self.aliases
            .get(&language.to_lowercase())
            .and_then(|name| self.runtimes.get(name))
    }

    /// All registered canonical names, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.runtimes.keys().cloned().collect()
    }
}

impl Default for RuntimeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_descriptor_resolves_by_name_and_alias() {
        for info in DEFAULT_RUNTIMES.values() {
            assert_eq!(runtime_info(&info.language), Some(info));
            for alias in &info.aliases {
                assert_eq!(runtime_info(alias), Some(info), "alias {alias}");
                assert_eq!(
                    runtime_info(&alias.to_uppercase()),
                    Some(info),
                    "alias {alias} (uppercased)"
                );
            }
        }
    }

    #[test]
    fn projections_return_zero_values_on_miss() {
        assert_eq!(docker_image("COBOL"), "");
        assert_eq!(file_extension("COBOL"), "");
        assert!(run_command("COBOL").is_empty());
        assert!(!needs_compilation("COBOL"));
    }

    #[test]
    fn compiled_languages_carry_a_compile_step() {
        for lang in ["Rust", "C", "C++", "Java"] {
            assert!(needs_compilation(lang), "{lang}");
        }
        for lang in ["Python", "JavaScript", "Ruby"] {
            assert!(!needs_compilation(lang), "{lang}");
        }
    }

    #[test]
    fn registry_overlay_does_not_touch_defaults() {
        let mut registry = RuntimeRegistry::new();
        registry.register(
            "Zig",
            RuntimeInfo {
                language: "Zig".to_string(),
                aliases: strings!["zig"],
                runtime: "zig".to_string(),
                file_ext: ".zig".to_string(),
                run_command: strings!["zig", "run"],
                compile_command: None,
                docker_image: "ziglang/zig:0.13".to_string(),
                repl_mode: false,
            },
        );

        assert!(registry.get("zig").is_some());
        assert!(runtime_info("zig").is_none());
        assert_eq!(registry.list().len(), DEFAULT_RUNTIMES.len() + 1);
    }

    #[test]
    fn registry_replaces_on_re_register() {
        let mut registry = RuntimeRegistry::new();
        let mut custom = registry.get("Python").cloned().unwrap();
        custom.docker_image = "python:3.13".to_string();
        registry.register("Python", custom);

        assert_eq!(registry.get("py").unwrap().docker_image, "python:3.13");
        assert_eq!(runtime_info("py").unwrap().docker_image, "python:3.12-slim");
    }
}
