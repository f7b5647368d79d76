use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Language a buffer is edited as
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LangType {
    #[default]
    Text,
    Bash,
    Batch,
    C,
    Cpp,
    CSharp,
    CMake,
    Css,
    Go,
    Html,
    Ini,
    Java,
    JavaScript,
    Json,
    Lua,
    Makefile,
    Markdown,
    Perl,
    Php,
    Python,
    Ruby,
    Rust,
    Sql,
    Toml,
    Xml,
    Yaml,
    /// User-defined language, by name
    User(String),
}

impl LangType {
    /// Built-in extension table, case-insensitive
    pub fn from_extension(ext: &str) -> Option<LangType> {
        let lang = match ext.to_ascii_lowercase().as_str() {
            "txt" | "log" => LangType::Text,
            "sh" | "bash" | "zsh" | "bsh" => LangType::Bash,
            "bat" | "cmd" | "nt" => LangType::Batch,
            "c" | "h" => LangType::C,
            "cpp" | "cxx" | "cc" | "hpp" | "hxx" | "hh" | "ino" => LangType::Cpp,
            "cs" => LangType::CSharp,
            "cmake" => LangType::CMake,
            "css" => LangType::Css,
            "go" => LangType::Go,
            "html" | "htm" | "shtml" | "xhtml" => LangType::Html,
            "ini" | "inf" | "cfg" => LangType::Ini,
            "java" => LangType::Java,
            "js" | "mjs" | "cjs" | "jsx" => LangType::JavaScript,
            "json" => LangType::Json,
            "lua" => LangType::Lua,
            "mak" | "mk" => LangType::Makefile,
            "md" | "markdown" => LangType::Markdown,
            "pl" | "pm" | "plx" => LangType::Perl,
            "php" | "php3" | "php4" | "php5" | "phtml" => LangType::Php,
            "py" | "pyw" => LangType::Python,
            "rb" | "rbw" | "rake" | "gemspec" => LangType::Ruby,
            "rs" => LangType::Rust,
            "sql" => LangType::Sql,
            "toml" => LangType::Toml,
            "xml" | "xsl" | "xslt" | "xsd" | "svg" | "xaml" | "plist" => LangType::Xml,
            "yml" | "yaml" => LangType::Yaml,
            _ => return None,
        };
        Some(lang)
    }

    /// Well-known extension-less file names
    pub fn from_file_name(name: &str) -> Option<LangType> {
        let lang = match name.to_ascii_lowercase().as_str() {
            "makefile" | "gnumakefile" => LangType::Makefile,
            "cmakelists.txt" => LangType::CMake,
            "sconstruct" | "sconscript" | "wscript" => LangType::Python,
            "rakefile" | "vagrantfile" => LangType::Ruby,
            "crontab" => LangType::Bash,
            _ => return None,
        };
        Some(lang)
    }

    /// Guess from the first line of a document
    pub fn from_first_line(line: &str) -> Option<LangType> {
        let line = line.trim_start_matches('\u{FEFF}');

        if let Some(shebang) = line.strip_prefix("#!") {
            let interpreter = shebang.trim();
            let candidates = [
                ("python", LangType::Python),
                ("perl", LangType::Perl),
                ("php", LangType::Php),
                ("ruby", LangType::Ruby),
                ("node", LangType::JavaScript),
                ("bash", LangType::Bash),
                ("sh", LangType::Bash),
            ];
            return candidates
                .into_iter()
                .find(|(name, _)| interpreter.contains(name))
                .map(|(_, lang)| lang);
        }

        let lower = line.trim_start().to_ascii_lowercase();
        if lower.starts_with("<?xml") {
            Some(LangType::Xml)
        } else if lower.starts_with("<?php") {
            Some(LangType::Php)
        } else if lower.starts_with("<html") || lower.starts_with("<!doctype html") {
            Some(LangType::Html)
        } else if lower.starts_with("<?") {
            Some(LangType::Php)
        } else {
            None
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, LangType::User(_))
    }

    pub fn display(&self) -> &str {
        match self {
            LangType::Text => "Normal text",
            LangType::Bash => "Shell",
            LangType::Batch => "Batch",
            LangType::C => "C",
            LangType::Cpp => "C++",
            LangType::CSharp => "C#",
            LangType::CMake => "CMake",
            LangType::Css => "CSS",
            LangType::Go => "Go",
            LangType::Html => "HTML",
            LangType::Ini => "INI",
            LangType::Java => "Java",
            LangType::JavaScript => "JavaScript",
            LangType::Json => "JSON",
            LangType::Lua => "Lua",
            LangType::Makefile => "Makefile",
            LangType::Markdown => "Markdown",
            LangType::Perl => "Perl",
            LangType::Php => "PHP",
            LangType::Python => "Python",
            LangType::Ruby => "Ruby",
            LangType::Rust => "Rust",
            LangType::Sql => "SQL",
            LangType::Toml => "TOML",
            LangType::Xml => "XML",
            LangType::Yaml => "YAML",
            LangType::User(name) => name,
        }
    }
}

/// Extension lookup with user-defined languages taking priority
#[derive(Debug, Clone, Default)]
pub struct LanguageMap {
    /// Lowercased extension -> user language name
    user: HashMap<String, String>,
}

impl LanguageMap {
    pub fn new(user_languages: &HashMap<String, String>) -> Self {
        let user = user_languages
            .iter()
            .map(|(ext, name)| (ext.trim_start_matches('.').to_ascii_lowercase(), name.clone()))
            .collect();
        Self { user }
    }

    /// Language for `path` from its extension, falling back to well-known
    /// file names when the extension says nothing or only `default`/Text.
    pub fn detect(&self, path: &Path, default: &LangType) -> LangType {
        let by_ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| {
                let ext = ext.to_ascii_lowercase();
                match self.user.get(&ext) {
                    Some(name) => Some(LangType::User(name.clone())),
                    None => LangType::from_extension(&ext),
                }
            })
            .unwrap_or_else(|| default.clone());

        if by_ext == *default || by_ext == LangType::Text {
            let by_name = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(LangType::from_file_name);
            if let Some(lang) = by_name {
                return lang;
            }
        }
        by_ext
    }
}
