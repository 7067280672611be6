use crate::error::{ChunkerError, Result};
use std::path::Path;

/// Tag used for files without a (recognised) extension
pub const GENERIC_TAG: &str = "TXT";

/// Derive the language tag for a filename: its uppercased extension, or `TXT`.
pub fn language_tag(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map_or_else(|| GENERIC_TAG.to_string(), str::to_ascii_uppercase)
}

/// Supported programming language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Java,
    C,
    Cpp,
    CSharp,
    Ruby,
    Swift,
    Kotlin,
    Unknown,
}

impl Language {
    /// Detect language from file extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "rs" => Language::Rust,
            "py" | "pyw" => Language::Python,
            "js" | "mjs" | "cjs" | "jsx" => Language::JavaScript,
            "ts" | "tsx" => Language::TypeScript,
            "go" => Language::Go,
            "java" => Language::Java,
            "c" | "h" => Language::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => Language::Cpp,
            "cs" => Language::CSharp,
            "rb" => Language::Ruby,
            "swift" => Language::Swift,
            "kt" | "kts" => Language::Kotlin,
            _ => Language::Unknown,
        }
    }

    /// Resolve a language tag (as produced by [`language_tag`])
    pub fn from_tag(tag: &str) -> Self {
        Self::from_extension(tag)
    }

    /// Get language name as string
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Go => "go",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::CSharp => "csharp",
            Language::Ruby => "ruby",
            Language::Swift => "swift",
            Language::Kotlin => "kotlin",
            Language::Unknown => "unknown",
        }
    }

    /// Check if this language has a tree-sitter grammar wired in
    pub fn supports_ast(self) -> bool {
        matches!(
            self,
            Language::Rust | Language::Python | Language::JavaScript | Language::TypeScript
        )
    }

    /// Get Tree-sitter language instance
    pub fn tree_sitter_language(self) -> Result<tree_sitter::Language> {
        match self {
            Language::Rust => Ok(tree_sitter_rust::LANGUAGE.into()),
            Language::Python => Ok(tree_sitter_python::LANGUAGE.into()),
            Language::JavaScript => Ok(tree_sitter_javascript::LANGUAGE.into()),
            Language::TypeScript => Ok(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            _ => Err(ChunkerError::unsupported_language(self.as_str())),
        }
    }

    /// Separators tried in order when a piece is too long, most structural first.
    ///
    /// Every list ends with the generic `\n\n`, `\n`, ` `, `""` tail. `Unknown` gets only the tail.
    pub fn separators(self) -> Vec<&'static str> {
        let mut separators: Vec<&'static str> = match self {
            Language::Rust => vec![
                "\nfn ", "\nconst ", "\nlet ", "\nif ", "\nwhile ", "\nfor ", "\nloop ",
                "\nmatch ", "\nconst ",
            ],
            Language::Python => vec!["\nclass ", "\ndef ", "\n\tdef "],
            Language::JavaScript => vec![
                "\nfunction ", "\nconst ", "\nlet ", "\nvar ", "\nclass ", "\nif ", "\nfor ",
                "\nwhile ", "\nswitch ", "\ncase ", "\ndefault ",
            ],
            Language::TypeScript => vec![
                "\nenum ", "\ninterface ", "\nnamespace ", "\ntype ", "\nclass ",
                "\nfunction ", "\nconst ", "\nlet ", "\nvar ", "\nif ", "\nfor ", "\nwhile ",
                "\nswitch ", "\ncase ", "\ndefault ",
            ],
            Language::Go => vec![
                "\nfunc ", "\nvar ", "\nconst ", "\ntype ", "\nif ", "\nfor ", "\nswitch ",
                "\ncase ",
            ],
            Language::Java | Language::CSharp => vec![
                "\nclass ", "\ninterface ", "\nenum ", "\npublic ", "\nprotected ",
                "\nprivate ", "\nstatic ", "\nif ", "\nfor ", "\nwhile ", "\nswitch ",
                "\ncase ",
            ],
            Language::Kotlin => vec![
                "\nclass ", "\npublic ", "\nprotected ", "\nprivate ", "\ninternal ",
                "\ncompanion ", "\nfun ", "\nval ", "\nvar ", "\nif ", "\nfor ", "\nwhile ",
                "\nwhen ", "\ncase ", "\nelse ",
            ],
            Language::C | Language::Cpp => vec![
                "\nclass ", "\nvoid ", "\nint ", "\nfloat ", "\ndouble ", "\nif ", "\nfor ",
                "\nwhile ", "\nswitch ", "\ncase ",
            ],
            Language::Ruby => vec![
                "\ndef ", "\nclass ", "\nif ", "\nunless ", "\nwhile ", "\nfor ", "\ndo ",
                "\nbegin ", "\nrescue ",
            ],
            Language::Swift => vec![
                "\nfunc ", "\nclass ", "\nstruct ", "\nenum ", "\nif ", "\nfor ", "\nwhile ",
                "\ndo ", "\nswitch ", "\ncase ",
            ],
            Language::Unknown => vec![],
        };
        separators.extend(["\n\n", "\n", " ", ""]);
        separators
    }
}
