//! Language detection and tree-sitter grammar registry.
//!
//! Every supported language is one [`Lang`] variant carrying its grammar and the
//! node-kind tables the chunker needs. Adding a language means adding a variant
//! and its tables here; the chunker itself stays language-agnostic.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Supported language with its tree-sitter grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    JavaScript,
    TypeScript,
    Tsx,
    Python,
    Rust,
    Go,
}

impl Lang {
    /// Identifier stored with each chunk and used in payloads.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::Python => "python",
            Self::Rust => "rust",
            Self::Go => "go",
        }
    }

    /// Get the tree-sitter grammar. Returns `None` if the
    /// corresponding feature is not enabled.
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-js")]
            Self::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Node kinds treated as function-like constructs.
    #[must_use]
    pub fn function_kinds(self) -> &'static [&'static str] {
        match self {
            Self::JavaScript => &[
                "function_declaration",
                "generator_function_declaration",
                "method_definition",
                "arrow_function",
                "function_expression",
            ],
            Self::TypeScript | Self::Tsx => &[
                "function_declaration",
                "generator_function_declaration",
                "method_definition",
                "arrow_function",
                "function_expression",
                "function_signature",
                "method_signature",
                "abstract_method_signature",
            ],
            Self::Python => &["function_definition", "lambda"],
            Self::Rust => &[
                "function_item",
                "function_signature_item",
                "closure_expression",
            ],
            Self::Go => &["function_declaration", "method_declaration", "func_literal"],
        }
    }

    /// Node kinds treated as class-like constructs.
    #[must_use]
    pub fn class_kinds(self) -> &'static [&'static str] {
        match self {
            Self::JavaScript => &["class_declaration"],
            Self::TypeScript | Self::Tsx => &["class_declaration", "abstract_class_declaration"],
            Self::Python => &["class_definition"],
            Self::Rust => &["struct_item", "enum_item", "trait_item", "impl_item"],
            Self::Go => &["type_spec"],
        }
    }

    /// For languages whose class-like node also covers plain aliases, the kinds
    /// its `type` child must have for the node to count as a class.
    #[must_use]
    pub fn class_type_kinds(self) -> Option<&'static [&'static str]> {
        match self {
            Self::Go => Some(&["struct_type", "interface_type"]),
            _ => None,
        }
    }

    /// Top-level statement kinds collected as import context.
    #[must_use]
    pub fn import_kinds(self) -> &'static [&'static str] {
        match self {
            Self::JavaScript | Self::TypeScript | Self::Tsx => &["import_statement"],
            Self::Python => &[
                "future_import_statement",
                "import_statement",
                "import_from_statement",
            ],
            Self::Rust => &["use_declaration"],
            Self::Go => &["import_declaration"],
        }
    }

    /// Immediate-child kinds that carry a function's name.
    #[must_use]
    pub fn function_name_kinds(self) -> &'static [&'static str] {
        match self {
            Self::JavaScript | Self::TypeScript | Self::Tsx => {
                &["identifier", "property_identifier"]
            }
            Self::Python | Self::Rust => &["identifier"],
            Self::Go => &["identifier", "field_identifier"],
        }
    }

    /// Immediate-child kinds that carry a class's name.
    #[must_use]
    pub fn class_name_kinds(self) -> &'static [&'static str] {
        match self {
            Self::JavaScript | Self::TypeScript | Self::Tsx | Self::Python => {
                &["identifier", "type_identifier"]
            }
            Self::Rust | Self::Go => &["type_identifier"],
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?;
    match ext {
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "mts" | "cts" => Some(Lang::TypeScript),
        "tsx" => Some(Lang::Tsx),
        "py" | "pyi" => Some(Lang::Python),
        "rs" => Some(Lang::Rust),
        "go" => Some(Lang::Go),
        _ => None,
    }
}

/// Check if a file should be indexed (has a supported language with grammar).
#[must_use]
pub fn is_indexable(path: &Path) -> bool {
    detect_language(path).and_then(Lang::grammar).is_some()
}
