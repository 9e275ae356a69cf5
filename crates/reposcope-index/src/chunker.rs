//! AST-based chunking via tree-sitter: one chunk per function-like or
//! class-like node, whole-file fallback, import context prepended.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser};

use crate::error::{IndexError, Result};
use crate::languages::Lang;

/// Granularity of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Function,
    Class,
    File,
}

impl ChunkKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::File => "file",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkKind {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "function" => Ok(Self::Function),
            "class" => Ok(Self::Class),
            "file" => Ok(Self::File),
            other => Err(IndexError::Other(format!("unknown chunk kind: {other}"))),
        }
    }
}

/// A chunk before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub file_path: String,
    pub language: Lang,
    pub kind: ChunkKind,
    pub function_name: Option<String>,
    pub class_name: Option<String>,
    /// 0-based, inclusive.
    pub line_start: usize,
    /// 0-based, inclusive.
    pub line_end: usize,
    pub import_context: Vec<String>,
    /// Text sent to the embedding model: imports, blank line, body.
    pub content: String,
    /// blake3 of `content`, the exact text that gets embedded.
    pub content_hash: String,
}

impl ChunkDraft {
    /// The source lines `[line_start, line_end]` without the import prefix.
    #[must_use]
    pub fn body(&self) -> &str {
        strip_import_context(&self.content, &self.import_context)
    }
}

/// The part of `content` after the prepended import block.
#[must_use]
pub fn strip_import_context<'a>(content: &'a str, imports: &[String]) -> &'a str {
    if imports.is_empty() {
        return content;
    }
    let prefix_len =
        imports.iter().map(String::len).sum::<usize>() + imports.len().saturating_sub(1) + 2;
    content.get(prefix_len..).unwrap_or_default()
}

/// Chunker configuration.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Maximum number of top-level imports prepended to each chunk (default: 10).
    pub max_imports: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self { max_imports: 10 }
    }
}

/// Shared context for one file.
struct ChunkCtx<'a> {
    source: &'a str,
    lines: Vec<&'a str>,
    file_path: &'a str,
    lang: Lang,
    imports: Vec<String>,
}

impl ChunkCtx<'_> {
    fn draft(
        &self,
        kind: ChunkKind,
        line_start: usize,
        line_end: usize,
        function_name: Option<String>,
        class_name: Option<String>,
    ) -> ChunkDraft {
        let last = self.lines.len().saturating_sub(1);
        let end = line_end.min(last);
        let start = line_start.min(end);
        let body = self.lines[start..=end].join("\n");
        let content = if self.imports.is_empty() {
            body
        } else {
            format!("{}\n\n{body}", self.imports.join("\n"))
        };
        let content_hash = blake3_hex(&content);
        ChunkDraft {
            file_path: self.file_path.to_string(),
            language: self.lang,
            kind,
            function_name,
            class_name,
            line_start: start,
            line_end: end,
            import_context: self.imports.clone(),
            content,
            content_hash,
        }
    }
}

/// Parse and chunk a source file.
///
/// Files containing only whitespace produce no chunks.
///
/// # Errors
///
/// Returns [`IndexError::UnsupportedLanguage`] when no grammar is compiled in for
/// `lang`, and [`IndexError::Parse`] when tree-sitter produces no tree.
pub fn chunk_file(
    source: &str,
    file_path: &str,
    lang: Lang,
    config: &ChunkerConfig,
) -> Result<Vec<ChunkDraft>> {
    let grammar = lang
        .grammar()
        .ok_or_else(|| IndexError::UnsupportedLanguage(file_path.to_string()))?;

    if source.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut parser = Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| IndexError::Parse(format!("set_language failed: {e}")))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| IndexError::Parse(format!("parse failed for {file_path}")))?;
    let root = tree.root_node();

    let ctx = ChunkCtx {
        source,
        lines: source.split('\n').collect(),
        file_path,
        lang,
        imports: extract_imports(source, &root, lang, config.max_imports),
    };

    let mut chunks = collect_entities(&ctx, root);

    if chunks.is_empty() {
        let last = ctx.lines.len() - 1;
        chunks.push(ctx.draft(ChunkKind::File, 0, last, None, None));
    }

    Ok(chunks)
}

/// Pre-order walk over the whole tree using an explicit stack. Matches do not
/// stop the descent, so nested constructs yield their own chunks.
fn collect_entities(ctx: &ChunkCtx<'_>, root: Node<'_>) -> Vec<ChunkDraft> {
    let function_kinds = ctx.lang.function_kinds();
    let class_kinds = ctx.lang.class_kinds();

    let mut chunks = Vec::new();
    let mut stack: Vec<(Node<'_>, Option<String>)> = vec![(root, None)];
    let mut cursor = root.walk();

    while let Some((node, enclosing_class)) = stack.pop() {
        let kind = node.kind();
        let mut child_class = enclosing_class.clone();

        if function_kinds.contains(&kind) {
            let name = child_name(&node, ctx.source, ctx.lang.function_name_kinds());
            chunks.push(ctx.draft(
                ChunkKind::Function,
                node.start_position().row,
                node.end_position().row,
                name,
                enclosing_class,
            ));
        } else if class_kinds.contains(&kind) && is_class_like(ctx.lang, &node) {
            let name = child_name(&node, ctx.source, ctx.lang.class_name_kinds());
            chunks.push(ctx.draft(
                ChunkKind::Class,
                node.start_position().row,
                node.end_position().row,
                None,
                name.clone(),
            ));
            if name.is_some() {
                child_class = name;
            }
        }

        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            stack.push((child, child_class.clone()));
        }
    }

    chunks
}

fn is_class_like(lang: Lang, node: &Node<'_>) -> bool {
    lang.class_type_kinds().is_none_or(|kinds| {
        node.child_by_field_name("type")
            .is_some_and(|t| kinds.contains(&t.kind()))
    })
}

/// Fields whose identifiers are never the construct's own name, e.g. the
/// parameter of `x => x` or the body of `lambda: x`.
const UNNAMED_FIELDS: [&str; 3] = ["parameter", "parameters", "body"];

/// First immediate child whose kind is in `kinds`, skipping parameter and body
/// children.
fn child_name(node: &Node<'_>, source: &str, kinds: &[&str]) -> Option<String> {
    let skipped: Vec<usize> = UNNAMED_FIELDS
        .iter()
        .filter_map(|field| node.child_by_field_name(field))
        .map(|c| c.id())
        .collect();
    let mut cursor = node.walk();
    node.children(&mut cursor)
        .find(|c| kinds.contains(&c.kind()) && !skipped.contains(&c.id()))
        .and_then(|c| source.get(c.byte_range()))
        .map(str::to_string)
}

fn extract_imports(source: &str, root: &Node<'_>, lang: Lang, cap: usize) -> Vec<String> {
    let import_kinds = lang.import_kinds();
    let mut cursor = root.walk();
    root.named_children(&mut cursor)
        .filter(|child| import_kinds.contains(&child.kind()))
        .filter_map(|child| source.get(child.byte_range()))
        .map(str::to_string)
        .take(cap)
        .collect()
}

pub(crate) fn blake3_hex(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(source: &str, path: &str, lang: Lang) -> Vec<ChunkDraft> {
        chunk_file(source, path, lang, &ChunkerConfig::default()).unwrap()
    }

    fn lines_of(source: &str, start: usize, end: usize) -> String {
        source.split('\n').collect::<Vec<_>>()[start..=end].join("\n")
    }

    #[cfg(feature = "lang-js")]
    #[test]
    fn js_class_with_two_methods_yields_three_chunks() {
        let source = "class Greeter {\n  hello() {\n    return 'hi';\n  }\n  bye() {\n    return 'bye';\n  }\n}\n";
        let chunks = chunk(source, "greeter.js", Lang::JavaScript);
        assert_eq!(chunks.len(), 3);

        assert_eq!(chunks[0].kind, ChunkKind::Class);
        assert_eq!(chunks[0].class_name.as_deref(), Some("Greeter"));
        assert_eq!((chunks[0].line_start, chunks[0].line_end), (0, 7));

        assert_eq!(chunks[1].kind, ChunkKind::Function);
        assert_eq!(chunks[1].function_name.as_deref(), Some("hello"));
        assert_eq!(chunks[1].class_name.as_deref(), Some("Greeter"));
        assert_eq!((chunks[1].line_start, chunks[1].line_end), (1, 3));

        assert_eq!(chunks[2].function_name.as_deref(), Some("bye"));
        assert_eq!((chunks[2].line_start, chunks[2].line_end), (4, 6));
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn python_class_with_two_methods_yields_three_chunks() {
        let source = "class Greeter:\n    def hello(self):\n        print(\"hello\")\n\n    def goodbye(self):\n        print(\"bye\")\n";
        let chunks = chunk(source, "app.py", Lang::Python);
        let kinds: Vec<_> = chunks.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![ChunkKind::Class, ChunkKind::Function, ChunkKind::Function]
        );
        assert_eq!((chunks[1].line_start, chunks[1].line_end), (1, 2));
        assert_eq!((chunks[2].line_start, chunks[2].line_end), (4, 5));
        assert_eq!(chunks[2].function_name.as_deref(), Some("goodbye"));
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn plain_script_yields_single_file_chunk() {
        let source = "x = 1\ny = 2\nprint(x + y)\n";
        let chunks = chunk(source, "script.py", Lang::Python);
        assert_eq!(chunks.len(), 1);
        let file = &chunks[0];
        assert_eq!(file.kind, ChunkKind::File);
        assert_eq!(file.line_start, 0);
        assert_eq!(file.line_end, source.split('\n').count() - 1);
        assert!(file.function_name.is_none());
        assert!(file.class_name.is_none());
        assert_eq!(file.content, source);
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn whitespace_only_file_yields_nothing() {
        assert!(chunk("  \n\n\t\n", "empty.py", Lang::Python).is_empty());
        assert!(chunk("", "empty.py", Lang::Python).is_empty());
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn file_with_matches_never_has_file_chunk() {
        let source = "import os\n\nx = 1\n\ndef f():\n    return x\n";
        let chunks = chunk(source, "m.py", Lang::Python);
        assert!(chunks.iter().all(|c| c.kind != ChunkKind::File));
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn nested_functions_each_emitted() {
        let source = "def outer():\n    def inner():\n        return 1\n    return inner()\n";
        let chunks = chunk(source, "n.py", Lang::Python);
        let names: Vec<_> = chunks
            .iter()
            .map(|c| c.function_name.as_deref())
            .collect();
        assert_eq!(names, vec![Some("outer"), Some("inner")]);
        assert_eq!((chunks[0].line_start, chunks[0].line_end), (0, 3));
        assert_eq!((chunks[1].line_start, chunks[1].line_end), (1, 2));
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn imports_prepended_and_body_round_trips() {
        let source = "import os\nfrom sys import argv\n\ndef main():\n    print(argv)\n";
        let chunks = chunk(source, "main.py", Lang::Python);
        assert_eq!(chunks.len(), 1);
        let c = &chunks[0];
        assert_eq!(c.import_context, vec!["import os", "from sys import argv"]);
        assert!(c.content.starts_with("import os\nfrom sys import argv\n\ndef main():"));
        assert_eq!(c.body(), lines_of(source, c.line_start, c.line_end));
        assert_eq!(c.content_hash, blake3_hex(&c.content));
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn imports_capped() {
        let mut source = String::new();
        for i in 0..15 {
            source.push_str(&format!("import mod{i}\n"));
        }
        source.push_str("def f():\n    pass\n");
        let config = ChunkerConfig { max_imports: 3 };
        let chunks = chunk_file(&source, "many.py", Lang::Python, &config).unwrap();
        assert_eq!(chunks[0].import_context, vec!["import mod0", "import mod1", "import mod2"]);
    }

    #[cfg(feature = "lang-js")]
    #[test]
    fn arrow_function_without_name_is_tolerated() {
        let source = "import fs from 'fs';\nconst add = (a, b) => {\n  return a + b;\n};\n";
        let chunks = chunk(source, "add.js", Lang::JavaScript);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Function);
        assert!(chunks[0].function_name.is_none());
        assert_eq!((chunks[0].line_start, chunks[0].line_end), (1, 3));
        assert_eq!(chunks[0].import_context, vec!["import fs from 'fs';"]);
    }

    #[cfg(feature = "lang-js")]
    #[test]
    fn typescript_class_name_is_type_identifier() {
        let source = "export class Store {\n  load(key: string): number {\n    return 1;\n  }\n}\n";
        let chunks = chunk(source, "store.ts", Lang::TypeScript);
        assert_eq!(chunks[0].class_name.as_deref(), Some("Store"));
        assert_eq!(chunks[1].function_name.as_deref(), Some("load"));
        assert_eq!(chunks[1].class_name.as_deref(), Some("Store"));
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn rust_impl_methods_record_type() {
        let source = "use std::fmt;\n\nstruct Foo;\n\nimpl Foo {\n    fn bar(&self) -> i32 {\n        42\n    }\n}\n";
        let chunks = chunk(source, "src/foo.rs", Lang::Rust);
        let bar = chunks
            .iter()
            .find(|c| c.function_name.as_deref() == Some("bar"))
            .unwrap();
        assert_eq!(bar.class_name.as_deref(), Some("Foo"));
        assert_eq!(bar.import_context, vec!["use std::fmt;"]);
    }

    #[cfg(feature = "lang-go")]
    #[test]
    fn go_method_name_is_field_identifier() {
        let source = "package main\n\ntype Server struct{}\n\nfunc (s *Server) Run() error {\n\treturn nil\n}\n";
        let chunks = chunk(source, "main.go", Lang::Go);
        let run = chunks
            .iter()
            .find(|c| c.kind == ChunkKind::Function)
            .unwrap();
        assert_eq!(run.function_name.as_deref(), Some("Run"));
        assert!(
            chunks
                .iter()
                .any(|c| c.kind == ChunkKind::Class && c.class_name.as_deref() == Some("Server"))
        );
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn python_lambda_is_a_function_chunk() {
        let source = "def apply(xs):\n    return map(lambda x: x, xs)\n\nsquare = lambda n: n * n\n";
        let chunks = chunk(source, "fns.py", Lang::Python);
        let spans: Vec<_> = chunks
            .iter()
            .map(|c| (c.function_name.as_deref(), c.line_start, c.line_end))
            .collect();
        assert_eq!(
            spans,
            vec![(Some("apply"), 0, 1), (None, 1, 1), (None, 3, 3)]
        );
        assert!(chunks.iter().all(|c| c.kind == ChunkKind::Function));
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn future_imports_are_import_context() {
        let source = "from __future__ import annotations\nimport os\n\ndef f():\n    pass\n";
        let chunks = chunk(source, "f.py", Lang::Python);
        assert_eq!(
            chunks[0].import_context,
            vec!["from __future__ import annotations", "import os"]
        );
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn rust_closure_is_a_function_chunk() {
        let source = "fn main() {\n    let id = |x: i32| x;\n    id(1);\n}\n";
        let chunks = chunk(source, "src/main.rs", Lang::Rust);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].function_name.as_deref(), Some("main"));
        assert_eq!(chunks[1].kind, ChunkKind::Function);
        assert!(chunks[1].function_name.is_none());
        assert_eq!((chunks[1].line_start, chunks[1].line_end), (1, 1));
    }

    #[cfg(feature = "lang-go")]
    #[test]
    fn go_func_literal_is_a_function_chunk() {
        let source = "package main\n\nfunc main() {\n\tf := func(x int) int {\n\t\treturn x\n\t}\n\tf(1)\n}\n";
        let chunks = chunk(source, "main.go", Lang::Go);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].function_name.as_deref(), Some("main"));
        assert!(chunks[1].function_name.is_none());
        assert_eq!((chunks[1].line_start, chunks[1].line_end), (3, 5));
    }

    #[cfg(feature = "lang-go")]
    #[test]
    fn go_type_alias_is_not_a_class() {
        let source = "package main\n\ntype ID string\n\ntype Store interface {\n\tGet() ID\n}\n";
        let chunks = chunk(source, "store.go", Lang::Go);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Class);
        assert_eq!(chunks[0].class_name.as_deref(), Some("Store"));
        assert_eq!((chunks[0].line_start, chunks[0].line_end), (4, 6));
    }

    #[cfg(feature = "lang-js")]
    #[test]
    fn typescript_method_signatures_are_function_chunks() {
        let source = "interface Repo {\n  find(id: string): string;\n}\n\nabstract class Base {\n  abstract run(): void;\n}\n";
        let chunks = chunk(source, "repo.ts", Lang::TypeScript);
        let find = chunks
            .iter()
            .find(|c| c.function_name.as_deref() == Some("find"))
            .unwrap();
        assert_eq!((find.line_start, find.line_end), (1, 1));
        assert!(find.class_name.is_none());
        let run = chunks
            .iter()
            .find(|c| c.function_name.as_deref() == Some("run"))
            .unwrap();
        assert_eq!(run.class_name.as_deref(), Some("Base"));
        assert_eq!((run.line_start, run.line_end), (5, 5));
    }

    #[test]
    fn chunk_kind_parses_back() {
        for kind in [ChunkKind::Function, ChunkKind::Class, ChunkKind::File] {
            assert_eq!(kind.as_str().parse::<ChunkKind>().unwrap(), kind);
        }
        assert!("method".parse::<ChunkKind>().is_err());
    }

    #[test]
    fn blake3_hex_consistent() {
        let h1 = blake3_hex("test input");
        assert_eq!(h1, blake3_hex("test input"));
        assert_eq!(h1.len(), 64);
    }

    #[cfg(feature = "lang-python")]
    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn every_function_body_matches_its_line_range(
                bodies in proptest::collection::vec(1usize..5, 1..6)
            ) {
                let mut source = String::from("import os\n");
                for (i, n) in bodies.iter().enumerate() {
                    source.push_str(&format!("def f{i}():\n"));
                    for j in 0..*n {
                        source.push_str(&format!("    v{j} = {j}\n"));
                    }
                }
                let chunks = chunk(&source, "gen.py", Lang::Python);
                prop_assert_eq!(chunks.len(), bodies.len());
                for c in &chunks {
                    prop_assert!(c.line_start <= c.line_end);
                    prop_assert_eq!(c.body(), lines_of(&source, c.line_start, c.line_end));
                }
            }
        }
    }
}
