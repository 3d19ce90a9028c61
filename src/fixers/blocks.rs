//! Brace-depth boundary matching for definition blocks.
//!
//! Locates the span of a type or member definition by counting braces
//! from the definition line until the depth returns to zero. This is the
//! single boundary-detection strategy today; alternative language
//! strategies would replace these functions, not the fixers' trait.

use regex::Regex;

/// An inclusive line span (0-based) plus the definition keyword found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub start_line: usize,
    pub end_line: usize,
    /// `class`, `interface`, `struct`, `enum`, `record`, or `member`
    pub kind: String,
}

impl Block {
    /// Number of lines in the block.
    #[must_use]
    pub fn len(&self) -> usize {
        self.end_line - self.start_line + 1
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Find the definition block for `name` in `content`.
///
/// The block starts at the definition line (attributes and doc comments
/// directly above are included) and ends where the brace depth opened on
/// the definition returns to zero.
#[must_use]
pub fn find_definition(content: &str, name: &str) -> Option<Block> {
    let type_re = Regex::new(&format!(
        r"\b(class|interface|struct|enum|record)\s+{}\b",
        regex::escape(name)
    ))
    .ok()?;
    let member_re = Regex::new(&format!(r"\b{}\s*[({{]", regex::escape(name))).ok()?;

    let lines: Vec<&str> = content.lines().collect();
    let (def_line, kind) = lines.iter().enumerate().find_map(|(i, line)| {
        if let Some(cap) = type_re.captures(line) {
            Some((i, cap[1].to_string()))
        } else if member_re.is_match(line) && !line.trim_start().starts_with("//") {
            Some((i, "member".to_string()))
        } else {
            None
        }
    })?;

    // Walk forward counting braces until the depth closes.
    let mut depth = 0i32;
    let mut opened = false;
    let mut end_line = None;
    for (i, line) in lines.iter().enumerate().skip(def_line) {
        for ch in line.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if opened && depth == 0 {
            end_line = Some(i);
            break;
        }
    }
    let end_line = end_line?;

    // Pull in attributes and doc comments directly above the definition.
    let mut start_line = def_line;
    while start_line > 0 {
        let above = lines[start_line - 1].trim_start();
        if above.starts_with('[') || above.starts_with("///") {
            start_line -= 1;
        } else {
            break;
        }
    }

    Some(Block {
        start_line,
        end_line,
        kind,
    })
}

/// Remove a block from `content`, collapsing a doubled blank line left at
/// the splice point.
#[must_use]
pub fn remove_block(content: &str, block: &Block) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut kept: Vec<&str> = Vec::with_capacity(lines.len());
    kept.extend_from_slice(&lines[..block.start_line]);
    kept.extend_from_slice(&lines[(block.end_line + 1).min(lines.len())..]);

    // Collapse the doubled blank line where the halves meet.
    if block.start_line > 0 && block.start_line < kept.len() {
        let before_blank = kept[block.start_line - 1].trim().is_empty();
        let at_blank = kept[block.start_line].trim().is_empty();
        if before_blank && at_blank {
            kept.remove(block.start_line);
        }
    }

    let mut out = kept.join("\n");
    if content.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Extract the text of a block.
#[must_use]
pub fn block_text(content: &str, block: &Block) -> String {
    content
        .lines()
        .skip(block.start_line)
        .take(block.len())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strip line and block comments and collapse all whitespace, for
/// definition-equivalence comparison.
#[must_use]
pub fn strip_comments_and_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_line_comment = false;
    let mut in_block_comment = false;
    let mut in_string = false;

    while let Some(ch) = chars.next() {
        if in_line_comment {
            if ch == '\n' {
                in_line_comment = false;
                out.push('\n');
            }
            continue;
        }
        if in_block_comment {
            if ch == '*' && chars.peek() == Some(&'/') {
                chars.next();
                in_block_comment = false;
            }
            continue;
        }
        if in_string {
            out.push(ch);
            if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '/' if chars.peek() == Some(&'/') => {
                chars.next();
                in_line_comment = true;
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                in_block_comment = true;
            }
            '"' => {
                in_string = true;
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = "\
using System;

namespace Acme.Orders
{
    /// <summary>An order line.</summary>
    public class OrderLine
    {
        public int Quantity { get; set; }
    }

    public class Order
    {
        public string Id { get; set; }

        public decimal Total()
        {
            return 0m;
        }
    }
}
";

    #[test]
    fn test_finds_class_block_with_doc_comment() {
        let block = find_definition(FILE, "OrderLine").unwrap();
        assert_eq!(block.kind, "class");
        // Starts at the doc comment, ends at the closing brace
        assert_eq!(block.start_line, 4);
        assert_eq!(block.end_line, 8);
    }

    #[test]
    fn test_finds_nested_member() {
        let block = find_definition(FILE, "Total").unwrap();
        assert_eq!(block.kind, "member");
        assert_eq!(block.start_line, 14);
        assert_eq!(block.end_line, 17);
    }

    #[test]
    fn test_remove_block_collapses_doubled_blank() {
        let block = find_definition(FILE, "OrderLine").unwrap();
        let removed = remove_block(FILE, &block);
        assert!(!removed.contains("OrderLine"));
        assert!(removed.contains("class Order"));
        assert!(!removed.contains("\n\n\n"));
    }

    #[test]
    fn test_missing_definition_yields_none() {
        assert!(find_definition(FILE, "Invoice").is_none());
    }

    #[test]
    fn test_strip_comments_equivalence() {
        let a = "public class Order {\n    // the id\n    public string Id;\n}";
        let b = "public class Order { public string Id; /* comment */ }";
        assert_eq!(
            strip_comments_and_whitespace(a),
            strip_comments_and_whitespace(b)
        );
    }
}
