//! Human-readable renderings of a decision tree.

use std::fmt::Write;

use crate::id3::Node;

const INDENT: &str = "  ";

/// Nested `switch`/`case` listing; children appear in ascending value order.
pub fn to_text(root: &Node) -> String {
    let mut out = String::new();
    write_text(root, 0, &mut out);
    out
}

/// GraphViz `digraph` with one edge chain per root-to-leaf path.
///
/// A path is kept when the text of its non-leaf part contains `filter` (an
/// empty filter keeps everything) and it has at least `min_branch_len` edges.
pub fn to_graph(root: &Node, filter: &str, min_branch_len: usize) -> String {
    let mut out = String::from("digraph {\n");
    write_paths(root, "", 0, filter, min_branch_len, &mut out);
    out.push_str("}\n");
    out
}

/// Replaces characters GraphViz identifiers cannot carry.
pub fn sanitize(name: &str) -> String {
    name.replace(['.', '(', ')', '-'], "_")
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}

fn write_text(node: &Node, depth: usize, out: &mut String) {
    match node {
        Node::Leaf { description, .. } => {
            let _ = writeln!(out, "{}{}", INDENT.repeat(depth), description);
        }
        Node::Internal {
            attribute,
            children,
            ..
        } => {
            let _ = writeln!(out, "{}switch {}:", INDENT.repeat(depth), attribute);
            for (value, child) in children {
                let _ = writeln!(out, "{}case {}:", INDENT.repeat(depth + 1), value);
                write_text(child, depth + 2, out);
            }
        }
    }
}

fn write_paths(
    node: &Node,
    path: &str,
    edges: usize,
    filter: &str,
    min_branch_len: usize,
    out: &mut String,
) {
    match node {
        Node::Leaf { description, .. } => {
            // a lone leaf has no edges to draw
            if path.is_empty() || description.is_empty() {
                return;
            }
            let branch_len = edges + 1;
            if (filter.is_empty() || path.contains(filter)) && branch_len >= min_branch_len {
                let _ = writeln!(
                    out,
                    "  {} -> {} // Branch length {}",
                    path,
                    quote(&sanitize(description)),
                    branch_len
                );
            }
        }
        Node::Internal {
            attribute,
            children,
            ..
        } => {
            for (value, child) in children {
                let step = format!("{} -> {}", sanitize(attribute), quote(&sanitize(value)));
                let (next, next_edges) = if path.is_empty() {
                    (step, edges + 1)
                } else {
                    (format!("{path} -> {step}"), edges + 2)
                };
                write_paths(child, &next, next_edges, filter, min_branch_len, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id3::DecisionTree;
    use crate::record::Dataset;

    fn tree(csv: &str) -> DecisionTree {
        DecisionTree::train(&Dataset::from_reader(csv.as_bytes()).unwrap()).unwrap()
    }

    const NESTED: &str = "Category,QName,RD\n\
        true,evil.example.,true\n\
        false,evil.example.,false\n\
        false,good.example.,true\n";

    #[test]
    fn test_text_layout() {
        let tree = tree("Category,Weather\nSun,Hot\nRain,Cold\n");
        assert_eq!(
            to_text(tree.root()),
            "switch Weather:\n  case Cold:\n    Rain\n  case Hot:\n    Sun\n"
        );
    }

    #[test]
    fn test_text_nested_indentation() {
        let tree = tree(NESTED);
        let expected = "\
switch QName:
  case evil.example.:
    switch RD:
      case false:
        false
      case true:
        true
  case good.example.:
    false
";
        assert_eq!(to_text(tree.root()), expected);
    }

    #[test]
    fn test_text_single_leaf() {
        let tree = tree("Category,A\nx,1\n");
        assert_eq!(to_text(tree.root()), "x\n");
    }

    #[test]
    fn test_graph_paths() {
        let tree = tree(NESTED);
        let expected = "\
digraph {
  QName -> \"evil_example_\" -> RD -> \"false\" -> \"false\" // Branch length 4
  QName -> \"evil_example_\" -> RD -> \"true\" -> \"true\" // Branch length 4
  QName -> \"good_example_\" -> \"false\" // Branch length 2
}
";
        assert_eq!(to_graph(tree.root(), "", 0), expected);
    }

    #[test]
    fn test_graph_min_branch_len() {
        let tree = tree(NESTED);
        let graph = to_graph(tree.root(), "", 3);
        assert_eq!(graph.lines().count(), 4);
        assert!(!graph.contains("good_example_"));
    }

    #[test]
    fn test_graph_label_filter() {
        let tree = tree(NESTED);
        let graph = to_graph(tree.root(), "good", 0);
        assert_eq!(
            graph,
            "digraph {\n  QName -> \"good_example_\" -> \"false\" // Branch length 2\n}\n"
        );
    }

    #[test]
    fn test_sanitize_and_quote() {
        assert_eq!(sanitize("_dns-sd._udp.local."), "_dns_sd__udp_local_");
        assert_eq!(sanitize("f(x)"), "f_x_");
        assert_eq!(quote("say \"hi\""), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn test_graph_of_single_leaf_is_empty() {
        let tree = tree("Category,A\nx,1\n");
        assert_eq!(to_graph(tree.root(), "", 0), "digraph {\n}\n");
    }
}
