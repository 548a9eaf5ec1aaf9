//! Text and HTML renderings of a registry snapshot.
//!
//! Both are pure functions of the snapshot: rows are ordered by node type,
//! then owner (or address), so the output does not depend on the order
//! nodes were registered or probed in.

use askama::Template;

use nodewatch_state::RegistrySnapshot;

use crate::views::{NodeRow, format_timestamp, rows};

#[derive(Template)]
#[template(path = "status.html")]
struct StatusTemplate {
    error_count: usize,
    started_at: String,
    rows: Vec<NodeRow>,
}

pub struct ReportGenerator;

impl ReportGenerator {
    /// Chat-friendly report. Empty when no node is in error.
    pub fn render_text(snapshot: &RegistrySnapshot) -> String {
        let error_count = snapshot.error_count();
        if error_count == 0 {
            return String::new();
        }

        let mut out = format!(
            "Nodes in error: *{error_count}*. Monitoring node started at: {}",
            format_timestamp(snapshot.started_at)
        );
        for row in rows(snapshot) {
            out.push('\n');
            out.push_str(&text_line(&row));
        }
        out
    }

    /// Full status page, including the all-clear state.
    pub fn render_html(snapshot: &RegistrySnapshot) -> String {
        let page = StatusTemplate {
            error_count: snapshot.error_count(),
            started_at: format_timestamp(snapshot.started_at),
            rows: rows(snapshot),
        };
        page.render()
            .unwrap_or_else(|e| format!("<pre>Template error: {e}</pre>"))
    }
}

fn text_line(row: &NodeRow) -> String {
    let marker = if row.in_error { "*In Error*" } else { "" };
    let mut line = format!(
        "{:<15}\t|\t`{:<27}` {:<10} #errors: {:<5}\t# error minutes: {:<6}",
        row.node_type, row.address, marker, row.total_errors, row.error_minutes
    );
    if !row.reasons.is_empty() {
        line.push_str(" reasons: ");
        line.push_str(&row.reasons);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use nodewatch_core::{NodeDescriptor, NodeType};
    use nodewatch_state::NodeRegistry;

    fn node(address: &str, node_type: NodeType, owner: Option<&str>) -> NodeDescriptor {
        NodeDescriptor::new(address, node_type.default_port(), owner.map(String::from), node_type)
    }

    fn registry(nodes: Vec<NodeDescriptor>) -> NodeRegistry {
        NodeRegistry::from_descriptors(nodes).unwrap()
    }

    fn fail(registry: &NodeRegistry, address: &str, reasons: &[&str], escalate: bool) {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        registry
            .update(address, |_, state| {
                for (i, reason) in reasons.iter().enumerate() {
                    state.record_failure(reason, t0 + Duration::minutes(i as i64 * 10));
                }
                if escalate {
                    state.escalate();
                }
            })
            .unwrap();
    }

    fn sample_nodes() -> Vec<NodeDescriptor> {
        vec![
            node("btc1.example.org", NodeType::BitcoinNode, Some("carol")),
            node("abcdefghijklmnop.onion", NodeType::SeedNode, Some("bob")),
            node("price.example.org", NodeType::PriceNode, Some("alice")),
            node("btc2.example.org", NodeType::BitcoinNode, None),
        ]
    }

    #[test]
    fn text_is_empty_when_nothing_is_in_error() {
        let registry = registry(sample_nodes());
        // Sub-threshold failures alone do not produce a report.
        fail(&registry, "btc1.example.org", &["Timeout"], false);
        assert_eq!(ReportGenerator::render_text(&registry.all_nodes()), "");
    }

    #[test]
    fn text_lists_all_nodes_with_error_marker_and_reasons() {
        let registry = registry(sample_nodes());
        fail(
            &registry,
            "btc1.example.org",
            &["Timeout", "connection failed: refused", "Timeout"],
            true,
        );

        let text = ReportGenerator::render_text(&registry.all_nodes());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("Nodes in error: *1*. Monitoring node started at: "));

        // Price, seed, then bitcoin nodes; bitcoin nodes by owner or address,
        // so the ownerless "btc2.example.org" sorts before owner "carol".
        assert!(lines[1].starts_with("Price node"));
        assert!(lines[2].starts_with("Seed node"));
        assert!(lines[3].contains("btc2.example.org"));
        assert!(lines[4].contains("btc1.example.org"));

        assert!(lines[4].contains("*In Error*"));
        assert!(lines[4].contains("#errors: 3"));
        assert!(lines[4].contains("# error minutes: 20"));
        assert!(lines[4].ends_with(" reasons: Timeout | connection failed: refused"));
        assert!(!lines[3].contains("*In Error*"));
        assert!(!lines[3].contains("reasons:"));
    }

    #[test]
    fn reports_do_not_depend_on_registration_order() {
        let forward = registry(sample_nodes());
        let mut reversed_nodes = sample_nodes();
        reversed_nodes.reverse();
        let reversed = registry(reversed_nodes);

        for r in [&forward, &reversed] {
            fail(r, "price.example.org", &["Incorrect version:0.9"], true);
            fail(r, "btc2.example.org", &["Timeout"], false);
        }

        let (a, b) = (forward.all_nodes(), reversed.all_nodes());
        let strip = |s: String| s.lines().skip(1).map(String::from).collect::<Vec<_>>();
        assert_eq!(
            strip(ReportGenerator::render_text(&a)),
            strip(ReportGenerator::render_text(&b))
        );

        let body = |s: String| s.split("<table>").nth(1).map(String::from);
        assert_eq!(
            body(ReportGenerator::render_html(&a)),
            body(ReportGenerator::render_html(&b))
        );
    }

    #[test]
    fn html_renders_all_clear_state() {
        let registry = registry(sample_nodes());
        let html = ReportGenerator::render_html(&registry.all_nodes());

        assert!(html.contains("Nodes in error: <b>0</b>"));
        assert!(html.contains("All nodes healthy."));
        for header in [
            "Node Type",
            "Address",
            "Owner",
            "Error?",
            "Total errors",
            "Error streak",
            "Total error minutes",
            "Reasons",
        ] {
            assert!(html.contains(&format!("<th>{header}</th>")), "missing {header}");
        }
        assert!(html.contains("<td>Price node</td>"));
        assert!(!html.contains("<b>Yes</b>"));
    }

    #[test]
    fn html_marks_escalated_nodes_and_escapes_reasons() {
        let registry = registry(sample_nodes());
        fail(&registry, "abcdefghijklmnop.onion", &["<script>bad</script>"], true);

        let html = ReportGenerator::render_html(&registry.all_nodes());
        assert!(html.contains("Nodes in error: <b>1</b>"));
        assert!(html.contains("<b>Yes</b>"));
        assert!(html.contains("class=\"in-error\""));
        assert!(!html.contains("<script>bad"));
        assert!(!html.contains("All nodes healthy."));
    }
}
