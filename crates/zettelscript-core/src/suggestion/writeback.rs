//! Atomic markdown write-back for an approved suggestion (§6.4).

use std::fs;
use std::path::Path;

use crate::models::{Node, WritebackOutcome, WritebackStatus};

fn is_links_heading(line: &str) -> bool {
    let text = line.trim_start_matches('#').trim().to_lowercase();
    text == "links" || text == "link"
}

fn already_linked(body: &str, target_title: &str) -> bool {
    let bracketed = format!("[[{target_title}");
    body.to_lowercase().contains(&bracketed.to_lowercase())
}

/// Insert `- [[target_title]]` under a "Links" heading, or append it at the
/// end of the body preceded by a blank line.
fn insert_reference(body: &str, target_title: &str) -> String {
    let bullet = format!("- [[{target_title}]]");
    let mut lines: Vec<&str> = body.lines().collect();

    if let Some(idx) = lines.iter().position(|l| is_links_heading(l)) {
        lines.insert(idx + 1, &bullet);
        return lines.join("\n");
    }

    let trimmed = body.trim_end();
    if trimmed.is_empty() {
        bullet
    } else {
        format!("{trimmed}\n\n{bullet}")
    }
}

/// Write `target_title` into `node`'s body as a wiki reference, atomically.
/// Never touches the preamble. `vault_root` is joined with the node's
/// relative path to find the file.
pub fn write_back(vault_root: &Path, node: &Node, target_title: &str) -> WritebackOutcome {
    if node.ghost {
        return WritebackOutcome {
            status: WritebackStatus::Skipped,
            reason: Some("source is a ghost node".to_string()),
        };
    }

    let path = vault_root.join(&node.path);
    let contents = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) => {
            return WritebackOutcome {
                status: WritebackStatus::Failed,
                reason: Some(format!("unreadable file: {e}")),
            }
        }
    };

    let (preamble, body) = split_frontmatter(&contents);

    if already_linked(body, target_title) {
        return WritebackOutcome {
            status: WritebackStatus::Skipped,
            reason: Some("Link already exists".to_string()),
        };
    }

    let new_body = insert_reference(body, target_title);
    let new_contents = format!("{preamble}{new_body}\n");

    let tmp_path = path.with_extension("md.tmp");
    if let Err(e) = fs::write(&tmp_path, &new_contents) {
        let _ = fs::remove_file(&tmp_path);
        return WritebackOutcome { status: WritebackStatus::Failed, reason: Some(format!("write failed: {e}")) };
    }
    if let Err(e) = fs::rename(&tmp_path, &path) {
        let _ = fs::remove_file(&tmp_path);
        return WritebackOutcome {
            status: WritebackStatus::Failed,
            reason: Some(format!("atomic rename failed: {e}")),
        };
    }

    WritebackOutcome { status: WritebackStatus::Written, reason: None }
}

/// Split a file's raw text into `(preamble-including-fences, body)` so the
/// preamble is carried through untouched.
fn split_frontmatter(contents: &str) -> (&str, &str) {
    if let Some(rest) = contents.strip_prefix("---\n") {
        if let Some(end) = rest.find("\n---\n") {
            let split_at = 4 + end + 5;
            return (&contents[..split_at], &contents[split_at..]);
        }
    }
    ("", contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeKind;
    use chrono::Utc;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn node(path: &str, ghost: bool) -> Node {
        Node {
            id: "n1".to_string(),
            kind: NodeKind::Note,
            title: "A".to_string(),
            path: path.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            content_hash: None,
            metadata: HashMap::new(),
            ghost,
        }
    }

    #[test]
    fn appends_link_when_no_links_heading_present() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# A\n\nSome body text.\n").unwrap();
        let outcome = write_back(dir.path(), &node("a.md", false), "Beta");
        assert_eq!(outcome.status, WritebackStatus::Written);
        let contents = std::fs::read_to_string(dir.path().join("a.md")).unwrap();
        assert!(contents.contains("- [[Beta]]"));
    }

    #[test]
    fn inserts_under_existing_links_heading() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# A\n\n## Links\n- [[Gamma]]\n\nMore text.\n").unwrap();
        let outcome = write_back(dir.path(), &node("a.md", false), "Beta");
        assert_eq!(outcome.status, WritebackStatus::Written);
        let contents = std::fs::read_to_string(dir.path().join("a.md")).unwrap();
        let links_pos = contents.find("## Links").unwrap();
        let beta_pos = contents.find("[[Beta]]").unwrap();
        let gamma_pos = contents.find("[[Gamma]]").unwrap();
        assert!(links_pos < beta_pos && beta_pos < gamma_pos);
    }

    #[test]
    fn skips_when_link_already_present() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# A\n\nSee [[Beta]] already.\n").unwrap();
        let outcome = write_back(dir.path(), &node("a.md", false), "Beta");
        assert_eq!(outcome.status, WritebackStatus::Skipped);
        assert_eq!(outcome.reason.as_deref(), Some("Link already exists"));
    }

    #[test]
    fn skips_ghost_source() {
        let dir = tempdir().unwrap();
        let outcome = write_back(dir.path(), &node("a.md", true), "Beta");
        assert_eq!(outcome.status, WritebackStatus::Skipped);
    }

    #[test]
    fn fails_on_unreadable_file() {
        let dir = tempdir().unwrap();
        let outcome = write_back(dir.path(), &node("missing.md", false), "Beta");
        assert_eq!(outcome.status, WritebackStatus::Failed);
    }

    #[test]
    fn preamble_is_never_touched() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "---\ntitle: A\n---\nBody text.\n").unwrap();
        write_back(dir.path(), &node("a.md", false), "Beta");
        let contents = std::fs::read_to_string(dir.path().join("a.md")).unwrap();
        assert!(contents.starts_with("---\ntitle: A\n---\n"));
    }
}
