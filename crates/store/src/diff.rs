//! Line diffing between config versions.
//!
//! `diff_lines` is a longest-common-subsequence diff over opaque lines:
//! lines only in `a` are prefixed `-`, lines only in `b` are prefixed
//! `+`, and shared lines keep two leading spaces. Because the LCS
//! matches identical lines across unrelated sections, reordered
//! identical lines may be reported as unchanged; callers wanting a
//! section-accurate signal use `section_changes` alongside the diff.

use rk_domain::doc::AgentConfigDoc;
use rk_domain::error::Result;

/// Unified-style LCS line diff.
///
/// When either input exceeds `max_lines`, returns a one-line summary
/// instead of a body.
pub fn diff_lines(a: &str, b: &str, max_lines: usize) -> String {
    let a_lines: Vec<&str> = a.lines().collect();
    let b_lines: Vec<&str> = b.lines().collect();

    if a_lines.len() > max_lines || b_lines.len() > max_lines {
        return format!(
            "diff too large to render ({} vs {} lines, limit {max_lines})",
            a_lines.len(),
            b_lines.len()
        );
    }

    let table = lcs_table(&a_lines, &b_lines);
    let mut out = Vec::with_capacity(a_lines.len() + b_lines.len());
    backtrack(&table, &a_lines, &b_lines, &mut out);
    out.join("\n")
}

/// DP table where `table[i][j]` is the LCS length of `a[i..]` / `b[j..]`.
fn lcs_table(a: &[&str], b: &[&str]) -> Vec<Vec<u32>> {
    let mut table = vec![vec![0u32; b.len() + 1]; a.len() + 1];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            table[i][j] = if a[i] == b[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }
    table
}

fn backtrack(table: &[Vec<u32>], a: &[&str], b: &[&str], out: &mut Vec<String>) {
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            out.push(format!("  {}", a[i]));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            out.push(format!("-{}", a[i]));
            i += 1;
        } else {
            out.push(format!("+{}", b[j]));
            j += 1;
        }
    }
    while i < a.len() {
        out.push(format!("-{}", a[i]));
        i += 1;
    }
    while j < b.len() {
        out.push(format!("+{}", b[j]));
        j += 1;
    }
}

/// Which logical sections differ between two parseable documents.
///
/// Marshals `persona`, `instructions`, and the rest independently and
/// byte-compares each. Returns section names in a fixed order.
pub fn section_changes(a_yaml: &str, b_yaml: &str) -> Result<Vec<&'static str>> {
    let a = AgentConfigDoc::from_yaml(a_yaml)?;
    let b = AgentConfigDoc::from_yaml(b_yaml)?;
    let fa = a.section_fingerprints()?;
    let fb = b.section_fingerprints()?;

    let mut changed = Vec::new();
    if fa.persona != fb.persona {
        changed.push("persona");
    }
    if fa.instructions != fb.instructions {
        changed.push("instructions");
    }
    if fa.rest != fb.rest {
        changed.push("rest");
    }
    Ok(changed)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
