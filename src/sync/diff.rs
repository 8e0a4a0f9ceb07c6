//! Line diff between two text documents

/// One line of a diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine<'a> {
    Same(&'a str),
    Removed(&'a str),
    Added(&'a str),
}

/// Longest-common-subsequence line diff from `old` to `new`
pub fn line_diff<'a>(old: &'a str, new: &'a str) -> Vec<DiffLine<'a>> {
    let a: Vec<&str> = old.lines().collect();
    let b: Vec<&str> = new.lines().collect();

    // lcs[i][j] = LCS length of a[i..] and b[j..]
    let mut lcs = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut out = Vec::with_capacity(a.len().max(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            out.push(DiffLine::Same(a[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            out.push(DiffLine::Removed(a[i]));
            i += 1;
        } else {
            out.push(DiffLine::Added(b[j]));
            j += 1;
        }
    }
    out.extend(a[i..].iter().map(|line| DiffLine::Removed(line)));
    out.extend(b[j..].iter().map(|line| DiffLine::Added(line)));
    out
}

/// Render a diff with `---`/`+++` headers; empty when the texts match
pub fn render_diff(old_label: &str, new_label: &str, old: &str, new: &str) -> String {
    if old == new {
        return String::new();
    }

    let lines = line_diff(old, new);
    if lines.iter().all(|l| matches!(l, DiffLine::Same(_))) {
        // Only trailing newline differences
        return String::new();
    }

    let mut out = format!("--- {old_label}\n+++ {new_label}\n");
    for line in lines {
        match line {
            DiffLine::Same(text) => out.push_str(&format!(" {text}\n")),
            DiffLine::Removed(text) => out.push_str(&format!("-{text}\n")),
            DiffLine::Added(text) => out.push_str(&format!("+{text}\n")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_is_empty() {
        assert_eq!(render_diff("local", "remote", "a\nb\n", "a\nb\n"), "");
        assert_eq!(render_diff("local", "remote", "a\nb", "a\nb\n"), "");
    }

    #[test]
    fn test_changed_line() {
        let diff = line_diff("a\nb\nc\n", "a\nx\nc\n");
        assert_eq!(
            diff,
            vec![
                DiffLine::Same("a"),
                DiffLine::Removed("b"),
                DiffLine::Added("x"),
                DiffLine::Same("c"),
            ]
        );
    }

    #[test]
    fn test_render_headers() {
        let out = render_diff("local/login", "remote/login", "a\n", "a\nb\n");
        assert_eq!(out, "--- local/login\n+++ remote/login\n a\n+b\n");
    }
}
