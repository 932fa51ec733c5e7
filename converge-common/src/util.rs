//! Shared string helpers for logs and diagnostics.

/// Upper bound, in characters, for snapshot summaries kept in outcomes.
pub const MAX_SUMMARY_CHARS: usize = 2048;

/// Number of trailing stderr lines kept in command errors.
pub const STDERR_TAIL_LINES: usize = 20;

fn find_value_end(s: &str) -> usize {
    let mut end = 0;
    let mut in_quote = None;
    let mut escaped = false;

    for c in s.chars() {
        let char_len = c.len_utf8();

        if escaped {
            escaped = false;
            end += char_len;
            continue;
        }

        if c == '\\' {
            escaped = true;
            end += char_len;
            continue;
        }

        if let Some(q) = in_quote {
            if c == q {
                in_quote = None;
            }
            end += char_len;
            continue;
        }

        if c == '"' || c == '\'' {
            in_quote = Some(c);
            end += char_len;
            continue;
        }

        if c.is_whitespace() {
            break;
        }

        end += char_len;
    }
    end
}

/// Mask credentials in a command line before it is logged.
///
/// Keeps the flag or variable name and replaces its value with `***`.
pub fn mask_sensitive_command(cmd: &str) -> String {
    let patterns = [
        // Environment assignments
        ("KUBEADMIN_PASSWORD=", "KUBEADMIN_PASSWORD=***"),
        ("AWS_SECRET_ACCESS_KEY=", "AWS_SECRET_ACCESS_KEY=***"),
        ("AWS_ACCESS_KEY_ID=", "AWS_ACCESS_KEY_ID=***"),
        ("ACCESS_TOKEN=", "ACCESS_TOKEN=***"),
        ("API_KEY=", "API_KEY=***"),
        ("PASSWORD=", "PASSWORD=***"),
        ("SECRET=", "SECRET=***"),
        ("TOKEN=", "TOKEN=***"),
        // Cluster CLI flags
        ("--token ", "--token ***"),
        ("--token=", "--token=***"),
        ("--password ", "--password ***"),
        ("--password=", "--password=***"),
        ("--client-key-data=", "--client-key-data=***"),
        ("--client-key ", "--client-key ***"),
        ("--client-key=", "--client-key=***"),
        ("--encryption-key=", "--encryption-key=***"),
        // HTTP headers passed to curl
        ("Bearer ", "Bearer ***"),
    ];

    let mut result = cmd.to_string();
    for (pattern, replacement) in patterns {
        // Resume after each replacement; the replacement contains the pattern.
        let mut search_start = 0;
        while search_start < result.len() {
            let Some(start) = result[search_start..].find(pattern) else {
                break;
            };
            let abs_start = search_start + start;
            if !at_token_boundary(&result, abs_start) {
                search_start = abs_start + pattern.len();
                continue;
            }
            let value_start = abs_start + pattern.len();
            let value_end = value_start + find_value_end(&result[value_start..]);

            result = format!(
                "{}{}{}",
                &result[..abs_start],
                replacement,
                &result[value_end..]
            );
            search_start = abs_start + replacement.len();
        }
    }

    result
}

/// A pattern only counts at the start of a word, so `GITHUB_TOKEN=` is not
/// half-masked by the `TOKEN=` rule after its own rule already ran.
fn at_token_boundary(s: &str, idx: usize) -> bool {
    idx == 0
        || s[..idx]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_whitespace() || c == '"' || c == '\'')
}

/// Cut `s` to at most `max_chars` characters, marking the cut.
pub fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        None => s.to_string(),
        Some((byte_idx, _)) => {
            let omitted = s[byte_idx..].chars().count();
            format!("{}… ({} more chars)", &s[..byte_idx], omitted)
        }
    }
}

/// The last `n` non-empty lines of `s`.
pub fn tail_lines(s: &str, n: usize) -> String {
    let lines: Vec<&str> = s.lines().filter(|l| !l.trim().is_empty()).collect();
    let skip = lines.len().saturating_sub(n);
    lines[skip..].join("\n")
}
