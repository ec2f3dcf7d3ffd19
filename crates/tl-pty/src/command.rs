use std::path::PathBuf;

/// Splits a command string into argv with POSIX-like quoting: single and
/// double quotes pair, whitespace separates, quoted whitespace is preserved.
/// Quote characters themselves are dropped.
pub fn split_command(command: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in command.chars() {
        match ch {
            '"' | '\'' => match quote {
                Some(q) if q == ch => quote = None,
                Some(_) => current.push(ch),
                None => quote = Some(ch),
            },
            ' ' | '\t' => {
                if quote.is_some() {
                    current.push(ch);
                } else if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_workdir(workdir: &str) -> PathBuf {
    if let Some(rest) = workdir.strip_prefix('~') {
        if rest.is_empty() {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        } else if let Some(tail) = rest.strip_prefix('/') {
            if let Some(home) = dirs::home_dir() {
                return home.join(tail);
            }
        }
    }
    PathBuf::from(workdir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(split_command("echo hello world"), ["echo", "hello", "world"]);
    }

    #[test]
    fn collapses_repeated_whitespace() {
        assert_eq!(split_command("ls   -la\t/tmp"), ["ls", "-la", "/tmp"]);
    }

    #[test]
    fn preserves_double_quoted_whitespace() {
        assert_eq!(
            split_command(r#"echo "hello world" done"#),
            ["echo", "hello world", "done"]
        );
    }

    #[test]
    fn preserves_single_quoted_whitespace() {
        assert_eq!(split_command("echo 'a b c'"), ["echo", "a b c"]);
    }

    #[test]
    fn nested_quote_chars_kept_literal() {
        assert_eq!(split_command(r#"echo "it's fine""#), ["echo", "it's fine"]);
        assert_eq!(split_command(r#"echo 'say "hi"'"#), ["echo", r#"say "hi""#]);
    }

    #[test]
    fn empty_and_blank_commands_yield_nothing() {
        assert!(split_command("").is_empty());
        assert!(split_command("   \t ").is_empty());
    }

    #[test]
    fn unterminated_quote_keeps_remainder() {
        assert_eq!(split_command("echo 'oops"), ["echo", "oops"]);
    }

    #[test]
    fn claude_resume_tokenizes() {
        assert_eq!(split_command("claude --resume"), ["claude", "--resume"]);
    }

    #[test]
    fn tilde_alone_expands_to_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_workdir("~"), home);
        }
    }

    #[test]
    fn tilde_slash_expands_under_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_workdir("~/work/repo"), home.join("work/repo"));
        }
    }

    #[test]
    fn plain_paths_pass_through() {
        assert_eq!(expand_workdir("/tmp/x"), PathBuf::from("/tmp/x"));
        assert_eq!(expand_workdir("relative/dir"), PathBuf::from("relative/dir"));
    }

    #[test]
    fn tilde_user_form_is_not_expanded() {
        assert_eq!(expand_workdir("~bob/x"), PathBuf::from("~bob/x"));
    }
}
