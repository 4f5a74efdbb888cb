use anyhow::{Context, Result};
use std::io::{self, IsTerminal};
use zeroize::Zeroizing;

/// Command-line value meaning "read it from stdin or a hidden prompt".
pub const FROM_STDIN: &str = "-";

/// Resolves a secret argument, reading it interactively when it is `-`.
///
/// Keeps API keys out of the shell history and the process list.
pub fn resolve_secret(value: String, label: &str) -> Result<Zeroizing<String>> {
    if value == FROM_STDIN {
        read_secret(label)
    } else {
        Ok(Zeroizing::new(value))
    }
}

/// Reads one secret line.
///
/// An empty line is returned as-is; for `set` it clears the stored key.
pub fn read_secret(label: &str) -> Result<Zeroizing<String>> {
    //  stdin (Pipeline)
    //  printf "%s\n" "$OPENAI_API_KEY" | reelkeys --user u1 set --openai -
    if !io::stdin().is_terminal() {
        let mut buf = Zeroizing::new(String::new());
        io::stdin()
            .read_line(&mut buf)
            .with_context(|| format!("failed to read {label} from stdin"))?;
        trim_newline(&mut buf);
        return Ok(buf);
    }

    //  Interactive (TTY)
    let value = rpassword::prompt_password(format!("{label}: "))
        .with_context(|| format!("failed to read {label}"))?;
    Ok(Zeroizing::new(value))
}

fn trim_newline(s: &mut String) {
    while s.ends_with('\n') || s.ends_with('\r') {
        s.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_values_pass_through() {
        let value = resolve_secret("sk-abc123".into(), "OpenAI key").unwrap();
        assert_eq!(value.as_str(), "sk-abc123");
    }

    #[test]
    fn trailing_line_endings_are_trimmed() {
        let mut s = String::from("sk-abc123\r\n");
        trim_newline(&mut s);
        assert_eq!(s, "sk-abc123");
    }
}
