use std::borrow::Cow;

use crate::Invocation;

/// Quotes `word` for a POSIX shell.
///
/// Words made only of characters that the shell never interprets are
/// returned unchanged so logged command lines stay readable. Everything else
/// is wrapped in single quotes, with embedded single quotes rendered as
/// `'\''`.
#[must_use]
pub fn quote(word: &str) -> Cow<'_, str> {
    if !word.is_empty() && word.bytes().all(is_shell_safe) {
        return Cow::Borrowed(word);
    }

    Cow::Owned(format!("'{}'", word.replace('\'', "'\\''")))
}

const fn is_shell_safe(byte: u8) -> bool {
    matches!(
        byte,
        b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'/' | b'@' | b':' | b'=' | b'%' | b'+' | b','
    )
}

/// Renders a single invocation as a quoted shell command line.
#[must_use]
pub fn shell_words(invocation: &Invocation) -> String {
    let mut rendered = quote(&invocation.program().to_string_lossy()).into_owned();
    for arg in invocation.arguments() {
        rendered.push(' ');
        rendered.push_str(&quote(&arg.to_string_lossy()));
    }
    rendered
}

/// Enables `pipefail` where the shell has it. Tried in a subshell first
/// because a failing `set` would end a POSIX shell that lacks the option.
const PIPEFAIL: &str = "(set -o pipefail) 2>/dev/null && set -o pipefail; ";

/// Renders a sequence of invocations as one shell pipeline (`a | b | c`).
///
/// Multi-stage pipelines run under `pipefail`, so the composite exits with
/// the status of the last stage that failed rather than that of the final
/// stage alone. A single stage is rendered as is.
#[must_use]
pub fn shell_pipeline(stages: &[Invocation]) -> String {
    let joined = stages
        .iter()
        .map(shell_words)
        .collect::<Vec<_>>()
        .join(" | ");
    if stages.len() > 1 {
        format!("{PIPEFAIL}{joined}")
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_words_are_left_alone() {
        assert_eq!(quote("tank/data@task-2024.01.02-03.04.05"), "tank/data@task-2024.01.02-03.04.05");
        assert_eq!(quote("-Lce"), "-Lce");
    }

    #[test]
    fn words_with_spaces_are_single_quoted() {
        assert_eq!(quote("tank/my data"), "'tank/my data'");
    }

    #[test]
    fn embedded_single_quotes_are_escaped() {
        assert_eq!(quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn empty_word_becomes_empty_quotes() {
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn shell_metacharacters_are_neutralised() {
        assert_eq!(quote("a;rm -rf /"), "'a;rm -rf /'");
        assert_eq!(quote("$(id)"), "'$(id)'");
        assert_eq!(quote("x|y"), "'x|y'");
    }

    #[test]
    fn pipeline_joins_stages_with_bars() {
        let listen = Invocation::new("nc").arg("-l").arg("9000");
        let recv = Invocation::new("zfs")
            .arg("receive")
            .arg("-s")
            .arg("tank/my backup");

        assert_eq!(
            shell_pipeline(&[listen, recv]),
            "(set -o pipefail) 2>/dev/null && set -o pipefail; nc -l 9000 | zfs receive -s 'tank/my backup'"
        );
    }

    #[test]
    fn single_stage_has_no_preamble() {
        let list = Invocation::new("zfs").args(["list", "tank"]);
        assert_eq!(shell_pipeline(&[list]), "zfs list tank");
    }
}
