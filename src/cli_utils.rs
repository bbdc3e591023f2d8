/// CLI utilities for consistent output formatting
use std::io::IsTerminal;

/// Prefix for user-facing messages on stderr
///
/// Bright cyan when stderr is a TTY, plain text otherwise.
pub fn werk_prefix() -> &'static str {
    if std::io::stderr().is_terminal() {
        "\x1b[96m[werk]\x1b[0m"
    } else {
        "[werk]"
    }
}
