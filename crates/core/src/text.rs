/// Tidies a model completion before it is posted: drops characters outside
/// printable ASCII, a leading self-address such as `perch:` and any quotes
/// or backticks wrapping the reply.
pub fn clean_reply(response: &str, nick: &str) -> String {
    let printable: String = response.chars().filter(|c| (' '..='~').contains(c)).collect();

    let trimmed = printable.trim_start();
    let first_word = trimmed.split_whitespace().next().unwrap_or_default();
    let without_nick = if !nick.is_empty()
        && first_word.to_ascii_lowercase().contains(&nick.to_ascii_lowercase())
    {
        &trimmed[first_word.len()..]
    } else {
        trimmed
    };

    without_nick.trim().trim_matches(|c| matches!(c, '\'' | '"' | '`')).to_string()
}

/// Truncates to at most `max` characters on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Case-insensitive check for the bot nickname inside message content.
pub fn mentions(content: &str, nick: &str) -> bool {
    !nick.is_empty() && content.to_lowercase().contains(&nick.to_lowercase())
}

/// One `[timestamp] <nick> text` line of a plain-text chat log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine<'a> {
    pub timestamp: &'a str,
    pub nick: &'a str,
    pub text: &'a str,
}

pub fn parse_log_line(line: &str) -> Option<LogLine<'_>> {
    let rest = line.strip_prefix('[')?;
    let (timestamp, rest) = rest.split_once("] <")?;
    let (nick, text) = rest.split_once("> ")?;
    if nick.is_empty() || nick.contains(char::is_whitespace) {
        return None;
    }
    Some(LogLine { timestamp, nick, text: text.trim_end_matches(['\r', '\n']) })
}
