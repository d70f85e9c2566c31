use std::path::is_separator;

/// Folder used when the recipient yields nothing usable.
pub const UNKNOWN_FOLDER: &str = "Unknown";

/// Removes the command keyword from a protocol line, then the whitespace and
/// angle brackets around the address.
pub fn clean_email_string<'a>(line: &'a str, prefix: &str) -> &'a str {
    let address = line.strip_prefix(prefix).unwrap_or(line).trim();
    address.trim_start_matches('<').trim_end_matches('>').trim()
}

/// Turns an envelope recipient into a single, flat folder name.
///
/// Path separators become spaces so the recipient can never reach outside
/// the output root. The address is otherwise kept verbatim.
pub fn recipient_folder_name(address: &str) -> String {
    let name: String = address
        .chars()
        .map(|c| if is_separator(c) { ' ' } else { c })
        .collect();

    if name.is_empty() {
        UNKNOWN_FOLDER.to_string()
    } else {
        name
    }
}

/// Escapes non-printable characters so client input is safe to log.
pub fn safe_log_string(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\0' => result.push_str("\\0"),
            '\r' => result.push_str("\\r"),
            '\n' => result.push_str("\\n"),
            '\x01'..='\x08' | '\x0b' | '\x0c' | '\x0e'..='\x1f' | '\x7f' => {
                result.push_str(&format!("\\x{:02x}", c as u32));
            }
            _ if c.is_ascii_graphic() || c == ' ' || c == '\t' => result.push(c),
            _ => result.push_str(&format!("\\u{{{:x}}}", c as u32)),
        }
    }
    result
}
