/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod delivery;

/// Boil a server reply down to one printable line for the per-recipient
/// diagnostic column.
pub fn trim_response(code: i32, response: &str) -> String {
    if !(100..=999).contains(&code) {
        return response.lines().next().unwrap_or("").trim().to_string();
    }
    let cleaned: String = response
        .chars()
        .map(|c| if c == '\n' || !c.is_control() { c } else { ' ' })
        .collect();
    let code_str = code.to_string();
    let line = cleaned
        .lines()
        .find(|line| line.contains(&code_str))
        .or_else(|| cleaned.lines().next())
        .unwrap_or("");
    line.trim().to_string()
}

/// Percent-encode a value for the List-Unsubscribe URL.
pub fn url_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_finds_the_response_line() {
        let raw = "220 mail.example.com ESMTP\n250 ok\n550 5.1.1 no such user\n";
        assert_eq!(trim_response(550, raw), "550 5.1.1 no such user");
        assert_eq!(trim_response(999, "\x01garbage"), " garbage".trim());
    }

    #[test]
    fn url_escaping() {
        assert_eq!(url_escape("My Room"), "My%20Room");
        assert_eq!(url_escape("a@b.c"), "a%40b.c");
        assert_eq!(url_escape("plain-text_1.2~"), "plain-text_1.2~");
    }
}
