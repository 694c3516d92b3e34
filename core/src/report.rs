//! Whitelist report rendering.

use crate::identifier::UserKey;

pub const REPORT_FILE_NAME: &str = "whitelist.csv";
const HEADER: &str = "username";

/// Render the whitelist as a one-column CSV document.
pub fn render_whitelist_csv(users: &[UserKey]) -> String {
    let mut out = String::with_capacity(HEADER.len() + 1 + users.len() * 16);
    out.push_str(HEADER);
    out.push('\n');
    for user in users {
        out.push_str(&csv_field(user.as_str()));
        out.push('\n');
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
