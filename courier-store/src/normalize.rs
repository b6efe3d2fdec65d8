use courier_core::types::Channel;

/// Keep a leading '+' and digits only.
fn normalize_phone(raw: &str) -> String {
    let mut out = String::new();
    for c in raw.chars() {
        if (c == '+' && out.is_empty()) || c.is_ascii_digit() {
            out.push(c);
        }
    }
    out
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

pub fn normalize_addr(channel: Channel, value: &str) -> String {
    match channel {
        Channel::Sms | Channel::Mms => normalize_phone(value),
        Channel::Email => normalize_email(value),
    }
}

/// Sorted, normalized participant pair. Conversations are unordered: A→B and
/// B→A land in the same thread.
pub fn normalized_pair(channel: Channel, from: &str, to: &str) -> (String, String) {
    let nf = normalize_addr(channel, from);
    let nt = normalize_addr(channel, to);
    if nf <= nt {
        (nf, nt)
    } else {
        (nt, nf)
    }
}

/// Durable conversation key: channel plus the sorted endpoint pair.
pub fn conversation_key(channel: Channel, from: &str, to: &str) -> String {
    let (a, b) = normalized_pair(channel, from, to);
    format!("{}:{}<->{}", channel, a, b)
}
