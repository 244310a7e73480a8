//! Splits message bodies into SMS-sized parts.
//!
//! Bodies made only of GSM 03.38 characters are measured in septets (160 per
//! single message, 153 per part of a concatenated one; extension characters
//! cost two). Anything else is sent as UCS-2 (70 / 67 UTF-16 units).

const GSM_BASIC: &str = "@£$¥èéùìòÇ\nØø\rÅåΔ_ΦΓΛΩΠΨΣΘΞÆæßÉ !\"#¤%&'()*+,-./0123456789:;<=>?\
¡ABCDEFGHIJKLMNOPQRSTUVWXYZÄÖÑÜ§¿abcdefghijklmnopqrstuvwxyzäöñüà";
const GSM_EXTENSION: &str = "^{}\\[~]|€\u{000C}";

pub const GSM_SINGLE_LIMIT: usize = 160;
pub const GSM_PART_LIMIT: usize = 153;
pub const UCS2_SINGLE_LIMIT: usize = 70;
pub const UCS2_PART_LIMIT: usize = 67;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Gsm7,
    Ucs2,
}

fn gsm_cost(c: char) -> Option<usize> {
    if GSM_BASIC.contains(c) {
        Some(1)
    } else if GSM_EXTENSION.contains(c) {
        Some(2)
    } else {
        None
    }
}

pub fn encoding_for(body: &str) -> Encoding {
    if body.chars().all(|c| gsm_cost(c).is_some()) {
        Encoding::Gsm7
    } else {
        Encoding::Ucs2
    }
}

fn cost(c: char, encoding: Encoding) -> usize {
    match encoding {
        Encoding::Gsm7 => gsm_cost(c).unwrap_or(1),
        Encoding::Ucs2 => c.len_utf16(),
    }
}

/// Split `body` into parts. Always returns at least one part; an empty body
/// yields a single empty part.
pub fn split(body: &str) -> Vec<String> {
    let encoding = encoding_for(body);
    let (single, part_limit) = match encoding {
        Encoding::Gsm7 => (GSM_SINGLE_LIMIT, GSM_PART_LIMIT),
        Encoding::Ucs2 => (UCS2_SINGLE_LIMIT, UCS2_PART_LIMIT),
    };

    let total: usize = body.chars().map(|c| cost(c, encoding)).sum();
    if total <= single {
        return vec![body.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut used = 0;
    for c in body.chars() {
        let c_cost = cost(c, encoding);
        if used + c_cost > part_limit {
            parts.push(std::mem::take(&mut current));
            used = 0;
        }
        current.push(c);
        used += c_cost;
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}
