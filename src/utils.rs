use std::str::FromStr;
use tokio::time::Duration;

/// Parses durations like `500ms`, `30s`, `10m`, `5h`, `3d` or chained
/// components such as `1m30s`.
pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let mut rest = s.trim();
    if rest.is_empty() {
        return Err("Duration string cannot be empty".to_string());
    }

    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let split = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let (digits, tail) = rest.split_at(split);
        let value = u64::from_str(digits)
            .map_err(|_| format!("Invalid numeric value in duration: '{}'", digits))?;

        let split = tail.find(|c: char| c.is_ascii_digit()).unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(split);
        total += match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3_600),
            "d" => Duration::from_secs(value * 86_400),
            other => {
                return Err(format!(
                    "Unknown duration unit: '{}'. Use 'ms', 's', 'm', 'h', or 'd'.",
                    other
                ))
            }
        };
        rest = tail;
    }

    Ok(total)
}

/// Formats a duration the way it is accepted by [`parse_duration_string`],
/// e.g. `1m30s` or `250ms`.
pub fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    if total_ms == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let seconds = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;

    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    if seconds > 0 {
        out.push_str(&format!("{}s", seconds));
    }
    if millis > 0 {
        out.push_str(&format!("{}ms", millis));
    }
    out
}

/// Splits `list` on `separator`, treating a backslash-escaped separator as
/// a literal character. Items are trimmed and empty items dropped.
///
/// `"Accept:a\\,b,Host:x"` splits into `["Accept:a,b", "Host:x"]`.
pub fn split_escaped(list: &str, separator: char) -> Vec<String> {
    let mut items = Vec::new();
    let mut item = String::new();
    let mut escaped = false;

    for ch in list.chars() {
        if escaped {
            if ch != separator {
                item.push('\\');
            }
            item.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == separator {
            push_trimmed(&mut items, &item);
            item.clear();
        } else {
            item.push(ch);
        }
    }
    if escaped {
        item.push('\\');
    }
    push_trimmed(&mut items, &item);

    items
}

fn push_trimmed(items: &mut Vec<String>, item: &str) {
    let item = item.trim();
    if !item.is_empty() {
        items.push(item.to_string());
    }
}
