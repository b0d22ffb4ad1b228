// Ref: rtl_433 `-F syslog` emits `<PRI>VERSION TIMESTAMP HOST APP PID MSGID SDATA PAYLOAD`
const SYSLOG_FIELDS: usize = 8;

const BOM: char = '\u{feff}';

pub fn strip_framing(line: &str) -> &str {
    if !line.starts_with('<') {
        return line;
    }

    let mut rest = line;
    let mut last = line;
    for _ in 0..SYSLOG_FIELDS - 1 {
        let trimmed = rest.trim_start();
        if trimmed.is_empty() {
            break;
        }

        let end = trimmed
            .find(char::is_whitespace)
            .unwrap_or(trimmed.len());
        last = &trimmed[..end];
        rest = &trimmed[end..];
    }

    let payload = rest.trim_start();
    let payload = if payload.is_empty() { last } else { payload };

    payload.trim_start_matches(BOM)
}
