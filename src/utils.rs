/// Classic 16-bytes-per-line dump of `buffer[start..=end]`, addressed from
/// `start`.
pub fn hexdump(buffer: &[u8], start: u16, end: u16) -> String {
    let mut str = String::new();
    if buffer.is_empty() {
        return str;
    }
    let end = end.min(buffer.len().saturating_sub(1) as u16);
    let mut addr = start as usize;
    while addr <= end as usize {
        let mut line = format!(">{:04X}: ", addr);
        let mut chars = String::new();
        for _ in 0..16 {
            if addr > end as usize {
                break;
            }
            let byte = buffer[addr];
            line.push_str(&format!("{:02X} ", byte));
            let c = byte as char;
            chars.push(if c.is_ascii_graphic() || c == ' ' {
                c
            } else {
                '.'
            });
            addr += 1;
        }

        str.push_str(&format!("{:<55} {}\n", line, chars));
    }

    str
}
