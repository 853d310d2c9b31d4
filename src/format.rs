const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;

/// Human readable byte size.
///
/// ```
/// use ingest_server::format::format_bytes;
///
/// assert_eq!(format_bytes(11), "11 bytes");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    match bytes {
        0..KB => format!("{bytes} bytes"),
        KB..MB => format!("{:.2} KB", bytes as f64 / KB as f64),
        MB..GB => format!("{:.2} MB", bytes as f64 / MB as f64),
        _ => format!("{:.2} GB", bytes as f64 / GB as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_boundaries() {
        assert_eq!(format_bytes(0), "0 bytes");
        assert_eq!(format_bytes(1023), "1023 bytes");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(MB - 1), "1024.00 KB");
        assert_eq!(format_bytes(MB), "1.00 MB");
        assert_eq!(format_bytes(GB), "1.00 GB");
        assert_eq!(format_bytes(3 * GB / 2), "1.50 GB");
    }
}
